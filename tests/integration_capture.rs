#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

use anyhow::Result;
use forensic_capture::CaptureError;
use forensic_capture::config::Config;
use forensic_capture::crawler::CaptureController;
use forensic_capture::database::Database;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config() -> Config {
    let mut config = Config::default();
    config.capture.max_depth = 1;
    config.capture.max_links_per_page = 10;
    config.capture.link_delay_min_ms = 0;
    config.capture.link_delay_max_ms = 0;
    config.fetch.max_attempts = 1;
    config.fetch.retry_delay_min_ms = 0;
    config.fetch.retry_delay_max_ms = 0;
    config
}

fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 4 % 256) as u8, (y * 4 % 256) as u8, (x * y * 7 % 256) as u8])
    }));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, format)
        .expect("test image should encode");
    bytes.into_inner()
}

async fn mount_html(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

async fn mount_bytes(server: &MockServer, route: &str, content_type: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body)
                .insert_header("content-type", content_type),
        )
        .mount(server)
        .await;
}

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

#[tokio::test]
async fn capture_stores_valid_images_and_follows_one_level() -> Result<()> {
    let server = MockServer::start().await;

    mount_html(
        &server,
        "/a",
        r#"<html><body>
            <h1>Page A</h1>
            <img src="/good.jpg" alt="good">
            <img src="/garbage.jpg" alt="broken">
            <a href="/b">to b</a>
        </body></html>"#,
    )
    .await;
    mount_html(
        &server,
        "/b",
        r#"<p>Page B</p><img src="/b.png"><a href="/c">to c</a>"#,
    )
    .await;
    mount_bytes(
        &server,
        "/good.jpg",
        "image/jpeg",
        encoded_image(64, 48, ImageFormat::Jpeg),
    )
    .await;
    mount_bytes(&server, "/garbage.jpg", "image/jpeg", vec![0x5a; 50]).await;
    mount_bytes(
        &server,
        "/b.png",
        "image/png",
        encoded_image(40, 40, ImageFormat::Png),
    )
    .await;

    // Depth is exhausted at /b, so /c must never be requested
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>c</p>"))
        .expect(0)
        .mount(&server)
        .await;

    let (_temp_dir, database) = create_test_database().await?;
    let controller = CaptureController::new(database.clone(), &test_config());
    let root = Url::parse(&format!("{}/a", server.uri()))?;

    let report = controller.capture(&root, 0).await?;

    assert_eq!(report.stats.pages_captured, 2);
    assert_eq!(report.stats.images_stored, 2);
    assert_eq!(report.stats.images_skipped, 1);

    let page_a = database
        .latest_snapshot(root.as_str())
        .await?
        .expect("snapshot for /a");
    assert_eq!(Some(page_a.id), report.root_snapshot_id());
    assert!(page_a.text.contains("Page A"));
    assert_eq!(page_a.fingerprint.len(), 64);
    assert_eq!(page_a.resolved_ip, "127.0.0.1");

    let images_a = database.images_for_snapshot(page_a.id).await?;
    assert_eq!(images_a.len(), 1);
    assert_eq!(images_a[0].position_index, 0);
    assert_eq!(images_a[0].image_url, format!("{}/good.jpg", server.uri()));
    assert_eq!(images_a[0].phash.as_deref().map(str::len), Some(16));

    let thumbnail = images_a[0].thumbnail.as_deref().expect("thumbnail stored");
    let thumbnail = image::load_from_memory_with_format(thumbnail, ImageFormat::Jpeg)?;
    assert_eq!((thumbnail.width(), thumbnail.height()), (64, 48));

    let page_b = database
        .latest_snapshot(&format!("{}/b", server.uri()))
        .await?
        .expect("snapshot for /b");
    let images_b = database.images_for_snapshot(page_b.id).await?;
    assert_eq!(images_b.len(), 1);
    assert_eq!(images_b[0].image_url, format!("{}/b.png", server.uri()));

    assert!(
        database
            .latest_snapshot(&format!("{}/c", server.uri()))
            .await?
            .is_none()
    );
    Ok(())
}

#[tokio::test]
async fn recapture_keeps_every_version() -> Result<()> {
    let server = MockServer::start().await;
    mount_html(&server, "/", "<p>unchanged content</p>").await;

    let (_temp_dir, database) = create_test_database().await?;
    let controller = CaptureController::new(database.clone(), &test_config());
    let root = Url::parse(&format!("{}/", server.uri()))?;

    let first = controller.capture(&root, 0).await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = controller.capture(&root, 0).await?;

    assert_ne!(first.root_snapshot_id(), second.root_snapshot_id());

    let history = database.snapshot_history(root.as_str()).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].fingerprint, history[1].fingerprint);
    assert!(history[0].captured_at < history[1].captured_at);
    Ok(())
}

#[tokio::test]
async fn page_without_images_still_gets_a_snapshot() -> Result<()> {
    let server = MockServer::start().await;
    mount_html(&server, "/plain", "<p>no pictures here</p>").await;

    let (_temp_dir, database) = create_test_database().await?;
    let controller = CaptureController::new(database.clone(), &test_config());
    let root = Url::parse(&format!("{}/plain", server.uri()))?;

    let report = controller.capture(&root, 0).await?;

    assert_eq!(report.snapshot_ids.len(), 1);
    let snapshot_id = report.root_snapshot_id().expect("root stored");
    assert!(database.images_for_snapshot(snapshot_id).await?.is_empty());
    assert_eq!(database.statistics().await?.snapshots, 1);
    Ok(())
}

#[tokio::test]
async fn unreachable_root_stores_nothing() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (_temp_dir, database) = create_test_database().await?;
    let controller = CaptureController::new(database.clone(), &test_config());
    let root = Url::parse(&format!("{}/down", server.uri()))?;

    let result = controller.capture(&root, 0).await;

    assert!(matches!(result, Err(CaptureError::Fetch(_))));
    assert_eq!(database.statistics().await?.snapshots, 0);
    Ok(())
}

#[tokio::test]
async fn starting_depth_counts_toward_the_limit() -> Result<()> {
    let server = MockServer::start().await;
    mount_html(&server, "/", r#"<p>root</p><a href="/next">next</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/next"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>next</p>"))
        .expect(0)
        .mount(&server)
        .await;

    let (_temp_dir, database) = create_test_database().await?;
    let controller = CaptureController::new(database.clone(), &test_config());
    let root = Url::parse(&format!("{}/", server.uri()))?;

    let report = controller.capture(&root, 1).await?;

    assert_eq!(report.stats.pages_captured, 1);
    Ok(())
}
