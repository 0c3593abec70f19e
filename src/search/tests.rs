use super::*;
use crate::database::sqlite::models::{NewImageRecord, NewPageSnapshot};
use chrono::Duration;
use tempfile::TempDir;

fn row(image_id: i64, page_url: &str, image_url: &str, bits: u64, minutes_ago: i64) -> HashedImageRow {
    HashedImageRow {
        image_id,
        snapshot_id: image_id,
        page_url: page_url.to_string(),
        image_url: image_url.to_string(),
        phash: PerceptualHash::from_bits(bits).to_string(),
        captured_at: DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
            - Duration::minutes(minutes_ago),
        fingerprint: "0".repeat(64),
    }
}

async fn test_database() -> (TempDir, Database) {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("should create database");
    (temp_dir, database)
}

async fn store(database: &Database, url: &str, hashes: &[u64]) -> i64 {
    let images: Vec<NewImageRecord> = hashes
        .iter()
        .enumerate()
        .map(|(n, &bits)| NewImageRecord {
            image_url: format!("{url}/img{n}.jpg"),
            phash: PerceptualHash::from_bits(bits),
            thumbnail: Some(vec![0xff, 0xd8, n as u8]),
        })
        .collect();
    let snapshot = NewPageSnapshot::new(url.to_string(), String::new(), String::new(), url.to_string());
    database
        .create_snapshot_with_images(&snapshot, &images)
        .await
        .expect("snapshot should be stored")
}

#[test]
fn rank_filters_by_threshold() {
    let query = PerceptualHash::from_bits(0);
    let rows = vec![
        row(1, "https://a.test/", "https://a.test/x.jpg", 0b1, 0),
        row(2, "https://a.test/", "https://a.test/y.jpg", 0b111, 0),
        row(3, "https://a.test/", "https://a.test/z.jpg", 0, 0),
        row(4, "https://a.test/", "https://a.test/w.jpg", u64::MAX, 0),
    ];

    let matches = rank_rows(query, rows, 3, 100);

    let found: Vec<(i64, u32)> = matches.iter().map(|m| (m.image_id, m.distance)).collect();
    assert_eq!(found, vec![(3, 0), (1, 1), (2, 3)]);
}

#[test]
fn rank_breaks_ties_by_recency() {
    let query = PerceptualHash::from_bits(0);
    let rows = vec![
        row(1, "https://a.test/", "https://a.test/x.jpg", 1, 60),
        row(2, "https://b.test/", "https://b.test/x.jpg", 1, 5),
        row(3, "https://c.test/", "https://c.test/x.jpg", 1, 30),
    ];

    let ids: Vec<i64> = rank_rows(query, rows, 5, 100)
        .into_iter()
        .map(|m| m.image_id)
        .collect();
    assert_eq!(ids, vec![2, 3, 1]);
}

#[test]
fn rank_deduplicates_same_asset_in_same_version() {
    let query = PerceptualHash::from_bits(0);
    let rows = vec![
        row(1, "https://a.test/", "https://a.test/logo.png", 0b11, 0),
        row(2, "https://a.test/", "https://a.test/logo.png", 0b1, 0),
        // Same asset in a different version is a separate match
        row(3, "https://a.test/", "https://a.test/logo.png", 0b1, 10),
    ];

    let matches = rank_rows(query, rows, 5, 100);

    let ids: Vec<i64> = matches.iter().map(|m| m.image_id).collect();
    assert_eq!(ids, vec![2, 3]);
}

#[test]
fn rank_caps_results_and_skips_bad_hashes() {
    let query = PerceptualHash::from_bits(0);
    let mut rows: Vec<HashedImageRow> = (0..10)
        .map(|n| row(n, "https://a.test/", &format!("https://a.test/{n}.jpg"), 0, n))
        .collect();
    let mut broken = row(99, "https://a.test/", "https://a.test/broken.jpg", 0, 0);
    broken.phash = "xyz".to_string();
    rows.push(broken);

    let matches = rank_rows(query, rows, 0, 4);

    let ids: Vec<i64> = matches.iter().map(|m| m.image_id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn exact_match_with_zero_threshold() {
    let (_temp_dir, database) = test_database().await;
    store(&database, "https://a.test", &[0xdead_beef, 0xdead_beee, 0x1234]).await;

    let search = SimilaritySearch::new(database, SearchConfig::default());
    let matches = search
        .search(PerceptualHash::from_bits(0xdead_beef), Some(0))
        .await
        .expect("search should succeed");

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].distance, 0);
    assert_eq!(matches[0].image_url, "https://a.test/img0.jpg");
    assert_eq!(matches[0].page_url, "https://a.test");
    assert_eq!(matches[0].thumbnail, Some(vec![0xff, 0xd8, 0]));
    assert_eq!(matches[0].fingerprint.len(), 64);
}

#[test]
fn match_json_carries_thumbnail_as_base64() {
    let mut matches = rank_rows(
        PerceptualHash::from_bits(0),
        vec![row(1, "https://a.test", "https://a.test/x.jpg", 0, 0)],
        0,
        10,
    );
    let mut found = matches.remove(0);
    found.thumbnail = Some(vec![0xff, 0xd8, 0]);

    let json = serde_json::to_value(&found).expect("match should serialize");
    assert_eq!(json["thumbnail_b64"], "/9gA");
    assert!(json.get("thumbnail").is_none());

    found.thumbnail = None;
    let json = serde_json::to_value(&found).expect("match should serialize");
    assert!(json["thumbnail_b64"].is_null());
}

#[tokio::test]
async fn lowering_threshold_never_grows_results() {
    let (_temp_dir, database) = test_database().await;
    let hashes: Vec<u64> = (0..16).map(|n| (1_u64 << n) - 1).collect();
    store(&database, "https://a.test", &hashes).await;

    let search = SimilaritySearch::new(database, SearchConfig::default());
    let query = PerceptualHash::from_bits(0);

    let mut previous = usize::MAX;
    for threshold in (0..=16).rev() {
        let matches = search
            .search(query, Some(threshold))
            .await
            .expect("search should succeed");
        assert!(matches.len() <= previous);
        assert!(matches.iter().all(|m| m.distance <= threshold));
        assert_eq!(matches.len(), (threshold as usize + 1).min(16));
        previous = matches.len();
    }
}

#[tokio::test]
async fn configured_threshold_is_default() {
    let (_temp_dir, database) = test_database().await;
    store(&database, "https://a.test", &[0b1_1111, 0b11_1111]).await;

    let search = SimilaritySearch::new(database, SearchConfig::default());
    let matches = search
        .search(PerceptualHash::from_bits(0), None)
        .await
        .expect("search should succeed");

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].distance, 5);
}

#[tokio::test]
async fn threshold_above_hash_width_is_rejected() {
    let (_temp_dir, database) = test_database().await;
    let search = SimilaritySearch::new(database, SearchConfig::default());

    let result = search.search(PerceptualHash::from_bits(0), Some(65)).await;
    assert!(matches!(result, Err(CaptureError::Config(_))));
}

#[tokio::test]
async fn query_hash_rejects_non_images() {
    let result = query_hash(b"definitely not an image".to_vec()).await;
    assert!(matches!(result, Err(CaptureError::Validation(_))));
}

#[tokio::test]
async fn text_search_ignores_blank_keyword() {
    let (_temp_dir, database) = test_database().await;
    store(&database, "https://a.test", &[]).await;

    assert!(
        search_text(&database, "   ")
            .await
            .expect("search should succeed")
            .is_empty()
    );
    assert_eq!(
        search_text(&database, "a.test")
            .await
            .expect("search should succeed")
            .len(),
        1
    );
}
