use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::Config;
use crate::crawler::{CaptureController, CaptureReport, validate_url};
use crate::database::Database;
use crate::database::sqlite::models::{ImageRecord, PageSnapshot, SnapshotSummary};
use crate::fingerprint::PerceptualHash;
use crate::scheduler::{JobManager, run_scheduled_captures};
use crate::search::{SimilarityMatch, SimilaritySearch, query_hash, search_text};

/// How command results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Where the query hash of an image search comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageQuery {
    File(PathBuf),
    Hash(String),
}

fn load_config(data_dir: &Path) -> Result<Config> {
    Config::load(data_dir).context("Failed to load configuration")
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// Newest snapshot of a URL with its images, as shown after a capture
#[derive(Debug, Serialize)]
struct CaptureOutput<'a> {
    report: &'a CaptureReport,
    snapshot: Option<&'a PageSnapshot>,
    images: Vec<ImageOutput<'a>>,
}

#[derive(Debug, Serialize)]
struct ImageOutput<'a> {
    position_index: i64,
    image_url: &'a str,
    phash: Option<&'a str>,
    thumbnail_bytes: usize,
}

impl<'a> From<&'a ImageRecord> for ImageOutput<'a> {
    fn from(image: &'a ImageRecord) -> Self {
        Self {
            position_index: image.position_index,
            image_url: &image.image_url,
            phash: image.phash.as_deref(),
            thumbnail_bytes: image.thumbnail.as_ref().map_or(0, Vec::len),
        }
    }
}

/// Capture a URL and print the stored snapshot.
///
/// `depth` replaces the configured maximum depth for this run only.
#[inline]
pub async fn capture_url(
    data_dir: &Path,
    url: &str,
    depth: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let url = validate_url(url)?;

    let mut config = load_config(data_dir)?;
    if let Some(depth) = depth {
        config.set_max_depth(depth)?;
    }

    let database = open_database(&config).await?;
    let controller = CaptureController::new(database.clone(), &config);

    info!("Capturing {}", url);
    let report = controller.capture(&url, 0).await?;

    let snapshot = database.latest_snapshot(url.as_str()).await?;
    let images = match &snapshot {
        Some(snapshot) => database.images_for_snapshot(snapshot.id).await?,
        None => Vec::new(),
    };

    if format == OutputFormat::Json {
        return print_json(&CaptureOutput {
            report: &report,
            snapshot: snapshot.as_ref(),
            images: images.iter().map(ImageOutput::from).collect(),
        });
    }

    println!("Capture completed in {:?}", report.duration);
    println!("  Pages captured: {}", report.stats.pages_captured);
    println!("  Linked pages failed: {}", report.stats.pages_failed);
    println!("  Images stored: {}", report.stats.images_stored);
    println!("  Images skipped: {}", report.stats.images_skipped);
    if report.stats.fragments_degraded > 0 {
        println!("  Fragments degraded: {}", report.stats.fragments_degraded);
    }

    if let Some(snapshot) = snapshot {
        println!();
        println!("Snapshot {} of {}", snapshot.id, snapshot.url);
        println!(
            "  Captured: {}",
            snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if !snapshot.resolved_ip.is_empty() {
            println!("  Resolved IP: {}", snapshot.resolved_ip);
        }
        println!("  Fingerprint: {}", snapshot.fingerprint);
        println!("  Text length: {} characters", snapshot.text.chars().count());
        println!("  Images: {}", images.len());
        for image in &images {
            println!(
                "    [{}] {} phash={} thumbnail={} bytes",
                image.position_index,
                image.image_url,
                image.phash.as_deref().unwrap_or("-"),
                image.thumbnail.as_ref().map_or(0, Vec::len)
            );
        }
    }

    Ok(())
}

fn print_summaries(summaries: &[SnapshotSummary]) {
    for summary in summaries {
        println!(
            "  #{} {} {} ({} images)",
            summary.id,
            summary.captured_at.format("%Y-%m-%d %H:%M:%S"),
            summary.url,
            summary.image_count
        );
    }
}

/// Print snapshots whose text contains `keyword`, newest first
#[inline]
pub async fn search_text_command(data_dir: &Path, keyword: &str, format: OutputFormat) -> Result<()> {
    let config = load_config(data_dir)?;
    let database = open_database(&config).await?;

    let results = search_text(&database, keyword).await?;

    if format == OutputFormat::Json {
        return print_json(&results);
    }

    if results.is_empty() {
        println!("No snapshots contain \"{}\"", keyword);
        return Ok(());
    }

    println!("{} snapshots contain \"{}\":", results.len(), keyword);
    print_summaries(&results);
    Ok(())
}

#[derive(Debug, Serialize)]
struct SimilarityOutput<'a> {
    query: PerceptualHash,
    threshold: u32,
    matches: &'a [SimilarityMatch],
}

/// Rank stored images by visual similarity to a file or a given hash
#[inline]
pub async fn search_image_command(
    data_dir: &Path,
    query: ImageQuery,
    threshold: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(data_dir)?;

    let hash = match query {
        ImageQuery::File(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read image file: {}", path.display()))?;
            query_hash(bytes).await?
        }
        ImageQuery::Hash(hex) => hex
            .trim()
            .to_ascii_lowercase()
            .parse::<PerceptualHash>()
            .map_err(|e| anyhow!("Invalid perceptual hash '{}': {}", hex, e))?,
    };

    let threshold = threshold.unwrap_or(config.search.hamming_threshold);
    let database = open_database(&config).await?;
    let search = SimilaritySearch::new(database, config.search.clone());
    let matches = search.search(hash, Some(threshold)).await?;

    if format == OutputFormat::Json {
        return print_json(&SimilarityOutput {
            query: hash,
            threshold,
            matches: &matches,
        });
    }

    println!("Query hash {} (threshold {})", hash, threshold);
    if matches.is_empty() {
        println!("No similar images found");
        return Ok(());
    }

    for found in &matches {
        println!(
            "  distance {:>2}  {}  {}",
            found.distance,
            found.captured_at.format("%Y-%m-%d %H:%M:%S"),
            found.image_url
        );
        println!(
            "               on {} (snapshot {}, fingerprint {})",
            found.page_url, found.snapshot_id, found.fingerprint
        );
    }
    println!("{} matches", matches.len());
    Ok(())
}

#[derive(Debug, Serialize)]
struct HistoryEntry<'a> {
    #[serde(flatten)]
    summary: &'a SnapshotSummary,
    content_changed: bool,
}

/// Whether each version's fingerprint differs from the version before it.
/// The first version always counts as changed.
fn content_changes(history: &[SnapshotSummary]) -> Vec<bool> {
    history
        .iter()
        .enumerate()
        .map(|(n, summary)| {
            n == 0 || history[n - 1].fingerprint != summary.fingerprint
        })
        .collect()
}

/// Versions of `url` keyed the way captures store them, so `https://host`
/// finds the snapshots saved under `https://host/`
async fn load_history(database: &Database, url: &str) -> Result<Vec<SnapshotSummary>> {
    let url = validate_url(url)?;
    database.snapshot_history(url.as_str()).await
}

/// Print every stored version of a URL, oldest first
#[inline]
pub async fn show_history(data_dir: &Path, url: &str, format: OutputFormat) -> Result<()> {
    let config = load_config(data_dir)?;
    let database = open_database(&config).await?;

    let history = load_history(&database, url).await?;
    let changes = content_changes(&history);

    if format == OutputFormat::Json {
        let entries: Vec<HistoryEntry<'_>> = history
            .iter()
            .zip(changes)
            .map(|(summary, content_changed)| HistoryEntry {
                summary,
                content_changed,
            })
            .collect();
        return print_json(&entries);
    }

    if history.is_empty() {
        println!("No snapshots stored for {}", url);
        return Ok(());
    }

    println!("{} versions of {}:", history.len(), url);
    for (summary, changed) in history.iter().zip(changes) {
        println!(
            "  #{} {} {} {} images{}",
            summary.id,
            summary.captured_at.format("%Y-%m-%d %H:%M:%S"),
            summary.fingerprint,
            summary.image_count,
            if changed { "  *changed*" } else { "" }
        );
    }
    Ok(())
}

/// Delete one snapshot and its images
#[inline]
pub async fn delete_snapshot(data_dir: &Path, snapshot_id: i64) -> Result<()> {
    let config = load_config(data_dir)?;
    let database = open_database(&config).await?;

    let snapshot = database
        .get_snapshot(snapshot_id)
        .await?
        .ok_or_else(|| anyhow!("Snapshot not found: {}", snapshot_id))?;

    if !database.delete_snapshot(snapshot_id).await? {
        return Err(anyhow!("Snapshot not found: {}", snapshot_id));
    }

    println!(
        "Deleted snapshot {} of {} captured {}",
        snapshot.id,
        snapshot.url,
        snapshot.captured_at.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    database: PathBuf,
    snapshots: i64,
    images: i64,
    hashed_images: i64,
    distinct_urls: i64,
    seeds: usize,
    schedule_interval_minutes: u64,
}

/// Print store counts and where the data lives
#[inline]
pub async fn show_status(data_dir: &Path, format: OutputFormat) -> Result<()> {
    let config = load_config(data_dir)?;
    let database = open_database(&config).await?;
    let stats = database.statistics().await?;

    let status = StatusOutput {
        database: config.database_path(),
        snapshots: stats.snapshots,
        images: stats.images,
        hashed_images: stats.hashed_images,
        distinct_urls: stats.distinct_urls,
        seeds: config.seeds.len(),
        schedule_interval_minutes: config.schedule.interval_minutes,
    };

    if format == OutputFormat::Json {
        return print_json(&status);
    }

    println!("Forensic Capture Status");
    println!("{}", "=".repeat(40));
    println!("  Database: {}", status.database.display());
    println!("  Snapshots: {}", status.snapshots);
    println!("  Distinct URLs: {}", status.distinct_urls);
    println!(
        "  Images: {} ({} searchable)",
        status.images, status.hashed_images
    );
    println!(
        "  Seeds: {} (every {} minutes when scheduled)",
        status.seeds, status.schedule_interval_minutes
    );
    Ok(())
}

/// Write the thumbnails of one snapshot to `out_dir` as `<position>.jpg`.
/// Returns how many files were written.
#[inline]
pub async fn export_thumbnails(data_dir: &Path, snapshot_id: i64, out_dir: &Path) -> Result<usize> {
    let config = load_config(data_dir)?;
    let database = open_database(&config).await?;

    if database.get_snapshot(snapshot_id).await?.is_none() {
        return Err(anyhow!("Snapshot not found: {}", snapshot_id));
    }

    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", out_dir.display()))?;

    let mut written = 0;
    for image in database.images_for_snapshot(snapshot_id).await? {
        let Some(thumbnail) = image.thumbnail else {
            continue;
        };
        let path = out_dir.join(format!("{}.jpg", image.position_index));
        tokio::fs::write(&path, thumbnail)
            .await
            .with_context(|| format!("Failed to write thumbnail: {}", path.display()))?;
        written += 1;
    }

    println!(
        "Exported {} thumbnails from snapshot {} to {}",
        written,
        snapshot_id,
        out_dir.display()
    );
    Ok(written)
}

/// Capture the configured seeds periodically until Ctrl-C
#[inline]
pub async fn run_schedule(data_dir: &Path, interval_minutes: Option<u64>) -> Result<()> {
    let mut config = load_config(data_dir)?;
    if let Some(minutes) = interval_minutes {
        config.set_interval_minutes(minutes)?;
    }
    let database = open_database(&config).await?;

    if config.seeds.is_empty() {
        println!("No seeds configured; add `seeds = [...]` to {}", config.config_file_path().display());
    }

    let manager = JobManager::new();
    let job_dir = data_dir.to_path_buf();
    manager
        .start(config.schedule.interval(), move || {
            let database = database.clone();
            let dir = job_dir.clone();
            async move {
                if let Err(e) = run_scheduled_captures(&database, &dir).await {
                    error!("Scheduled capture run failed: {}", e);
                }
            }
        })
        .await?;

    let status = manager.status().await;
    println!(
        "Scheduler running every {} minutes ({} seeds)",
        config.schedule.interval_minutes,
        config.seeds.len()
    );
    if let Some(next_run) = status.next_run {
        println!("  Next run: {}", next_run.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for interrupt signal")?;

    println!("\nStopping scheduler...");
    manager.stop().await?;

    let status = manager.status().await;
    println!("Scheduler stopped after {} runs", status.runs_completed);
    Ok(())
}
