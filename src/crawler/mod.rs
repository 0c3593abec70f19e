pub mod extractor;
pub mod fetcher;
pub mod image;
pub mod policy;


use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use rand::Rng;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use self::extractor::{decode_page, extract};
use self::fetcher::{Fetcher, resolve_ip};
use self::image::ImageProcessor;
use self::policy::{FailurePolicy, Stage};
use crate::config::Config;
use crate::database::Database;
use crate::database::sqlite::models::{NewImageRecord, NewPageSnapshot};
use crate::{CaptureError, Result};

/// Link prefixes that never lead to a capturable page
const SKIPPED_LINK_PREFIXES: &[&str] = &["javascript:", "mailto:", "tel:", "#", "data:"];

/// Limits for one capture tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Depth at which link following stops; the root page is depth 0
    pub max_depth: u32,
    /// Unique links followed from any single page
    pub max_links_per_page: u32,
    /// Lower bound of the randomized pause before each linked page
    pub link_delay_min_ms: u64,
    /// Upper bound of the randomized pause before each linked page
    pub link_delay_max_ms: u64,
}

impl Default for CaptureConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_depth: 1,
            max_links_per_page: 10,
            link_delay_min_ms: 500,
            link_delay_max_ms: 1500,
        }
    }
}

/// Validate and normalize a URL
#[inline]
pub fn validate_url(url_str: &str) -> anyhow::Result<Url> {
    let url = Url::parse(url_str).with_context(|| format!("Invalid URL format: {}", url_str))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(anyhow!("URL must use HTTP or HTTPS scheme: {}", url_str));
    }

    if url.host_str().is_none() {
        return Err(anyhow!("URL must have a valid host: {}", url_str));
    }

    Ok(url)
}

/// Absolute HTTP(S) links of a page in document order, without fragments or
/// duplicates
#[inline]
pub fn extract_links(html: &str, source_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let link_selector = Selector::parse("a[href]").expect("valid selector");

    let links: Vec<Url> = document
        .select(&link_selector)
        .filter_map(|element| element.value().attr("href"))
        .map(str::trim)
        .filter(|href| {
            let lower = href.to_ascii_lowercase();
            !href.is_empty()
                && !SKIPPED_LINK_PREFIXES
                    .iter()
                    .any(|prefix| lower.starts_with(prefix))
        })
        .filter_map(|href| match source_url.join(href) {
            Ok(mut absolute_url) => {
                absolute_url.set_fragment(None);
                Some(absolute_url)
            }
            Err(e) => {
                debug!(
                    "Failed to resolve URL '{}' relative to '{}': {}",
                    href, source_url, e
                );
                None
            }
        })
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .unique()
        .collect();

    debug!("Extracted {} links from {}", links.len(), source_url);
    links
}

/// Counters for one capture tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub pages_captured: usize,
    /// Linked pages whose fetch failed
    pub pages_failed: usize,
    /// Links skipped because the page was already captured in this tree
    pub pages_revisited: usize,
    pub images_stored: usize,
    pub images_skipped: usize,
    /// Parts of stored pages that could not be decoded or parsed
    pub fragments_degraded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureReport {
    pub root_url: Url,
    /// Stored snapshots in capture order; the root page comes first
    pub snapshot_ids: Vec<i64>,
    pub stats: CaptureStats,
    pub duration: Duration,
}

impl CaptureReport {
    #[inline]
    pub fn root_snapshot_id(&self) -> Option<i64> {
        self.snapshot_ids.first().copied()
    }
}

/// A page waiting on the work-list
#[derive(Debug, Clone)]
struct PendingPage {
    url: Url,
    depth: u32,
}

/// State owned by one top-level capture and dropped with it
#[derive(Debug, Default)]
struct Traversal {
    visited: HashSet<String>,
    stack: Vec<PendingPage>,
    snapshot_ids: Vec<i64>,
    stats: CaptureStats,
}

/// What a stored page hands back to the traversal
struct CapturedPage {
    snapshot_id: i64,
    links: Vec<Url>,
}

/// A failure tagged with the stage it happened in
struct StageFailure {
    stage: Stage,
    error: CaptureError,
}

impl StageFailure {
    fn new(stage: Stage, error: impl Into<CaptureError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

/// Runs capture trees: fetch, extract, process images, persist, follow links
#[derive(Debug, Clone)]
pub struct CaptureController {
    database: Database,
    fetcher: Fetcher,
    images: ImageProcessor,
    config: CaptureConfig,
}

impl CaptureController {
    /// Build a controller from a configuration snapshot. Later config edits do
    /// not reach an existing controller.
    #[inline]
    pub fn new(database: Database, config: &Config) -> Self {
        let fetcher = Fetcher::new(config.fetch.clone());
        let images = ImageProcessor::new(fetcher.clone(), config.image.clone());

        Self {
            database,
            fetcher,
            images,
            config: config.capture.clone(),
        }
    }

    #[inline]
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capture `url` at `depth` and, while below the configured maximum depth,
    /// the pages it links to.
    ///
    /// Only a failure to fetch `url` itself or a storage failure is returned;
    /// linked pages and images that fail are logged and left out.
    #[inline]
    pub async fn capture(&self, url: &Url, depth: u32) -> Result<CaptureReport> {
        let start_time = Instant::now();
        info!(
            "Starting capture of {} (depth {}, max depth {})",
            url, depth, self.config.max_depth
        );

        let mut traversal = Traversal::default();
        traversal.stack.push(PendingPage {
            url: url.clone(),
            depth,
        });

        let bar = if console::user_attended_stderr() {
            ProgressBar::new_spinner().with_style(
                ProgressStyle::with_template("{spinner} [{pos} pages] Capturing {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };

        while let Some(page) = traversal.stack.pop() {
            if !traversal.visited.insert(page.url.as_str().to_string()) {
                debug!(url = %page.url, "Already captured in this tree, skipping");
                traversal.stats.pages_revisited += 1;
                continue;
            }

            let is_root = traversal.visited.len() == 1;
            if !is_root {
                sleep(self.link_delay()).await;
            }

            bar.set_message(page.url.to_string());
            match self.capture_page(&page, is_root, &mut traversal.stats).await {
                Ok(captured) => {
                    traversal.snapshot_ids.push(captured.snapshot_id);
                    traversal.stats.pages_captured += 1;
                    bar.set_position(traversal.stats.pages_captured as u64);

                    // Reversed so the first link on the page is captured first
                    for link in captured.links.into_iter().rev() {
                        traversal.stack.push(PendingPage {
                            url: link,
                            depth: page.depth + 1,
                        });
                    }
                }
                Err(failure) => match failure.stage.policy() {
                    FailurePolicy::Propagate => {
                        bar.finish_and_clear();
                        warn!(
                            "Capture of {} stopped at {}: {}",
                            page.url, failure.stage, failure.error
                        );
                        return Err(failure.error);
                    }
                    FailurePolicy::AbortBranch
                    | FailurePolicy::SkipItem
                    | FailurePolicy::Degrade => {
                        warn!(
                            url = %page.url,
                            depth = page.depth,
                            "Skipping branch after {} failure: {}",
                            failure.stage,
                            failure.error
                        );
                        traversal.stats.pages_failed += 1;
                    }
                },
            }
        }

        bar.finish_and_clear();

        let report = CaptureReport {
            root_url: url.clone(),
            snapshot_ids: traversal.snapshot_ids,
            stats: traversal.stats,
            duration: start_time.elapsed(),
        };

        info!(
            "Capture of {} completed: {} pages, {} failed, {} images stored, {} skipped, {} fragments degraded, took {:?}",
            url,
            report.stats.pages_captured,
            report.stats.pages_failed,
            report.stats.images_stored,
            report.stats.images_skipped,
            report.stats.fragments_degraded,
            report.duration
        );

        Ok(report)
    }

    /// Fetch, extract, process images and store one page
    async fn capture_page(
        &self,
        page: &PendingPage,
        is_root: bool,
        stats: &mut CaptureStats,
    ) -> std::result::Result<CapturedPage, StageFailure> {
        let session = self.fetcher.session();

        let response = self
            .fetcher
            .fetch_page(&session, &page.url)
            .await
            .map_err(|e| StageFailure::new(Stage::page_fetch(is_root), e))?;

        let decoded = decode_page(&response.body, response.content_type.as_deref());
        let html = decoded.html;
        let extracted = extract(&html, &page.url);

        let lossy = decoded
            .lossy_encoding
            .map(|encoding| format!("undecodable bytes replaced while decoding as {encoding}"));
        for problem in lossy.into_iter().chain(extracted.parse_errors) {
            let failure = StageFailure::new(Stage::Extraction, CaptureError::Parse(problem));
            if failure.stage.policy() != FailurePolicy::Degrade {
                return Err(failure);
            }
            warn!(url = %page.url, "Keeping page despite {} failure: {}", failure.stage, failure.error);
            stats.fragments_degraded += 1;
        }
        let resolved_ip = resolve_ip(&page.url).await;

        let mut images = Vec::with_capacity(extracted.images.len());
        for candidate in &extracted.images {
            match self.images.process(&candidate.url, &page.url, &session).await {
                Ok(processed) => images.push(NewImageRecord {
                    image_url: processed.url.to_string(),
                    phash: processed.phash,
                    thumbnail: processed.thumbnail,
                }),
                Err(e) => {
                    let stage = match e {
                        CaptureError::Fetch(_) => Stage::ImageFetch,
                        _ => Stage::ImageValidation,
                    };
                    debug!(
                        "Skipping image {} ({} failed, policy {:?}): {}",
                        candidate.url,
                        stage,
                        stage.policy(),
                        e
                    );
                    stats.images_skipped += 1;
                }
            }
        }

        let links = if page.depth < self.config.max_depth {
            extract_links(&html, &page.url)
                .into_iter()
                .take(self.config.max_links_per_page as usize)
                .collect()
        } else {
            Vec::new()
        };

        let snapshot = NewPageSnapshot::new(page.url.to_string(), resolved_ip, html, extracted.text);
        let snapshot_id = self
            .database
            .create_snapshot_with_images(&snapshot, &images)
            .await
            .map_err(|e| StageFailure::new(Stage::Persistence, CaptureError::Persistence(e)))?;
        stats.images_stored += images.len();

        info!(
            url = %page.url,
            depth = page.depth,
            "Stored snapshot {} with {} images",
            snapshot_id,
            images.len()
        );

        Ok(CapturedPage { snapshot_id, links })
    }

    fn link_delay(&self) -> Duration {
        let min = self.config.link_delay_min_ms;
        let max = self.config.link_delay_max_ms.max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}
