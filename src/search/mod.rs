//! Near-duplicate image lookup by Hamming distance, and substring search over
//! captured page text.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, warn};

use crate::crawler::image::decode_image;
use crate::database::Database;
use crate::database::sqlite::models::{HashedImageRow, SnapshotSummary};
use crate::fingerprint::{MAX_DISTANCE, PerceptualHash};
use crate::{CaptureError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Largest Hamming distance still reported as a match
    pub hamming_threshold: u32,
    pub max_results: usize,
}

impl Default for SearchConfig {
    #[inline]
    fn default() -> Self {
        Self {
            hamming_threshold: 5,
            max_results: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimilarityMatch {
    pub image_id: i64,
    pub snapshot_id: i64,
    pub page_url: String,
    pub image_url: String,
    pub phash: PerceptualHash,
    pub distance: u32,
    pub captured_at: DateTime<Utc>,
    pub fingerprint: String,
    /// JPEG thumbnail bytes, emitted as base64 text
    #[serde(rename = "thumbnail_b64", serialize_with = "serialize_base64")]
    pub thumbnail: Option<Vec<u8>>,
}

#[expect(clippy::ref_option, reason = "serde passes fields by reference")]
fn serialize_base64<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match bytes {
        Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
        None => serializer.serialize_none(),
    }
}

/// Rank stored hashes against `query`.
///
/// Rows farther than `threshold` are dropped, as are rows whose hash does not
/// parse. One match is kept per page URL, image URL and capture time. The
/// result is ordered by distance, then newest capture first, and holds at
/// most `max_results` entries.
#[inline]
pub fn rank_rows<I>(
    query: PerceptualHash,
    rows: I,
    threshold: u32,
    max_results: usize,
) -> Vec<SimilarityMatch>
where
    I: IntoIterator<Item = HashedImageRow>,
{
    let mut best: HashMap<(String, String, DateTime<Utc>), SimilarityMatch> = HashMap::new();

    for row in rows {
        let phash = match row.phash.parse::<PerceptualHash>() {
            Ok(phash) => phash,
            Err(e) => {
                warn!("Ignoring stored image {} with bad hash: {}", row.image_id, e);
                continue;
            }
        };

        let distance = query.distance(phash);
        if distance > threshold {
            continue;
        }

        let candidate = SimilarityMatch {
            image_id: row.image_id,
            snapshot_id: row.snapshot_id,
            page_url: row.page_url,
            image_url: row.image_url,
            phash,
            distance,
            captured_at: row.captured_at,
            fingerprint: row.fingerprint,
            thumbnail: None,
        };

        let key = (
            candidate.page_url.clone(),
            candidate.image_url.clone(),
            candidate.captured_at,
        );
        let replace = best.get(&key).is_none_or(|existing| {
            (candidate.distance, candidate.image_id) < (existing.distance, existing.image_id)
        });
        if replace {
            best.insert(key, candidate);
        }
    }

    let mut matches: Vec<SimilarityMatch> = best.into_values().collect();
    matches.sort_by(|a, b| {
        a.distance
            .cmp(&b.distance)
            .then_with(|| b.captured_at.cmp(&a.captured_at))
            .then_with(|| b.snapshot_id.cmp(&a.snapshot_id))
            .then_with(|| a.image_id.cmp(&b.image_id))
    });
    matches.truncate(max_results);
    matches
}

/// Linear scan over every stored image hash
#[derive(Debug, Clone)]
pub struct SimilaritySearch {
    database: Database,
    config: SearchConfig,
}

impl SimilaritySearch {
    #[inline]
    pub fn new(database: Database, config: SearchConfig) -> Self {
        Self { database, config }
    }

    /// Find stored images within `threshold` (or the configured default) of
    /// `query`, thumbnails included
    #[inline]
    pub async fn search(
        &self,
        query: PerceptualHash,
        threshold: Option<u32>,
    ) -> Result<Vec<SimilarityMatch>> {
        let threshold = threshold.unwrap_or(self.config.hamming_threshold);
        if threshold > MAX_DISTANCE {
            return Err(CaptureError::Config(format!(
                "Hamming threshold {threshold} exceeds {MAX_DISTANCE}"
            )));
        }

        let mut scanned = 0_usize;
        let mut within = Vec::new();
        let mut rows = self.database.stream_hashed_images();
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| CaptureError::Persistence(e.into()))?
        {
            scanned += 1;
            let close_enough = row
                .phash
                .parse::<PerceptualHash>()
                .is_ok_and(|phash| query.distance(phash) <= threshold);
            if close_enough {
                within.push(row);
            }
        }

        let mut matches = rank_rows(query, within, threshold, self.config.max_results);

        for found in &mut matches {
            found.thumbnail = self
                .database
                .get_image(found.image_id)
                .await
                .map_err(CaptureError::Persistence)?
                .and_then(|image| image.thumbnail);
        }

        debug!(
            "Similarity search for {} (threshold {}): {} of {} hashes matched",
            query,
            threshold,
            matches.len(),
            scanned
        );
        Ok(matches)
    }

    /// Hash an image file's contents and search with it
    #[inline]
    pub async fn search_image(
        &self,
        bytes: Vec<u8>,
        threshold: Option<u32>,
    ) -> Result<(PerceptualHash, Vec<SimilarityMatch>)> {
        let query = query_hash(bytes).await?;
        let matches = self.search(query, threshold).await?;
        Ok((query, matches))
    }
}

/// Perceptual hash of an encoded image, computed off the async runtime
#[inline]
pub async fn query_hash(bytes: Vec<u8>) -> Result<PerceptualHash> {
    let hash = tokio::task::spawn_blocking(move || {
        decode_image(&bytes).map(|image| PerceptualHash::from_image(&image))
    })
    .await
    .map_err(|e| CaptureError::Other(anyhow::anyhow!("hashing task failed: {e}")))??;
    Ok(hash)
}

/// Snapshots whose extracted text contains `keyword`, newest first. A blank
/// keyword matches nothing.
#[inline]
pub async fn search_text(database: &Database, keyword: &str) -> Result<Vec<SnapshotSummary>> {
    if keyword.trim().is_empty() {
        return Ok(Vec::new());
    }

    database
        .search_text(keyword)
        .await
        .map_err(CaptureError::Persistence)
}
