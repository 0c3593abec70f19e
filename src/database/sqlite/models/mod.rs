#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::fingerprint::{PerceptualHash, content_fingerprint};

/// One immutable capture of a URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PageSnapshot {
    pub id: i64,
    pub url: String,
    /// Best-effort address of the host at capture time, empty when unknown
    pub resolved_ip: String,
    pub captured_at: DateTime<Utc>,
    pub html: String,
    pub text: String,
    /// SHA-256 of `text` as 64 hex characters
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPageSnapshot {
    pub url: String,
    pub resolved_ip: String,
    pub captured_at: DateTime<Utc>,
    pub html: String,
    pub text: String,
    pub fingerprint: String,
}

impl NewPageSnapshot {
    /// Build a snapshot captured now, fingerprinting the extracted text
    #[inline]
    pub fn new(url: String, resolved_ip: String, html: String, text: String) -> Self {
        let fingerprint = content_fingerprint(&text);
        Self {
            url,
            resolved_ip,
            captured_at: Utc::now(),
            html,
            text,
            fingerprint,
        }
    }
}

/// Snapshot metadata without the page body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SnapshotSummary {
    pub id: i64,
    pub url: String,
    pub resolved_ip: String,
    pub captured_at: DateTime<Utc>,
    pub fingerprint: String,
    pub image_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ImageRecord {
    pub id: i64,
    pub snapshot_id: i64,
    pub image_url: String,
    /// 16 hex characters; rows without a usable hash are never searched
    pub phash: Option<String>,
    #[serde(skip)]
    pub thumbnail: Option<Vec<u8>>,
    pub position_index: i64,
}

impl ImageRecord {
    #[inline]
    pub fn perceptual_hash(&self) -> Option<PerceptualHash> {
        self.phash.as_deref().and_then(|hash| hash.parse().ok())
    }
}

/// An image to store with a snapshot; its position is its index in the batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImageRecord {
    pub image_url: String,
    pub phash: PerceptualHash,
    pub thumbnail: Option<Vec<u8>>,
}

/// An image hash joined with the page version it belongs to
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct HashedImageRow {
    pub image_id: i64,
    pub snapshot_id: i64,
    pub page_url: String,
    pub image_url: String,
    pub phash: String,
    pub captured_at: DateTime<Utc>,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StoreStatistics {
    pub snapshots: i64,
    pub images: i64,
    pub distinct_urls: i64,
    pub hashed_images: i64,
}
