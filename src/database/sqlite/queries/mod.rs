
use super::models::*;
use anyhow::{Context, Result};
use futures::stream::BoxStream;
use sqlx::SqlitePool;
use tracing::debug;

const SUMMARY_COLUMNS: &str = r#"
    SELECT s.id,
           s.url,
           s.resolved_ip,
           s.captured_at,
           s.fingerprint,
           (SELECT COUNT(*) FROM image_records i WHERE i.snapshot_id = s.id) AS image_count
    FROM page_snapshots s
"#;

pub struct SnapshotQueries;

impl SnapshotQueries {
    /// Insert a snapshot and all of its images in one transaction.
    ///
    /// Image positions follow the order of `images`, starting at 0.
    #[inline]
    pub async fn create_with_images(
        pool: &SqlitePool,
        snapshot: &NewPageSnapshot,
        images: &[NewImageRecord],
    ) -> Result<i64> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin snapshot transaction")?;

        let snapshot_id = sqlx::query(
            r#"
            INSERT INTO page_snapshots (url, resolved_ip, captured_at, html, text, fingerprint)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.url)
        .bind(&snapshot.resolved_ip)
        .bind(snapshot.captured_at)
        .bind(&snapshot.html)
        .bind(&snapshot.text)
        .bind(&snapshot.fingerprint)
        .execute(&mut *transaction)
        .await
        .context("Failed to insert page snapshot")?
        .last_insert_rowid();

        for (position, image) in images.iter().enumerate() {
            let position = i64::try_from(position).context("Image position out of range")?;
            sqlx::query(
                r#"
                INSERT INTO image_records (snapshot_id, image_url, phash, thumbnail, position_index)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(snapshot_id)
            .bind(&image.image_url)
            .bind(image.phash.to_string())
            .bind(image.thumbnail.as_deref())
            .bind(position)
            .execute(&mut *transaction)
            .await
            .with_context(|| format!("Failed to insert image record {}", image.image_url))?;
        }

        transaction
            .commit()
            .await
            .context("Failed to commit snapshot transaction")?;

        debug!(
            "Stored snapshot {} for {} with {} images",
            snapshot_id,
            snapshot.url,
            images.len()
        );
        Ok(snapshot_id)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<PageSnapshot>> {
        let result = sqlx::query_as::<_, PageSnapshot>(
            r#"
            SELECT id, url, resolved_ip, captured_at, html, text, fingerprint
            FROM page_snapshots WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get snapshot by id")?;

        Ok(result)
    }

    /// Most recent capture of `url`
    #[inline]
    pub async fn latest_for_url(pool: &SqlitePool, url: &str) -> Result<Option<PageSnapshot>> {
        let result = sqlx::query_as::<_, PageSnapshot>(
            r#"
            SELECT id, url, resolved_ip, captured_at, html, text, fingerprint
            FROM page_snapshots WHERE url = ?
            ORDER BY captured_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(url)
        .fetch_optional(pool)
        .await
        .context("Failed to get latest snapshot for URL")?;

        Ok(result)
    }

    /// Every version of `url`, oldest first
    #[inline]
    pub async fn history_for_url(pool: &SqlitePool, url: &str) -> Result<Vec<SnapshotSummary>> {
        let sql = format!("{SUMMARY_COLUMNS} WHERE s.url = ? ORDER BY s.captured_at ASC, s.id ASC");
        let results = sqlx::query_as::<_, SnapshotSummary>(&sql)
            .bind(url)
            .fetch_all(pool)
            .await
            .context("Failed to get snapshot history")?;

        Ok(results)
    }

    /// Snapshots whose extracted text contains `keyword`, newest first
    #[inline]
    pub async fn search_text(pool: &SqlitePool, keyword: &str) -> Result<Vec<SnapshotSummary>> {
        let sql = format!(
            "{SUMMARY_COLUMNS} WHERE instr(s.text, ?) > 0 ORDER BY s.captured_at DESC, s.id DESC"
        );
        let results = sqlx::query_as::<_, SnapshotSummary>(&sql)
            .bind(keyword)
            .fetch_all(pool)
            .await
            .context("Failed to search snapshot text")?;

        Ok(results)
    }

    /// Delete a snapshot; its images go with it. Returns whether a row existed.
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM page_snapshots WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete snapshot")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn statistics(pool: &SqlitePool) -> Result<StoreStatistics> {
        let stats = sqlx::query_as::<_, StoreStatistics>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM page_snapshots) AS snapshots,
                (SELECT COUNT(*) FROM image_records) AS images,
                (SELECT COUNT(DISTINCT url) FROM page_snapshots) AS distinct_urls,
                (SELECT COUNT(*) FROM image_records
                    WHERE phash IS NOT NULL AND phash != '') AS hashed_images
            "#,
        )
        .fetch_one(pool)
        .await
        .context("Failed to compute store statistics")?;

        Ok(stats)
    }
}

pub struct ImageQueries;

impl ImageQueries {
    /// Images of one snapshot in discovery order
    #[inline]
    pub async fn list_for_snapshot(pool: &SqlitePool, snapshot_id: i64) -> Result<Vec<ImageRecord>> {
        let results = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, snapshot_id, image_url, phash, thumbnail, position_index
            FROM image_records WHERE snapshot_id = ?
            ORDER BY position_index ASC
            "#,
        )
        .bind(snapshot_id)
        .fetch_all(pool)
        .await
        .context("Failed to list images for snapshot")?;

        Ok(results)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<ImageRecord>> {
        let result = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, snapshot_id, image_url, phash, thumbnail, position_index
            FROM image_records WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get image by id")?;

        Ok(result)
    }

    /// Stream every image that has a hash, joined with its page version.
    /// Thumbnails are left out so a full scan stays light.
    #[inline]
    pub fn stream_hashed(pool: &SqlitePool) -> BoxStream<'_, Result<HashedImageRow, sqlx::Error>> {
        sqlx::query_as::<_, HashedImageRow>(
            r#"
            SELECT i.id AS image_id,
                   i.snapshot_id,
                   s.url AS page_url,
                   i.image_url,
                   i.phash,
                   s.captured_at,
                   s.fingerprint
            FROM image_records i
            JOIN page_snapshots s ON s.id = i.snapshot_id
            WHERE i.phash IS NOT NULL AND i.phash != ''
            "#,
        )
        .fetch(pool)
    }
}
