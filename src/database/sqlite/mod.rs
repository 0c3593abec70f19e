use anyhow::{Context, Result};
use futures::stream::BoxStream;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    HashedImageRow, ImageRecord, NewImageRecord, NewPageSnapshot, PageSnapshot, SnapshotSummary,
    StoreStatistics,
};
use crate::database::sqlite::queries::{ImageQueries, SnapshotQueries};


pub mod models;
pub mod queries;

/// File name of the snapshot store inside the base directory
pub const DATABASE_FILE_NAME: &str = "forensic.db";

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (creating if needed) the store at `database_path`.
    ///
    /// WAL journaling and a busy timeout let independent captures append
    /// concurrently without coordinating with each other.
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join(DATABASE_FILE_NAME)).await
    }

    // Snapshot operations
    #[inline]
    pub async fn create_snapshot_with_images(
        &self,
        snapshot: &NewPageSnapshot,
        images: &[NewImageRecord],
    ) -> Result<i64> {
        SnapshotQueries::create_with_images(&self.pool, snapshot, images).await
    }

    #[inline]
    pub async fn get_snapshot(&self, id: i64) -> Result<Option<PageSnapshot>> {
        SnapshotQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn latest_snapshot(&self, url: &str) -> Result<Option<PageSnapshot>> {
        SnapshotQueries::latest_for_url(&self.pool, url).await
    }

    #[inline]
    pub async fn snapshot_history(&self, url: &str) -> Result<Vec<SnapshotSummary>> {
        SnapshotQueries::history_for_url(&self.pool, url).await
    }

    #[inline]
    pub async fn search_text(&self, keyword: &str) -> Result<Vec<SnapshotSummary>> {
        SnapshotQueries::search_text(&self.pool, keyword).await
    }

    #[inline]
    pub async fn delete_snapshot(&self, id: i64) -> Result<bool> {
        SnapshotQueries::delete(&self.pool, id).await
    }

    #[inline]
    pub async fn statistics(&self) -> Result<StoreStatistics> {
        SnapshotQueries::statistics(&self.pool).await
    }

    // Image operations
    #[inline]
    pub async fn images_for_snapshot(&self, snapshot_id: i64) -> Result<Vec<ImageRecord>> {
        ImageQueries::list_for_snapshot(&self.pool, snapshot_id).await
    }

    #[inline]
    pub async fn get_image(&self, id: i64) -> Result<Option<ImageRecord>> {
        ImageQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub fn stream_hashed_images(&self) -> BoxStream<'_, Result<HashedImageRow, sqlx::Error>> {
        ImageQueries::stream_hashed(&self.pool)
    }
}
