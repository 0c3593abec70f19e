#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::crawler::CaptureConfig;
use crate::crawler::fetcher::FetchConfig;
use crate::crawler::image::ImageConfig;
use crate::crawler::validate_url;
use crate::database::DATABASE_FILE_NAME;
use crate::scheduler::ScheduleConfig;
use crate::search::SearchConfig;

/// Environment variable that overrides the default base directory
pub const BASE_DIR_ENV: &str = "FORENSIC_CAPTURE_DIR";

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// URLs captured on every tick of the periodic job
    #[serde(default)]
    pub seeds: Vec<String>,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid seed URL: {0}")]
    InvalidSeed(String),
    #[error("Invalid max depth: {0} (must be at most 10)")]
    InvalidMaxDepth(u32),
    #[error("Invalid max links per page: {0} (must be at most 1000)")]
    InvalidMaxLinks(u32),
    #[error("Invalid delay range: {0}ms..{1}ms (minimum must not exceed maximum)")]
    InvalidDelayRange(u64, u64),
    #[error("Invalid attempt budget: {0} (must be between 1 and 10)")]
    InvalidAttempts(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid minimum image size: {0} (must be at most 1048576 bytes)")]
    InvalidMinBytes(usize),
    #[error("Invalid thumbnail size: {0} (must be between 16 and 4096)")]
    InvalidThumbnailSize(u32),
    #[error("Invalid thumbnail quality: {0} (must be between 1 and 100)")]
    InvalidThumbnailQuality(u8),
    #[error("Invalid hamming threshold: {0} (must be at most 64)")]
    InvalidThreshold(u32),
    #[error("Invalid max results: {0} (must be between 1 and 10000)")]
    InvalidMaxResults(usize),
    #[error("Invalid schedule interval: {0} (must be between 1 and 10080 minutes)")]
    InvalidInterval(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load the configuration stored in `config_dir`, falling back to defaults
    /// when no file exists yet.
    ///
    /// Callers load a fresh copy for every capture so edits apply to the next run.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Resolve the base directory: `FORENSIC_CAPTURE_DIR` if set, otherwise the
    /// platform config directory.
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(BASE_DIR_ENV).filter(|dir| !dir.is_empty()) {
            return Ok(PathBuf::from(dir));
        }

        dirs::config_dir()
            .map(|dir| dir.join("forensic-capture"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Get the path for the SQLite database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join(DATABASE_FILE_NAME)
    }

    /// Check numeric settings. Seeds are checked one by one when they are
    /// captured, so a bad seed never blocks loading the file.
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_capture_config()?;
        self.validate_fetch_config()?;
        self.validate_image_config()?;
        self.validate_search_config()?;

        if !(1..=10_080).contains(&self.schedule.interval_minutes) {
            return Err(ConfigError::InvalidInterval(self.schedule.interval_minutes));
        }

        Ok(())
    }

    fn validate_capture_config(&self) -> Result<(), ConfigError> {
        let config = &self.capture;

        if config.max_depth > 10 {
            return Err(ConfigError::InvalidMaxDepth(config.max_depth));
        }

        if config.max_links_per_page > 1000 {
            return Err(ConfigError::InvalidMaxLinks(config.max_links_per_page));
        }

        if config.link_delay_min_ms > config.link_delay_max_ms {
            return Err(ConfigError::InvalidDelayRange(
                config.link_delay_min_ms,
                config.link_delay_max_ms,
            ));
        }

        Ok(())
    }

    fn validate_fetch_config(&self) -> Result<(), ConfigError> {
        let config = &self.fetch;

        if !(1..=10).contains(&config.max_attempts) {
            return Err(ConfigError::InvalidAttempts(config.max_attempts));
        }

        if config.retry_delay_min_ms > config.retry_delay_max_ms {
            return Err(ConfigError::InvalidDelayRange(
                config.retry_delay_min_ms,
                config.retry_delay_max_ms,
            ));
        }

        for timeout in [
            config.page_connect_timeout_secs,
            config.page_read_timeout_secs,
            config.image_connect_timeout_secs,
            config.image_read_timeout_secs,
        ] {
            if !(1..=300).contains(&timeout) {
                return Err(ConfigError::InvalidTimeout(timeout));
            }
        }

        Ok(())
    }

    fn validate_image_config(&self) -> Result<(), ConfigError> {
        let config = &self.image;

        if config.min_bytes > 1_048_576 {
            return Err(ConfigError::InvalidMinBytes(config.min_bytes));
        }

        if !(16..=4096).contains(&config.thumbnail_max_side) {
            return Err(ConfigError::InvalidThumbnailSize(config.thumbnail_max_side));
        }

        if !(1..=100).contains(&config.thumbnail_quality) {
            return Err(ConfigError::InvalidThumbnailQuality(
                config.thumbnail_quality,
            ));
        }

        Ok(())
    }

    fn validate_search_config(&self) -> Result<(), ConfigError> {
        let config = &self.search;

        if config.hamming_threshold > crate::fingerprint::MAX_DISTANCE {
            return Err(ConfigError::InvalidThreshold(config.hamming_threshold));
        }

        if !(1..=10_000).contains(&config.max_results) {
            return Err(ConfigError::InvalidMaxResults(config.max_results));
        }

        Ok(())
    }

    pub fn set_max_depth(&mut self, max_depth: u32) -> Result<(), ConfigError> {
        if max_depth > 10 {
            return Err(ConfigError::InvalidMaxDepth(max_depth));
        }
        self.capture.max_depth = max_depth;
        Ok(())
    }

    pub fn set_max_links_per_page(&mut self, max_links: u32) -> Result<(), ConfigError> {
        if max_links > 1000 {
            return Err(ConfigError::InvalidMaxLinks(max_links));
        }
        self.capture.max_links_per_page = max_links;
        Ok(())
    }

    pub fn set_hamming_threshold(&mut self, threshold: u32) -> Result<(), ConfigError> {
        if threshold > crate::fingerprint::MAX_DISTANCE {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        self.search.hamming_threshold = threshold;
        Ok(())
    }

    pub fn set_interval_minutes(&mut self, minutes: u64) -> Result<(), ConfigError> {
        if !(1..=10_080).contains(&minutes) {
            return Err(ConfigError::InvalidInterval(minutes));
        }
        self.schedule.interval_minutes = minutes;
        Ok(())
    }

    pub fn set_seeds(&mut self, seeds: Vec<String>) -> Result<(), ConfigError> {
        for seed in &seeds {
            validate_url(seed).map_err(|_| ConfigError::InvalidSeed(seed.clone()))?;
        }
        self.seeds = seeds;
        Ok(())
    }
}
