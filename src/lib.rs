use thiserror::Error;

pub use crawler::fetcher::FetchError;
pub use crawler::image::ValidationError;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Persistence error: {0:#}")]
    Persistence(anyhow::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod crawler;
pub mod database;
pub mod fingerprint;
pub mod scheduler;
pub mod search;
