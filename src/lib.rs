//! Roamer: an adaptive crawl scheduler for constrained environments
//!
//! This crate implements the scheduling core of a continuously-running web
//! crawler that lives inside a fixed memory and CPU envelope. It decides how
//! many fetches may be in flight, which URL goes next, how hard each host may
//! be hit, and how to back off when the process nears its resource ceiling.

pub mod config;
pub mod crawler;
pub mod frontier;
pub mod monitor;
pub mod output;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Roamer operations
#[derive(Debug, Error)]
pub enum RoamerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Scheduler is no longer running")]
    SchedulerStopped,

    #[error("Resource monitor error: {0}")]
    Monitor(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Roamer operations
pub type Result<T> = std::result::Result<T, RoamerError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlStats, CrawlerHandle, Dispatcher};
pub use frontier::{EnqueueOutcome, Frontier};
pub use state::{HostState, TaskState, UrlTask};
pub use url::{fingerprint, host_key, normalize_url, Fingerprint};
