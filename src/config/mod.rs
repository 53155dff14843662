//! Configuration module for Roamer
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! including the environment overrides used by container deployments.
//!
//! # Example
//!
//! ```no_run
//! use roamer::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("roamer.toml")).unwrap();
//! println!("Concurrency ceiling: {}", config.concurrency.max);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ConcurrencyConfig, Config, CrawlerConfig, PolitenessConfig, ResourceConfig, RobotsConfig,
    ScopeConfig, StorageConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, load_config, load_config_with_hash, parse_config,
};
pub use validation::validate;
