use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Roamer
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub robots: RobotsConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
}

/// Crawl shape and per-fetch limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum link depth from a seed URL
    pub max_depth: u32,

    /// Maximum number of pages accepted into the frontier per host
    pub max_pages_per_host: u32,

    /// Number of fetch attempts before a transient failure becomes terminal
    pub max_attempts: u32,

    /// Hard wall-clock timeout for a single fetch (milliseconds)
    pub request_timeout_ms: u64,

    /// Maximum number of body bytes kept per response
    pub max_content_length: usize,

    /// Capacity of the in-memory deduplication filter
    pub dedup_capacity: usize,

    /// Maximum number of extracted links considered per page
    pub max_links_per_page: usize,

    /// Stop the scheduler once the frontier is empty and nothing is in flight
    pub stop_when_idle: bool,
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_pages_per_host: 1000,
            max_attempts: 3,
            request_timeout_ms: 30_000,
            max_content_length: 1024 * 1024,
            dedup_capacity: 10_000,
            max_links_per_page: 50,
            stop_when_idle: false,
        }
    }
}

/// Per-host politeness and adaptive backoff
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PolitenessConfig {
    /// Floor delay between two fetch starts to the same host (milliseconds)
    pub default_delay_ms: u64,

    /// Factor applied to the error backoff on each consecutive error
    pub backoff_multiplier: f64,

    /// Factor applied to the rate-limit backoff on each HTTP 429
    pub rate_limit_multiplier: f64,

    /// Ceiling for both backoff components (milliseconds)
    pub max_backoff_ms: u64,

    /// Consecutive errors after which a host goes dormant
    pub dormant_threshold: u32,

    /// How long a dormant host is skipped (seconds)
    pub dormant_cooldown_secs: u64,

    /// Number of host states kept in memory before LRU eviction
    pub host_table_capacity: usize,
}

impl PolitenessConfig {
    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn dormant_cooldown(&self) -> Duration {
        Duration::from_secs(self.dormant_cooldown_secs)
    }
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 1000,
            backoff_multiplier: 2.0,
            rate_limit_multiplier: 4.0,
            max_backoff_ms: 300_000,
            dormant_threshold: 10,
            dormant_cooldown_secs: 1800,
            host_table_capacity: 5000,
        }
    }
}

/// Robots.txt cache behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RobotsConfig {
    /// How long a fetched robots.txt stays fresh (seconds)
    pub ttl_secs: u64,

    /// Timeout for the robots.txt request (milliseconds)
    pub timeout_ms: u64,

    /// How long a fallback rule set is kept before re-fetching (seconds)
    pub grace_period_secs: u64,

    /// Delay floor imposed on hosts whose robots.txt could not be fetched (milliseconds)
    pub fallback_delay_ms: u64,
}

impl RobotsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            timeout_ms: 10_000,
            grace_period_secs: 300,
            fallback_delay_ms: 5000,
        }
    }
}

/// Resource envelope and sampling
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResourceConfig {
    /// Process memory ceiling (MB); watermarks are percentages of this
    pub memory_ceiling_mb: f64,

    /// Process CPU ceiling (%); watermarks are percentages of this
    pub cpu_ceiling_percent: f64,

    /// Usage percentage above which concurrency is reduced
    pub high_watermark: f64,

    /// Usage percentage below which concurrency may grow
    pub low_watermark: f64,

    /// Interval between resource samples (milliseconds)
    pub sample_interval_ms: u64,
}

impl ResourceConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_mb: 450.0,
            cpu_ceiling_percent: 60.0,
            high_watermark: 85.0,
            low_watermark: 70.0,
            sample_interval_ms: 5000,
        }
    }
}

/// Concurrency budget bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConcurrencyConfig {
    /// Budget at start-up
    pub initial: usize,

    /// Floor the controller never goes below
    pub min: usize,

    /// Ceiling the controller never goes above
    pub max: usize,

    /// Number of dormant hosts at which budget increases are held
    pub storm_host_threshold: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            initial: 10,
            min: 5,
            max: 20,
            storm_host_threshold: 3,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler (also the robots.txt product token)
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Full User-Agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Durable store location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Seeds and crawl scope
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ScopeConfig {
    /// URLs submitted at depth 0 when the frontier starts empty
    pub seeds: Vec<String>,

    /// Domain patterns (e.g. "example.com" or "*.example.com") links must match;
    /// empty means every host is in scope
    pub allowed_domains: Vec<String>,
}
