//! Robots.txt caching implementation
//!
//! Rule sets are fetched lazily on first contact with a host and refreshed
//! lazily once their TTL runs out. A host whose robots.txt cannot be fetched
//! gets a permissive fallback with a delay floor, kept only for the grace
//! period so the fetch is retried.

use crate::config::RobotsConfig;
use crate::robots::ParsedRobots;
use crate::url::host_key;
use lru::LruCache;
use reqwest::Client;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Upper bound on the robots.txt bytes that are parsed
const MAX_ROBOTS_BYTES: usize = 512 * 1024;

/// Robots rules for one host, with their freshness window
#[derive(Debug, Clone)]
pub struct RobotsRuleSet {
    pub host: String,
    rules: ParsedRobots,
    disallow_patterns: Vec<String>,
    crawl_delay: Option<Duration>,
    fetched_at: Instant,
    ttl: Duration,
    fallback: bool,
}

impl RobotsRuleSet {
    /// Builds a rule set from a fetched robots.txt body
    pub fn parsed(host: &str, content: &str, agent: &str, fetched_at: Instant, ttl: Duration) -> Self {
        let rules = ParsedRobots::from_content(content);
        let disallow_patterns = rules.disallow_patterns(agent);
        let crawl_delay = rules
            .crawl_delay(agent)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

        Self {
            host: host.to_string(),
            rules,
            disallow_patterns,
            crawl_delay,
            fetched_at,
            ttl,
            fallback: false,
        }
    }

    /// Rule set for a host without a robots.txt
    pub fn allow_all(host: &str, fetched_at: Instant, ttl: Duration) -> Self {
        Self {
            host: host.to_string(),
            rules: ParsedRobots::allow_all(),
            disallow_patterns: Vec::new(),
            crawl_delay: None,
            fetched_at,
            ttl,
            fallback: false,
        }
    }

    /// Conservative rule set used when robots.txt could not be fetched
    ///
    /// Everything is allowed but the host is slowed to `delay`; the entry
    /// expires after `grace` so the fetch is attempted again.
    pub fn fallback(host: &str, fetched_at: Instant, grace: Duration, delay: Duration) -> Self {
        Self {
            host: host.to_string(),
            rules: ParsedRobots::allow_all(),
            disallow_patterns: Vec::new(),
            crawl_delay: Some(delay),
            fetched_at,
            ttl: grace,
            fallback: true,
        }
    }

    pub fn is_allowed(&self, url: &Url, agent: &str) -> bool {
        self.rules.is_allowed(url.as_str(), agent)
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }

    pub fn disallow_patterns(&self) -> &[String] {
        &self.disallow_patterns
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) >= self.ttl
    }
}

/// Bounded per-host robots cache
///
/// The lock is only held for lookups and inserts, never across the
/// robots.txt request.
pub struct RobotsCache {
    client: Client,
    agent: String,
    config: RobotsConfig,
    entries: Mutex<LruCache<String, Arc<RobotsRuleSet>>>,
}

impl RobotsCache {
    /// Creates a cache
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client (already carrying the crawler's User-Agent)
    /// * `agent` - Product token matched against `User-agent` groups
    /// * `config` - TTL, timeout and fallback settings
    /// * `capacity` - Maximum number of hosts kept
    pub fn new(client: Client, agent: impl Into<String>, config: RobotsConfig, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            agent: agent.into(),
            config,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Checks whether `url` may be fetched, fetching robots.txt on a miss
    pub async fn allowed(&self, url: &Url) -> bool {
        self.allowed_at(url, Instant::now()).await
    }

    /// Same as [`allowed`](Self::allowed) with an explicit clock
    pub async fn allowed_at(&self, url: &Url, now: Instant) -> bool {
        match self.rules_for(url, now).await {
            Some(rules) => rules.is_allowed(url, &self.agent),
            // No host to look up; the fetcher rejects these anyway
            None => true,
        }
    }

    /// Returns the fresh rule set for `url`'s host, refreshing it if needed
    pub async fn rules_for(&self, url: &Url, now: Instant) -> Option<Arc<RobotsRuleSet>> {
        let host = host_key(url)?;

        {
            let mut entries = self.lock();
            if let Some(rules) = entries.get(&host) {
                if !rules.is_expired(now) {
                    return Some(Arc::clone(rules));
                }
            }
        }

        let rules = Arc::new(self.fetch(url, &host, now).await);
        self.lock().put(host, Arc::clone(&rules));
        Some(rules)
    }

    /// Crawl delay currently cached for `host`, without fetching
    ///
    /// Does not touch the LRU order.
    pub fn crawl_delay(&self, host: &str) -> Option<Duration> {
        self.lock().peek(host).and_then(|rules| rules.crawl_delay())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<RobotsRuleSet>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn fetch(&self, url: &Url, host: &str, now: Instant) -> RobotsRuleSet {
        let robots_url = match url.join("/robots.txt") {
            Ok(robots_url) => robots_url,
            Err(e) => {
                warn!("Cannot build robots.txt URL for {}: {}", host, e);
                return self.fallback(host, now);
            }
        };

        debug!("Fetching {}", robots_url);

        let response = match self
            .client
            .get(robots_url.clone())
            .timeout(self.config.timeout())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to fetch {}: {}", robots_url, e);
                return self.fallback(host, now);
            }
        };

        let status = response.status();

        if status.is_success() {
            return match response.bytes().await {
                Ok(bytes) => {
                    let bytes = &bytes[..bytes.len().min(MAX_ROBOTS_BYTES)];
                    let content = String::from_utf8_lossy(bytes);
                    RobotsRuleSet::parsed(host, &content, &self.agent, now, self.config.ttl())
                }
                Err(e) => {
                    warn!("Failed to read {}: {}", robots_url, e);
                    self.fallback(host, now)
                }
            };
        }

        if status.is_client_error() && status.as_u16() != 429 {
            debug!("No robots.txt for {} ({}), allowing all", host, status);
            return RobotsRuleSet::allow_all(host, now, self.config.ttl());
        }

        warn!("robots.txt for {} returned {}, using fallback", host, status);
        self.fallback(host, now)
    }

    fn fallback(&self, host: &str, now: Instant) -> RobotsRuleSet {
        RobotsRuleSet::fallback(
            host,
            now,
            self.config.grace_period(),
            self.config.fallback_delay(),
        )
    }
}
