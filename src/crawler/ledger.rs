//! Politeness ledger: per-host state behind a bounded LRU table
//!
//! Only the dispatcher loop touches the ledger, so it needs no locking.
//! A host with a fetch in flight is held outside the LRU table until the
//! fetch settles, so it can never be evicted mid-request. Hosts pushed out
//! of the table are buffered until the dispatcher persists them, and are
//! reloaded from the store the next time the host is picked.

use crate::config::PolitenessConfig;
use crate::state::{HostRecord, HostState};
use crate::storage::{Storage, StorageResult};
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct PolitenessLedger {
    config: PolitenessConfig,
    hosts: LruCache<String, HostState>,
    in_flight: HashMap<String, HostState>,
    evicted: Vec<HostState>,
}

impl PolitenessLedger {
    pub fn new(config: PolitenessConfig) -> Self {
        let capacity = NonZeroUsize::new(config.host_table_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            hosts: LruCache::new(capacity),
            in_flight: HashMap::new(),
            evicted: Vec::new(),
        }
    }

    pub fn default_delay(&self) -> Duration {
        self.config.default_delay()
    }

    /// Makes sure `host` has an in-memory state
    ///
    /// A host evicted earlier is taken from the unsaved buffer or reloaded
    /// from the store; an unknown host starts fresh.
    pub fn ensure(&mut self, host: &str, store: &dyn Storage, now: Instant) -> StorageResult<()> {
        if self.in_flight.contains_key(host) || self.hosts.contains(host) {
            return Ok(());
        }

        let state = match self.take_evicted_state(host) {
            Some(state) => state,
            None => match store.load_host_state(host)? {
                Some(record) => {
                    debug!("Restoring host state for {}", host);
                    HostState::from_record(&record, now, Utc::now())
                }
                None => HostState::new(host),
            },
        };

        self.insert(state);
        Ok(())
    }

    /// Earliest instant the next fetch to `host` may start, without loading
    /// the host into the table
    ///
    /// Hosts not held in memory are read from the store. None while a fetch
    /// to the host is in flight.
    pub fn eligible_at(
        &self,
        host: &str,
        store: &dyn Storage,
        now: Instant,
    ) -> StorageResult<Option<Instant>> {
        let default = self.config.default_delay();
        if let Some(state) = self.resident(host) {
            return Ok(state.next_eligible_time(default, now));
        }

        Ok(match store.load_host_state(host)? {
            Some(record) => {
                HostState::from_record(&record, now, Utc::now()).next_eligible_time(default, now)
            }
            None => Some(now),
        })
    }

    fn resident(&self, host: &str) -> Option<&HostState> {
        self.in_flight
            .get(host)
            .or_else(|| self.hosts.peek(host))
            .or_else(|| self.evicted.iter().find(|s| s.host == host))
    }

    fn take_evicted_state(&mut self, host: &str) -> Option<HostState> {
        let index = self.evicted.iter().position(|s| s.host == host)?;
        Some(self.evicted.swap_remove(index))
    }

    fn insert(&mut self, state: HostState) {
        let host = state.host.clone();
        if let Some((evicted_host, evicted)) = self.hosts.push(host.clone(), state) {
            if evicted_host != host {
                debug!("Evicting host state for {}", evicted_host);
                self.evicted.push(evicted);
            }
        }
    }

    /// Removes a host's state from wherever it is held, or starts a fresh one
    fn take_state(&mut self, host: &str) -> HostState {
        self.in_flight
            .remove(host)
            .or_else(|| self.hosts.pop(host))
            .or_else(|| self.take_evicted_state(host))
            .unwrap_or_else(|| HostState::new(host))
    }

    fn state_mut(&mut self, host: &str) -> &mut HostState {
        if !self.in_flight.contains_key(host) && !self.hosts.contains(host) {
            let state = self
                .take_evicted_state(host)
                .unwrap_or_else(|| HostState::new(host));
            self.insert(state);
        }
        match self.in_flight.get_mut(host) {
            Some(state) => state,
            // Present after the insert above; the fallback is never taken
            None => self
                .hosts
                .get_or_insert_mut(host.to_string(), || HostState::new(host)),
        }
    }

    /// Moves a host whose fetch has settled back into the LRU table
    fn settle(&mut self, host: &str) -> &mut HostState {
        if let Some(state) = self.in_flight.remove(host) {
            self.insert(state);
        }
        self.state_mut(host)
    }

    /// Looks up a host without changing its LRU position
    pub fn peek(&self, host: &str) -> Option<&HostState> {
        self.in_flight.get(host).or_else(|| self.hosts.peek(host))
    }

    /// Earliest instant the next fetch to `host` may start
    ///
    /// None while a fetch to the host is in flight. A host not held in
    /// memory is eligible immediately; use [`eligible_at`](Self::eligible_at)
    /// to consult the store as well.
    pub fn next_eligible_time(&self, host: &str, now: Instant) -> Option<Instant> {
        match self.resident(host) {
            Some(state) => state.next_eligible_time(self.config.default_delay(), now),
            None => Some(now),
        }
    }

    pub fn can_fetch(&self, host: &str, now: Instant) -> bool {
        self.next_eligible_time(host, now)
            .map(|at| at <= now)
            .unwrap_or(false)
    }

    pub fn effective_delay(&self, host: &str) -> Duration {
        let default = self.config.default_delay();
        self.resident(host)
            .map(|state| state.effective_delay(default))
            .unwrap_or(default)
    }

    /// Records a fetch start; the host stays out of the LRU table until
    /// one of the outcome methods settles it
    pub fn record_fetch_start(&mut self, host: &str, now: Instant) {
        let mut state = self.take_state(host);
        state.record_fetch_start(now);
        self.in_flight.insert(host.to_string(), state);
    }

    pub fn record_success(&mut self, host: &str) {
        self.settle(host).record_success();
    }

    /// Records a transient error; returns true if the host went dormant
    pub fn record_error(&mut self, host: &str, now: Instant) -> bool {
        let config = self.config.clone();
        let dormant = self.settle(host).record_error(&config, now);
        if dormant {
            info!(
                "Host {} is dormant for {:?} after repeated errors",
                host,
                config.dormant_cooldown()
            );
        }
        dormant
    }

    /// Records an HTTP 429; returns true if the host went dormant
    pub fn record_rate_limited(
        &mut self,
        host: &str,
        retry_after: Option<Duration>,
        now: Instant,
    ) -> bool {
        let config = self.config.clone();
        let dormant = self
            .settle(host)
            .record_rate_limited(&config, retry_after, now);
        if dormant {
            info!(
                "Host {} is dormant for {:?} after repeated rate limiting",
                host,
                config.dormant_cooldown()
            );
        }
        dormant
    }

    /// Frees the host's in-flight slot without touching its counters
    pub fn release(&mut self, host: &str) {
        self.settle(host).release();
    }

    /// Applies the robots crawl-delay (or fallback floor) for a host
    pub fn set_robots_delay(&mut self, host: &str, delay: Option<Duration>) {
        self.state_mut(host).robots_delay = delay;
    }

    /// Number of in-memory hosts currently cooling down
    pub fn dormant_count(&self, now: Instant) -> usize {
        self.hosts
            .iter()
            .map(|(_, state)| state)
            .chain(self.in_flight.values())
            .filter(|state| state.is_dormant(now))
            .count()
    }

    /// Drains the evicted states waiting to be persisted
    pub fn take_evicted(&mut self, now: Instant, wall_now: DateTime<Utc>) -> Vec<HostRecord> {
        self.evicted
            .drain(..)
            .map(|state| state.to_record(now, wall_now))
            .collect()
    }

    /// Snapshot of every known host state, for periodic persistence
    pub fn records(&self, now: Instant, wall_now: DateTime<Utc>) -> Vec<HostRecord> {
        self.hosts
            .iter()
            .map(|(_, state)| state)
            .chain(self.in_flight.values())
            .chain(self.evicted.iter())
            .map(|state| state.to_record(now, wall_now))
            .collect()
    }

    /// Number of hosts with a fetch in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn len(&self) -> usize {
        self.hosts.len() + self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    fn test_config(capacity: usize) -> PolitenessConfig {
        PolitenessConfig {
            default_delay_ms: 1000,
            backoff_multiplier: 2.0,
            rate_limit_multiplier: 4.0,
            max_backoff_ms: 60_000,
            dormant_threshold: 3,
            dormant_cooldown_secs: 600,
            host_table_capacity: capacity,
        }
    }

    #[test]
    fn test_unknown_host_is_eligible() {
        let ledger = PolitenessLedger::new(test_config(8));
        let now = Instant::now();
        assert_eq!(ledger.next_eligible_time("example.com", now), Some(now));
        assert!(ledger.can_fetch("example.com", now));
    }

    #[test]
    fn test_fetch_starts_respect_effective_delay() {
        let mut ledger = PolitenessLedger::new(test_config(8));
        let start = Instant::now();

        ledger.record_fetch_start("example.com", start);
        assert!(!ledger.can_fetch("example.com", start + Duration::from_secs(5)));

        ledger.record_success("example.com");
        assert!(!ledger.can_fetch("example.com", start + Duration::from_millis(999)));
        assert!(ledger.can_fetch("example.com", start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_robots_delay_raises_floor() {
        let mut ledger = PolitenessLedger::new(test_config(8));
        ledger.set_robots_delay("example.com", Some(Duration::from_secs(5)));
        assert_eq!(ledger.effective_delay("example.com"), Duration::from_secs(5));

        let start = Instant::now();
        ledger.record_fetch_start("example.com", start);
        ledger.record_success("example.com");
        assert!(!ledger.can_fetch("example.com", start + Duration::from_secs(4)));
        assert!(ledger.can_fetch("example.com", start + Duration::from_secs(5)));
    }

    #[test]
    fn test_repeated_rate_limits_strictly_increase_delay() {
        let mut ledger = PolitenessLedger::new(test_config(8));
        let mut now = Instant::now();
        let mut previous = ledger.effective_delay("example.com");

        for _ in 0..2 {
            ledger.record_fetch_start("example.com", now);
            ledger.record_rate_limited("example.com", None, now);
            let delay = ledger.effective_delay("example.com");
            assert!(delay > previous, "{:?} should exceed {:?}", delay, previous);
            previous = delay;
            now += delay;
        }
    }

    #[test]
    fn test_dormancy_after_threshold() {
        let mut ledger = PolitenessLedger::new(test_config(8));
        let now = Instant::now();

        assert!(!ledger.record_error("flaky.com", now));
        assert!(!ledger.record_error("flaky.com", now));
        assert!(ledger.record_error("flaky.com", now));

        assert_eq!(ledger.dormant_count(now), 1);
        assert!(!ledger.can_fetch("flaky.com", now + Duration::from_secs(599)));
        assert!(ledger.can_fetch("flaky.com", now + Duration::from_secs(600)));
        assert_eq!(ledger.dormant_count(now + Duration::from_secs(600)), 0);
    }

    #[test]
    fn test_eviction_buffers_state_for_persistence() {
        let mut ledger = PolitenessLedger::new(test_config(2));
        let now = Instant::now();

        for host in ["a.com", "b.com", "c.com"] {
            ledger.record_fetch_start(host, now);
            ledger.record_success(host);
        }

        assert_eq!(ledger.len(), 2);
        assert!(ledger.peek("a.com").is_none());

        let evicted = ledger.take_evicted(now, Utc::now());
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].host, "a.com");
        assert_eq!(evicted[0].pages_fetched, 1);
        assert!(ledger.take_evicted(now, Utc::now()).is_empty());
    }

    #[test]
    fn test_evicted_state_restored_from_buffer() {
        let store = SqliteStorage::new_in_memory().unwrap();
        let mut ledger = PolitenessLedger::new(test_config(1));
        let now = Instant::now();

        ledger.record_error("a.com", now);
        ledger.record_error("b.com", now);
        assert!(ledger.peek("a.com").is_none());

        ledger.ensure("a.com", &store, now).unwrap();
        assert_eq!(ledger.peek("a.com").unwrap().consecutive_errors, 1);
    }

    #[test]
    fn test_evicted_state_restored_from_store() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let mut ledger = PolitenessLedger::new(test_config(1));
        let now = Instant::now();

        ledger.record_fetch_start("a.com", now);
        ledger.record_error("a.com", now);
        ledger.record_fetch_start("b.com", now);
        ledger.record_success("b.com");

        let evicted = ledger.take_evicted(now, Utc::now());
        store.save_host_states(&evicted).unwrap();

        ledger.ensure("a.com", &store, now).unwrap();
        let restored = ledger.peek("a.com").unwrap();
        assert_eq!(restored.pages_fetched, 1);
        assert_eq!(restored.consecutive_errors, 1);
        assert_eq!(restored.error_backoff, Duration::from_secs(2));
    }

    #[test]
    fn test_in_flight_host_is_never_evicted() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let mut ledger = PolitenessLedger::new(test_config(1));
        let now = Instant::now();

        ledger.record_fetch_start("a.com", now);
        for host in ["b.com", "c.com"] {
            ledger.ensure(host, &store, now).unwrap();
        }

        let evicted = ledger.take_evicted(now, Utc::now());
        assert!(evicted.iter().all(|record| record.host != "a.com"));
        store.save_host_states(&evicted).unwrap();

        // Long past the delay, a.com is still busy with its first fetch
        let later = now + Duration::from_secs(60);
        ledger.ensure("a.com", &store, later).unwrap();
        assert_eq!(ledger.next_eligible_time("a.com", later), None);
        assert_eq!(ledger.eligible_at("a.com", &store, later).unwrap(), None);
        assert_eq!(ledger.in_flight_count(), 1);

        ledger.record_success("a.com");
        assert_eq!(ledger.in_flight_count(), 0);
        assert!(ledger.can_fetch("a.com", later));
    }

    #[test]
    fn test_eligible_at_reads_store_without_loading() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let mut ledger = PolitenessLedger::new(test_config(1));
        let now = Instant::now();

        ledger.record_fetch_start("slow.com", now);
        ledger.record_error("slow.com", now);
        ledger.ensure("other.com", &store, now).unwrap();
        let evicted = ledger.take_evicted(now, Utc::now());
        store.save_host_states(&evicted).unwrap();

        let at = ledger
            .eligible_at("slow.com", &store, now)
            .unwrap()
            .expect("not in flight");
        assert!(at > now + Duration::from_secs(1));
        assert!(ledger.peek("slow.com").is_none());
        assert!(ledger.peek("other.com").is_some());
    }
}
