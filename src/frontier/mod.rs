//! The crawl frontier
//!
//! Pending tasks are kept in one ordered queue per host, keyed by
//! `(depth, id)`. Selection looks only at the head of each eligible host's
//! queue, so the shallowest, oldest task among ready hosts goes first.
//! Every accepted task is written to the store before it becomes visible here.

mod dedup;

pub use dedup::DedupFilter;

use crate::config::CrawlerConfig;
use crate::crawler::PolitenessLedger;
use crate::state::UrlTask;
use crate::storage::{Storage, StorageResult};
use crate::url::fingerprint;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Instant;
use tracing::{debug, trace, warn};
use url::Url;

/// Result of offering a task to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Duplicate,
    DepthExceeded,
    DomainCapExceeded,
}

impl fmt::Display for EnqueueOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::Duplicate => "duplicate",
            Self::DepthExceeded => "depth-exceeded",
            Self::DomainCapExceeded => "domain-cap-exceeded",
        };
        write!(f, "{}", s)
    }
}

pub struct Frontier {
    queues: HashMap<String, BTreeMap<(u32, i64), UrlTask>>,
    accepted: HashMap<String, u32>,
    dedup: DedupFilter,
    max_depth: u32,
    max_pages_per_host: u32,
    len: usize,
}

impl Frontier {
    pub fn new(config: &CrawlerConfig) -> Self {
        Self {
            queues: HashMap::new(),
            accepted: HashMap::new(),
            dedup: DedupFilter::new(config.dedup_capacity),
            max_depth: config.max_depth,
            max_pages_per_host: config.max_pages_per_host,
            len: 0,
        }
    }

    /// Offers a new task
    ///
    /// Checks, in order: the in-memory filter, the store's seen set, the depth
    /// limit and the host's page cap. An accepted task is persisted and gets
    /// its store id before it is queued.
    pub fn enqueue(&mut self, store: &mut dyn Storage, mut task: UrlTask) -> StorageResult<EnqueueOutcome> {
        let fp = fingerprint(&task.url);

        if self.dedup.seen(fp) {
            trace!("Duplicate (filter): {}", task.url);
            return Ok(EnqueueOutcome::Duplicate);
        }

        if store.is_known_url(fp)? {
            trace!("Duplicate (store): {}", task.url);
            self.dedup.record(fp);
            return Ok(EnqueueOutcome::Duplicate);
        }

        if task.depth > self.max_depth {
            trace!("Depth {} exceeds limit: {}", task.depth, task.url);
            return Ok(EnqueueOutcome::DepthExceeded);
        }

        if self.accepted_for(&task.host) >= self.max_pages_per_host {
            trace!("Page cap reached for {}: {}", task.host, task.url);
            return Ok(EnqueueOutcome::DomainCapExceeded);
        }

        task.id = store.push_task(&task, fp)?;
        self.dedup.record(fp);
        *self.accepted.entry(task.host.clone()).or_insert(0) += 1;

        debug!("Enqueued {} (depth {})", task.url, task.depth);
        self.insert(task);
        Ok(EnqueueOutcome::Accepted)
    }

    /// Puts a task back after a transient failure
    ///
    /// Skips the admission checks; the task was admitted already.
    pub fn requeue(&mut self, store: &mut dyn Storage, task: UrlTask) -> StorageResult<()> {
        store.requeue_task(task.id, task.attempts)?;
        self.insert(task);
        Ok(())
    }

    /// Drops a task that reached a terminal state
    pub fn complete(&mut self, store: &mut dyn Storage, task: &UrlTask) -> StorageResult<()> {
        store.remove_task(task.id)
    }

    fn insert(&mut self, task: UrlTask) {
        self.queues
            .entry(task.host.clone())
            .or_default()
            .insert(task.priority(), task);
        self.len += 1;
    }

    /// Takes the next task whose host may be fetched at `now`
    ///
    /// Returns None without waiting when no host with pending work is
    /// eligible. The chosen task is marked in flight in the store and its
    /// fetch start is recorded in the ledger.
    pub fn next_ready(
        &mut self,
        ledger: &mut PolitenessLedger,
        store: &mut dyn Storage,
        now: Instant,
    ) -> StorageResult<Option<UrlTask>> {
        let mut best: Option<((u32, i64), String)> = None;

        for (host, queue) in &self.queues {
            let Some(head) = queue.keys().next().copied() else {
                continue;
            };

            let eligible = ledger.eligible_at(host, &*store, now)?;
            if !eligible.map(|at| at <= now).unwrap_or(false) {
                continue;
            }

            if best.as_ref().map(|(key, _)| head < *key).unwrap_or(true) {
                best = Some((head, host.clone()));
            }
        }

        let Some((key, host)) = best else {
            return Ok(None);
        };

        let Some(queue) = self.queues.get_mut(&host) else {
            return Ok(None);
        };
        let Some(task) = queue.remove(&key) else {
            return Ok(None);
        };
        if queue.is_empty() {
            self.queues.remove(&host);
        }
        self.len -= 1;

        store.mark_in_flight(task.id)?;
        ledger.ensure(&host, &*store, now)?;
        ledger.record_fetch_start(&host, now);
        Ok(Some(task))
    }

    /// Earliest instant at which some host with pending work becomes eligible
    ///
    /// Hosts with a fetch in flight are skipped; their completion wakes the
    /// dispatcher anyway.
    pub fn soonest_wakeup(
        &self,
        ledger: &PolitenessLedger,
        store: &dyn Storage,
        now: Instant,
    ) -> StorageResult<Option<Instant>> {
        let mut soonest: Option<Instant> = None;
        for (host, queue) in &self.queues {
            if queue.is_empty() {
                continue;
            }
            if let Some(at) = ledger.eligible_at(host, store, now)? {
                soonest = Some(soonest.map_or(at, |current| current.min(at)));
            }
        }
        Ok(soonest)
    }

    /// Rebuilds the in-memory frontier from the store
    ///
    /// Rows a previous process left in flight are re-queued first. Returns
    /// the number of tasks loaded.
    pub fn restore(&mut self, store: &mut dyn Storage) -> StorageResult<usize> {
        let reset = store.reset_in_flight()?;
        if reset > 0 {
            debug!("Re-queued {} tasks left in flight", reset);
        }

        self.queues.clear();
        self.len = 0;
        self.accepted = store.count_accepted_by_host()?;

        let mut loaded = 0;
        for record in store.load_frontier()? {
            let url = match Url::parse(&record.url) {
                Ok(url) => url,
                Err(e) => {
                    warn!("Dropping unparseable frontier row {}: {}", record.id, e);
                    store.remove_task(record.id)?;
                    continue;
                }
            };

            let enqueued_at = DateTime::parse_from_rfc3339(&record.enqueued_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            self.dedup.record(fingerprint(&url));
            self.insert(UrlTask {
                id: record.id,
                url,
                host: record.host,
                depth: record.depth,
                discovered_from: record.discovered_from,
                enqueued_at,
                attempts: record.attempts,
            });
            loaded += 1;
        }

        Ok(loaded)
    }

    /// Pages accepted so far for `host`, including earlier runs
    pub fn accepted_for(&self, host: &str) -> u32 {
        self.accepted.get(host).copied().unwrap_or(0)
    }

    /// Number of hosts with pending work
    pub fn pending_hosts(&self) -> usize {
        self.queues.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolitenessConfig;
    use crate::state::TaskState;
    use crate::storage::SqliteStorage;
    use crate::url::{host_key, normalize_url};
    use std::time::Duration;

    fn crawler_config() -> CrawlerConfig {
        CrawlerConfig {
            max_depth: 2,
            max_pages_per_host: 3,
            dedup_capacity: 100,
            ..CrawlerConfig::default()
        }
    }

    fn ledger() -> PolitenessLedger {
        PolitenessLedger::new(PolitenessConfig {
            default_delay_ms: 1000,
            ..PolitenessConfig::default()
        })
    }

    fn task(url: &str, depth: u32) -> UrlTask {
        let url = normalize_url(url).unwrap();
        let host = host_key(&url).unwrap();
        UrlTask::new(url, host, depth, None)
    }

    #[test]
    fn test_enqueue_outcomes() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let mut frontier = Frontier::new(&crawler_config());

        assert_eq!(
            frontier.enqueue(&mut store, task("https://a.com/", 0)).unwrap(),
            EnqueueOutcome::Accepted
        );
        assert_eq!(
            frontier.enqueue(&mut store, task("https://a.com/", 1)).unwrap(),
            EnqueueOutcome::Duplicate
        );
        assert_eq!(
            frontier.enqueue(&mut store, task("https://a.com/deep", 3)).unwrap(),
            EnqueueOutcome::DepthExceeded
        );
        assert_eq!(frontier.len(), 1);
    }

    #[test]
    fn test_depth_rejected_url_is_not_marked_seen() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let mut frontier = Frontier::new(&crawler_config());

        assert_eq!(
            frontier.enqueue(&mut store, task("https://a.com/x", 5)).unwrap(),
            EnqueueOutcome::DepthExceeded
        );
        assert_eq!(
            frontier.enqueue(&mut store, task("https://a.com/x", 1)).unwrap(),
            EnqueueOutcome::Accepted
        );
    }

    #[test]
    fn test_domain_cap() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let mut frontier = Frontier::new(&crawler_config());

        for n in 0..3 {
            let outcome = frontier
                .enqueue(&mut store, task(&format!("https://a.com/{}", n), 1))
                .unwrap();
            assert_eq!(outcome, EnqueueOutcome::Accepted);
        }
        for n in 3..6 {
            let outcome = frontier
                .enqueue(&mut store, task(&format!("https://a.com/{}", n), 1))
                .unwrap();
            assert_eq!(outcome, EnqueueOutcome::DomainCapExceeded);
        }

        // Other hosts are unaffected
        assert_eq!(
            frontier.enqueue(&mut store, task("https://b.com/0", 1)).unwrap(),
            EnqueueOutcome::Accepted
        );
        assert_eq!(frontier.accepted_for("a.com"), 3);
    }

    #[test]
    fn test_store_catches_duplicates_the_filter_forgot() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let config = CrawlerConfig {
            dedup_capacity: 1,
            ..crawler_config()
        };
        let mut frontier = Frontier::new(&config);

        frontier.enqueue(&mut store, task("https://a.com/1", 0)).unwrap();
        frontier.enqueue(&mut store, task("https://b.com/2", 0)).unwrap();

        assert_eq!(
            frontier.enqueue(&mut store, task("https://a.com/1", 0)).unwrap(),
            EnqueueOutcome::Duplicate
        );
    }

    #[test]
    fn test_next_ready_prefers_shallow_then_oldest() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let mut frontier = Frontier::new(&crawler_config());
        let mut ledger = ledger();
        let now = Instant::now();

        frontier.enqueue(&mut store, task("https://a.com/deep", 2)).unwrap();
        frontier.enqueue(&mut store, task("https://b.com/first", 1)).unwrap();
        frontier.enqueue(&mut store, task("https://c.com/second", 1)).unwrap();

        let first = frontier.next_ready(&mut ledger, &mut store, now).unwrap().unwrap();
        assert_eq!(first.url.as_str(), "https://b.com/first");
        let second = frontier.next_ready(&mut ledger, &mut store, now).unwrap().unwrap();
        assert_eq!(second.url.as_str(), "https://c.com/second");
        let third = frontier.next_ready(&mut ledger, &mut store, now).unwrap().unwrap();
        assert_eq!(third.url.as_str(), "https://a.com/deep");
    }

    #[test]
    fn test_next_ready_serializes_each_host() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let mut frontier = Frontier::new(&crawler_config());
        let mut ledger = ledger();
        let now = Instant::now();

        frontier.enqueue(&mut store, task("https://a.com/1", 0)).unwrap();
        frontier.enqueue(&mut store, task("https://a.com/2", 0)).unwrap();

        let first = frontier.next_ready(&mut ledger, &mut store, now).unwrap().unwrap();
        assert_eq!(first.url.as_str(), "https://a.com/1");

        // In flight: nothing else from a.com, and no wakeup to wait for
        assert!(frontier.next_ready(&mut ledger, &mut store, now).unwrap().is_none());
        assert_eq!(frontier.soonest_wakeup(&ledger, &store, now).unwrap(), None);

        ledger.record_success("a.com");
        assert_eq!(
            frontier.soonest_wakeup(&ledger, &store, now).unwrap(),
            Some(now + Duration::from_secs(1))
        );
        assert!(frontier
            .next_ready(&mut ledger, &mut store, now + Duration::from_millis(999))
            .unwrap()
            .is_none());

        let second = frontier
            .next_ready(&mut ledger, &mut store, now + Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(second.url.as_str(), "https://a.com/2");
    }

    #[test]
    fn test_host_table_pressure_keeps_one_fetch_per_host() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let mut frontier = Frontier::new(&crawler_config());
        let mut ledger = PolitenessLedger::new(PolitenessConfig {
            default_delay_ms: 100,
            host_table_capacity: 1,
            ..PolitenessConfig::default()
        });
        let now = Instant::now();

        for url in ["https://a.com/1", "https://a.com/2", "https://c.com/1", "https://c.com/2"] {
            frontier.enqueue(&mut store, task(url, 0)).unwrap();
        }

        // Same sequence as the dispatcher's admit pass, with nothing completing
        let mut started = Vec::new();
        for at in [now, now, now + Duration::from_millis(300), now + Duration::from_secs(5)] {
            if let Some(task) = frontier.next_ready(&mut ledger, &mut store, at).unwrap() {
                started.push(task.url.to_string());
            }
            let evicted = ledger.take_evicted(at, Utc::now());
            store.save_host_states(&evicted).unwrap();
        }

        assert_eq!(started, vec!["https://a.com/1", "https://c.com/1"]);
        assert_eq!(ledger.in_flight_count(), 2);
        assert_eq!(
            frontier
                .soonest_wakeup(&ledger, &store, now + Duration::from_secs(5))
                .unwrap(),
            None
        );

        ledger.record_success("a.com");
        let next = frontier
            .next_ready(&mut ledger, &mut store, now + Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(next.url.as_str(), "https://a.com/2");
    }

    #[test]
    fn test_requeue_and_restore() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let mut frontier = Frontier::new(&crawler_config());
        let mut ledger = ledger();
        let now = Instant::now();

        frontier.enqueue(&mut store, task("https://a.com/1", 0)).unwrap();
        frontier.enqueue(&mut store, task("https://b.com/1", 1)).unwrap();

        let mut taken = frontier.next_ready(&mut ledger, &mut store, now).unwrap().unwrap();
        taken.attempts = 1;
        frontier.requeue(&mut store, taken).unwrap();
        let in_flight = frontier.next_ready(&mut ledger, &mut store, now).unwrap().unwrap();
        assert_eq!(in_flight.url.as_str(), "https://b.com/1");

        // Simulate a restart with b.com still in flight
        let mut restored = Frontier::new(&crawler_config());
        assert_eq!(restored.restore(&mut store).unwrap(), 2);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.accepted_for("a.com"), 1);
        assert!(store
            .load_frontier()
            .unwrap()
            .iter()
            .all(|r| r.state.is_pending()));

        let records = store.load_frontier().unwrap();
        let a = records.iter().find(|r| r.host == "a.com").unwrap();
        assert_eq!(a.attempts, 1);
        assert_eq!(a.state, TaskState::RetryQueued);

        // Restored URLs count as seen
        assert_eq!(
            restored.enqueue(&mut store, task("https://a.com/1", 0)).unwrap(),
            EnqueueOutcome::Duplicate
        );
    }

    #[test]
    fn test_complete_removes_row() {
        let mut store = SqliteStorage::new_in_memory().unwrap();
        let mut frontier = Frontier::new(&crawler_config());
        let mut ledger = ledger();

        frontier.enqueue(&mut store, task("https://a.com/", 0)).unwrap();
        let taken = frontier
            .next_ready(&mut ledger, &mut store, Instant::now())
            .unwrap()
            .unwrap();
        frontier.complete(&mut store, &taken).unwrap();

        assert_eq!(store.count_frontier().unwrap(), 0);
        assert!(frontier.is_empty());
    }
}
