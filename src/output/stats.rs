//! Statistics generation from the crawl database
//!
//! Backs the `--stats` flag: everything here is read from the store, so it
//! works on a database whose crawler is not running.

use crate::state::FailureKind;
use crate::storage::{RunRecord, Storage};
use crate::RoamerError;
use std::collections::HashMap;
use std::fmt::Write;

/// Number of hosts listed in the top-hosts table
const TOP_HOSTS: usize = 10;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Most recent run, if any
    pub latest_run: Option<RunRecord>,

    /// URLs ever accepted into the frontier
    pub seen_urls: u64,

    /// Tasks still waiting in the frontier
    pub queued: u64,

    /// Completed fetches recorded by the result sink
    pub results: u64,

    /// Hosts with a persisted politeness state
    pub hosts: u64,

    /// Recorded results keyed by HTTP status
    pub status_breakdown: HashMap<u16, u64>,

    /// Terminal failures keyed by kind
    pub failure_summary: HashMap<FailureKind, u64>,

    /// Hosts with the most fetches, most first
    pub top_hosts: Vec<(String, u64)>,

    /// Hosts still cooling down after repeated errors
    pub dormant_hosts: Vec<String>,
}

impl CrawlStatistics {
    pub fn total_failures(&self) -> u64 {
        self.failure_summary.values().sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(RoamerError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CrawlStatistics, RoamerError> {
    Ok(CrawlStatistics {
        latest_run: storage.get_latest_run()?,
        seen_urls: storage.count_seen_urls()?,
        queued: storage.count_frontier()?,
        results: storage.count_results()?,
        hosts: storage.count_hosts()?,
        status_breakdown: storage.get_status_breakdown()?,
        failure_summary: storage.get_failure_summary()?,
        top_hosts: storage.get_top_hosts(TOP_HOSTS)?,
        dormant_hosts: storage.get_dormant_hosts()?,
    })
}

/// Renders statistics as the text printed by `--stats`
pub fn render_statistics(stats: &CrawlStatistics) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "=== Crawl Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        let _ = writeln!(out, "Latest run: #{} ({})", run.id, run.status.to_db_string());
        let _ = writeln!(out, "  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            let _ = writeln!(out, "  Finished: {}", finished);
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Overview:");
    let _ = writeln!(out, "  URLs accepted: {}", stats.seen_urls);
    let _ = writeln!(out, "  Still queued: {}", stats.queued);
    let _ = writeln!(out, "  Fetches recorded: {}", stats.results);
    let _ = writeln!(out, "  Terminal failures: {}", stats.total_failures());
    let _ = writeln!(out, "  Hosts tracked: {}", stats.hosts);
    let _ = writeln!(out);

    if !stats.status_breakdown.is_empty() {
        let _ = writeln!(out, "Responses by Status:");
        let mut statuses: Vec<_> = stats.status_breakdown.iter().collect();
        statuses.sort_by_key(|(status, _)| **status);
        for (status, count) in statuses {
            let _ = writeln!(out, "  {}: {}", status, count);
        }
        let _ = writeln!(out);
    }

    if !stats.failure_summary.is_empty() {
        let _ = writeln!(out, "Failure Summary:");
        let mut failures: Vec<_> = stats.failure_summary.iter().collect();
        failures.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.to_db_string().cmp(b.0.to_db_string())));
        for (kind, count) in failures {
            let _ = writeln!(out, "  {}: {}", kind, count);
        }
        let _ = writeln!(out);
    }

    if !stats.top_hosts.is_empty() {
        let _ = writeln!(out, "Top Hosts:");
        for (host, pages) in &stats.top_hosts {
            let _ = writeln!(out, "  {:<40} {}", host, pages);
        }
        let _ = writeln!(out);
    }

    if !stats.dormant_hosts.is_empty() {
        let _ = writeln!(out, "Dormant Hosts ({}):", stats.dormant_hosts.len());
        for host in &stats.dormant_hosts {
            let _ = writeln!(out, "  - {}", host);
        }
        let _ = writeln!(out);
    }

    let finished = stats.results + stats.total_failures();
    let success_rate = if finished > 0 {
        (stats.results as f64 / finished as f64) * 100.0
    } else {
        0.0
    };
    let _ = writeln!(
        out,
        "Success Rate: {:.1}% ({} / {} finished tasks)",
        success_rate, stats.results, finished
    );

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &CrawlStatistics) {
    print!("{}", render_statistics(stats));
}
