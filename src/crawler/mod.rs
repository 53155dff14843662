//! Crawler module: fetching, content handing-off and the scheduling loop
//!
//! This module contains:
//! - HTTP fetching under a deadline and a body cap
//! - The content handler seam and the default HTML handler
//! - The politeness ledger
//! - The dispatcher loop and its handle
//! - Result sinks

mod content;
mod dispatcher;
mod fetcher;
mod ledger;
mod sink;

pub use content::{parse_html, ContentHandler, ExtractedContent, HtmlContentHandler};
pub use dispatcher::{CrawlStats, CrawlerHandle, Dispatcher};
pub use fetcher::{
    build_http_client, fetch_url, fetch_with_deadline, parse_retry_after, FetchOutcome,
    FetchedPage,
};
pub use ledger::PolitenessLedger;
pub use sink::{FetchReport, MemorySink, ResultSink, TerminalFailure};

use crate::config::Config;
use crate::monitor::{spawn_controller, ConcurrencyController, ResourceMonitor, SysinfoProbe};
use crate::storage::{RunStatus, SqliteStorage, Storage};
use std::path::Path;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Start-up options for [`spawn_crawl`]
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Clear the frontier, seen set and host table first
    pub fresh: bool,

    /// Hash of the configuration file, stored with the run
    pub config_hash: String,
}

/// Starts a complete crawl against the configured SQLite database
///
/// This wires up:
/// 1. The store (frontier, seen set, host states) and the result sink
/// 2. A new run, or the interrupted one being resumed
/// 3. The resource monitor and the concurrency controller
/// 4. The dispatcher loop
///
/// Returns a handle for seeding, stats and shutdown, plus the task that
/// resolves with the final stats.
///
/// # Example
///
/// ```no_run
/// use roamer::config::load_config_with_hash;
/// use roamer::crawler::{spawn_crawl, CrawlOptions};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, config_hash) = load_config_with_hash(Path::new("roamer.toml"))?;
/// let (handle, task) = spawn_crawl(config, CrawlOptions { fresh: false, config_hash })?;
/// handle.submit_seed("https://example.com/").await?;
/// let stats = task.await??;
/// println!("{} pages fetched", stats.succeeded);
/// # Ok(())
/// # }
/// ```
pub fn spawn_crawl(
    config: Config,
    options: CrawlOptions,
) -> crate::Result<(CrawlerHandle, JoinHandle<crate::Result<CrawlStats>>)> {
    let path = Path::new(&config.storage.database_path);
    let mut store = SqliteStorage::new(path)?;

    if options.fresh {
        info!("Starting fresh: clearing frontier and host state");
        store.reset_crawl()?;
    }

    let run_id = open_run(&mut store, &options)?;

    let mut sink = SqliteStorage::new(path)?;
    sink.attach_run(run_id);

    let probe = SysinfoProbe::new()?;
    let (samples, monitor_task) = ResourceMonitor::spawn(probe, config.resources.sample_interval());
    let controller = ConcurrencyController::new(&config.concurrency, &config.resources);

    let dispatcher = Dispatcher::new(config, Box::new(store), Box::new(sink))?;
    let (budget, controller_task) =
        spawn_controller(controller, samples.clone(), dispatcher.dormant_hosts());
    let dispatcher = dispatcher
        .with_budget(budget)
        .with_resource_samples(samples)
        .with_run(run_id);

    let handle = dispatcher.handle();
    let task = tokio::spawn(async move {
        let result = dispatcher.run().await;
        controller_task.abort();
        monitor_task.abort();
        result
    });

    Ok((handle, task))
}

/// Picks the run this crawl belongs to
///
/// Unless `fresh` is set, the latest run is resumed when it crashed
/// (still `running`) or was drained (`interrupted`); otherwise a new run
/// is created.
fn open_run(store: &mut dyn Storage, options: &CrawlOptions) -> crate::Result<i64> {
    let resumable = store.get_latest_run()?.filter(|run| {
        !options.fresh && matches!(run.status, RunStatus::Running | RunStatus::Interrupted)
    });

    match resumable {
        Some(run) => {
            if run.config_hash != options.config_hash {
                warn!("Configuration changed since run {} started", run.id);
            }
            info!("Resuming {} run {}", run.status.to_db_string(), run.id);
            store.update_run_status(run.id, RunStatus::Running)?;
            Ok(run.id)
        }
        None => {
            let run_id = store.create_run(&options.config_hash)?;
            info!("Starting run {}", run_id);
            Ok(run_id)
        }
    }
}
