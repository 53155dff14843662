//! Roamer main entry point
//!
//! This is the command-line interface for the Roamer crawl scheduler.

use anyhow::Context;
use clap::Parser;
use roamer::config::{load_config_with_hash, Config};
use roamer::crawler::{spawn_crawl, CrawlOptions, CrawlerHandle};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Roamer: an adaptive crawl scheduler
///
/// Roamer crawls continuously inside a fixed memory and CPU envelope,
/// honouring robots.txt and per-host politeness delays, and adjusts its
/// concurrency to the resources the process actually uses.
#[derive(Parser, Debug)]
#[command(name = "roamer")]
#[command(version)]
#[command(about = "An adaptive crawl scheduler for constrained environments", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a fresh crawl, discarding the stored frontier and host state
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, cli.fresh, config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG`, when set, takes precedence over the flags.
fn setup_logging(verbose: u8, quiet: bool) {
    let default = if quiet {
        "error"
    } else {
        match verbose {
            0 => "roamer=info,warn",
            1 => "roamer=debug,info",
            2 => "roamer=trace,debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== Roamer Dry Run ===\n");

    println!("Crawler:");
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Max pages per host: {}", config.crawler.max_pages_per_host);
    println!("  Max attempts: {}", config.crawler.max_attempts);
    println!("  Request timeout: {:?}", config.crawler.request_timeout());
    println!("  Max content length: {} bytes", config.crawler.max_content_length);
    println!("  Stop when idle: {}", config.crawler.stop_when_idle);

    println!("\nPoliteness:");
    println!("  Default delay: {:?}", config.politeness.default_delay());
    println!("  Max backoff: {:?}", config.politeness.max_backoff());
    println!(
        "  Dormant after {} errors for {:?}",
        config.politeness.dormant_threshold,
        config.politeness.dormant_cooldown()
    );

    println!("\nResources:");
    println!("  Memory ceiling: {} MB", config.resources.memory_ceiling_mb);
    println!("  CPU ceiling: {}%", config.resources.cpu_ceiling_percent);
    println!(
        "  Watermarks: {}% / {}%",
        config.resources.low_watermark, config.resources.high_watermark
    );
    println!(
        "  Concurrency: {} (min {}, max {})",
        config.concurrency.initial, config.concurrency.min, config.concurrency.max
    );

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    println!("\nScope:");
    if config.scope.allowed_domains.is_empty() {
        println!("  Allowed domains: any");
    } else {
        for pattern in &config.scope.allowed_domains {
            println!("  - {}", pattern);
        }
    }

    println!("\nSeeds ({}):", config.scope.seeds.len());
    for seed in &config.scope.seeds {
        println!("  * {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use roamer::output::{load_statistics, print_statistics};
    use roamer::storage::SqliteStorage;
    use std::path::Path;

    println!("Database: {}\n", config.storage.database_path);

    let storage = SqliteStorage::new(Path::new(&config.storage.database_path))
        .context("failed to open database")?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, fresh: bool, config_hash: String) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous state)");
    } else {
        tracing::info!("Starting crawl (will resume if an interrupted run exists)");
    }

    let (handle, task) = spawn_crawl(config, CrawlOptions { fresh, config_hash })?;

    tokio::spawn(drain_on_signal(handle));

    let stats = task.await.context("dispatcher task panicked")??;
    tracing::info!(
        "Crawl finished: {} succeeded, {} failed, {} still queued",
        stats.succeeded,
        stats.failed,
        stats.queued
    );
    Ok(())
}

/// Waits for Ctrl-C (or SIGTERM on Unix) and asks the dispatcher to drain
async fn drain_on_signal(handle: CrawlerHandle) {
    wait_for_signal().await;
    tracing::info!("Shutdown requested, draining in-flight fetches");
    if let Err(e) = handle.drain_and_stop().await {
        tracing::warn!("Drain request failed: {}", e);
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
