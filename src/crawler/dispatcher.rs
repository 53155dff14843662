//! Fetch dispatcher: the scheduling loop
//!
//! One task owns the frontier, the politeness ledger and the store. It admits
//! work while the number of running fetches is below the concurrency budget,
//! runs each fetch as its own task in a `JoinSet`, and applies every outcome
//! back to its own state when the fetch completes. Callers talk to it through
//! a [`CrawlerHandle`].

use crate::config::Config;
use crate::crawler::content::{ContentHandler, ExtractedContent, HtmlContentHandler};
use crate::crawler::fetcher::{build_http_client, fetch_with_deadline, FetchOutcome, FetchedPage};
use crate::crawler::ledger::PolitenessLedger;
use crate::crawler::sink::{FetchReport, ResultSink, TerminalFailure};
use crate::frontier::{EnqueueOutcome, Frontier};
use crate::monitor::ResourceSample;
use crate::robots::RobotsCache;
use crate::state::{FailureKind, UrlTask};
use crate::storage::{RunStatus, Storage};
use crate::url::{host_key, in_scope, normalize_url};
use crate::{RoamerError, UrlError};
use chrono::Utc;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Completions between progress lines
const PROGRESS_EVERY: u64 = 10;

/// Completions between host-state snapshots
const PERSIST_EVERY: u64 = 50;

/// Snapshot of the scheduler's counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStats {
    /// Fetch attempts that completed, retries included
    pub processed: u64,

    /// Tasks that ended in success
    pub succeeded: u64,

    /// Tasks that ended in terminal failure
    pub failed: u64,

    /// Tasks waiting in the frontier
    pub queued: usize,

    /// Current concurrency budget
    pub concurrency: usize,

    /// Latest resident memory sample (MB)
    pub memory_mb: f64,

    /// Latest process CPU sample (%)
    pub cpu_percent: f64,
}

enum Command {
    SubmitSeed {
        url: String,
        reply: oneshot::Sender<crate::Result<EnqueueOutcome>>,
    },
    Stats {
        reply: oneshot::Sender<CrawlStats>,
    },
    Drain {
        reply: oneshot::Sender<CrawlStats>,
    },
}

/// Cloneable handle to a running [`Dispatcher`]
#[derive(Debug, Clone)]
pub struct CrawlerHandle {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SubmitSeed { url, .. } => write!(f, "SubmitSeed({})", url),
            Self::Stats { .. } => write!(f, "Stats"),
            Self::Drain { .. } => write!(f, "Drain"),
        }
    }
}

impl CrawlerHandle {
    /// Offers a URL to the frontier at depth 0
    ///
    /// Seeds are not subject to the allowed-domain scope.
    pub async fn submit_seed(&self, url: &str) -> crate::Result<EnqueueOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SubmitSeed {
            url: url.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RoamerError::SchedulerStopped)?
    }

    pub async fn current_stats(&self) -> crate::Result<CrawlStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| RoamerError::SchedulerStopped)
    }

    /// Stops admitting work, waits for running fetches, persists state
    ///
    /// Resolves with the final counters once the dispatcher has exited.
    pub async fn drain_and_stop(&self) -> crate::Result<CrawlStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Drain { reply }).await?;
        rx.await.map_err(|_| RoamerError::SchedulerStopped)
    }

    async fn send(&self, command: Command) -> crate::Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RoamerError::SchedulerStopped)
    }
}

/// Everything a fetch task needs, cheap to clone
#[derive(Clone)]
struct FetchContext {
    client: Client,
    robots: Arc<RobotsCache>,
    handler: Arc<dyn ContentHandler>,
    max_content_length: usize,
    deadline: Duration,
}

enum JobResult {
    Fetched {
        page: FetchedPage,
        content: ExtractedContent,
    },
    Failed {
        kind: FailureKind,
        status: Option<u16>,
        retry_after: Option<Duration>,
        message: String,
    },
    Disallowed,
}

struct Completion {
    task: UrlTask,
    result: JobResult,
}

async fn run_fetch(ctx: FetchContext, task: UrlTask) -> Completion {
    if !ctx.robots.allowed(&task.url).await {
        return Completion {
            task,
            result: JobResult::Disallowed,
        };
    }

    let result = match fetch_with_deadline(&ctx.client, &task.url, ctx.max_content_length, ctx.deadline).await {
        FetchOutcome::Success(page) => {
            let content = ctx
                .handler
                .extract(&page.final_url, page.content_type.as_deref(), &page.body);
            JobResult::Fetched { page, content }
        }
        FetchOutcome::Failure {
            kind,
            status,
            retry_after,
            message,
        } => JobResult::Failed {
            kind,
            status,
            retry_after,
            message,
        },
    };

    Completion { task, result }
}

#[derive(Debug, Default)]
struct Counters {
    processed: u64,
    succeeded: u64,
    failed: u64,
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Drained,
    Idle,
}

/// The scheduling loop
pub struct Dispatcher {
    config: Config,
    store: Box<dyn Storage + Send>,
    sink: Box<dyn ResultSink>,
    ctx: FetchContext,
    frontier: Frontier,
    ledger: PolitenessLedger,
    budget: watch::Receiver<usize>,
    // Keeps the default fixed budget channel open
    _budget_tx: Option<watch::Sender<usize>>,
    samples: Option<watch::Receiver<ResourceSample>>,
    dormant_tx: watch::Sender<usize>,
    commands: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    drain_waiters: Vec<oneshot::Sender<CrawlStats>>,
    // Tasks behind the running fetches, for fetches that never report back
    running: HashMap<task::Id, UrlTask>,
    run_id: Option<i64>,
    counters: Counters,
    started: Instant,
}

impl Dispatcher {
    /// Creates a dispatcher over a store and a result sink
    ///
    /// Until [`with_budget`](Self::with_budget) is called the budget stays
    /// fixed at `concurrency.initial`.
    pub fn new(
        config: Config,
        store: Box<dyn Storage + Send>,
        sink: Box<dyn ResultSink>,
    ) -> crate::Result<Self> {
        let client = build_http_client(&config)?;
        let robots = RobotsCache::new(
            client.clone(),
            config.user_agent.crawler_name.clone(),
            config.robots.clone(),
            config.politeness.host_table_capacity,
        );

        let ctx = FetchContext {
            client,
            robots: Arc::new(robots),
            handler: Arc::new(HtmlContentHandler),
            max_content_length: config.crawler.max_content_length,
            deadline: config.crawler.request_timeout(),
        };

        let (budget_tx, budget) = watch::channel(config.concurrency.initial);
        let (dormant_tx, _) = watch::channel(0usize);
        let (command_tx, commands) = mpsc::channel(64);

        Ok(Self {
            frontier: Frontier::new(&config.crawler),
            ledger: PolitenessLedger::new(config.politeness.clone()),
            config,
            store,
            sink,
            ctx,
            budget,
            _budget_tx: Some(budget_tx),
            samples: None,
            dormant_tx,
            commands,
            command_tx,
            drain_waiters: Vec::new(),
            running: HashMap::new(),
            run_id: None,
            counters: Counters::default(),
            started: Instant::now(),
        })
    }

    /// Replaces the default HTML handler
    pub fn with_content_handler(mut self, handler: Arc<dyn ContentHandler>) -> Self {
        self.ctx.handler = handler;
        self
    }

    /// Follows a budget published by the concurrency controller
    pub fn with_budget(mut self, budget: watch::Receiver<usize>) -> Self {
        self.budget = budget;
        self._budget_tx = None;
        self
    }

    /// Reports memory and CPU from this sample stream in the stats
    pub fn with_resource_samples(mut self, samples: watch::Receiver<ResourceSample>) -> Self {
        self.samples = Some(samples);
        self
    }

    /// Ties the dispatcher to a `runs` row, finished when the loop exits
    pub fn with_run(mut self, run_id: i64) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn handle(&self) -> CrawlerHandle {
        CrawlerHandle {
            tx: self.command_tx.clone(),
        }
    }

    /// Number of hosts in error cooldown, updated as the loop runs
    pub fn dormant_hosts(&self) -> watch::Receiver<usize> {
        self.dormant_tx.subscribe()
    }

    /// Runs until drained (or idle, with `stop-when-idle`)
    ///
    /// A store failure is fatal: running fetches are awaited, host states
    /// are saved if possible and the run is marked failed.
    pub async fn run(mut self) -> crate::Result<CrawlStats> {
        let mut inflight: JoinSet<Completion> = JoinSet::new();

        let result = match self.start() {
            Ok(()) => self.run_loop(&mut inflight).await,
            Err(e) => Err(e),
        };

        let status = match &result {
            Ok(Exit::Idle) => RunStatus::Completed,
            Ok(Exit::Drained) => RunStatus::Interrupted,
            Err(e) => {
                error!("Dispatcher stopping after fatal error: {}", e);
                RunStatus::Failed
            }
        };

        if result.is_err() {
            // Let running fetches finish so their hosts are not left mid-request
            while inflight.join_next().await.is_some() {}
        }

        if let Err(e) = self.persist_hosts() {
            error!("Failed to persist host states: {}", e);
        }
        if let Some(run_id) = self.run_id {
            if let Err(e) = self.store.finish_run(run_id, status) {
                error!("Failed to finish run {}: {}", run_id, e);
            }
        }

        let stats = self.stats();
        info!(
            "Dispatcher stopped: {} processed, {} succeeded, {} failed, {} queued, in {:?}",
            stats.processed,
            stats.succeeded,
            stats.failed,
            stats.queued,
            self.started.elapsed()
        );

        for waiter in self.drain_waiters.drain(..) {
            let _ = waiter.send(stats.clone());
        }

        result.map(|_| stats)
    }

    fn start(&mut self) -> crate::Result<()> {
        let restored = self.frontier.restore(self.store.as_mut())?;
        if restored > 0 {
            info!("Restored {} pending tasks from the store", restored);
            return Ok(());
        }

        let seeds = self.config.scope.seeds.clone();
        if !seeds.is_empty() {
            info!("Seeding frontier with {} URLs", seeds.len());
        }
        for seed in &seeds {
            match self.submit_seed(seed) {
                Ok(outcome) => debug!("Seed {}: {}", seed, outcome),
                Err(RoamerError::Url(e)) => warn!("Skipping seed {}: {}", seed, e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn run_loop(&mut self, inflight: &mut JoinSet<Completion>) -> crate::Result<Exit> {
        let mut draining = false;
        let mut budget_open = true;

        loop {
            if !draining {
                self.admit(inflight)?;
            }
            self.publish_dormant();

            if draining && inflight.is_empty() {
                return Ok(Exit::Drained);
            }
            if self.config.crawler.stop_when_idle && inflight.is_empty() && self.frontier.is_empty() {
                info!("Frontier empty and nothing in flight, stopping");
                return Ok(Exit::Idle);
            }

            let wakeup = if draining || inflight.len() >= *self.budget.borrow() {
                None
            } else {
                self.frontier
                    .soonest_wakeup(&self.ledger, self.store.as_ref(), Instant::now())?
            };
            let sleep = async move {
                match wakeup {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                Some(joined) = inflight.join_next_with_id(), if !inflight.is_empty() => {
                    match joined {
                        Ok((id, completion)) => {
                            self.running.remove(&id);
                            self.complete(completion)?;
                        }
                        Err(e) => self.recover_lost_fetch(e)?,
                    }
                }
                command = self.commands.recv() => {
                    if let Some(command) = command {
                        if self.handle_command(command)? {
                            if !draining {
                                info!("Draining {} in-flight fetches", inflight.len());
                            }
                            draining = true;
                        }
                    }
                }
                changed = self.budget.changed(), if budget_open => {
                    match changed {
                        Ok(()) => debug!("Concurrency budget now {}", *self.budget.borrow()),
                        Err(_) => budget_open = false,
                    }
                }
                _ = sleep => {}
            }
        }
    }

    /// Starts fetches until the budget is used up or no host is eligible
    fn admit(&mut self, inflight: &mut JoinSet<Completion>) -> crate::Result<()> {
        let budget = *self.budget.borrow();
        let now = Instant::now();

        while inflight.len() < budget {
            let next = self
                .frontier
                .next_ready(&mut self.ledger, self.store.as_mut(), now)?;
            let Some(task) = next else {
                break;
            };

            debug!("Fetching {} (attempt {})", task.url, task.attempts + 1);
            let handle = inflight.spawn(run_fetch(self.ctx.clone(), task.clone()));
            self.running.insert(handle.id(), task);
        }

        let evicted = self.ledger.take_evicted(now, Utc::now());
        if !evicted.is_empty() {
            self.store.save_host_states(&evicted)?;
        }
        Ok(())
    }

    /// Returns true if the command asks the loop to drain
    fn handle_command(&mut self, command: Command) -> crate::Result<bool> {
        match command {
            Command::SubmitSeed { url, reply } => {
                match self.submit_seed(&url) {
                    Err(RoamerError::Storage(e)) => {
                        let _ = reply.send(Err(RoamerError::SchedulerStopped));
                        return Err(e.into());
                    }
                    result => {
                        let _ = reply.send(result);
                    }
                }
                Ok(false)
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
                Ok(false)
            }
            Command::Drain { reply } => {
                self.drain_waiters.push(reply);
                Ok(true)
            }
        }
    }

    fn submit_seed(&mut self, raw: &str) -> crate::Result<EnqueueOutcome> {
        let url = normalize_url(raw)?;
        let host = host_key(&url).ok_or(UrlError::MissingHost)?;
        let outcome = self
            .frontier
            .enqueue(self.store.as_mut(), UrlTask::new(url, host, 0, None))?;
        Ok(outcome)
    }

    fn complete(&mut self, completion: Completion) -> crate::Result<()> {
        let Completion { mut task, result } = completion;
        let now = Instant::now();
        let host = task.host.clone();

        self.counters.processed += 1;
        self.ledger.set_robots_delay(&host, self.ctx.robots.crawl_delay(&host));

        match result {
            JobResult::Fetched { page, content } => {
                self.ledger.record_success(&host);
                self.frontier.complete(self.store.as_mut(), &task)?;
                self.counters.succeeded += 1;

                let accepted = self.enqueue_links(&task, &content.links)?;
                debug!(
                    "Fetched {} ({}, {} bytes{}), {} new links",
                    task.url,
                    page.status,
                    page.body.len(),
                    if page.truncated { ", truncated" } else { "" },
                    accepted
                );

                let report = FetchReport {
                    url: task.url.to_string(),
                    host,
                    depth: task.depth,
                    status: page.status,
                    content_type: page.content_type,
                    title: content.title,
                    body_bytes: page.body.len(),
                    truncated: page.truncated,
                    elapsed: page.elapsed,
                    links: content.links,
                    fetched_at: Utc::now(),
                };
                if let Err(e) = self.sink.record_result(&report) {
                    error!("Result sink rejected {}: {}", report.url, e);
                }
            }

            JobResult::Disallowed => {
                debug!("Disallowed by robots.txt: {}", task.url);
                self.ledger.release(&host);
                self.fail(&task, FailureKind::RobotsDisallowed, None, None)?;
            }

            JobResult::Failed {
                kind,
                status,
                retry_after,
                message,
            } => {
                match kind {
                    FailureKind::RateLimited => {
                        self.ledger.record_rate_limited(&host, retry_after, now);
                    }
                    kind if kind.is_transient() => {
                        self.ledger.record_error(&host, now);
                    }
                    // The host answered; only this URL is bad
                    FailureKind::ClientError => self.ledger.record_success(&host),
                    _ => self.ledger.release(&host),
                }

                task.attempts += 1;
                if kind.is_transient() && task.attempts < self.config.crawler.max_attempts {
                    warn!(
                        "{} for {} (attempt {}/{}), retrying after {:?}",
                        kind,
                        task.url,
                        task.attempts,
                        self.config.crawler.max_attempts,
                        self.ledger.effective_delay(&host)
                    );
                    self.frontier.requeue(self.store.as_mut(), task)?;
                } else {
                    if kind.is_transient() {
                        warn!("Giving up on {} after {} attempts: {}", task.url, task.attempts, message);
                    } else {
                        debug!("{} for {}: {}", kind, task.url, message);
                    }
                    self.fail(&task, kind, status, Some(message))?;
                }
            }
        }

        self.after_completion()
    }

    /// Turns a fetch task that panicked (or was cancelled) into a terminal failure
    ///
    /// The host's in-flight slot is released and the task leaves the frontier,
    /// so the rest of the host's queue keeps moving.
    fn recover_lost_fetch(&mut self, join_error: JoinError) -> crate::Result<()> {
        let Some(task) = self.running.remove(&join_error.id()) else {
            error!("Unknown fetch task failed: {}", join_error);
            return Ok(());
        };

        error!("Fetch of {} did not complete: {}", task.url, join_error);
        self.complete(Completion {
            task,
            result: JobResult::Failed {
                kind: FailureKind::Panicked,
                status: None,
                retry_after: None,
                message: join_error.to_string(),
            },
        })
    }

    fn fail(
        &mut self,
        task: &UrlTask,
        kind: FailureKind,
        last_status: Option<u16>,
        message: Option<String>,
    ) -> crate::Result<()> {
        self.frontier.complete(self.store.as_mut(), task)?;
        self.counters.failed += 1;

        let failure = TerminalFailure {
            url: task.url.to_string(),
            host: task.host.clone(),
            kind,
            attempts: task.attempts.max(1),
            last_status,
            message,
            failed_at: Utc::now(),
        };
        if let Err(e) = self.sink.record_failure(&failure) {
            error!("Result sink rejected failure for {}: {}", failure.url, e);
        }
        Ok(())
    }

    /// Offers a page's links to the frontier; returns how many were accepted
    fn enqueue_links(&mut self, parent: &UrlTask, links: &[String]) -> crate::Result<usize> {
        let mut accepted = 0;

        for link in links.iter().take(self.config.crawler.max_links_per_page) {
            let url = match normalize_url(link) {
                Ok(url) => url,
                Err(e) => {
                    debug!("Skipping link {}: {}", link, e);
                    continue;
                }
            };
            let Some(host) = host_key(&url) else {
                continue;
            };
            if !in_scope(&self.config.scope.allowed_domains, &host) {
                continue;
            }

            let task = UrlTask::new(url, host, parent.depth + 1, Some(parent.url.to_string()));
            if self.frontier.enqueue(self.store.as_mut(), task)? == EnqueueOutcome::Accepted {
                accepted += 1;
            }
        }

        Ok(accepted)
    }

    fn after_completion(&mut self) -> crate::Result<()> {
        let processed = self.counters.processed;

        if processed % PROGRESS_EVERY == 0 {
            let elapsed = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
            info!(
                "Progress: {} processed ({} ok, {} failed), {} queued across {} hosts, concurrency {}, {:.2} fetches/sec",
                processed,
                self.counters.succeeded,
                self.counters.failed,
                self.frontier.len(),
                self.frontier.pending_hosts(),
                *self.budget.borrow(),
                processed as f64 / elapsed
            );
        }

        if processed % PERSIST_EVERY == 0 {
            self.persist_hosts()?;
        }
        Ok(())
    }

    fn persist_hosts(&mut self) -> crate::Result<()> {
        let records = self.ledger.records(Instant::now(), Utc::now());
        if !records.is_empty() {
            self.store.save_host_states(&records)?;
            debug!("Persisted {} host states", records.len());
        }
        Ok(())
    }

    fn publish_dormant(&self) {
        let dormant = self.ledger.dormant_count(Instant::now());
        self.dormant_tx.send_if_modified(|current| {
            if *current != dormant {
                *current = dormant;
                true
            } else {
                false
            }
        });
    }

    fn stats(&self) -> CrawlStats {
        let (memory_mb, cpu_percent) = self
            .samples
            .as_ref()
            .map(|rx| {
                let sample = rx.borrow();
                (sample.memory_mb, sample.cpu_percent)
            })
            .unwrap_or((0.0, 0.0));

        CrawlStats {
            processed: self.counters.processed,
            succeeded: self.counters.succeeded,
            failed: self.counters.failed,
            queued: self.frontier.len(),
            concurrency: *self.budget.borrow(),
            memory_mb,
            cpu_percent,
        }
    }
}
