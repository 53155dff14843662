//! Result sink: where completed fetches and terminal failures go
//!
//! The scheduler does not own result durability. `SqliteStorage` implements
//! the trait for the binary; `MemorySink` keeps everything in memory.

use crate::state::FailureKind;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One successfully completed fetch
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub url: String,
    pub host: String,
    pub depth: u32,
    pub status: u16,
    pub content_type: Option<String>,
    pub title: Option<String>,

    /// Bytes kept, after truncation
    pub body_bytes: usize,

    /// The body was cut at the content-length cap
    pub truncated: bool,

    pub elapsed: Duration,

    /// Links the content handler returned (before frontier filtering)
    pub links: Vec<String>,

    pub fetched_at: DateTime<Utc>,
}

/// A task that will not be retried
#[derive(Debug, Clone)]
pub struct TerminalFailure {
    pub url: String,
    pub host: String,
    pub kind: FailureKind,
    pub attempts: u32,
    pub last_status: Option<u16>,
    pub message: Option<String>,
    pub failed_at: DateTime<Utc>,
}

/// Receives per-fetch outcomes
pub trait ResultSink: Send {
    fn record_result(&mut self, report: &FetchReport) -> crate::Result<()>;

    fn record_failure(&mut self, failure: &TerminalFailure) -> crate::Result<()>;
}

/// In-memory sink whose contents stay readable through a cloned handle
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemorySinkInner>>,
}

#[derive(Debug, Default)]
struct MemorySinkInner {
    results: Vec<FetchReport>,
    failures: Vec<TerminalFailure>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<FetchReport> {
        self.inner
            .lock()
            .map(|inner| inner.results.clone())
            .unwrap_or_default()
    }

    pub fn failures(&self) -> Vec<TerminalFailure> {
        self.inner
            .lock()
            .map(|inner| inner.failures.clone())
            .unwrap_or_default()
    }
}

impl ResultSink for MemorySink {
    fn record_result(&mut self, report: &FetchReport) -> crate::Result<()> {
        if let Ok(mut inner) = self.inner.lock() {
            inner.results.push(report.clone());
        }
        Ok(())
    }

    fn record_failure(&mut self, failure: &TerminalFailure) -> crate::Result<()> {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures.push(failure.clone());
        }
        Ok(())
    }
}
