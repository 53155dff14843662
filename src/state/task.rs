/// Task state definitions for the crawl frontier
///
/// A task moves `Queued -> InFlight -> {Succeeded, RetryQueued, Failed}`;
/// `RetryQueued` goes back to `InFlight` on its next admission.
use chrono::{DateTime, Utc};
use std::fmt;
use url::Url;

/// Lifecycle state of a single URL task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    // ===== Pending States =====
    /// Accepted into the frontier, waiting for its host to become eligible
    Queued,

    /// Re-enqueued after a transient failure
    RetryQueued,

    /// Handed to the fetcher
    InFlight,

    // ===== Terminal States =====
    /// Fetched and handed to content handling
    Succeeded,

    /// Gave up: permanent failure or attempts exhausted
    Failed,
}

impl TaskState {
    /// Returns true if the task will not be fetched again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if the task is waiting in the frontier
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::RetryQueued)
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::RetryQueued => "retry_queued",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from its database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "retry_queued" => Some(Self::RetryQueued),
            "in_flight" => Some(Self::InFlight),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// A URL waiting in, or borrowed from, the frontier
#[derive(Debug, Clone, PartialEq)]
pub struct UrlTask {
    /// Store-assigned sequence number; orders tasks of equal depth
    pub id: i64,

    /// Normalized URL
    pub url: Url,

    /// Politeness key (`host[:port]`)
    pub host: String,

    /// Link distance from the seed that led here
    pub depth: u32,

    /// Page the link was found on; None for seeds
    pub discovered_from: Option<String>,

    pub enqueued_at: DateTime<Utc>,

    /// Failed fetch attempts so far
    pub attempts: u32,
}

impl UrlTask {
    /// Creates a task that has not been stored yet (id 0)
    pub fn new(url: Url, host: String, depth: u32, discovered_from: Option<String>) -> Self {
        Self {
            id: 0,
            url,
            host,
            depth,
            discovered_from,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }

    /// Ordering key used by the frontier: shallowest first, then oldest
    pub fn priority(&self) -> (u32, i64) {
        (self.depth, self.id)
    }
}
