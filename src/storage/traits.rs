//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::{FailureKind, HostRecord, UrlTask};
use crate::storage::{FrontierRecord, RunRecord, RunStatus};
use crate::url::Fingerprint;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines every durable operation the scheduler needs. A single
/// owner (the dispatcher loop) drives it, so implementations do not need
/// interior locking.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Marks a run finished with the given status and a finish timestamp
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Frontier Management =====

    /// Atomically inserts a task into the frontier and records its
    /// fingerprint in the seen set
    ///
    /// # Returns
    ///
    /// The sequence id assigned to the task
    fn push_task(&mut self, task: &UrlTask, fingerprint: Fingerprint) -> StorageResult<i64>;

    /// Marks a task as handed to the fetcher
    fn mark_in_flight(&mut self, task_id: i64) -> StorageResult<()>;

    /// Puts a task back in the queue with an updated attempt count
    fn requeue_task(&mut self, task_id: i64, attempts: u32) -> StorageResult<()>;

    /// Deletes a task after a terminal outcome
    fn remove_task(&mut self, task_id: i64) -> StorageResult<()>;

    /// Re-queues tasks a previous process left in flight
    ///
    /// Returns the number of rows reset.
    fn reset_in_flight(&mut self) -> StorageResult<usize>;

    /// Loads every pending frontier row, oldest first
    fn load_frontier(&self) -> StorageResult<Vec<FrontierRecord>>;

    /// Counts rows in the frontier
    fn count_frontier(&self) -> StorageResult<u64>;

    /// Empties the frontier, the seen set and the host table
    fn reset_crawl(&mut self) -> StorageResult<()>;

    // ===== Seen URLs =====

    /// Authoritative duplicate check
    fn is_known_url(&self, fingerprint: Fingerprint) -> StorageResult<bool>;

    /// Number of URLs ever accepted per host (the domain cap basis)
    fn count_accepted_by_host(&self) -> StorageResult<HashMap<String, u32>>;

    /// Total number of URLs ever accepted
    fn count_seen_urls(&self) -> StorageResult<u64>;

    // ===== Host State Persistence =====

    /// Loads the stored state of one host
    fn load_host_state(&self, host: &str) -> StorageResult<Option<HostRecord>>;

    /// Upserts host states
    fn save_host_states(&mut self, records: &[HostRecord]) -> StorageResult<()>;

    /// Counts hosts with a stored state
    fn count_hosts(&self) -> StorageResult<u64>;

    // ===== Statistics =====

    /// Counts recorded fetch results
    fn count_results(&self) -> StorageResult<u64>;

    /// Gets result counts keyed by HTTP status code
    fn get_status_breakdown(&self) -> StorageResult<HashMap<u16, u64>>;

    /// Gets terminal failure counts keyed by failure kind
    fn get_failure_summary(&self) -> StorageResult<HashMap<FailureKind, u64>>;

    /// Gets hosts ordered by pages fetched, most first
    fn get_top_hosts(&self, limit: usize) -> StorageResult<Vec<(String, u64)>>;

    /// Gets hosts whose stored dormancy has not expired yet
    fn get_dormant_hosts(&self) -> StorageResult<Vec<String>>;
}
