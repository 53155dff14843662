//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait,
//! and the `ResultSink` that records fetch outcomes in the same database.

use crate::crawler::{FetchReport, ResultSink, TerminalFailure};
use crate::state::{FailureKind, HostRecord, TaskState, UrlTask};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{FrontierRecord, RunRecord, RunStatus};
use crate::url::Fingerprint;
use crate::RoamerError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,

    /// Run that result and failure rows are attributed to
    run_id: Option<i64>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(RoamerError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, RoamerError> {
        let conn = Connection::open(path)?;

        // WAL lets the result sink write through its own connection
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn, run_id: None })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, RoamerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn, run_id: None })
    }

    /// Attributes subsequent result and failure rows to a run
    pub fn attach_run(&mut self, run_id: i64) {
        self.run_id = Some(run_id);
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
    })
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

fn host_from_row(row: &Row<'_>) -> rusqlite::Result<HostRecord> {
    Ok(HostRecord {
        host: row.get(0)?,
        pages_fetched: row.get::<_, i64>(1)? as u64,
        consecutive_errors: row.get(2)?,
        error_backoff_ms: row.get::<_, i64>(3)? as u64,
        rate_limit_backoff_ms: row.get::<_, i64>(4)? as u64,
        robots_delay_ms: row.get::<_, Option<i64>>(5)?.map(|ms| ms as u64),
        last_fetch_at: parse_time(row.get(6)?),
        dormant_until: parse_time(row.get(7)?),
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        let run_id = self.conn.last_insert_rowid();
        self.run_id = Some(run_id);
        Ok(run_id)
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;

        Ok(run)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1 WHERE id = ?2",
            params![status.to_db_string(), run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Frontier Management =====

    fn push_task(&mut self, task: &UrlTask, fingerprint: Fingerprint) -> StorageResult<i64> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO frontier (url, host, depth, discovered_from, enqueued_at, attempts, state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.url.as_str(),
                task.host,
                task.depth,
                task.discovered_from,
                task.enqueued_at.to_rfc3339(),
                task.attempts,
                TaskState::Queued.to_db_string(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT OR IGNORE INTO seen_urls (fingerprint, url, host, first_seen_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                fingerprint.to_hex(),
                task.url.as_str(),
                task.host,
                task.enqueued_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(id)
    }

    fn mark_in_flight(&mut self, task_id: i64) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE frontier SET state = ?1 WHERE id = ?2",
            params![TaskState::InFlight.to_db_string(), task_id],
        )?;
        if updated == 0 {
            return Err(StorageError::TaskNotFound(task_id));
        }
        Ok(())
    }

    fn requeue_task(&mut self, task_id: i64, attempts: u32) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE frontier SET state = ?1, attempts = ?2 WHERE id = ?3",
            params![TaskState::RetryQueued.to_db_string(), attempts, task_id],
        )?;
        if updated == 0 {
            return Err(StorageError::TaskNotFound(task_id));
        }
        Ok(())
    }

    fn remove_task(&mut self, task_id: i64) -> StorageResult<()> {
        self.conn
            .execute("DELETE FROM frontier WHERE id = ?1", params![task_id])?;
        Ok(())
    }

    fn reset_in_flight(&mut self) -> StorageResult<usize> {
        let reset = self.conn.execute(
            "UPDATE frontier SET state = ?1 WHERE state = ?2",
            params![
                TaskState::RetryQueued.to_db_string(),
                TaskState::InFlight.to_db_string()
            ],
        )?;
        Ok(reset)
    }

    fn load_frontier(&self) -> StorageResult<Vec<FrontierRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, url, host, depth, discovered_from, enqueued_at, attempts, state
             FROM frontier ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(FrontierRecord {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    host: row.get(2)?,
                    depth: row.get(3)?,
                    discovered_from: row.get(4)?,
                    enqueued_at: row.get(5)?,
                    attempts: row.get(6)?,
                    state: TaskState::from_db_string(&row.get::<_, String>(7)?)
                        .unwrap_or(TaskState::Queued),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn count_frontier(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM frontier", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn reset_crawl(&mut self) -> StorageResult<()> {
        self.conn.execute_batch(
            "
            DELETE FROM frontier;
            DELETE FROM seen_urls;
            DELETE FROM host_states;
        ",
        )?;
        Ok(())
    }

    // ===== Seen URLs =====

    fn is_known_url(&self, fingerprint: Fingerprint) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM seen_urls WHERE fingerprint = ?1",
                params![fingerprint.to_hex()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn count_accepted_by_host(&self) -> StorageResult<HashMap<String, u32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT host, COUNT(*) FROM seen_urls GROUP BY host")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (host, count) = row?;
            counts.insert(host, count as u32);
        }

        Ok(counts)
    }

    fn count_seen_urls(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM seen_urls", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Host State Persistence =====

    fn load_host_state(&self, host: &str) -> StorageResult<Option<HostRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT host, pages_fetched, consecutive_errors, error_backoff_ms,
                        rate_limit_backoff_ms, robots_delay_ms, last_fetch_at, dormant_until
                 FROM host_states WHERE host = ?1",
                params![host],
                host_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn save_host_states(&mut self, records: &[HostRecord]) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO host_states
                    (host, pages_fetched, consecutive_errors, error_backoff_ms,
                     rate_limit_backoff_ms, robots_delay_ms, last_fetch_at, dormant_until, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(host) DO UPDATE SET
                    pages_fetched = excluded.pages_fetched,
                    consecutive_errors = excluded.consecutive_errors,
                    error_backoff_ms = excluded.error_backoff_ms,
                    rate_limit_backoff_ms = excluded.rate_limit_backoff_ms,
                    robots_delay_ms = excluded.robots_delay_ms,
                    last_fetch_at = excluded.last_fetch_at,
                    dormant_until = excluded.dormant_until,
                    updated_at = excluded.updated_at",
            )?;

            for record in records {
                stmt.execute(params![
                    record.host,
                    record.pages_fetched as i64,
                    record.consecutive_errors,
                    record.error_backoff_ms as i64,
                    record.rate_limit_backoff_ms as i64,
                    record.robots_delay_ms.map(|ms| ms as i64),
                    record.last_fetch_at.map(|t| t.to_rfc3339()),
                    record.dormant_until.map(|t| t.to_rfc3339()),
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn count_hosts(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM host_states", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Statistics =====

    fn count_results(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fetch_results", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn get_status_breakdown(&self) -> StorageResult<HashMap<u16, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status_code, COUNT(*) FROM fetch_results GROUP BY status_code")?;

        let mut breakdown = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, u16>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (status, count) = row?;
            breakdown.insert(status, count as u64);
        }

        Ok(breakdown)
    }

    fn get_failure_summary(&self) -> StorageResult<HashMap<FailureKind, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM fetch_errors GROUP BY kind")?;

        let mut summary = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (kind, count) = row?;
            if let Some(kind) = FailureKind::from_db_string(&kind) {
                summary.insert(kind, count as u64);
            }
        }

        Ok(summary)
    }

    fn get_top_hosts(&self, limit: usize) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT host, pages_fetched FROM host_states
             ORDER BY pages_fetched DESC, host LIMIT ?1",
        )?;

        let hosts = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(hosts)
    }

    fn get_dormant_hosts(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT host, dormant_until FROM host_states
             WHERE dormant_until IS NOT NULL ORDER BY host",
        )?;

        let now = Utc::now();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut hosts = Vec::new();
        for row in rows {
            let (host, until) = row?;
            if parse_time(until).map(|t| t > now).unwrap_or(false) {
                hosts.push(host);
            }
        }

        Ok(hosts)
    }
}

impl ResultSink for SqliteStorage {
    fn record_result(&mut self, report: &FetchReport) -> crate::Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO fetch_results
                (run_id, url, host, depth, status_code, content_type, title,
                 body_bytes, truncated, elapsed_ms, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                self.run_id,
                report.url,
                report.host,
                report.depth,
                report.status,
                report.content_type,
                report.title,
                report.body_bytes as i64,
                report.truncated,
                report.elapsed.as_millis() as i64,
                report.fetched_at.to_rfc3339(),
            ],
        )?;
        let result_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare("INSERT INTO result_links (result_id, url) VALUES (?1, ?2)")?;
            for link in &report.links {
                stmt.execute(params![result_id, link])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn record_failure(&mut self, failure: &TerminalFailure) -> crate::Result<()> {
        self.conn.execute(
            "INSERT INTO fetch_errors
                (run_id, url, host, kind, attempts, last_status, message, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.run_id,
                failure.url,
                failure.host,
                failure.kind.to_db_string(),
                failure.attempts,
                failure.last_status,
                failure.message,
                failure.failed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
