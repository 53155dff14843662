//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Roamer database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Durable frontier: one row per accepted task until its terminal outcome
CREATE TABLE IF NOT EXISTS frontier (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    host TEXT NOT NULL,
    depth INTEGER NOT NULL,
    discovered_from TEXT,
    enqueued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_frontier_host ON frontier(host);
CREATE INDEX IF NOT EXISTS idx_frontier_state ON frontier(state);

-- Every URL ever accepted, keyed by fingerprint
CREATE TABLE IF NOT EXISTS seen_urls (
    fingerprint TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    host TEXT NOT NULL,
    first_seen_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_seen_urls_host ON seen_urls(host);

-- Persist host politeness state across evictions and restarts
CREATE TABLE IF NOT EXISTS host_states (
    host TEXT PRIMARY KEY,
    pages_fetched INTEGER NOT NULL DEFAULT 0,
    consecutive_errors INTEGER NOT NULL DEFAULT 0,
    error_backoff_ms INTEGER NOT NULL DEFAULT 0,
    rate_limit_backoff_ms INTEGER NOT NULL DEFAULT 0,
    robots_delay_ms INTEGER,
    last_fetch_at TEXT,
    dormant_until TEXT,
    updated_at TEXT NOT NULL
);

-- Completed fetches
CREATE TABLE IF NOT EXISTS fetch_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER,
    url TEXT NOT NULL,
    host TEXT NOT NULL,
    depth INTEGER NOT NULL,
    status_code INTEGER NOT NULL,
    content_type TEXT,
    title TEXT,
    body_bytes INTEGER NOT NULL,
    truncated INTEGER NOT NULL DEFAULT 0,
    elapsed_ms INTEGER NOT NULL,
    fetched_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fetch_results_host ON fetch_results(host);

-- Links extracted from each completed fetch
CREATE TABLE IF NOT EXISTS result_links (
    result_id INTEGER NOT NULL REFERENCES fetch_results(id),
    url TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_result_links_result ON result_links(result_id);

-- Terminal failures
CREATE TABLE IF NOT EXISTS fetch_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER,
    url TEXT NOT NULL,
    host TEXT NOT NULL,
    kind TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    last_status INTEGER,
    message TEXT,
    failed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fetch_errors_kind ON fetch_errors(kind);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
