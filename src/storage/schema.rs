//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Ripple-Scraper database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Crawl frontier: every request ever enqueued, keyed by its deterministic id
CREATE TABLE IF NOT EXISTS requests (
    id TEXT PRIMARY KEY,
    order_seq INTEGER NOT NULL,
    url TEXT NOT NULL,
    unique_key TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL DEFAULT '{}',
    payload TEXT,
    user_data TEXT NOT NULL DEFAULT '{}',
    retry_count INTEGER NOT NULL DEFAULT 0,
    error_messages TEXT NOT NULL DEFAULT '[]',
    lineage TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    handled_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_requests_status_order ON requests(status, order_seq);

-- Dataset: emitted output records, in emission order
CREATE TABLE IF NOT EXISTS dataset (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record TEXT NOT NULL,
    created_at TEXT NOT NULL
);
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
