//! SQLite storage implementation
//!
//! This module provides a SQLite-backed frontier and dataset sharing one database file,
//! which is what makes an interrupted crawl resumable.

use crate::crawler::OutputRecord;
use crate::request::{CrawlRequest, Lineage};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{AddOutcome, Dataset, Frontier, StorageError, StorageResult};
use crate::storage::RequestStatus;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SELECT_REQUEST: &str = "SELECT id, url, unique_key, method, headers, payload, user_data,
     retry_count, error_messages, lineage FROM requests";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    ///
    /// Requests left in progress by an interrupted run are returned to the queue.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        let recovered = conn.execute(
            "UPDATE requests SET status = ?1 WHERE status = ?2",
            params![
                RequestStatus::Pending.to_db_string(),
                RequestStatus::InProgress.to_db_string()
            ],
        )?;
        if recovered > 0 {
            tracing::info!("Recovered {} interrupted requests", recovered);
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }

    /// Deletes every request and record, for a fresh crawl
    pub fn reset(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch("DELETE FROM requests; DELETE FROM dataset;")?;
        Ok(())
    }

    /// Counts requests by status
    pub fn count_requests_by_status(&self) -> StorageResult<HashMap<RequestStatus, u64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM requests GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = RequestStatus::from_db_string(&status) {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }

    /// Loads a request by id
    pub fn get_request(&self, request_id: &str) -> StorageResult<Option<CrawlRequest>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_REQUEST),
                params![request_id],
                RawRequest::from_row,
            )
            .optional()?;
        raw.map(RawRequest::into_request).transpose()
    }

    /// Returns all dataset records in emission order
    pub fn records(&self) -> StorageResult<Vec<OutputRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT record FROM dataset ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        Ok(records)
    }

    fn set_status(
        conn: &Connection,
        request: &CrawlRequest,
        status: RequestStatus,
        order_seq: Option<i64>,
    ) -> StorageResult<()> {
        let handled_at = (status == RequestStatus::Handled).then(|| Utc::now().to_rfc3339());
        let changed = conn.execute(
            "UPDATE requests SET retry_count = ?1, error_messages = ?2, lineage = ?3,
             user_data = ?4, status = ?5, handled_at = ?6,
             order_seq = COALESCE(?7, order_seq)
             WHERE id = ?8",
            params![
                request.retry_count,
                serde_json::to_string(&request.error_messages)?,
                serde_json::to_string(&request.lineage)?,
                serde_json::to_string(&request.user_data)?,
                status.to_db_string(),
                handled_at,
                order_seq,
                request.id,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::RequestNotFound(request.id.clone()));
        }
        Ok(())
    }

    fn next_order_seq(conn: &Connection) -> StorageResult<i64> {
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(order_seq), 0) + 1 FROM requests",
            [],
            |row| row.get(0),
        )?)
    }

    fn status_of(conn: &Connection, request_id: &str) -> StorageResult<Option<RequestStatus>> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM requests WHERE id = ?1",
                params![request_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.and_then(|s| RequestStatus::from_db_string(&s)))
    }
}

/// A request row before its JSON columns are decoded
struct RawRequest {
    id: String,
    url: String,
    unique_key: String,
    method: String,
    headers: String,
    payload: Option<String>,
    user_data: String,
    retry_count: u32,
    error_messages: String,
    lineage: Option<String>,
}

impl RawRequest {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            unique_key: row.get(2)?,
            method: row.get(3)?,
            headers: row.get(4)?,
            payload: row.get(5)?,
            user_data: row.get(6)?,
            retry_count: row.get(7)?,
            error_messages: row.get(8)?,
            lineage: row.get(9)?,
        })
    }

    /// Decodes the row; a missing lineage becomes root lineage, a malformed one is an error
    fn into_request(self) -> StorageResult<CrawlRequest> {
        let lineage = match self.lineage {
            None => Lineage::root(),
            Some(raw) => serde_json::from_str(&raw).map_err(|_| StorageError::InvalidLineage {
                request_id: self.id.clone(),
            })?,
        };

        Ok(CrawlRequest {
            headers: serde_json::from_str(&self.headers)?,
            user_data: serde_json::from_str(&self.user_data)?,
            error_messages: serde_json::from_str(&self.error_messages)?,
            id: self.id,
            url: self.url,
            unique_key: self.unique_key,
            method: self.method,
            payload: self.payload,
            retry_count: self.retry_count,
            lineage,
        })
    }
}

#[async_trait]
impl Frontier for SqliteStorage {
    async fn add(&self, request: CrawlRequest) -> StorageResult<AddOutcome> {
        let conn = self.lock()?;

        if let Some(status) = Self::status_of(&conn, &request.id)? {
            return Ok(AddOutcome::duplicate(
                request.id,
                status == RequestStatus::Handled,
            ));
        }

        let order_seq = Self::next_order_seq(&conn)?;
        conn.execute(
            "INSERT INTO requests (id, order_seq, url, unique_key, method, headers, payload,
             user_data, retry_count, error_messages, lineage, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                request.id,
                order_seq,
                request.url,
                request.unique_key,
                request.method,
                serde_json::to_string(&request.headers)?,
                request.payload,
                serde_json::to_string(&request.user_data)?,
                request.retry_count,
                serde_json::to_string(&request.error_messages)?,
                serde_json::to_string(&request.lineage)?,
                RequestStatus::Pending.to_db_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(AddOutcome::added(request.id))
    }

    async fn fetch_next(&self) -> StorageResult<Option<CrawlRequest>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "{} WHERE status = ?1 ORDER BY order_seq LIMIT 1",
                    SELECT_REQUEST
                ),
                params![RequestStatus::Pending.to_db_string()],
                RawRequest::from_row,
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE requests SET status = ?1 WHERE id = ?2",
            params![RequestStatus::InProgress.to_db_string(), raw.id],
        )?;

        raw.into_request().map(Some)
    }

    async fn reclaim(&self, request: CrawlRequest) -> StorageResult<()> {
        let conn = self.lock()?;
        let order_seq = Self::next_order_seq(&conn)?;
        Self::set_status(&conn, &request, RequestStatus::Pending, Some(order_seq))
    }

    async fn mark_handled(&self, request: &CrawlRequest) -> StorageResult<()> {
        let conn = self.lock()?;
        Self::set_status(&conn, request, RequestStatus::Handled, None)
    }

    async fn pending_count(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM requests WHERE status = ?1",
            params![RequestStatus::Pending.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl Dataset for SqliteStorage {
    async fn push(&self, records: Vec<OutputRecord>) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO dataset (record, created_at) VALUES (?1, ?2)")?;
            let now = Utc::now().to_rfc3339();
            for record in &records {
                stmt.execute(params![serde_json::to_string(record)?, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn item_count(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dataset", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
