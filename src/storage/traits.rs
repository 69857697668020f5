//! Storage traits and error types
//!
//! This module defines the interfaces the crawl core uses to reach its two shared
//! stores: the frontier (deduplicating request queue) and the dataset (output sink).

use crate::crawler::OutputRecord;
use crate::request::CrawlRequest;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("Request {request_id} contains invalid lineage metadata")]
    InvalidLineage { request_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of a single frontier insertion attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    /// Id of the request that now occupies the slot
    pub request_id: String,

    /// True if a request with the same id was already in the frontier
    pub was_already_present: bool,

    /// True if that existing request has already been handled
    pub was_already_handled: bool,
}

impl AddOutcome {
    /// Outcome for a request that was newly enqueued
    pub fn added(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            was_already_present: false,
            was_already_handled: false,
        }
    }

    /// Outcome for a request whose id was already known
    pub fn duplicate(request_id: impl Into<String>, handled: bool) -> Self {
        Self {
            request_id: request_id.into(),
            was_already_present: true,
            was_already_handled: handled,
        }
    }
}

/// Deduplicating, order-preserving queue of crawl requests
///
/// Implementations must make insertion atomic and idempotent by request id: when two
/// tasks add the same request concurrently, exactly one of them sees it as new and the
/// existing entry wins. New requests are served in insertion order.
#[async_trait]
pub trait Frontier: Send + Sync {
    /// Adds a request unless one with the same id is already known
    async fn add(&self, request: CrawlRequest) -> StorageResult<AddOutcome>;

    /// Takes the next pending request and marks it in progress
    async fn fetch_next(&self) -> StorageResult<Option<CrawlRequest>>;

    /// Returns an in-progress request to the back of the queue for another attempt
    async fn reclaim(&self, request: CrawlRequest) -> StorageResult<()>;

    /// Marks an in-progress request as handled; it will never be served again
    async fn mark_handled(&self, request: &CrawlRequest) -> StorageResult<()>;

    /// Number of requests waiting to be served
    async fn pending_count(&self) -> StorageResult<usize>;
}

/// Append-only sink for output records
#[async_trait]
pub trait Dataset: Send + Sync {
    /// Appends records in order
    async fn push(&self, records: Vec<OutputRecord>) -> StorageResult<()>;

    /// Number of records stored so far, including ones from earlier runs
    async fn item_count(&self) -> StorageResult<usize>;
}
