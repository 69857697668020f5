//! Storage module for the crawl frontier and dataset
//!
//! This module handles persistence for the crawler, including:
//! - The deduplicating request frontier
//! - The output dataset
//! - SQLite schema management and resumption support

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::{MemoryDataset, MemoryFrontier};
pub use sqlite::SqliteStorage;
pub use traits::{AddOutcome, Dataset, Frontier, StorageError, StorageResult};

use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteStorage::new(path)
}

/// Lifecycle status of a request in the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Pending,
    InProgress,
    Handled,
}

impl RequestStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Handled => "handled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "handled" => Some(Self::Handled),
            _ => None,
        }
    }
}
