//! In-memory frontier and dataset
//!
//! Both stores keep their state behind a single mutex, which makes every operation
//! atomic with respect to concurrent page tasks. They are used for non-persistent
//! crawls and throughout the tests.

use crate::crawler::OutputRecord;
use crate::request::CrawlRequest;
use crate::storage::traits::{AddOutcome, Dataset, Frontier, StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryStatus {
    Pending,
    InProgress,
    Handled,
}

#[derive(Debug)]
struct Entry {
    request: CrawlRequest,
    status: EntryStatus,
}

#[derive(Debug, Default)]
struct FrontierInner {
    queue: VecDeque<String>,
    entries: HashMap<String, Entry>,
}

/// Mutex-guarded in-memory frontier
#[derive(Debug, Default)]
pub struct MemoryFrontier {
    inner: Mutex<FrontierInner>,
}

impl MemoryFrontier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, FrontierInner>> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Database("frontier lock poisoned".to_string()))
    }

    /// Returns the stored copy of a request
    pub fn get(&self, request_id: &str) -> StorageResult<Option<CrawlRequest>> {
        Ok(self
            .lock()?
            .entries
            .get(request_id)
            .map(|entry| entry.request.clone()))
    }

    /// Total number of distinct requests ever added
    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.lock()?.entries.is_empty())
    }
}

#[async_trait]
impl Frontier for MemoryFrontier {
    async fn add(&self, request: CrawlRequest) -> StorageResult<AddOutcome> {
        let mut inner = self.lock()?;

        if let Some(existing) = inner.entries.get(&request.id) {
            return Ok(AddOutcome::duplicate(
                request.id.clone(),
                existing.status == EntryStatus::Handled,
            ));
        }

        let id = request.id.clone();
        inner.queue.push_back(id.clone());
        inner.entries.insert(
            id.clone(),
            Entry {
                request,
                status: EntryStatus::Pending,
            },
        );

        Ok(AddOutcome::added(id))
    }

    async fn fetch_next(&self) -> StorageResult<Option<CrawlRequest>> {
        let mut inner = self.lock()?;

        while let Some(id) = inner.queue.pop_front() {
            if let Some(entry) = inner.entries.get_mut(&id) {
                if entry.status == EntryStatus::Pending {
                    entry.status = EntryStatus::InProgress;
                    return Ok(Some(entry.request.clone()));
                }
            }
        }

        Ok(None)
    }

    async fn reclaim(&self, request: CrawlRequest) -> StorageResult<()> {
        let mut inner = self.lock()?;
        let id = request.id.clone();
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or_else(|| StorageError::RequestNotFound(id.clone()))?;
        entry.request = request;
        entry.status = EntryStatus::Pending;
        inner.queue.push_back(id);
        Ok(())
    }

    async fn mark_handled(&self, request: &CrawlRequest) -> StorageResult<()> {
        let mut inner = self.lock()?;
        let entry = inner
            .entries
            .get_mut(&request.id)
            .ok_or_else(|| StorageError::RequestNotFound(request.id.clone()))?;
        entry.request = request.clone();
        entry.status = EntryStatus::Handled;
        Ok(())
    }

    async fn pending_count(&self) -> StorageResult<usize> {
        let inner = self.lock()?;
        Ok(inner
            .entries
            .values()
            .filter(|entry| entry.status == EntryStatus::Pending)
            .count())
    }
}

/// Mutex-guarded in-memory dataset
#[derive(Debug, Default)]
pub struct MemoryDataset {
    records: Mutex<Vec<OutputRecord>>,
}

impl MemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dataset that already holds `records`, as after an interrupted run
    pub fn with_records(records: Vec<OutputRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Returns a copy of all stored records
    pub fn records(&self) -> StorageResult<Vec<OutputRecord>> {
        self.records
            .lock()
            .map(|records| records.clone())
            .map_err(|_| StorageError::Database("dataset lock poisoned".to_string()))
    }
}

#[async_trait]
impl Dataset for MemoryDataset {
    async fn push(&self, records: Vec<OutputRecord>) -> StorageResult<()> {
        self.records
            .lock()
            .map_err(|_| StorageError::Database("dataset lock poisoned".to_string()))?
            .extend(records);
        Ok(())
    }

    async fn item_count(&self) -> StorageResult<usize> {
        self.records
            .lock()
            .map(|records| records.len())
            .map_err(|_| StorageError::Database("dataset lock poisoned".to_string()))
    }
}
