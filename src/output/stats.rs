//! Crawl statistics
//!
//! This module provides the counters collected while a crawl runs and the summary
//! that can be rebuilt from a crawl database afterwards.

use crate::crawler::ERROR_KEY;
use crate::storage::{RequestStatus, SqliteStorage, StorageResult};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Counters for one run of the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlStatistics {
    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Page tasks dispatched, including retries
    pub pages_started: u64,

    /// Requests marked handled after a successful page task
    pub pages_handled: u64,

    /// Requests given up on after exhausting their retries
    pub pages_failed: u64,

    /// Failed attempts sent back to the frontier
    pub retries: u64,

    /// Records pushed to the dataset, error records included
    pub records_emitted: u64,

    /// Newly enqueued links
    pub links_enqueued: u64,

    /// Links the frontier already knew
    pub duplicate_links: u64,

    /// True if the result limit ended the crawl
    pub limit_reached: bool,
}

impl CrawlStatistics {
    /// Creates empty statistics starting now
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            pages_started: 0,
            pages_handled: 0,
            pages_failed: 0,
            retries: 0,
            records_emitted: 0,
            links_enqueued: 0,
            duplicate_links: 0,
            limit_reached: false,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock duration; measured up to now while the crawl is running
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }

    pub fn pages_per_second(&self) -> f64 {
        let millis = self.duration().num_milliseconds();
        if millis <= 0 {
            return 0.0;
        }
        self.pages_started as f64 / (millis as f64 / 1000.0)
    }
}

/// Prints run statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Started: {}", stats.started_at.to_rfc3339());
    if let Some(finished_at) = stats.finished_at {
        println!("  Finished: {}", finished_at.to_rfc3339());
    }
    println!(
        "  Duration: {:.1}s ({:.2} pages/sec)",
        stats.duration().num_milliseconds() as f64 / 1000.0,
        stats.pages_per_second()
    );
    println!();

    println!("Pages:");
    println!("  Started: {}", stats.pages_started);
    println!("  Handled: {}", stats.pages_handled);
    println!("  Failed: {}", stats.pages_failed);
    println!("  Retried attempts: {}", stats.retries);
    println!();

    println!("Output:");
    println!("  Records emitted: {}", stats.records_emitted);
    println!(
        "  Links enqueued: {} ({} duplicates)",
        stats.links_enqueued, stats.duplicate_links
    );

    if stats.limit_reached {
        println!();
        println!("The result limit was reached; the crawl stopped early.");
    }
}

/// Summary rebuilt from a crawl database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredStatistics {
    pub pending: u64,
    pub in_progress: u64,
    pub handled: u64,
    pub dataset_items: u64,

    /// Records flagged with `#error: true`
    pub error_records: u64,
}

impl StoredStatistics {
    pub fn total_requests(&self) -> u64 {
        self.pending + self.in_progress + self.handled
    }
}

/// Loads statistics from a crawl database
///
/// # Arguments
///
/// * `storage` - The crawl database to query
///
/// # Returns
///
/// * `Ok(StoredStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(storage: &SqliteStorage) -> StorageResult<StoredStatistics> {
    let counts = storage.count_requests_by_status()?;
    let count = |status: RequestStatus| counts.get(&status).copied().unwrap_or(0);

    let records = storage.records()?;
    let error_records = records
        .iter()
        .filter(|record| record.get(ERROR_KEY) == Some(&Value::Bool(true)))
        .count() as u64;

    Ok(StoredStatistics {
        pending: count(RequestStatus::Pending),
        in_progress: count(RequestStatus::InProgress),
        handled: count(RequestStatus::Handled),
        dataset_items: records.len() as u64,
        error_records,
    })
}

/// Prints database statistics to stdout
pub fn print_stored_statistics(stats: &StoredStatistics) {
    println!("=== Crawl Database ===\n");

    let total = stats.total_requests();
    println!("Requests: {}", total);
    for (label, count) in [
        ("Pending", stats.pending),
        ("In progress", stats.in_progress),
        ("Handled", stats.handled),
    ] {
        let percentage = if total > 0 {
            (count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", label, count, percentage);
    }
    println!();

    println!("Dataset:");
    println!("  Records: {}", stats.dataset_items);
    println!("  Error records: {}", stats.error_records);
}
