//! Crawl-wide counters and limits
//!
//! The emitted-record counter is only touched through [`CrawlController`]. Increments
//! are atomic and the result-limit check signals the worker pool at most once, through
//! a compare-and-swap on the abort flag.

use crate::config::CrawlerConfig;
use crate::crawler::pool::WorkerPool;
use crate::request::Lineage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Limits enforced by the controller; `None` means unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlLimits {
    pub max_results: Option<u64>,
    pub max_pages: Option<u64>,
    pub max_depth: Option<u32>,
}

impl CrawlLimits {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_results: config.max_results(),
            max_pages: config.max_pages(),
            max_depth: config.max_depth(),
        }
    }
}

#[derive(Debug)]
pub struct CrawlController {
    limits: CrawlLimits,
    pages_emitted: AtomicU64,
    /// Requests handled or given up on; retries do not count
    pages_finished: AtomicU64,
    aborted: AtomicBool,
    pool: Arc<WorkerPool>,
}

impl CrawlController {
    /// Creates a controller
    ///
    /// `initial_emitted` is the dataset's existing record count, so a resumed crawl does
    /// not count earlier output twice.
    pub fn new(limits: CrawlLimits, initial_emitted: u64, pool: Arc<WorkerPool>) -> Self {
        Self {
            limits,
            pages_emitted: AtomicU64::new(initial_emitted),
            pages_finished: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
            pool,
        }
    }

    pub fn limits(&self) -> CrawlLimits {
        self.limits
    }

    pub fn pages_emitted(&self) -> u64 {
        self.pages_emitted.load(Ordering::SeqCst)
    }

    pub fn pages_finished(&self) -> u64 {
        self.pages_finished.load(Ordering::SeqCst)
    }

    /// Adds `count` emitted records and returns the new total
    pub fn record_emitted(&self, count: u64) -> u64 {
        self.pages_emitted.fetch_add(count, Ordering::SeqCst) + count
    }

    /// Stops the crawl if the result limit has been reached
    ///
    /// Returns true only for the one call that signals the stop; in-flight tasks are
    /// left to finish.
    pub fn check_and_maybe_abort(&self) -> bool {
        let Some(max_results) = self.limits.max_results else {
            return false;
        };
        if self.pages_emitted() < max_results {
            return false;
        }

        if self
            .aborted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        tracing::info!(
            "User set limit of {} results was reached. Finishing the crawl.",
            max_results
        );
        self.pool.request_stop();
        true
    }

    /// Returns true once the result limit has stopped the crawl
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Returns false iff a depth limit is set and `lineage` has reached it
    pub fn should_expand_links(&self, lineage: &Lineage) -> bool {
        match self.limits.max_depth {
            Some(max_depth) => lineage.depth < max_depth,
            None => true,
        }
    }

    /// Returns true if finished pages plus `in_flight` tasks have used up the page limit
    ///
    /// With `in_flight` at zero this means the crawl is over; otherwise the caller should
    /// wait for a running task before starting another one.
    pub fn page_limit_reached(&self, in_flight: usize) -> bool {
        self.limits
            .max_pages
            .is_some_and(|max_pages| self.pages_finished() + in_flight as u64 >= max_pages)
    }

    /// Counts a request that was handled or failed for good
    pub fn record_page_finished(&self) -> u64 {
        self.pages_finished.fetch_add(1, Ordering::SeqCst) + 1
    }
}
