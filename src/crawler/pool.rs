//! Worker pool bounding concurrent page tasks
//!
//! This module handles:
//! - Global concurrency limiting via a semaphore
//! - The cooperative stop signal raised when a crawl limit is reached

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Concurrency governor for page tasks
///
/// A permit is held for the whole lifetime of a page task. Once a stop has been
/// requested no new permits are handed out; tasks already holding one run to completion.
#[derive(Debug)]
pub struct WorkerPool {
    /// Global semaphore for limiting concurrent tasks
    semaphore: Arc<Semaphore>,

    min_concurrency: usize,

    max_concurrency: usize,

    stopped: AtomicBool,

    stop_notify: Notify,
}

impl WorkerPool {
    /// Creates a new pool
    ///
    /// # Arguments
    ///
    /// * `min_concurrency` - Lower bound, reported for diagnostics
    /// * `max_concurrency` - Maximum number of tasks running at once
    pub fn new(min_concurrency: usize, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            min_concurrency: min_concurrency.clamp(1, max_concurrency),
            max_concurrency,
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    /// Waits for a free slot
    ///
    /// # Returns
    ///
    /// * `Some(permit)` - A slot; released when the permit is dropped
    /// * `None` - The pool has been stopped
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        let notified = self.stop_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_stopped() {
            return None;
        }

        tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                if self.is_stopped() {
                    return None;
                }
                permit.ok()
            }
            _ = &mut notified => None,
        }
    }

    /// Asks the pool to stop issuing new tasks
    ///
    /// Returns true for the call that actually stopped the pool.
    pub fn request_stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        if first {
            tracing::debug!("Worker pool stop requested");
            self.stop_notify.notify_waiters();
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Number of tasks currently holding a slot
    pub fn running(&self) -> usize {
        self.max_concurrency - self.semaphore.available_permits()
    }

    pub fn min_concurrency(&self) -> usize {
        self.min_concurrency
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}
