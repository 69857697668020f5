//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the dispatch loop that coordinates all aspects of
//! the crawling process, including:
//! - Seeding the frontier with the start requests
//! - Dispatching frontier requests to page tasks under the worker pool
//! - The retry path and the failed-request handler
//! - Collecting run statistics

use crate::crawler::controller::{CrawlController, CrawlLimits};
use crate::crawler::executor::{PageOutcome, PageTaskExecutor};
use crate::crawler::fetcher::Fetcher;
use crate::crawler::pool::WorkerPool;
use crate::crawler::result::assemble;
use crate::crawler::setup::CrawlSetup;
use crate::output::CrawlStatistics;
use crate::request::CrawlRequest;
use crate::storage::{Dataset, Frontier};
use crate::{Result, ScraperError};
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};

/// Number of handled pages between progress reports
const PROGRESS_INTERVAL: u64 = 10;

/// Decides what happens to a request that ran out of retries
#[async_trait]
pub trait FailedRequestHandler: Send + Sync {
    /// Returns the number of records pushed to `dataset`
    async fn handle_failed(&self, request: &CrawlRequest, dataset: &dyn Dataset) -> Result<u64>;
}

/// Default handler: logs the failure and emits one record flagged `#error: true`
#[derive(Debug, Clone, Copy, Default)]
pub struct EmitErrorRecord;

#[async_trait]
impl FailedRequestHandler for EmitErrorRecord {
    async fn handle_failed(&self, request: &CrawlRequest, dataset: &dyn Dataset) -> Result<u64> {
        tracing::error!(
            "Request {} failed {} times. Marking as failed.",
            request.id,
            request.retry_count
        );
        let records = assemble(request, None, true)?;
        let count = records.len() as u64;
        dataset.push(records).await?;
        Ok(count)
    }
}

/// What became of one dispatched request
#[derive(Debug)]
enum TaskReport {
    Handled(PageOutcome),
    /// The crawl was stopping; the request went back to the frontier untouched
    Requeued,
    Retried,
    Failed { records: u64 },
}

/// State shared by every page task
struct Shared {
    executor: PageTaskExecutor,
    fetcher: Arc<dyn Fetcher>,
    frontier: Arc<dyn Frontier>,
    dataset: Arc<dyn Dataset>,
    controller: Arc<CrawlController>,
    failed_handler: Arc<dyn FailedRequestHandler>,
    page_function_timeout: Duration,
    max_request_retries: u32,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    setup: Arc<CrawlSetup>,
    pool: Arc<WorkerPool>,
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// The emitted-record counter is seeded from the dataset, so a resumed crawl keeps
    /// counting toward the result limit from where it stopped.
    ///
    /// # Arguments
    ///
    /// * `setup` - The compiled crawl setup
    /// * `frontier` - The request queue
    /// * `dataset` - The output sink
    /// * `fetcher` - Page fetcher
    pub async fn new(
        setup: CrawlSetup,
        frontier: Arc<dyn Frontier>,
        dataset: Arc<dyn Dataset>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let setup = Arc::new(setup);
        let crawler = &setup.config().crawler;

        let pool = Arc::new(WorkerPool::new(
            crawler.min_concurrency as usize,
            crawler.max_concurrency as usize,
        ));
        let initial_emitted = dataset.item_count().await? as u64;
        if initial_emitted > 0 {
            tracing::info!("Dataset already holds {} records", initial_emitted);
        }
        let controller = Arc::new(CrawlController::new(
            CrawlLimits::from_config(crawler),
            initial_emitted,
            Arc::clone(&pool),
        ));

        let shared = Shared {
            executor: PageTaskExecutor::new(
                Arc::clone(&setup),
                Arc::clone(&frontier),
                Arc::clone(&dataset),
                Arc::clone(&controller),
            ),
            fetcher,
            frontier,
            dataset,
            controller,
            failed_handler: Arc::new(EmitErrorRecord),
            page_function_timeout: crawler.page_function_timeout(),
            max_request_retries: crawler.max_request_retries,
        };

        Ok(Self {
            setup,
            pool,
            shared: Arc::new(shared),
        })
    }

    /// Replaces the handler for requests that exhaust their retries
    ///
    /// Must be called before [`Coordinator::run`].
    pub fn with_failed_request_handler(mut self, handler: Arc<dyn FailedRequestHandler>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.failed_handler = handler;
        }
        self
    }

    pub fn controller(&self) -> &Arc<CrawlController> {
        &self.shared.controller
    }

    /// Adds the start requests to the frontier as seeds
    ///
    /// Returns how many of them were new. Seeds already known from an earlier run are
    /// left as they are.
    pub async fn seed(&self) -> Result<usize> {
        let mut added = 0;
        let specs = self.setup.config().start_requests();
        let total = specs.len();

        for spec in specs {
            let request = CrawlRequest::root(spec)?;
            let outcome = self.shared.frontier.add(request).await?;
            if !outcome.was_already_present {
                added += 1;
            }
        }

        tracing::info!(
            "Enqueued {} start requests ({} already known)",
            added,
            total - added
        );
        Ok(added)
    }

    /// Runs the crawl until the frontier is drained or a limit stops it
    ///
    /// Page-level failures go down the retry path; storage and configuration errors
    /// abort the crawl.
    pub async fn run(&self) -> Result<CrawlStatistics> {
        let mut stats = CrawlStatistics::start();
        self.seed().await?;

        let controller = &self.shared.controller;
        controller.check_and_maybe_abort();

        tracing::info!(
            "Starting crawl with {} to {} concurrent pages",
            self.pool.min_concurrency(),
            self.pool.max_concurrency()
        );

        let mut tasks: JoinSet<Result<TaskReport>> = JoinSet::new();

        loop {
            while let Some(joined) = tasks.join_next().now_or_never().flatten() {
                self.record(&mut stats, joined)?;
            }

            let Some(permit) = self.pool.acquire().await else {
                tracing::debug!("Worker pool stopped, no new pages will be started");
                break;
            };

            if controller.page_limit_reached(0) {
                tracing::info!(
                    "Reached the maximum of {} pages per crawl. Finishing the crawl.",
                    controller.pages_finished()
                );
                self.pool.request_stop();
                break;
            }

            if controller.page_limit_reached(tasks.len()) {
                // Running tasks may still retry and free their slot
                drop(permit);
                if let Some(joined) = tasks.join_next().await {
                    self.record(&mut stats, joined)?;
                }
                continue;
            }

            match self.shared.frontier.fetch_next().await? {
                Some(request) => {
                    if request.retry_count == 0 {
                        stats.pages_started += 1;
                    }
                    let shared = Arc::clone(&self.shared);
                    tasks.spawn(async move {
                        let _permit = permit;
                        process(shared, request).await
                    });
                }
                None => {
                    drop(permit);
                    match tasks.join_next().await {
                        Some(joined) => self.record(&mut stats, joined)?,
                        None => {
                            tracing::info!("Frontier is empty, crawl complete");
                            break;
                        }
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.record(&mut stats, joined)?;
        }

        stats.limit_reached = controller.is_aborted();
        stats.finish();
        tracing::info!(
            "Crawl finished: {} pages handled, {} failed, {} records in {:.1}s",
            stats.pages_handled,
            stats.pages_failed,
            stats.records_emitted,
            stats.duration().num_milliseconds() as f64 / 1000.0
        );

        let pending = self.shared.frontier.pending_count().await?;
        if pending > 0 {
            tracing::info!("{} requests left pending for a later run", pending);
        }
        Ok(stats)
    }

    fn record(
        &self,
        stats: &mut CrawlStatistics,
        joined: std::result::Result<Result<TaskReport>, JoinError>,
    ) -> Result<()> {
        let report = joined.map_err(|e| {
            ScraperError::PageFunction(anyhow::anyhow!("Page task panicked: {}", e))
        })??;

        match report {
            TaskReport::Handled(outcome) => {
                self.shared.controller.record_page_finished();
                stats.pages_handled += 1;
                stats.records_emitted += outcome.records_emitted;
                for link in &outcome.links {
                    if link.outcome.was_already_present {
                        stats.duplicate_links += 1;
                    } else {
                        stats.links_enqueued += 1;
                    }
                }

                if stats.pages_handled % PROGRESS_INTERVAL == 0 {
                    tracing::info!(
                        "Progress: {} pages handled, {} records, {:.2} pages/sec",
                        stats.pages_handled,
                        stats.records_emitted,
                        stats.pages_per_second()
                    );
                }
            }
            TaskReport::Requeued => {}
            TaskReport::Retried => stats.retries += 1,
            TaskReport::Failed { records } => {
                self.shared.controller.record_page_finished();
                stats.pages_failed += 1;
                stats.records_emitted += records;
            }
        }
        Ok(())
    }
}

/// Runs one request through fetch, page task and the retry path
async fn process(shared: Arc<Shared>, mut request: CrawlRequest) -> Result<TaskReport> {
    match attempt(&shared, &request).await {
        Ok(outcome) if !outcome.ran_user_code => {
            shared.frontier.reclaim(request).await?;
            Ok(TaskReport::Requeued)
        }
        Ok(outcome) => {
            request.lineage = outcome.lineage.clone();
            shared.frontier.mark_handled(&request).await?;
            Ok(TaskReport::Handled(outcome))
        }
        Err(error) if !error.is_page_level() => {
            tracing::error!("Fatal error while processing {}: {}", request.url, error);
            Err(error)
        }
        Err(error) => {
            request.record_failure(error.to_string());

            if request.retry_count <= shared.max_request_retries {
                tracing::debug!(
                    "Retrying request {} (attempt {} of {})",
                    request.id,
                    request.retry_count + 1,
                    shared.max_request_retries + 1
                );
                shared.frontier.reclaim(request).await?;
                return Ok(TaskReport::Retried);
            }

            let records = shared
                .failed_handler
                .handle_failed(&request, shared.dataset.as_ref())
                .await?;
            shared.controller.record_emitted(records);
            shared.controller.check_and_maybe_abort();
            shared.frontier.mark_handled(&request).await?;
            Ok(TaskReport::Failed { records })
        }
    }
}

async fn attempt(shared: &Shared, request: &CrawlRequest) -> Result<PageOutcome> {
    let page = shared.fetcher.fetch(request).await?;

    match tokio::time::timeout(
        shared.page_function_timeout,
        shared.executor.execute(request, page),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ScraperError::Timeout {
            url: request.url.clone(),
            seconds: shared.page_function_timeout.as_secs(),
        }),
    }
}
