//! Crawler module for page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching
//! - Page tasks: user code, deferred completion, link expansion and result emission
//! - Crawl-wide limits and the worker pool
//! - Overall crawl coordination

mod context;
mod controller;
mod coordinator;
mod executor;
mod fetcher;
mod links;
mod page;
mod pool;
mod result;
mod setup;

pub use context::{wait_for_finish, DeferredOutcome, ExecutionState, PageContext};
pub use controller::{CrawlController, CrawlLimits};
pub use coordinator::{Coordinator, EmitErrorRecord, FailedRequestHandler};
pub use executor::{PageOutcome, PageTaskExecutor};
pub use fetcher::{build_http_client, FetchError, Fetcher, HttpFetcher};
pub use links::{enqueue_links, find_link_requests, DiscoveredLink};
pub use page::{element_text, parse_selector, Page};
pub use pool::WorkerPool;
pub use result::{assemble, DebugInfo, OutputRecord, DEBUG_KEY, ERROR_KEY};
pub use setup::CrawlSetup;

use crate::config::Config;
use crate::host::SelectorHost;
use crate::output::CrawlStatistics;
use crate::storage::{open_storage, Dataset, Frontier, MemoryDataset, MemoryFrontier};
use crate::{ConfigError, ScraperError};
use std::path::Path;
use std::sync::Arc;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Compile the page function with the selector host
/// 2. Open the crawl database, or in-memory stores without `database-path`
/// 3. Build the HTTP client
/// 4. Seed the frontier and dispatch page tasks until it is drained or a limit is hit
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `fresh` - Clear the crawl database before starting instead of resuming
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Crawl completed successfully
/// * `Err(ScraperError)` - Crawl failed
pub async fn crawl(config: Config, fresh: bool) -> Result<CrawlStatistics, ScraperError> {
    let setup = CrawlSetup::new(config, &SelectorHost)?;
    let fetcher = Arc::new(HttpFetcher::from_config(&setup.config().crawler)?);

    let (frontier, dataset): (Arc<dyn Frontier>, Arc<dyn Dataset>) =
        match setup.config().output.database_path.as_deref() {
            Some(path) => {
                let storage = Arc::new(
                    open_storage(Path::new(path))
                        .map_err(|e| ConfigError::Storage(format!("{}: {}", path, e)))?,
                );
                if fresh {
                    tracing::info!("Starting fresh: clearing {}", path);
                    storage.reset()?;
                }
                let frontier: Arc<dyn Frontier> = storage.clone();
                let dataset: Arc<dyn Dataset> = storage;
                (frontier, dataset)
            }
            None => {
                tracing::debug!("No database-path configured, keeping crawl state in memory");
                let frontier: Arc<dyn Frontier> = Arc::new(MemoryFrontier::new());
                let dataset: Arc<dyn Dataset> = Arc::new(MemoryDataset::new());
                (frontier, dataset)
            }
        };

    let coordinator = Coordinator::new(setup, frontier, dataset, fetcher).await?;
    coordinator.run().await
}
