//! Page task execution
//!
//! One [`PageTaskExecutor::execute`] call drives a fetched page through
//! `Fetched → ExecutingUserCode → AwaitingDeferred → ExpandingLinks → EmittingResult →
//! Done`, skipping the optional stages as the control signals and limits dictate. Any
//! error moves the task to `Failed` and is returned to the caller, which owns the
//! retry decision.

use crate::crawler::context::{wait_for_finish, PageContext};
use crate::crawler::controller::CrawlController;
use crate::crawler::links::{enqueue_links, DiscoveredLink};
use crate::crawler::page::Page;
use crate::crawler::result::assemble;
use crate::crawler::setup::CrawlSetup;
use crate::request::{CrawlRequest, Lineage};
use crate::state::TaskState;
use crate::storage::{Dataset, Frontier};
use crate::ScraperError;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// What a finished page task did
#[derive(Debug)]
pub struct PageOutcome {
    pub final_state: TaskState,

    /// False if the crawl was already stopping and the page function never ran
    pub ran_user_code: bool,

    pub records_emitted: u64,

    /// Every link submitted to the frontier during link expansion
    pub links: Vec<DiscoveredLink>,

    /// True if this task's emission tripped the result limit
    pub aborted: bool,

    /// The request's lineage including all children recorded by this task
    pub lineage: Lineage,
}

/// Tracks and validates the state of one task
struct Transitions<'a> {
    request_id: &'a str,
    state: TaskState,
}

impl<'a> Transitions<'a> {
    fn new(request_id: &'a str) -> Self {
        Self {
            request_id,
            state: TaskState::Fetched,
        }
    }

    fn advance(&mut self, next: TaskState) -> Result<(), ScraperError> {
        if !self.state.can_transition_to(next) {
            return Err(ScraperError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(
            "Request {}: {} -> {}",
            self.request_id,
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
        Ok(())
    }
}

/// Runs page functions and the post-processing that follows them
pub struct PageTaskExecutor {
    setup: Arc<CrawlSetup>,
    frontier: Arc<dyn Frontier>,
    dataset: Arc<dyn Dataset>,
    controller: Arc<CrawlController>,
}

impl PageTaskExecutor {
    pub fn new(
        setup: Arc<CrawlSetup>,
        frontier: Arc<dyn Frontier>,
        dataset: Arc<dyn Dataset>,
        controller: Arc<CrawlController>,
    ) -> Self {
        Self {
            setup,
            frontier,
            dataset,
            controller,
        }
    }

    /// Processes one fetched page
    ///
    /// # Arguments
    ///
    /// * `request` - The request the page was fetched for
    /// * `page` - The fetched page
    ///
    /// # Returns
    ///
    /// * `Ok(PageOutcome)` - The task reached `Done`
    /// * `Err(ScraperError)` - The task reached `Failed`; nothing was emitted for it
    pub async fn execute(
        &self,
        request: &CrawlRequest,
        page: Page,
    ) -> Result<PageOutcome, ScraperError> {
        let mut transitions = Transitions::new(&request.id);

        match self.run(request, page, &mut transitions).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                if transitions.state != TaskState::Failed {
                    transitions.advance(TaskState::Failed)?;
                }
                tracing::warn!("Request {} ({}) failed: {}", request.id, request.url, error);
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        request: &CrawlRequest,
        page: Page,
        transitions: &mut Transitions<'_>,
    ) -> Result<PageOutcome, ScraperError> {
        if self.controller.check_and_maybe_abort() || self.controller.is_aborted() {
            transitions.advance(TaskState::Done)?;
            return Ok(PageOutcome {
                final_state: TaskState::Done,
                ran_user_code: false,
                records_emitted: 0,
                links: Vec::new(),
                aborted: false,
                lineage: request.lineage.clone(),
            });
        }

        let config = self.setup.config();
        let page = Arc::new(page);

        transitions.advance(TaskState::ExecutingUserCode)?;
        let frontier = config
            .crawler
            .use_request_queue
            .then(|| Arc::clone(&self.frontier));
        let context = PageContext::new(
            request.clone(),
            Arc::clone(&page),
            Arc::clone(config),
            frontier,
        );

        let result = AssertUnwindSafe(self.setup.page_function().call(context.clone()))
            .catch_unwind()
            .await
            .map_err(|payload| {
                ScraperError::PageFunction(anyhow::anyhow!(
                    "page function panicked: {}",
                    panic_message(payload.as_ref())
                ))
            })?
            .map_err(ScraperError::PageFunction)?;

        if context.is_deferred() {
            transitions.advance(TaskState::AwaitingDeferred)?;
            wait_for_finish(&context)
                .await
                .map_err(ScraperError::PageFunction)?;
        }

        let (skip_links, skip_output) = context.signals();

        let mut links = Vec::new();
        if !self.controller.should_expand_links(&request.lineage) {
            tracing::debug!(
                "Request {} reached the maximum crawling depth of {}.",
                request.id,
                request.lineage.depth
            );
        } else if !skip_links
            && self.setup.link_selector().is_some()
            && !self.setup.rules().is_empty()
        {
            transitions.advance(TaskState::ExpandingLinks)?;
            links = enqueue_links(
                self.frontier.as_ref(),
                &page,
                self.setup.link_selector(),
                self.setup.rules(),
                request,
                context.lineage_mutex(),
            )
            .await?;
        }

        let mut records_emitted = 0;
        let mut aborted = false;
        if !skip_output {
            transitions.advance(TaskState::EmittingResult)?;
            let records = assemble(request, Some(result), false)?;
            records_emitted = records.len() as u64;
            self.dataset.push(records).await?;
            self.controller.record_emitted(records_emitted);
            aborted = self.controller.check_and_maybe_abort();
        }

        transitions.advance(TaskState::Done)?;
        Ok(PageOutcome {
            final_state: TaskState::Done,
            ran_user_code: true,
            records_emitted,
            links,
            aborted,
            lineage: context.close(),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, Config};
    use crate::crawler::controller::CrawlLimits;
    use crate::crawler::pool::WorkerPool;
    use crate::host::{page_fn, PageFunction};
    use crate::request::RequestSpec;
    use crate::storage::{MemoryDataset, MemoryFrontier};
    use crate::ProtocolError;
    use serde_json::{json, Value};
    use std::path::Path;
    use std::time::Duration;
    use url::Url;

    const BODY: &str = r#"<html><body>
        <a href="/docs/a">A</a>
        <a href="/blog/b">B</a>
    </body></html>"#;

    struct Harness {
        executor: PageTaskExecutor,
        frontier: Arc<MemoryFrontier>,
        dataset: Arc<MemoryDataset>,
        controller: Arc<CrawlController>,
    }

    fn config(extra: &str) -> Config {
        let content = format!(
            r#"
[crawler]
start-urls = ["https://example.com/"]
link-selector = "a[href]"
use-request-queue = true
{}

[[pseudo-urls]]
purl = "https://example.com/docs/*"
"#,
            extra
        );
        parse_config(&content, Path::new(".")).unwrap()
    }

    fn harness(extra: &str, function: Arc<dyn PageFunction>, initial_emitted: u64) -> Harness {
        let config = config(extra);
        let limits = CrawlLimits::from_config(&config.crawler);
        let setup = Arc::new(CrawlSetup::with_page_function(config, function).unwrap());
        let frontier = Arc::new(MemoryFrontier::new());
        let dataset = Arc::new(MemoryDataset::new());
        let pool = Arc::new(WorkerPool::new(1, 4));
        let controller = Arc::new(CrawlController::new(limits, initial_emitted, pool));

        Harness {
            executor: PageTaskExecutor::new(
                setup,
                frontier.clone(),
                dataset.clone(),
                Arc::clone(&controller),
            ),
            frontier,
            dataset,
            controller,
        }
    }

    fn request(depth: u32) -> CrawlRequest {
        let mut request = CrawlRequest::root(RequestSpec::new("https://example.com/")).unwrap();
        request.lineage.depth = depth;
        request
    }

    fn page() -> Page {
        Page::html(Url::parse("https://example.com/").unwrap(), BODY)
    }

    #[tokio::test]
    async fn test_full_pass_emits_and_expands() {
        let h = harness("", page_fn(|_| async { Ok(json!({"title": "x"})) }), 0);
        let request = request(0);

        let outcome = h.executor.execute(&request, page()).await.unwrap();

        assert_eq!(outcome.final_state, TaskState::Done);
        assert!(outcome.ran_user_code);
        assert_eq!(outcome.records_emitted, 1);
        assert_eq!(outcome.links.len(), 1);
        assert_eq!(outcome.links[0].request.url, "https://example.com/docs/a");
        assert_eq!(outcome.links[0].request.lineage.depth, 1);
        assert!(outcome.lineage.child_ids.contains(&outcome.links[0].outcome.request_id));

        let records = h.dataset.records().unwrap();
        assert_eq!(records[0]["title"], json!("x"));
        assert_eq!(records[0]["#error"], json!(false));
        assert_eq!(h.controller.pages_emitted(), 1);
    }

    #[tokio::test]
    async fn test_skip_signals() {
        let function = page_fn(|context| async move {
            context.skip_links();
            context.skip_output();
            Ok(Value::Null)
        });
        let h = harness("", function, 0);

        let outcome = h.executor.execute(&request(0), page()).await.unwrap();

        assert_eq!(outcome.records_emitted, 0);
        assert!(outcome.links.is_empty());
        assert!(h.dataset.records().unwrap().is_empty());
        assert!(h.frontier.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_max_depth_stops_expansion() {
        let h = harness(
            "max-crawling-depth = 1",
            page_fn(|_| async { Ok(Value::Null) }),
            0,
        );

        let outcome = h.executor.execute(&request(1), page()).await.unwrap();
        assert!(outcome.links.is_empty());
        assert_eq!(outcome.records_emitted, 1);

        let outcome = h.executor.execute(&request(0), page()).await.unwrap();
        assert_eq!(outcome.links.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_page_ignores_skip_links() {
        let function = page_fn(|context| async move {
            context.skip_links();
            context
                .enqueue_page(RequestSpec::new("https://example.com/manual"))
                .await?;
            Ok(Value::Null)
        });
        let h = harness("", function, 0);

        let outcome = h.executor.execute(&request(0), page()).await.unwrap();

        assert!(outcome.links.is_empty());
        assert_eq!(h.frontier.len().unwrap(), 1);
        assert_eq!(outcome.lineage.child_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_completion_waits_for_finish() {
        let function = page_fn(|context| async move {
            context.will_finish_later();
            let remote = context.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                remote.finish(None).unwrap();
            });
            Ok(json!({"deferred": true}))
        });
        let h = harness("", function, 0);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            h.executor.execute(&request(0), page()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(outcome.records_emitted, 1);
    }

    #[tokio::test]
    async fn test_deferred_rejection_fails_task() {
        let function = page_fn(|context| async move {
            context.will_finish_later();
            context.finish(Some(anyhow::anyhow!("remote failure"))).unwrap();
            Ok(Value::Null)
        });
        let h = harness("", function, 0);

        let err = h.executor.execute(&request(0), page()).await.unwrap_err();
        assert!(matches!(err, ScraperError::PageFunction(_)));
        assert!(h.dataset.records().unwrap().is_empty());
        assert!(h.frontier.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_premature_finish_fails_task() {
        let function = page_fn(|context| async move {
            context.finish(None)?;
            Ok(Value::Null)
        });
        let h = harness("", function, 0);

        let err = h.executor.execute(&request(0), page()).await.unwrap_err();
        let ScraperError::PageFunction(inner) = err else {
            panic!("expected a page function error");
        };
        assert_eq!(
            inner.downcast_ref::<ProtocolError>(),
            Some(&ProtocolError::FinishWithoutWillFinishLater)
        );
    }

    #[tokio::test]
    async fn test_panicking_page_function_fails_task() {
        let function = page_fn(|context| async move {
            if context.request().url.starts_with("https://") {
                panic!("user bug");
            }
            Ok(Value::Null)
        });
        let h = harness("", function, 0);

        let err = h.executor.execute(&request(0), page()).await.unwrap_err();
        assert!(err.is_page_level());
        let ScraperError::PageFunction(inner) = err else {
            panic!("expected a page function error");
        };
        assert!(inner.to_string().contains("user bug"));
        assert!(h.dataset.records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_after_task_done_is_rejected() {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        let sender = std::sync::Mutex::new(Some(sender));
        let function = page_fn(move |context| {
            if let Some(sender) = sender.lock().unwrap().take() {
                let _ = sender.send(context);
            }
            async { Ok(Value::Null) }
        });
        let h = harness("", function, 0);

        let outcome = h.executor.execute(&request(0), page()).await.unwrap();
        let leaked = receiver.await.unwrap();
        let err = leaked
            .enqueue_page(RequestSpec::new("https://example.com/late"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScraperError::Protocol(ProtocolError::EnqueueAfterDone)
        ));
        assert!(outcome.lineage.child_ids.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_result_type_fails_task() {
        let h = harness("", page_fn(|_| async { Ok(json!(42)) }), 0);

        let err = h.executor.execute(&request(0), page()).await.unwrap_err();
        assert!(matches!(err, ScraperError::InvalidResultType { found: "number" }));
        assert!(h.dataset.records().unwrap().is_empty());
        assert_eq!(h.controller.pages_emitted(), 0);
    }

    #[tokio::test]
    async fn test_array_result_counts_every_record() {
        let h = harness(
            "max-results-per-crawl = 3",
            page_fn(|_| async { Ok(json!([{"a": 1}, {"a": 2}, {"a": 3}])) }),
            0,
        );

        let outcome = h.executor.execute(&request(0), page()).await.unwrap();
        assert_eq!(outcome.records_emitted, 3);
        assert!(outcome.aborted);
        assert!(h.controller.is_aborted());
    }

    #[tokio::test]
    async fn test_aborted_crawl_skips_user_code() {
        let h = harness(
            "max-results-per-crawl = 2",
            page_fn(|_| async { Err(anyhow::anyhow!("page function must not run")) }),
            2,
        );

        let outcome = h.executor.execute(&request(0), page()).await.unwrap();
        assert!(!outcome.ran_user_code);
        assert_eq!(outcome.final_state, TaskState::Done);
        assert!(h.dataset.records().unwrap().is_empty());
    }
}
