//! Page context and per-task execution state
//!
//! Each page task gets a fresh [`ExecutionState`] and a [`PageContext`] wrapping it. The
//! context is what user code sees: the page, the request, the read-only configuration
//! and the control operations `skip_links`, `skip_output`, `will_finish_later`,
//! `finish` and `enqueue_page`.
//!
//! Deferred completion is a one-shot channel owned by the execution state. Before
//! `will_finish_later` the state is explicitly not armed, so a premature `finish` is an
//! ordinary [`ProtocolError`] value.

use crate::config::Config;
use crate::crawler::page::Page;
use crate::request::{CrawlRequest, Lineage, RequestSpec};
use crate::storage::{AddOutcome, Frontier};
use crate::{ConfigError, ProtocolError, ScraperError};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Outcome delivered by `finish`
pub type DeferredOutcome = Result<(), anyhow::Error>;

/// Deferred-completion slot
#[derive(Debug, Default)]
enum Deferred {
    #[default]
    NotArmed,
    Armed {
        /// `None` once `finish` has been called
        sender: Option<oneshot::Sender<DeferredOutcome>>,
        /// `None` once the executor has started waiting
        receiver: Option<oneshot::Receiver<DeferredOutcome>>,
    },
}

/// Control signals raised by user code for one page task
#[derive(Debug, Default)]
pub struct ExecutionState {
    skip_links: bool,
    skip_output: bool,
    deferred: Deferred,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_links(&self) -> bool {
        self.skip_links
    }

    pub fn skip_output(&self) -> bool {
        self.skip_output
    }

    /// Returns true if `will_finish_later` has been called
    pub fn is_deferred(&self) -> bool {
        matches!(self.deferred, Deferred::Armed { .. })
    }

    /// Arms a new deferred completion, replacing any previous one
    fn arm(&mut self) {
        let (sender, receiver) = oneshot::channel();
        self.deferred = Deferred::Armed {
            sender: Some(sender),
            receiver: Some(receiver),
        };
    }

    /// Settles the armed deferred completion exactly once
    fn settle(&mut self, outcome: DeferredOutcome) -> Result<(), ProtocolError> {
        match &mut self.deferred {
            Deferred::NotArmed => Err(ProtocolError::FinishWithoutWillFinishLater),
            Deferred::Armed { sender, .. } => {
                let sender = sender.take().ok_or(ProtocolError::FinishCalledTwice)?;
                // The receiver is gone only if the task was cancelled; nothing waits then.
                let _ = sender.send(outcome);
                Ok(())
            }
        }
    }

    /// Hands the pending receiver to the waiting executor
    fn take_receiver(&mut self) -> Option<oneshot::Receiver<DeferredOutcome>> {
        match &mut self.deferred {
            Deferred::NotArmed => None,
            Deferred::Armed { receiver, .. } => receiver.take(),
        }
    }
}

struct ContextInner {
    request: CrawlRequest,
    page: Arc<Page>,
    config: Arc<Config>,
    frontier: Option<Arc<dyn Frontier>>,
    state: Mutex<ExecutionState>,
    lineage: Mutex<Lineage>,
    /// Set under the lineage lock once the task has taken its final lineage
    closed: AtomicBool,
}

/// The context handed to a page function
///
/// Cheap to clone; clones share the same execution state, so user code may move a
/// clone into a spawned task and call [`PageContext::finish`] from there.
#[derive(Clone)]
pub struct PageContext {
    inner: Arc<ContextInner>,
}

impl PageContext {
    /// Creates the context for one page task
    ///
    /// `frontier` is `None` when the crawl runs without a request queue; `enqueue_page`
    /// then fails.
    pub fn new(
        request: CrawlRequest,
        page: Arc<Page>,
        config: Arc<Config>,
        frontier: Option<Arc<dyn Frontier>>,
    ) -> Self {
        let lineage = request.lineage.clone();
        Self {
            inner: Arc::new(ContextInner {
                request,
                page,
                config,
                frontier,
                state: Mutex::new(ExecutionState::new()),
                lineage: Mutex::new(lineage),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The request being processed
    pub fn request(&self) -> &CrawlRequest {
        &self.inner.request
    }

    pub fn page(&self) -> &Page {
        &self.inner.page
    }

    /// The crawl configuration; read-only
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The `custom-data` table from the configuration
    pub fn custom_data(&self) -> &Value {
        &self.inner.config.custom_data
    }

    /// Current lineage of the request, including children recorded so far
    pub fn lineage(&self) -> Lineage {
        self.lineage_lock().clone()
    }

    /// Prevents link discovery for this page
    pub fn skip_links(&self) {
        tracing::debug!("Skipping links.");
        self.state().skip_links = true;
    }

    /// Prevents this page from emitting records
    pub fn skip_output(&self) {
        tracing::debug!("Skipping output.");
        self.state().skip_output = true;
    }

    /// Keeps the task open after the page function returns, until [`finish`] is called
    ///
    /// Calling it again replaces the pending completion; only the latest one counts.
    ///
    /// [`finish`]: PageContext::finish
    pub fn will_finish_later(&self) {
        tracing::debug!("context.will_finish_later() called");
        self.state().arm();
    }

    /// Completes a deferred task, failing it if `error` is given
    pub fn finish(&self, error: Option<anyhow::Error>) -> Result<(), ProtocolError> {
        let result = self.state().settle(match error {
            Some(error) => Err(error),
            None => Ok(()),
        });
        if result.is_ok() {
            tracing::debug!("context.finish() called");
        }
        result
    }

    /// Submits a new request to the frontier right away
    ///
    /// The request becomes a child of the current one. This works regardless of
    /// `skip_links`, but requires the crawl to run with a request queue.
    ///
    /// Fails with [`ProtocolError::EnqueueAfterDone`] once the page task has finished,
    /// e.g. when called from a task spawned by the page function without
    /// `will_finish_later`. The parent's lineage is already stored by then.
    pub async fn enqueue_page(&self, spec: RequestSpec) -> Result<AddOutcome, ScraperError> {
        let frontier = self
            .inner
            .frontier
            .as_ref()
            .ok_or(ConfigError::RequestQueueDisabled)?;
        if self.is_closed() {
            return Err(ProtocolError::EnqueueAfterDone.into());
        }

        let request = CrawlRequest::child(spec, &self.inner.request)?;
        let outcome = frontier.add(request).await?;
        {
            let mut lineage = self.lineage_lock();
            if self.is_closed() {
                return Err(ProtocolError::EnqueueAfterDone.into());
            }
            lineage.add_child(outcome.request_id.clone());
        }

        tracing::debug!(
            "Enqueued page {} (already present: {})",
            outcome.request_id,
            outcome.was_already_present
        );
        Ok(outcome)
    }

    /// Returns `(skip_links, skip_output)`
    pub(crate) fn signals(&self) -> (bool, bool) {
        let state = self.state();
        (state.skip_links, state.skip_output)
    }

    pub(crate) fn take_deferred(&self) -> Option<oneshot::Receiver<DeferredOutcome>> {
        self.state().take_receiver()
    }

    pub(crate) fn is_deferred(&self) -> bool {
        self.state().is_deferred()
    }

    /// Ends the task's use of the context and returns the final lineage
    pub(crate) fn close(&self) -> Lineage {
        let lineage = self.lineage_lock();
        self.inner.closed.store(true, Ordering::SeqCst);
        lineage.clone()
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn lineage_mutex(&self) -> &Mutex<Lineage> {
        &self.inner.lineage
    }

    fn state(&self) -> MutexGuard<'_, ExecutionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lineage_lock(&self) -> MutexGuard<'_, Lineage> {
        self.inner
            .lineage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for PageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageContext")
            .field("request", &self.inner.request.id)
            .field("url", &self.inner.request.url)
            .finish_non_exhaustive()
    }
}

/// Waits for a deferred completion armed on `context`
///
/// Returns immediately if the task was never deferred. If the completion is replaced
/// while waiting, the wait moves on to the replacement.
pub async fn wait_for_finish(context: &PageContext) -> DeferredOutcome {
    while let Some(receiver) = context.take_deferred() {
        tracing::debug!("Waiting for context.finish() to be called!");
        match receiver.await {
            Ok(outcome) => return outcome,
            Err(_) => continue,
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::storage::MemoryFrontier;
    use std::path::Path;
    use std::time::Duration;
    use url::Url;

    pub(crate) fn test_config(use_request_queue: bool) -> Arc<Config> {
        let content = format!(
            r#"
[crawler]
start-urls = ["https://example.com/"]
use-request-queue = {}

[page-function]
source = "[fields]"
"#,
            use_request_queue
        );
        Arc::new(parse_config(&content, Path::new(".")).unwrap())
    }

    fn context(frontier: Option<Arc<dyn Frontier>>) -> PageContext {
        let request = CrawlRequest::root(RequestSpec::new("https://example.com/")).unwrap();
        let page = Page::html(Url::parse("https://example.com/").unwrap(), "<html></html>");
        PageContext::new(
            request,
            Arc::new(page),
            test_config(frontier.is_some()),
            frontier,
        )
    }

    #[test]
    fn test_signals_default_off() {
        let ctx = context(None);
        assert_eq!(ctx.signals(), (false, false));
        assert!(!ctx.is_deferred());
    }

    #[test]
    fn test_skip_signals() {
        let ctx = context(None);
        ctx.skip_links();
        assert_eq!(ctx.signals(), (true, false));
        ctx.clone().skip_output();
        assert_eq!(ctx.signals(), (true, true));
    }

    #[test]
    fn test_finish_without_will_finish_later() {
        let ctx = context(None);
        assert_eq!(
            ctx.finish(None),
            Err(ProtocolError::FinishWithoutWillFinishLater)
        );
    }

    #[test]
    fn test_finish_called_twice() {
        let ctx = context(None);
        ctx.will_finish_later();
        assert_eq!(ctx.finish(None), Ok(()));
        assert_eq!(ctx.finish(None), Err(ProtocolError::FinishCalledTwice));
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_not_deferred() {
        let ctx = context(None);
        assert!(wait_for_finish(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_finish_from_spawned_task_unblocks_wait() {
        let ctx = context(None);
        ctx.will_finish_later();

        let remote = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.finish(None).unwrap();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), wait_for_finish(&ctx))
            .await
            .unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_finish_with_error_rejects() {
        let ctx = context(None);
        ctx.will_finish_later();
        ctx.finish(Some(anyhow::anyhow!("gave up"))).unwrap();

        let err = wait_for_finish(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "gave up");
    }

    #[tokio::test]
    async fn test_last_will_finish_later_wins() {
        let ctx = context(None);
        ctx.will_finish_later();
        ctx.will_finish_later();
        ctx.finish(None).unwrap();

        assert!(wait_for_finish(&ctx).await.is_ok());
        assert_eq!(ctx.finish(None), Err(ProtocolError::FinishCalledTwice));
    }

    #[tokio::test]
    async fn test_rearm_while_waiting_moves_to_new_completion() {
        let ctx = context(None);
        ctx.will_finish_later();

        let remote = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.will_finish_later();
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.finish(Some(anyhow::anyhow!("second"))).unwrap();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), wait_for_finish(&ctx))
            .await
            .unwrap();
        assert_eq!(outcome.unwrap_err().to_string(), "second");
    }

    #[tokio::test]
    async fn test_enqueue_page_requires_request_queue() {
        let ctx = context(None);
        let err = ctx
            .enqueue_page(RequestSpec::new("https://example.com/next"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScraperError::Config(ConfigError::RequestQueueDisabled)
        ));
    }

    #[tokio::test]
    async fn test_enqueue_page_adds_child() {
        let frontier = Arc::new(MemoryFrontier::new());
        let ctx = context(Some(frontier.clone()));
        ctx.skip_links();

        let outcome = ctx
            .enqueue_page(RequestSpec::new("https://example.com/next"))
            .await
            .unwrap();

        assert!(!outcome.was_already_present);
        let stored = frontier.get(&outcome.request_id).unwrap().unwrap();
        assert_eq!(stored.lineage.depth, 1);
        assert_eq!(stored.lineage.parent_id.as_deref(), Some(ctx.request().id.as_str()));
        assert!(ctx.lineage().child_ids.contains(&outcome.request_id));
    }

    #[tokio::test]
    async fn test_enqueue_page_after_close_is_rejected() {
        let frontier = Arc::new(MemoryFrontier::new());
        let ctx = context(Some(frontier.clone()));
        let lineage = ctx.close();

        let err = ctx
            .enqueue_page(RequestSpec::new("https://example.com/late"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScraperError::Protocol(ProtocolError::EnqueueAfterDone)
        ));
        assert!(frontier.is_empty().unwrap());
        assert!(lineage.child_ids.is_empty());
    }

    #[test]
    fn test_custom_data_exposed() {
        let ctx = context(None);
        assert!(ctx.custom_data().is_null());
        assert_eq!(ctx.config().crawler.start_urls.len(), 1);
    }
}
