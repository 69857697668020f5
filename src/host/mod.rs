//! Page function hosting
//!
//! User extraction code is reached only through two traits: a [`PageFunctionHost`]
//! compiles source text once at startup, and the resulting [`PageFunction`] is invoked
//! per page with a [`PageContext`]. Compile failures are configuration errors and
//! surface before the first fetch.
//!
//! Two hosts ship with the crate: [`SelectorHost`] runs declarative selector programs
//! written in TOML, and [`FixedHost`] wraps a native Rust function built with [`page_fn`].

mod selectors;

pub use selectors::{SelectorHost, SelectorProgram};

use crate::crawler::PageContext;
use crate::ConfigError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// A compiled page function
///
/// The returned value must be `null`, an object, or an array of objects. Errors fail
/// the page task and send the request down the retry path.
#[async_trait]
pub trait PageFunction: Send + Sync {
    async fn call(&self, context: PageContext) -> anyhow::Result<Value>;
}

/// Compiles page function source text
pub trait PageFunctionHost: Send + Sync {
    fn compile(&self, source: &str) -> Result<Arc<dyn PageFunction>, ConfigError>;
}

/// Page function backed by an async closure
pub struct FnPageFunction<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> PageFunction for FnPageFunction<F>
where
    F: Fn(PageContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, context: PageContext) -> anyhow::Result<Value> {
        (self.f)(context).await
    }
}

/// Wraps an async closure as a page function
///
/// # Example
///
/// ```
/// use ripple_scraper::host::page_fn;
/// use serde_json::json;
///
/// let function = page_fn(|context| async move {
///     Ok(json!({ "url": context.request().url }))
/// });
/// # let _ = function;
/// ```
pub fn page_fn<F, Fut>(f: F) -> Arc<dyn PageFunction>
where
    F: Fn(PageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnPageFunction { f })
}

/// Host that ignores the source text and always yields the same function
///
/// Used when the page function is native code rather than configuration.
pub struct FixedHost {
    function: Arc<dyn PageFunction>,
}

impl FixedHost {
    pub fn new(function: Arc<dyn PageFunction>) -> Self {
        Self { function }
    }
}

impl PageFunctionHost for FixedHost {
    fn compile(&self, _source: &str) -> Result<Arc<dyn PageFunction>, ConfigError> {
        Ok(Arc::clone(&self.function))
    }
}
