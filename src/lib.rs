//! Ripple-Scraper: a scriptable web-crawling engine
//!
//! This crate fetches pages starting from a seed set of URLs, runs a user-supplied
//! page function against each page, follows links matching pseudo-URL patterns and
//! emits structured records to a dataset.

pub mod config;
pub mod crawler;
pub mod host;
pub mod output;
pub mod request;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Ripple-Scraper operations
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Page function must return Object | Object[], but it returned {found}")]
    InvalidResultType { found: &'static str },

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Page function failed: {0:#}")]
    PageFunction(anyhow::Error),

    #[error("Page task for {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::TaskState,
        to: state::TaskState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScraperError {
    /// Returns true if the error only affects the current page task
    ///
    /// Page-level errors are routed to the retry path; everything else aborts the crawl.
    pub fn is_page_level(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Storage(_) | Self::Io(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pseudo-URL pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid CSS selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("Compilation of page function failed: {0}")]
    PageFunction(String),

    #[error("Input parameter \"use-request-queue\" must be set to true to be able to enqueue new requests")]
    RequestQueueDisabled,

    #[error("Failed to open storage: {0}")]
    Storage(String),
}

/// Misuse of the deferred-completion control pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("context.will_finish_later() must be called before context.finish()")]
    FinishWithoutWillFinishLater,

    #[error("context.finish() called twice")]
    FinishCalledTwice,

    #[error("context.enqueue_page() called after the page task finished")]
    EnqueueAfterDone,
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Ripple-Scraper operations
pub type Result<T> = std::result::Result<T, ScraperError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use request::{CrawlRequest, Lineage, RequestSpec, RequestTemplate};
pub use state::TaskState;
pub use url::{normalize_url, PatternRule};
