use crate::request::{RequestSpec, RequestTemplate};
use crate::url::PatternRule;
use crate::ConfigError;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Ripple-Scraper
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,

    #[serde(rename = "pseudo-urls", default)]
    pub pseudo_urls: Vec<PseudoUrlEntry>,

    #[serde(rename = "page-function", default)]
    pub page_function: PageFunctionConfig,

    #[serde(default)]
    pub output: OutputConfig,

    /// Free-form data handed to the page function unchanged
    #[serde(rename = "custom-data", default)]
    pub custom_data: Value,
}

impl Config {
    /// Compiles every pseudo-URL into a [`PatternRule`], in declaration order
    pub fn pattern_rules(&self) -> Result<Vec<PatternRule>, ConfigError> {
        self.pseudo_urls
            .iter()
            .map(|entry| PatternRule::compile(&entry.purl, entry.template.clone()))
            .collect()
    }

    /// Start URLs as request specs
    pub fn start_requests(&self) -> Vec<RequestSpec> {
        self.crawler
            .start_urls
            .iter()
            .map(StartUrl::to_spec)
            .collect()
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Seed requests
    pub start_urls: Vec<StartUrl>,

    /// CSS selector for elements whose `href` is considered for link following
    #[serde(default)]
    pub link_selector: Option<String>,

    /// Enables enqueueing of new requests during the crawl
    #[serde(default)]
    pub use_request_queue: bool,

    #[serde(default = "default_max_request_retries")]
    pub max_request_retries: u32,

    /// Maximum number of requests handled or failed for good; retries do not count (0 = unlimited)
    #[serde(default)]
    pub max_pages_per_crawl: u64,

    /// Maximum number of records emitted (0 = unlimited)
    #[serde(default)]
    pub max_results_per_crawl: u64,

    /// Maximum link depth from the start URLs (0 = unlimited)
    #[serde(default)]
    pub max_crawling_depth: u32,

    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: u32,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,

    #[serde(default = "default_timeout_secs")]
    pub page_load_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub page_function_timeout_secs: u64,

    #[serde(default)]
    pub ignore_ssl_errors: bool,

    #[serde(default)]
    pub debug_log: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_request_retries() -> u32 {
    3
}

fn default_min_concurrency() -> u32 {
    1
}

fn default_max_concurrency() -> u32 {
    50
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("ripple-scraper/{}", env!("CARGO_PKG_VERSION"))
}

impl CrawlerConfig {
    /// Configured depth limit, `None` when unlimited
    pub fn max_depth(&self) -> Option<u32> {
        (self.max_crawling_depth > 0).then_some(self.max_crawling_depth)
    }

    /// Configured result limit, `None` when unlimited
    pub fn max_results(&self) -> Option<u64> {
        (self.max_results_per_crawl > 0).then_some(self.max_results_per_crawl)
    }

    /// Configured page limit, `None` when unlimited
    pub fn max_pages(&self) -> Option<u64> {
        (self.max_pages_per_crawl > 0).then_some(self.max_pages_per_crawl)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn page_function_timeout(&self) -> Duration {
        Duration::from_secs(self.page_function_timeout_secs)
    }
}

/// A start URL, either bare or with request options
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StartUrl {
    Url(String),
    Request(RequestSpec),
}

impl StartUrl {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Request(spec) => &spec.url,
        }
    }

    pub fn to_spec(&self) -> RequestSpec {
        match self {
            Self::Url(url) => RequestSpec::new(url.clone()),
            Self::Request(spec) => spec.clone(),
        }
    }
}

/// Pseudo-URL entry: a wildcard pattern plus request defaults for matching links
#[derive(Debug, Clone, Deserialize)]
pub struct PseudoUrlEntry {
    pub purl: String,

    #[serde(flatten)]
    pub template: RequestTemplate,
}

/// Where the page function comes from
///
/// After [`load_config`](crate::config::load_config) a `path` has been read into `source`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageFunctionConfig {
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Output configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database holding the frontier and dataset
    ///
    /// Without it the crawl runs against in-memory stores and cannot be resumed.
    #[serde(rename = "database-path", default)]
    pub database_path: Option<String>,
}
