//! Crawl setup compiled once before the first fetch

use crate::config::{validate, Config};
use crate::crawler::page::parse_selector;
use crate::host::{FixedHost, PageFunction, PageFunctionHost};
use crate::url::PatternRule;
use crate::{ConfigError, ConfigResult};
use scraper::Selector;
use std::sync::Arc;

/// Everything page tasks share, compiled from the configuration
///
/// Building a setup runs every startup check: config validation, pattern and selector
/// compilation, and page function compilation. After that it is read-only.
pub struct CrawlSetup {
    config: Arc<Config>,
    rules: Vec<PatternRule>,
    link_selector: Option<Selector>,
    page_function: Arc<dyn PageFunction>,
}

impl CrawlSetup {
    /// Compiles the configured page function source with `host`
    pub fn new(config: Config, host: &dyn PageFunctionHost) -> ConfigResult<Self> {
        let source = config.page_function.source.as_deref().ok_or_else(|| {
            ConfigError::Validation("[page-function] must set either source or path".to_string())
        })?;
        let page_function = host.compile(source)?;
        Self::build(config, page_function)
    }

    /// Uses a native page function; any configured source is ignored
    pub fn with_page_function(
        config: Config,
        page_function: Arc<dyn PageFunction>,
    ) -> ConfigResult<Self> {
        let host = FixedHost::new(page_function);
        Self::build(config, host.compile("")?)
    }

    fn build(config: Config, page_function: Arc<dyn PageFunction>) -> ConfigResult<Self> {
        validate(&config)?;

        let rules = config.pattern_rules()?;
        let link_selector = config
            .crawler
            .link_selector
            .as_deref()
            .map(str::trim)
            .filter(|selector| !selector.is_empty())
            .map(parse_selector)
            .transpose()?;

        if !rules.is_empty() && link_selector.is_none() {
            tracing::warn!("Pseudo-URLs are configured without a link-selector; no links will be followed");
        }

        Ok(Self {
            config: Arc::new(config),
            rules,
            link_selector,
            page_function,
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn link_selector(&self) -> Option<&Selector> {
        self.link_selector.as_ref()
    }

    pub fn page_function(&self) -> &Arc<dyn PageFunction> {
        &self.page_function
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::host::{page_fn, SelectorHost};
    use std::path::Path;

    fn config(page_function: &str) -> Config {
        let content = format!(
            r#"
[crawler]
start-urls = ["https://example.com/"]
link-selector = "a[href]"
use-request-queue = true

[[pseudo-urls]]
purl = "https://example.com/*"

{}
"#,
            page_function
        );
        parse_config(&content, Path::new(".")).unwrap()
    }

    #[test]
    fn test_setup_compiles_everything() {
        let setup = CrawlSetup::new(
            config("[page-function]\nsource = \"[fields]\\ntitle = 'title'\""),
            &SelectorHost,
        )
        .unwrap();
        assert_eq!(setup.rules().len(), 1);
        assert!(setup.link_selector().is_some());
    }

    #[test]
    fn test_page_function_compile_error_is_fatal() {
        let result = CrawlSetup::new(
            config("[page-function]\nsource = \"fields = [\""),
            &SelectorHost,
        );
        assert!(matches!(result, Err(ConfigError::PageFunction(_))));
    }

    #[test]
    fn test_missing_page_function_source() {
        let result = CrawlSetup::new(config(""), &SelectorHost);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_native_page_function() {
        let function = page_fn(|_context| async { Ok(serde_json::Value::Null) });
        let setup = CrawlSetup::with_page_function(config(""), function).unwrap();
        assert_eq!(setup.config().crawler.start_urls.len(), 1);
    }
}
