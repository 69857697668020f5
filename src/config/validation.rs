use crate::config::types::{Config, CrawlerConfig, OutputConfig, PageFunctionConfig, StartUrl};
use crate::crawler::parse_selector;
use crate::ConfigError;
use url::Url;

/// Upper bound for `max-concurrency`
const MAX_CONCURRENCY_LIMIT: u32 = 1000;

/// Validates the entire configuration
///
/// Everything checked here is fatal and runs before any page is fetched.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_start_urls(&config.crawler.start_urls)?;
    validate_pseudo_urls(config)?;
    validate_page_function(&config.page_function)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.min_concurrency < 1 {
        return Err(ConfigError::Validation(format!(
            "min-concurrency must be >= 1, got {}",
            config.min_concurrency
        )));
    }

    if config.max_concurrency < config.min_concurrency
        || config.max_concurrency > MAX_CONCURRENCY_LIMIT
    {
        return Err(ConfigError::Validation(format!(
            "max-concurrency must be between min-concurrency ({}) and {}, got {}",
            config.min_concurrency, MAX_CONCURRENCY_LIMIT, config.max_concurrency
        )));
    }

    if config.page_load_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "page-load-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.page_function_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "page-function-timeout-secs must be >= 1".to_string(),
        ));
    }

    if let Some(selector) = config.link_selector.as_deref() {
        if !selector.trim().is_empty() {
            parse_selector(selector)?;
        }
    }

    Ok(())
}

/// Validates the seed requests
fn validate_start_urls(start_urls: &[StartUrl]) -> Result<(), ConfigError> {
    if start_urls.is_empty() {
        return Err(ConfigError::Validation(
            "start-urls must contain at least one URL".to_string(),
        ));
    }

    for start in start_urls {
        let url = Url::parse(start.url()).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", start.url(), e))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Start URL '{}' must use http or https",
                start.url()
            )));
        }
    }

    Ok(())
}

/// Validates pseudo-URLs: they need a request queue and must compile
fn validate_pseudo_urls(config: &Config) -> Result<(), ConfigError> {
    if !config.pseudo_urls.is_empty() && !config.crawler.use_request_queue {
        return Err(ConfigError::Validation(
            "Cannot enqueue links using Pseudo URLs without using a Request Queue. \
             Either set \"use-request-queue = true\" or remove your Pseudo URLs."
                .to_string(),
        ));
    }

    config.pattern_rules()?;
    Ok(())
}

fn validate_page_function(config: &PageFunctionConfig) -> Result<(), ConfigError> {
    if config.source.as_deref().is_some_and(|source| source.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "[page-function] source cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if let Some(path) = &config.database_path {
        if path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database-path cannot be empty".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PseudoUrlEntry;
    use crate::RequestTemplate;
    use serde_json::Value;

    fn create_test_config() -> Config {
        Config {
            crawler: toml::from_str(r#"start-urls = ["https://example.com/"]"#).unwrap(),
            pseudo_urls: vec![],
            page_function: PageFunctionConfig {
                source: Some("[fields]".to_string()),
                path: None,
            },
            output: OutputConfig::default(),
            custom_data: Value::Null,
        }
    }

    fn pseudo_url(purl: &str) -> PseudoUrlEntry {
        PseudoUrlEntry {
            purl: purl.to_string(),
            template: RequestTemplate::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&create_test_config()).is_ok());
    }

    #[test]
    fn test_empty_start_urls() {
        let mut config = create_test_config();
        config.crawler.start_urls.clear();
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_non_http_start_url() {
        let mut config = create_test_config();
        config.crawler.start_urls = vec![StartUrl::Url("ftp://example.com/".to_string())];
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));

        config.crawler.start_urls = vec![StartUrl::Url("not a url".to_string())];
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_pseudo_urls_require_request_queue() {
        let mut config = create_test_config();
        config.pseudo_urls = vec![pseudo_url("https://example.com/*")];
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        config.crawler.use_request_queue = true;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let mut config = create_test_config();
        config.crawler.use_request_queue = true;
        config.pseudo_urls = vec![pseudo_url("  ")];
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_invalid_link_selector() {
        let mut config = create_test_config();
        config.crawler.link_selector = Some("a[".to_string());
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidSelector { .. })
        ));

        config.crawler.link_selector = Some(String::new());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_concurrency_bounds() {
        let mut config = create_test_config();
        config.crawler.min_concurrency = 0;
        assert!(validate(&config).is_err());

        config.crawler.min_concurrency = 10;
        config.crawler.max_concurrency = 5;
        assert!(validate(&config).is_err());

        config.crawler.max_concurrency = 1001;
        assert!(validate(&config).is_err());

        config.crawler.max_concurrency = 1000;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = create_test_config();
        config.crawler.page_load_timeout_secs = 0;
        assert!(validate(&config).is_err());

        let mut config = create_test_config();
        config.crawler.page_function_timeout_secs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_page_function_source() {
        let mut config = create_test_config();
        config.page_function = PageFunctionConfig::default();
        assert!(validate(&config).is_ok());

        config.page_function.source = Some("   ".to_string());
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_empty_database_path() {
        let mut config = create_test_config();
        config.output.database_path = Some(String::new());
        assert!(validate(&config).is_err());
    }
}
