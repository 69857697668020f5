use crate::request::{CrawlRequest, Lineage, RequestSpec, RequestTemplate};
use crate::{ConfigError, UrlResult};
use regex::{Regex, RegexBuilder};

/// A compiled pseudo-URL: a wildcard pattern plus the request template applied to matches
///
/// The pattern language is small: `*` matches any run of characters
/// (including `/`), everything else is literal. `**` behaves like `*`. Matching is
/// anchored at both ends and case-insensitive.
///
/// Rules are compiled once at startup and are read-only afterwards, so they can be
/// shared across page tasks without synchronization.
///
/// # Examples
///
/// ```
/// use ripple_scraper::url::PatternRule;
/// use ripple_scraper::RequestTemplate;
///
/// let rule = PatternRule::compile("http://example.com/*", RequestTemplate::default()).unwrap();
/// assert!(rule.matches("http://example.com/a/b"));
/// assert!(!rule.matches("http://example.org/a"));
/// ```
#[derive(Debug, Clone)]
pub struct PatternRule {
    pattern: String,
    regex: Regex,
    template: RequestTemplate,
}

impl PatternRule {
    /// Compiles `pattern` into an anchored matcher
    ///
    /// Fails with [`ConfigError::InvalidPattern`] if the pattern is empty or cannot be
    /// compiled.
    pub fn compile(pattern: &str, template: RequestTemplate) -> Result<Self, ConfigError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidPattern(
                "Pseudo-URL pattern cannot be empty".to_string(),
            ));
        }

        let body = trimmed
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let regex = RegexBuilder::new(&format!("^{}$", body))
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))?;

        Ok(Self {
            pattern: trimmed.to_string(),
            regex,
            template,
        })
    }

    /// The pattern as written
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The request defaults applied by [`PatternRule::create_request`]
    pub fn template(&self) -> &RequestTemplate {
        &self.template
    }

    /// Tests whether `url` matches this rule
    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }

    /// Creates a request for `url` with the rule's template applied as defaults
    ///
    /// The request gets root lineage; callers attach the real lineage.
    pub fn create_request(&self, url: &str) -> UrlResult<CrawlRequest> {
        self.create_request_with_lineage(url, Lineage::root())
    }

    /// Creates a request for `url` carrying the given lineage
    pub fn create_request_with_lineage(
        &self,
        url: &str,
        lineage: Lineage,
    ) -> UrlResult<CrawlRequest> {
        let mut spec = RequestSpec::new(url);
        self.template.apply_defaults(&mut spec);
        CrawlRequest::new(spec, lineage)
    }
}
