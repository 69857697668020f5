//! URL handling module for Ripple-Scraper
//!
//! This module provides pseudo-URL pattern matching and the URL normalization that
//! defines request identity.

mod matcher;
mod normalize;

pub use matcher::PatternRule;
pub use normalize::normalize_url;

use ::url::Url;

/// Resolves a link found on a page to an absolute URL
///
/// Values that already carry a scheme separator are taken as-is (but must still parse);
/// anything else is joined onto `base` with standard URL resolution. Returns `None` for
/// values that cannot be turned into a URL.
///
/// # Examples
///
/// ```
/// use ripple_scraper::url::resolve_link;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/docs/intro").unwrap();
/// assert_eq!(resolve_link("next", &base).as_deref(), Some("https://example.com/docs/next"));
/// assert_eq!(resolve_link("http://other.com/", &base).as_deref(), Some("http://other.com/"));
/// ```
pub fn resolve_link(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let resolved = if href.contains("://") {
        Url::parse(href)
    } else {
        base.join(href)
    };

    resolved.ok().map(|url| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/section/page").unwrap()
    }

    #[test]
    fn test_resolve_relative_path() {
        assert_eq!(
            resolve_link("other", &base()).as_deref(),
            Some("https://example.com/section/other")
        );
    }

    #[test]
    fn test_resolve_root_relative() {
        assert_eq!(
            resolve_link("/top", &base()).as_deref(),
            Some("https://example.com/top")
        );
    }

    #[test]
    fn test_resolve_protocol_relative() {
        assert_eq!(
            resolve_link("//cdn.example.com/x", &base()).as_deref(),
            Some("https://cdn.example.com/x")
        );
    }

    #[test]
    fn test_absolute_kept() {
        assert_eq!(
            resolve_link("http://other.com/a", &base()).as_deref(),
            Some("http://other.com/a")
        );
    }

    #[test]
    fn test_malformed_absolute_skipped() {
        assert_eq!(resolve_link("http://", &base()), None);
        assert_eq!(resolve_link("   ", &base()), None);
    }
}
