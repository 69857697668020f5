//! Fetched pages and the DOM query capability
//!
//! A [`Page`] keeps the raw body and parses it on demand. `scraper::Html` is not `Send`,
//! so parsed documents only ever live inside synchronous helpers and never across an
//! `.await`.

use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Parses a CSS selector, mapping failures to a configuration error
pub fn parse_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

/// A fetched page
#[derive(Debug, Clone)]
pub struct Page {
    /// URL after redirects
    url: Url,

    status: u16,

    content_type: Option<String>,

    body: String,
}

impl Page {
    pub fn new(url: Url, status: u16, content_type: Option<String>, body: impl Into<String>) -> Self {
        Self {
            url,
            status,
            content_type,
            body: body.into(),
        }
    }

    /// Convenience constructor for an HTML document served with status 200
    pub fn html(url: Url, body: impl Into<String>) -> Self {
        Self::new(url, 200, Some("text/html".to_string()), body)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parses the body into a DOM
    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }

    /// Returns the `attr` value of every element matching `selector`, in document order
    ///
    /// Elements without the attribute are skipped.
    pub fn select_attr(&self, selector: &Selector, attr: &str) -> Vec<String> {
        let document = self.document();
        document
            .select(selector)
            .filter_map(|element| element.value().attr(attr))
            .map(str::to_string)
            .collect()
    }

    /// Returns the trimmed text content of every element matching `selector`
    pub fn select_text(&self, selector: &Selector) -> Vec<String> {
        let document = self.document();
        document.select(selector).map(element_text).collect()
    }

    /// Returns true if at least one element matches `selector`
    pub fn contains(&self, selector: &Selector) -> bool {
        self.document().select(selector).next().is_some()
    }
}

/// Text content of an element with surrounding whitespace removed
pub fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}
