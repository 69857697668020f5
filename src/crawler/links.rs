//! Link discovery
//!
//! This module handles frontier expansion for a processed page:
//! - Selecting link elements and reading their `href`
//! - Resolving links against the parent request URL
//! - Matching them against the pseudo-URL rules
//! - Submitting child requests and recording them in the parent's lineage

use crate::crawler::page::Page;
use crate::request::{CrawlRequest, Lineage};
use crate::storage::{AddOutcome, Frontier, StorageResult};
use crate::url::{resolve_link, PatternRule};
use scraper::Selector;
use std::sync::Mutex;
use url::Url;

/// Attribute read from selected link elements
const LINK_ATTRIBUTE: &str = "href";

/// A child request and what the frontier made of it
#[derive(Debug, Clone)]
pub struct DiscoveredLink {
    pub request: CrawlRequest,
    pub outcome: AddOutcome,
}

/// Builds the child requests for every matching link on `page`
///
/// Each resolved URL is tested against every rule in order, and every matching rule
/// produces its own request. Links that cannot be resolved or turned into a request are
/// skipped. No selector or no rules means no links.
///
/// # Arguments
///
/// * `page` - The fetched page
/// * `selector` - Selector for link elements
/// * `rules` - Compiled pseudo-URL rules
/// * `parent` - The request the page was fetched for
pub fn find_link_requests(
    page: &Page,
    selector: Option<&Selector>,
    rules: &[PatternRule],
    parent: &CrawlRequest,
) -> Vec<CrawlRequest> {
    let Some(selector) = selector else {
        return Vec::new();
    };
    if rules.is_empty() {
        return Vec::new();
    }

    let base = match Url::parse(&parent.url) {
        Ok(base) => base,
        Err(e) => {
            tracing::debug!("Cannot resolve links against {}: {}", parent.url, e);
            return Vec::new();
        }
    };

    let mut requests = Vec::new();
    for href in page.select_attr(selector, LINK_ATTRIBUTE) {
        let Some(url) = resolve_link(&href, &base) else {
            tracing::trace!("Skipping unresolvable link '{}'", href);
            continue;
        };

        for rule in rules.iter().filter(|rule| rule.matches(&url)) {
            match rule.create_request_with_lineage(&url, Lineage::child_of(parent)) {
                Ok(request) => requests.push(request),
                Err(e) => tracing::debug!("Skipping link {}: {}", url, e),
            }
        }
    }

    requests
}

/// Discovers links on `page` and submits them to the frontier
///
/// The frontier decides about duplicates; every submission is reported back, including
/// the ones it already knew. Each child id is added to `lineage`, which is the parent's
/// lineage shared with the page context.
pub async fn enqueue_links(
    frontier: &dyn Frontier,
    page: &Page,
    selector: Option<&Selector>,
    rules: &[PatternRule],
    parent: &CrawlRequest,
    lineage: &Mutex<Lineage>,
) -> StorageResult<Vec<DiscoveredLink>> {
    let requests = find_link_requests(page, selector, rules, parent);
    let mut discovered = Vec::with_capacity(requests.len());

    for request in requests {
        let outcome = frontier.add(request.clone()).await?;
        lineage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .add_child(outcome.request_id.clone());
        discovered.push(DiscoveredLink { request, outcome });
    }

    let added = discovered
        .iter()
        .filter(|link| !link.outcome.was_already_present)
        .count();
    tracing::debug!(
        "Enqueued {} new links from {} ({} already known)",
        added,
        parent.url,
        discovered.len() - added
    );

    Ok(discovered)
}
