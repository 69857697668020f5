//! Crawl requests and their lineage
//!
//! A [`CrawlRequest`] is the unit of work held by the frontier. Its id is derived from
//! the normalized URL and the HTTP method, so two requests for the same resource always
//! collide. Lineage (depth, parent, children) is a first-class field rather than an
//! entry in the free-form `user_data` bag, and every request gets one at construction.

use crate::url::normalize_url;
use crate::UrlResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Number of hex characters kept from the request hash
const REQUEST_ID_LEN: usize = 16;

/// Depth and parent/children bookkeeping attached to a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Lineage {
    /// Number of link hops from a seed request
    pub depth: u32,

    /// Id of the request this one was discovered on; `None` for seeds
    pub parent_id: Option<String>,

    /// Ids of requests discovered on this page
    #[serde(default)]
    pub child_ids: BTreeSet<String>,
}

impl Lineage {
    /// Lineage of a seed request: depth 0, no parent
    pub fn root() -> Self {
        Self::default()
    }

    /// Lineage of a request discovered on `parent`
    pub fn child_of(parent: &CrawlRequest) -> Self {
        Self {
            depth: parent.lineage.depth + 1,
            parent_id: Some(parent.id.clone()),
            child_ids: BTreeSet::new(),
        }
    }

    /// Returns true if this lineage belongs to a seed request
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Records a child request id; returns false if it was already known
    pub fn add_child(&mut self, child_id: impl Into<String>) -> bool {
        self.child_ids.insert(child_id.into())
    }
}

/// Description of a request to be created, as written in config or by user code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequestSpec {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub payload: Option<String>,

    #[serde(default)]
    pub user_data: Map<String, Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestSpec {
    /// A plain GET request for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            payload: None,
            user_data: Map::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Request defaults carried by a pseudo-URL rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequestTemplate {
    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub payload: Option<String>,

    #[serde(default)]
    pub user_data: Map<String, Value>,
}

impl RequestTemplate {
    /// Applies the template as defaults: fields already present on `spec` win
    pub fn apply_defaults(&self, spec: &mut RequestSpec) {
        if let Some(method) = &self.method {
            if spec.method.is_empty() || spec.method.eq_ignore_ascii_case("GET") {
                spec.method = method.clone();
            }
        }

        for (name, value) in &self.headers {
            spec.headers
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }

        if spec.payload.is_none() {
            spec.payload = self.payload.clone();
        }

        for (key, value) in &self.user_data {
            spec.user_data
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// A request owned by the frontier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    /// Deterministic id derived from `unique_key` and `method`
    pub id: String,

    /// URL as requested
    pub url: String,

    /// Normalized URL used for deduplication
    pub unique_key: String,

    pub method: String,

    pub headers: BTreeMap<String, String>,

    pub payload: Option<String>,

    /// Free-form user metadata; never carries crawler bookkeeping
    pub user_data: Map<String, Value>,

    pub retry_count: u32,

    pub error_messages: Vec<String>,

    pub lineage: Lineage,
}

impl CrawlRequest {
    /// Creates a request with the given lineage
    ///
    /// This is the only constructor; every request leaves it with a lineage.
    pub fn new(spec: RequestSpec, lineage: Lineage) -> UrlResult<Self> {
        let method = if spec.method.trim().is_empty() {
            default_method()
        } else {
            spec.method.trim().to_uppercase()
        };
        let unique_key = normalize_url(&spec.url)?.to_string();
        let id = request_id(&method, &unique_key);

        Ok(Self {
            id,
            url: spec.url,
            unique_key,
            method,
            headers: spec.headers,
            payload: spec.payload,
            user_data: spec.user_data,
            retry_count: 0,
            error_messages: Vec::new(),
            lineage,
        })
    }

    /// Creates a seed request (depth 0, no parent)
    pub fn root(spec: RequestSpec) -> UrlResult<Self> {
        Self::new(spec, Lineage::root())
    }

    /// Creates a request discovered on `parent`
    pub fn child(spec: RequestSpec, parent: &CrawlRequest) -> UrlResult<Self> {
        Self::new(spec, Lineage::child_of(parent))
    }

    /// Records a failed attempt, as the retry mechanism does before re-queueing
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.retry_count += 1;
        self.error_messages.push(message.into());
    }
}

/// Derives the request id from its method and normalized URL
pub fn request_id(method: &str, unique_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_uppercase().as_bytes());
    hasher.update(b" ");
    hasher.update(unique_key.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(REQUEST_ID_LEN);
    id
}
