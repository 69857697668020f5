//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the HTTP client from the crawler configuration
//! - Turning a crawl request (method, headers, payload) into an HTTP request
//! - Error classification
//!
//! Fetch failures are never retried here; the coordinator's retry path owns that.

use crate::config::CrawlerConfig;
use crate::crawler::page::Page;
use crate::request::CrawlRequest;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use thiserror::Error;
use url::Url;

/// Errors raised while fetching a page; all of them are retryable
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request for {url} failed with status code {status}")]
    Status { url: String, status: u16 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Request for {url} timed out")]
    Timeout { url: String },

    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Retrieves the page for a request
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &CrawlRequest) -> Result<Page, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The crawler configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.page_load_timeout())
        .danger_accept_invalid_certs(config.ignore_ssl_errors)
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`Fetcher`] backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds the client from `config` and wraps it
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, FetchError> {
        build_http_client(config)
            .map(Self::new)
            .map_err(|e| FetchError::Client(e.to_string()))
    }

    fn build_request(&self, request: &CrawlRequest) -> Result<reqwest::RequestBuilder, FetchError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| FetchError::InvalidMethod(request.method.clone()))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::InvalidHeader(name.to_string()))?;
            builder = builder.header(name, value);
        }

        if let Some(payload) = &request.payload {
            builder = builder.body(payload.clone());
        }

        Ok(builder)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &CrawlRequest) -> Result<Page, FetchError> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(|e| classify(&request.url, e))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        let final_url: Url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .map_err(|e| classify(&request.url, e))?;

        tracing::debug!("Fetched {} ({})", final_url, status.as_u16());
        Ok(Page::new(final_url, status.as_u16(), content_type, body))
    }
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        FetchError::Network {
            url: url.to_string(),
            message: "Connection refused".to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
