//! NZB payload fetching.
//!
//! The runner downloads candidate NZBs over HTTP through the [`NzbFetcher`]
//! capability; the reqwest implementation is the production adapter and
//! tests inject scripted fetchers.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Accept header advertised when fetching NZB payloads.
pub const NZB_ACCEPT: &str = "application/x-nzb,text/xml;q=0.9,*/*;q=0.8";
/// User agent advertised when fetching NZB payloads.
pub const NZB_USER_AGENT: &str = "UsenetStreamer-Triage";

/// Failure to fetch one NZB payload.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FetchError {
    /// Human-readable failure detail
    pub message: String,
}

impl FetchError {
    /// Build a fetch error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Capability that downloads one NZB payload as UTF-8 text.
#[async_trait]
pub trait NzbFetcher: Send + Sync {
    /// Fetch `url` with the given per-request timeout.
    ///
    /// An empty body is a failure: an indexer that returns 200 with nothing
    /// attached has still not produced an NZB.
    async fn fetch_nzb(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

/// reqwest-backed [`NzbFetcher`].
pub struct HttpNzbFetcher {
    client: reqwest::Client,
}

impl HttpNzbFetcher {
    /// Build the HTTP client with the triage headers baked in.
    pub fn new() -> Result<Self, FetchError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(NZB_ACCEPT),
        );
        let client = reqwest::Client::builder()
            .user_agent(NZB_USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::new(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NzbFetcher for HttpNzbFetcher {
    async fn fetch_nzb(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::new(format!("timeout fetching '{}'", url))
                } else if e.is_connect() {
                    FetchError::new(format!("connection failed for '{}': {}", url, e))
                } else {
                    FetchError::new(format!("failed to fetch '{}': {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(format!(
                "HTTP {} fetching '{}'",
                status, url
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::new(format!("failed to read body from '{}': {}", url, e)))?;
        if body.is_empty() {
            return Err(FetchError::new(format!("empty body from '{}'", url)));
        }
        Ok(body)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_triage_headers_and_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get"))
            .and(header("accept", NZB_ACCEPT))
            .and(header("user-agent", NZB_USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_string("<nzb></nzb>"))
            .mount(&server)
            .await;

        let fetcher = HttpNzbFetcher::new().unwrap();
        let body = fetcher
            .fetch_nzb(&format!("{}/get", server.uri()), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(body, "<nzb></nzb>");
    }

    #[tokio::test]
    async fn empty_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let fetcher = HttpNzbFetcher::new().unwrap();
        let err = fetcher
            .fetch_nzb(&format!("{}/empty", server.uri()), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.message.contains("empty body"));
    }

    #[tokio::test]
    async fn http_error_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpNzbFetcher::new().unwrap();
        let err = fetcher
            .fetch_nzb(&format!("{}/missing", server.uri()), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.message.contains("404"));
    }
}
