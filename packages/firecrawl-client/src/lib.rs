//! Pure Firecrawl REST API client.
//!
//! A minimal client for the Firecrawl scraping API. It issues one HTTP call
//! per method and reports failures as [`FirecrawlError`] values that know their
//! own [`FailureClass`]. Retry and backoff policy is the caller's concern.
//!
//! # Example
//!
//! ```rust,ignore
//! use firecrawl_client::{endpoints, FirecrawlClient, ScrapeRequest};
//! use std::time::Duration;
//!
//! let client = FirecrawlClient::new("https://api.firecrawl.dev", Some(key), Duration::from_secs(60))?;
//! let page = client.post_json(endpoints::SCRAPE, &request).await?;
//! ```

pub mod error;
pub mod types;

pub use error::{FailureClass, FirecrawlError, Result};
pub use types::{
    BatchScrapeRequest, CrawlRequest, DeepResearchRequest, ExtractRequest, GenerateLlmsTxtRequest,
    JobAccepted, MapRequest, ScrapeOptions, ScrapeRequest, SearchRequest,
};

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Serialize;

/// Remote paths for every capability the relay can call.
pub mod endpoints {
    pub const SCRAPE: &str = "/v1/scrape";
    pub const MAP: &str = "/v1/map";
    pub const CRAWL: &str = "/v1/crawl";
    pub const SEARCH: &str = "/v1/search";
    pub const EXTRACT: &str = "/v1/extract";
    pub const DEEP_RESEARCH: &str = "/v2/deep-research";
    pub const GENERATE_LLMSTXT: &str = "/v2/generate-llmstxt";
    pub const BATCH_SCRAPE: &str = "/v2/batch/scrape";

    pub fn crawl_status(id: &str) -> String {
        format!("{}/{}", CRAWL, id)
    }

    pub fn batch_status(id: &str) -> String {
        format!("{}/{}", BATCH_SCRAPE, id)
    }
}

/// Default `x-ratelimit-limit` when the remote only sends the remaining count.
const DEFAULT_RATE_LIMIT: u64 = 1000;

/// Usage derived from the remote's rate-limit headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitUsage {
    pub remaining: u64,
    pub limit: u64,
    pub usage_percent: f64,
}

impl RateLimitUsage {
    /// Read usage from response headers. `None` when the remote sent no
    /// `x-ratelimit-remaining` or it is not a number.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let remaining = header_u64(headers, "x-ratelimit-remaining")?;
        let limit = header_u64(headers, "x-ratelimit-limit")
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_RATE_LIMIT);
        let used = limit.saturating_sub(remaining);
        Some(Self {
            remaining,
            limit,
            usage_percent: used as f64 / limit as f64 * 100.0,
        })
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

pub struct FirecrawlClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    /// Fraction of the rate limit above which a warning is logged
    rate_limit_warning: f64,
}

impl FirecrawlClient {
    /// Build a client. Without an API key no `Authorization` header is sent,
    /// which is how self-hosted deployments run.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| FirecrawlError::Config(format!("invalid API key: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| FirecrawlError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            rate_limit_warning: 0.8,
        })
    }

    /// Set the usage fraction above which rate-limit headers trigger a warning.
    pub fn with_rate_limit_warning(mut self, threshold: f64) -> Self {
        self.rate_limit_warning = threshold;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body and return the decoded JSON response.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value> {
        tracing::debug!(method = "POST", path, "Making request");
        let request = self.client.post(self.url(path)).json(body);
        self.send(request, path).await
    }

    /// GET a path and return the decoded JSON response.
    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        tracing::debug!(method = "GET", path, "Making request");
        let request = self.client.get(self.url(path));
        self.send(request, path).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<serde_json::Value> {
        let timeout_ms = self.timeout.as_millis() as u64;
        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                let err = FirecrawlError::from_reqwest(e, timeout_ms);
                self.log_transport_failure(&err);
                return Err(err);
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = FirecrawlError::Api {
                status: status.as_u16(),
                message: error::remote_message(status.as_u16(), &body),
            };
            log_api_failure(&err, path);
            return Err(err);
        }

        if let Some(usage) = RateLimitUsage::from_headers(resp.headers()) {
            if usage.usage_percent > self.rate_limit_warning * 100.0 {
                tracing::warn!(
                    remaining = usage.remaining,
                    limit = usage.limit,
                    "Credit usage at {:.1}%",
                    usage.usage_percent
                );
            }
        }

        resp.json()
            .await
            .map_err(|e| FirecrawlError::from_reqwest(e, timeout_ms))
    }

    fn log_transport_failure(&self, err: &FirecrawlError) {
        match err {
            FirecrawlError::ConnectionRefused(_) => tracing::error!(
                base_url = %self.base_url,
                "Connection refused - check that the Firecrawl service is running"
            ),
            FirecrawlError::Dns(_) => {
                tracing::error!("DNS resolution failed - check your network connection")
            }
            FirecrawlError::Timeout { timeout_ms } => tracing::warn!(
                timeout_ms,
                "Request timeout - the target site may be slow or unresponsive"
            ),
            other => tracing::error!(error = %other, "Request failed"),
        }
    }
}

fn log_api_failure(err: &FirecrawlError, path: &str) {
    let FirecrawlError::Api { status, message } = err else {
        return;
    };
    match *status {
        429 => tracing::warn!("Rate limit exceeded: {}", message),
        401 => tracing::error!("Authentication failed - check your API key"),
        403 => tracing::error!("Access forbidden - check your API key permissions"),
        404 => tracing::warn!(path, "Resource not found"),
        s if s >= 500 => tracing::error!(status = s, "Server error: {}", message),
        s => tracing::warn!(status = s, "Request rejected: {}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn rate_limit_usage_from_headers() {
        let usage = RateLimitUsage::from_headers(&headers(&[
            ("x-ratelimit-remaining", "100"),
            ("x-ratelimit-limit", "500"),
        ]))
        .unwrap();
        assert_eq!(usage.remaining, 100);
        assert_eq!(usage.limit, 500);
        assert!((usage.usage_percent - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rate_limit_defaults_limit_when_absent() {
        let usage =
            RateLimitUsage::from_headers(&headers(&[("x-ratelimit-remaining", "900")])).unwrap();
        assert_eq!(usage.limit, 1000);
        assert!((usage.usage_percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rate_limit_absent_without_remaining_header() {
        assert!(RateLimitUsage::from_headers(&headers(&[("x-ratelimit-limit", "10")])).is_none());
        let unparsable = headers(&[("x-ratelimit-remaining", "lots")]);
        assert!(RateLimitUsage::from_headers(&unparsable).is_none());
    }

    #[test]
    fn status_paths() {
        assert_eq!(endpoints::crawl_status("abc"), "/v1/crawl/abc");
        assert_eq!(endpoints::batch_status("abc"), "/v2/batch/scrape/abc");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client =
            FirecrawlClient::new("http://localhost:3002/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:3002");
        assert_eq!(client.url(endpoints::SCRAPE), "http://localhost:3002/v1/scrape");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_failure() {
        let client =
            FirecrawlClient::new("http://127.0.0.1:1", None, Duration::from_secs(2)).unwrap();
        let err = client.get_json("/v1/crawl/x").await.unwrap_err();
        assert_eq!(err.failure_class(), FailureClass::NetworkUnavailable);
    }
}
