//! Error types for the Firecrawl client.

use thiserror::Error;

/// Result type for Firecrawl client operations.
pub type Result<T> = std::result::Result<T, FirecrawlError>;

/// How a failed call should be treated by whoever retries it.
///
/// The client never retries on its own; it only reports what kind of
/// failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Remote answered 429.
    RateLimited,
    /// Remote answered 5xx.
    ServerFault,
    /// Connection refused, DNS failure, timeout or a dropped connection.
    NetworkUnavailable,
    /// Remote answered 401.
    Unauthorized,
    /// Remote answered 403.
    Forbidden,
    /// Remote answered 404.
    NotFound,
    /// Any other 4xx, a bad local configuration, or a body we could not decode.
    Rejected,
}

impl FailureClass {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureClass::RateLimited | FailureClass::ServerFault | FailureClass::NetworkUnavailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::RateLimited => "rate_limited",
            FailureClass::ServerFault => "server_fault",
            FailureClass::NetworkUnavailable => "network_unavailable",
            FailureClass::Unauthorized => "unauthorized",
            FailureClass::Forbidden => "forbidden",
            FailureClass::NotFound => "not_found",
            FailureClass::Rejected => "rejected",
        }
    }
}

/// Firecrawl client errors.
#[derive(Debug, Clone, Error)]
pub enum FirecrawlError {
    /// Configuration error (unusable API key, client could not be built)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Nothing is listening at the configured base URL
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Host name could not be resolved
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    /// The attempt exceeded the client timeout
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Any other transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response
    #[error("Firecrawl API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body was not the JSON we expected
    #[error("Parse error: {0}")]
    Parse(String),
}

impl FirecrawlError {
    /// Classify this error for retry decisions.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            FirecrawlError::Api { status, .. } => match *status {
                429 => FailureClass::RateLimited,
                401 => FailureClass::Unauthorized,
                403 => FailureClass::Forbidden,
                404 => FailureClass::NotFound,
                s if s >= 500 => FailureClass::ServerFault,
                _ => FailureClass::Rejected,
            },
            FirecrawlError::ConnectionRefused(_)
            | FirecrawlError::Dns(_)
            | FirecrawlError::Timeout { .. }
            | FirecrawlError::Network(_) => FailureClass::NetworkUnavailable,
            FirecrawlError::Config(_) | FirecrawlError::Parse(_) => FailureClass::Rejected,
        }
    }

    /// HTTP status of the remote response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FirecrawlError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Map a transport-level reqwest failure.
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            return FirecrawlError::Timeout { timeout_ms };
        }
        if err.is_decode() {
            return FirecrawlError::Parse(err.to_string());
        }
        if err.is_connect() {
            let chain = error_chain(&err);
            if chain.contains("dns") || chain.contains("failed to lookup") {
                return FirecrawlError::Dns(err.to_string());
            }
            return FirecrawlError::ConnectionRefused(err.to_string());
        }
        FirecrawlError::Network(err.to_string())
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string().to_lowercase();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string().to_lowercase());
        source = inner.source();
    }
    out
}

/// Pull the remote `error` message out of a response body, falling back to
/// the raw text, then to a generic message for the status.
pub(crate) fn remote_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = value.get("error").and_then(|e| e.as_str()) {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    match status {
        429 => "Too many requests".to_string(),
        s if s >= 500 => "Internal server error".to_string(),
        _ => format!("HTTP {}", status),
    }
}
