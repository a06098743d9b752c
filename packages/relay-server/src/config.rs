use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::retry::RetryPolicy;

const DEFAULT_API_URL: &str = "http://localhost:3002";

/// Relay configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_key: Option<String>,
    pub is_cloud: bool,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub retry_max_delay: Duration,
    /// Fraction of the remote rate limit above which usage is logged as a warning
    pub credit_warning_threshold: f64,
    pub job_ttl: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Several variable names are accepted for compatibility with older setups.
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| lookup(*k).filter(|v| !v.trim().is_empty()))
        };

        let api_key = first(&["FIRECRAWL_API_KEY", "FIRECRAWL_API_TOKEN", "FC_API_KEY"]);
        let api_url = first(&["FIRECRAWL_API_URL", "FIRECRAWL_BASE_URL", "FC_BASE_URL"])
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let is_cloud = api_url.contains("firecrawl.dev") || api_url.contains("api.firecrawl");

        let timeout_ms: u64 = parse_or(&lookup, "FIRECRAWL_TIMEOUT", 60_000)?;
        let retry_attempts: u32 = parse_or(&lookup, "FIRECRAWL_RETRY_ATTEMPTS", 3)?;
        let retry_delay_ms: u64 = parse_or(&lookup, "FIRECRAWL_RETRY_DELAY", 1_000)?;
        let retry_max_delay_ms: u64 = parse_or(&lookup, "FIRECRAWL_RETRY_MAX_DELAY", 10_000)?;
        let credit_warning_threshold: f64 = parse_or(&lookup, "FIRECRAWL_CREDIT_WARNING", 0.8)?;
        let job_ttl_secs: u64 = parse_or(&lookup, "RELAY_JOB_TTL_SECS", 6 * 60 * 60)?;

        if !(credit_warning_threshold > 0.0 && credit_warning_threshold <= 1.0) {
            bail!(
                "FIRECRAWL_CREDIT_WARNING must be in (0, 1], got {}",
                credit_warning_threshold
            );
        }
        if retry_max_delay_ms < retry_delay_ms {
            bail!(
                "FIRECRAWL_RETRY_MAX_DELAY ({}ms) must not be below FIRECRAWL_RETRY_DELAY ({}ms)",
                retry_max_delay_ms,
                retry_delay_ms
            );
        }

        Ok(Self {
            api_url,
            api_key,
            is_cloud,
            timeout: Duration::from_millis(timeout_ms),
            retry_attempts,
            retry_delay: Duration::from_millis(retry_delay_ms),
            retry_max_delay: Duration::from_millis(retry_max_delay_ms),
            credit_warning_threshold,
            job_ttl: Duration::from_secs(job_ttl_secs),
        })
    }

    /// Retry policy for outbound calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.retry_attempts)
            .base_delay(self.retry_delay)
            .max_delay(self.retry_max_delay)
            .build()
    }

    pub fn deployment_label(&self) -> &'static str {
        if self.is_cloud {
            "Cloud"
        } else {
            "Self-hosted"
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number, got {:?}", key, raw)),
        _ => Ok(default),
    }
}
