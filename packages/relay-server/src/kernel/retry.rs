//! Classification-driven retry for outbound calls.
//!
//! [`RetryingExecutor::execute`] runs one operation as a sequence of attempts.
//! Every attempt is timed, recorded in the [`MetricsAggregator`] and, when the
//! caller supplies an operation id, reported on the [`EventBroadcaster`].
//! Failures are classified: rate limits, server faults and network trouble
//! back off and try again while budget remains; anything else returns at once.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use firecrawl_client::{FailureClass, FirecrawlError};
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use super::event_broadcaster::{EventBroadcaster, EventPayload};
use super::metrics::MetricsAggregator;

/// Backoff configuration.
///
/// The delay before retry `k` (0-indexed) is
/// `min(base_delay * backoff_multiplier^k, max_delay)`.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[builder(default = 3)]
    pub max_retries: u32,
    #[builder(default = Duration::from_secs(1))]
    pub base_delay: Duration,
    #[builder(default = Duration::from_secs(10))]
    pub max_delay: Duration,
    #[builder(default = 2.0)]
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// A multiplier below 1 (or NaN) is treated as 1, so delays never shrink.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let growth = self.backoff_multiplier.max(1.0).powi(exponent);
        let scaled = self.base_delay.as_millis() as f64 * growth;
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Total attempts `execute` will make at most.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// An error that knows how it should be retried.
pub trait ClassifiedError: Display {
    fn failure_class(&self) -> FailureClass;
}

impl ClassifiedError for FirecrawlError {
    fn failure_class(&self) -> FailureClass {
        FirecrawlError::failure_class(self)
    }
}

pub struct RetryingExecutor {
    policy: RetryPolicy,
    broadcaster: Arc<EventBroadcaster>,
    metrics: Arc<MetricsAggregator>,
}

impl RetryingExecutor {
    pub fn new(
        policy: RetryPolicy,
        broadcaster: Arc<EventBroadcaster>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            policy,
            broadcaster,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is spent. The last error is returned unchanged.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation_name: &str,
        operation_id: Option<&str>,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifiedError,
    {
        if let Some(id) = operation_id {
            self.broadcaster
                .publish(id, EventPayload::started(operation_name, 1));
        }

        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            let outcome = operation().await;
            let elapsed = started.elapsed();
            let duration_ms = elapsed.as_millis() as u64;

            let err = match outcome {
                Ok(value) => {
                    self.metrics.record(operation_name, true, elapsed);
                    if let Some(id) = operation_id {
                        self.broadcaster
                            .publish(id, EventPayload::completed(operation_name, duration_ms));
                    }
                    tracing::info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        duration_ms,
                        "Operation completed"
                    );
                    return Ok(value);
                }
                Err(err) => err,
            };

            self.metrics.record(operation_name, false, elapsed);
            let message = err.to_string();
            if let Some(id) = operation_id {
                self.broadcaster.publish(
                    id,
                    EventPayload::failed(
                        operation_name,
                        attempt + 1,
                        message.as_str(),
                        duration_ms,
                    ),
                );
            }
            if message.to_lowercase().contains("credit") {
                tracing::warn!(operation = operation_name, "Credit usage warning: {}", message);
            }

            let class = err.failure_class();
            if !class.is_retryable() {
                tracing::error!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    class = class.as_str(),
                    "Operation failed: {}",
                    message
                );
                return Err(err);
            }
            if attempt >= self.policy.max_retries {
                tracing::error!(
                    operation = operation_name,
                    attempts = attempt + 1,
                    "Operation failed after {} attempts: {}",
                    attempt + 1,
                    message
                );
                return Err(err);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            let delay_ms = delay.as_millis() as u64;
            if class == FailureClass::RateLimited {
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    "Rate limit exceeded, retrying in {}ms",
                    delay_ms
                );
            } else {
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    class = class.as_str(),
                    "Attempt {} failed, retrying in {}ms: {}",
                    attempt + 1,
                    delay_ms,
                    message
                );
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
