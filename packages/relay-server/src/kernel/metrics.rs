//! Rolling performance statistics for outbound operations.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exponential smoothing factor for average durations.
pub const SMOOTHING_FACTOR: f64 = 0.1;

/// Attempts retained for breakdowns.
pub const SAMPLE_CAPACITY: usize = 1000;

/// A summary is logged once per this many recorded attempts.
pub const SUMMARY_INTERVAL: u64 = 100;

/// One recorded attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptSample {
    pub operation: String,
    pub success: bool,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Fixed-capacity ring of samples. Once full, each push overwrites the
/// oldest slot.
#[derive(Debug)]
pub struct SampleRing {
    slots: Vec<AttemptSample>,
    capacity: usize,
    next: usize,
}

impl SampleRing {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    pub fn push(&mut self, sample: AttemptSample) {
        if self.slots.len() < self.capacity {
            self.slots.push(sample);
        } else {
            self.slots[self.next] = sample;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AttemptSample> {
        let split = if self.slots.len() < self.capacity {
            0
        } else {
            self.next
        };
        let (newer, older) = self.slots.split_at(split);
        older.iter().chain(newer.iter())
    }
}

/// Window a snapshot's breakdown covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    LastHour,
    LastDay,
    LastWeek,
    #[default]
    AllTime,
}

impl TimeRange {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "last_hour" => Some(Self::LastHour),
            "last_day" => Some(Self::LastDay),
            "last_week" => Some(Self::LastWeek),
            "all_time" => Some(Self::AllTime),
            _ => None,
        }
    }

    fn window(self) -> Option<chrono::Duration> {
        match self {
            Self::LastHour => Some(chrono::Duration::hours(1)),
            Self::LastDay => Some(chrono::Duration::days(1)),
            Self::LastWeek => Some(chrono::Duration::weeks(1)),
            Self::AllTime => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStats {
    pub count: u64,
    pub errors: u64,
    /// Milliseconds
    pub avg_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Milliseconds
    pub average_response_time: f64,
    pub time_range: TimeRange,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_breakdown: Option<BTreeMap<String, OperationStats>>,
}

#[derive(Debug)]
struct MetricsState {
    total: u64,
    successful: u64,
    failed: u64,
    average_ms: f64,
    samples: SampleRing,
}

/// Counters and smoothed latency across every executed attempt.
///
/// All state sits behind one mutex that is never held across an await, so
/// concurrent `record` calls from in-flight operations stay consistent.
#[derive(Debug)]
pub struct MetricsAggregator {
    state: Mutex<MetricsState>,
    started_at: DateTime<Utc>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::with_capacity(SAMPLE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MetricsState {
                total: 0,
                successful: 0,
                failed: 0,
                average_ms: 0.0,
                samples: SampleRing::with_capacity(capacity),
            }),
            started_at: Utc::now(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn record(&self, operation: &str, success: bool, duration: Duration) {
        self.record_at(operation, success, duration, Utc::now());
    }

    pub(crate) fn record_at(
        &self,
        operation: &str,
        success: bool,
        duration: Duration,
        recorded_at: DateTime<Utc>,
    ) {
        let duration_ms = duration.as_millis() as u64;
        let summary = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.total += 1;
            if success {
                state.successful += 1;
            } else {
                state.failed += 1;
            }
            state.average_ms =
                state.average_ms * (1.0 - SMOOTHING_FACTOR) + duration_ms as f64 * SMOOTHING_FACTOR;
            state.samples.push(AttemptSample {
                operation: operation.to_string(),
                success,
                duration_ms,
                recorded_at,
            });

            (state.total % SUMMARY_INTERVAL == 0)
                .then(|| (state.total, state.successful, state.failed, state.average_ms))
        };

        if let Some((total, successful, failed, average_ms)) = summary {
            tracing::info!(
                total,
                successful,
                failed,
                average_ms = %format!("{:.1}", average_ms),
                "Performance summary"
            );
        }
    }

    pub fn retained_samples(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .samples
            .len()
    }

    pub fn snapshot(&self, time_range: TimeRange, detailed: bool) -> MetricsSnapshot {
        self.snapshot_at(time_range, detailed, Utc::now())
    }

    pub(crate) fn snapshot_at(
        &self,
        time_range: TimeRange,
        detailed: bool,
        now: DateTime<Utc>,
    ) -> MetricsSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let operation_breakdown = detailed.then(|| {
            let cutoff = time_range.window().map(|w| now - w);
            let mut breakdown: BTreeMap<String, OperationStats> = BTreeMap::new();
            for sample in state
                .samples
                .iter()
                .filter(|s| cutoff.map_or(true, |c| s.recorded_at >= c))
            {
                let duration = sample.duration_ms as f64;
                let errors = u64::from(!sample.success);
                breakdown
                    .entry(sample.operation.clone())
                    .and_modify(|stats| {
                        stats.count += 1;
                        stats.errors += errors;
                        stats.avg_duration = stats.avg_duration * (1.0 - SMOOTHING_FACTOR)
                            + duration * SMOOTHING_FACTOR;
                    })
                    .or_insert(OperationStats {
                        count: 1,
                        errors,
                        avg_duration: duration,
                    });
            }
            breakdown
        });

        MetricsSnapshot {
            total_requests: state.total,
            successful_requests: state.successful,
            failed_requests: state.failed,
            average_response_time: state.average_ms,
            time_range,
            timestamp: now,
            operation_breakdown,
        }
    }
}
