//! In-process fan-out hub for operation lifecycle events.
//!
//! Every live subscriber owns a sink. `publish` writes the event to each
//! matching sink in turn; a sink that fails is dropped from the registry and
//! the remaining subscribers still receive the event. Delivery is
//! fire-and-forget: events published while nobody listens are gone.
//!
//! # Usage
//!
//! Producers (the retrying executor, job workers):
//!   broadcaster.publish("crawl_123", EventPayload::started("crawl", 1));
//!
//! Consumers (SSE endpoints, stdio subscriptions):
//!   let (sink, rx) = ChannelSink::bounded(64);
//!   broadcaster.subscribe("client_1", SubscriptionFilter::all(), Arc::new(sink));

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationEventType {
    OperationStarted,
    OperationCompleted,
    OperationFailed,
    ProgressUpdate,
}

impl OperationEventType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "operation_started" | "started" => Some(Self::OperationStarted),
            "operation_completed" | "completed" => Some(Self::OperationCompleted),
            "operation_failed" | "failed" => Some(Self::OperationFailed),
            "progress_update" | "progress" => Some(Self::ProgressUpdate),
            _ => None,
        }
    }
}

/// Job progress carried by `progress_update` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub status: String,
    pub completed_steps: u32,
    pub total_expected_steps: u32,
}

/// Event body supplied by the publisher. The broadcaster stamps the
/// operation id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub event_type: OperationEventType,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSnapshot>,
}

impl EventPayload {
    fn new(event_type: OperationEventType, operation: &str) -> Self {
        Self {
            event_type,
            operation: operation.to_string(),
            attempt: None,
            duration: None,
            success: None,
            error: None,
            progress: None,
        }
    }

    pub fn started(operation: &str, attempt: u32) -> Self {
        Self {
            attempt: Some(attempt),
            ..Self::new(OperationEventType::OperationStarted, operation)
        }
    }

    pub fn completed(operation: &str, duration_ms: u64) -> Self {
        Self {
            duration: Some(duration_ms),
            success: Some(true),
            ..Self::new(OperationEventType::OperationCompleted, operation)
        }
    }

    pub fn failed(
        operation: &str,
        attempt: u32,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            attempt: Some(attempt),
            duration: Some(duration_ms),
            success: Some(false),
            error: Some(error.into()),
            ..Self::new(OperationEventType::OperationFailed, operation)
        }
    }

    pub fn progress(operation: &str, progress: ProgressSnapshot) -> Self {
        Self {
            progress: Some(progress),
            ..Self::new(OperationEventType::ProgressUpdate, operation)
        }
    }
}

/// What subscribers receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationEvent {
    pub operation_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("subscriber disconnected")]
    Closed,
    #[error("subscriber is not keeping up")]
    Full,
    #[error("write failed: {0}")]
    Write(String),
}

/// Write end of one subscriber.
///
/// `write` must not block; a sink that cannot accept the event right now
/// returns an error and is removed.
pub trait EventSink: Send + Sync {
    fn write(&self, event: &OperationEvent) -> Result<(), SinkError>;
}

/// Sink backed by a bounded tokio channel. The receiver half is handed to
/// whatever streams events out (an SSE response, a log drain).
pub struct ChannelSink {
    tx: mpsc::Sender<OperationEvent>,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<OperationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn write(&self, event: &OperationEvent) -> Result<(), SinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Which events a subscriber wants. Empty sets match everything.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub operation_ids: HashSet<String>,
    pub event_types: HashSet<OperationEventType>,
}

impl SubscriptionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn operations<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operation_ids: ids.into_iter().map(Into::into).collect(),
            event_types: HashSet::new(),
        }
    }

    pub fn with_event_types<I>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = OperationEventType>,
    {
        self.event_types = types.into_iter().collect();
        self
    }

    fn matches(&self, operation_id: &str, event_type: OperationEventType) -> bool {
        (self.operation_ids.is_empty() || self.operation_ids.contains(operation_id))
            && (self.event_types.is_empty() || self.event_types.contains(&event_type))
    }
}

struct Subscriber {
    filter: SubscriptionFilter,
    sink: Arc<dyn EventSink>,
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub removed: usize,
}

/// Registry of live subscribers.
///
/// Thread-safe; share it behind an `Arc`. The registry lock is only held to
/// snapshot or edit the map, never while a sink is being written.
pub struct EventBroadcaster {
    subscribers: RwLock<HashMap<String, Subscriber>>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `sink` under `subscriber_id`, replacing any previous
    /// registration with the same id.
    pub fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        filter: SubscriptionFilter,
        sink: Arc<dyn EventSink>,
    ) {
        let subscriber_id = subscriber_id.into();
        tracing::info!(subscriber_id = %subscriber_id, "Event subscriber connected");
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(subscriber_id, Subscriber { filter, sink });
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(subscriber_id)
            .is_some();
        if removed {
            tracing::info!(subscriber_id, "Event subscriber disconnected");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_subscribed(&self, subscriber_id: &str) -> bool {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(subscriber_id)
    }

    /// Deliver an event to every matching subscriber.
    pub fn publish(&self, operation_id: &str, payload: EventPayload) -> PublishReport {
        let event = OperationEvent {
            operation_id: operation_id.to_string(),
            timestamp: Utc::now(),
            payload,
        };

        let targets: Vec<(String, Arc<dyn EventSink>)> = {
            let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            subscribers
                .iter()
                .filter(|(_, s)| s.filter.matches(operation_id, event.payload.event_type))
                .map(|(id, s)| (id.clone(), Arc::clone(&s.sink)))
                .collect()
        };

        let mut report = PublishReport::default();
        let mut failed = Vec::new();
        for (subscriber_id, sink) in targets {
            match sink.write(&event) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        subscriber_id = %subscriber_id,
                        operation_id,
                        error = %e,
                        "Failed to deliver event, dropping subscriber"
                    );
                    failed.push((subscriber_id, sink));
                }
            }
        }

        if !failed.is_empty() {
            // Only drop the registration that failed; the id may have re-subscribed meanwhile.
            let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            for (subscriber_id, sink) in &failed {
                let same = subscribers
                    .get(subscriber_id)
                    .is_some_and(|current| Arc::ptr_eq(&current.sink, sink));
                if same {
                    subscribers.remove(subscriber_id);
                    report.removed += 1;
                }
            }
        }

        report
    }
}
