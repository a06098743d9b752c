// Test doubles - in-memory implementations for tests
//
// Provides fakes that can be injected into RelayKernel in place of the
// remote Firecrawl service and live event subscribers.

use async_trait::async_trait;
use firecrawl_client::{FirecrawlError, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::event_broadcaster::{EventSink, OperationEvent, OperationEventType, SinkError};
use super::BaseFirecrawl;

// =============================================================================
// Mock Firecrawl
// =============================================================================

/// One request the mock received
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub path: String,
    pub body: Option<Value>,
}

/// Scripted stand-in for the remote service.
///
/// Responses are handed out in the order they were queued. Once the script is
/// exhausted every call answers with `{"success": true}`.
#[derive(Default)]
pub struct MockFirecrawl {
    responses: Mutex<VecDeque<Result<Value>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockFirecrawl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, body: Value) -> Self {
        self.push(Ok(body));
        self
    }

    pub fn with_error(self, err: FirecrawlError) -> Self {
        self.push(Err(err));
        self
    }

    /// Queue the same error `times` times
    pub fn with_errors(self, err: FirecrawlError, times: usize) -> Self {
        for _ in 0..times {
            self.push(Err(err.clone()));
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn push(&self, response: Result<Value>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    fn answer(&self, call: RecordedCall) -> Result<Value> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Ok(serde_json::json!({ "success": true })))
    }
}

#[async_trait]
impl BaseFirecrawl for MockFirecrawl {
    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.answer(RecordedCall {
            method: "POST",
            path: path.to_string(),
            body: Some(body.clone()),
        })
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.answer(RecordedCall {
            method: "GET",
            path: path.to_string(),
            body: None,
        })
    }
}

// =============================================================================
// Event sinks
// =============================================================================

/// Records every event it receives.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<OperationEvent>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<OperationEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn event_types(&self) -> Vec<OperationEventType> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.payload.event_type)
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn write(&self, event: &OperationEvent) -> std::result::Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Fails every write, like a client whose connection has gone away.
pub struct FailingSink;

impl EventSink for FailingSink {
    fn write(&self, _event: &OperationEvent) -> std::result::Result<(), SinkError> {
        Err(SinkError::Write("connection reset".into()))
    }
}
