//! Work queue seam.
//!
//! The queue is expected to give at-least-once delivery keyed by job id. A
//! job id that was already accepted is reported as a duplicate and not
//! dispatched again.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::request::JobPayload;

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Job was enqueued
    Created(Uuid),
    /// Job id already accepted (idempotency hit)
    Duplicate(Uuid),
}

impl EnqueueResult {
    /// Get the job ID regardless of whether it was created or duplicate
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    /// Returns true if this was a newly created job
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Deduplication key. Falls back to the job name when unset.
    pub job_id: Option<Uuid>,
}

impl EnqueueOptions {
    pub fn with_job_id(job_id: Uuid) -> Self {
        Self {
            job_id: Some(job_id),
        }
    }
}

/// A job as handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub payload: JobPayload,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn add(
        &self,
        job_id: Uuid,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult>;
}

/// In-process queue over an unbounded channel.
///
/// The receiving half is taken once by the worker with [`take_receiver`].
///
/// [`take_receiver`]: MemoryWorkQueue::take_receiver
pub struct MemoryWorkQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedJob>>>,
    accepted: Mutex<HashSet<Uuid>>,
    enqueued: Mutex<Vec<Uuid>>,
    fail: AtomicBool,
}

impl Default for MemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            accepted: Mutex::new(HashSet::new()),
            enqueued: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<QueuedJob>> {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Job ids dispatched so far, in order.
    pub fn enqueued(&self) -> Vec<Uuid> {
        self.enqueued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make every subsequent `add` fail, as an unreachable broker would.
    pub fn fail_enqueues(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn add(
        &self,
        job_id: Uuid,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("work queue unavailable");
        }

        let key = options.job_id.unwrap_or(job_id);
        if !self
            .accepted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key)
        {
            tracing::debug!(job_id = %key, "Job already queued");
            return Ok(EnqueueResult::Duplicate(key));
        }

        if self.tx.send(QueuedJob { job_id, payload }).is_err() {
            self.accepted
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
            bail!("work queue closed");
        }
        self.enqueued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job_id);
        Ok(EnqueueResult::Created(key))
    }
}
