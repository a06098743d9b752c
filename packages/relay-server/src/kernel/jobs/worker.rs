//! Background execution of queued jobs.
//!
//! The `JobWorker` is the only writer of a job record after submission:
//!
//! ```text
//! JobWorker
//!     │
//!     ├─► Receive (jobId, payload) from the queue
//!     ├─► Skip if the record is missing or already terminal
//!     ├─► JobHandler.run(payload, JobProgress)
//!     │       └─► JobProgress.update(...)  (monotonic progress writes)
//!     └─► complete(result) or fail(error)  (single terminal transition)
//! ```
//!
//! Every write is published on the broadcaster with the job id as the
//! operation id, so subscribers can follow a job without polling.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use super::manager::JobError;
use super::queue::QueuedJob;
use super::record::{JobRecord, JobResult, JobStatus, ProgressUpdate, TransitionError};
use super::request::{JobKind, JobPayload};
use super::store::StatusStore;
use crate::kernel::event_broadcaster::{EventBroadcaster, EventPayload};

/// The engine that actually performs a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, payload: &JobPayload, progress: &JobProgress) -> Result<JobResult>;
}

/// Write handle for one job's record, given to its handler.
pub struct JobProgress {
    job_id: Uuid,
    kind: JobKind,
    store: Arc<dyn StatusStore>,
    broadcaster: Arc<EventBroadcaster>,
    record_ttl: Duration,
}

impl JobProgress {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Apply a progress update. Fails if the update would move a counter
    /// backwards or the job is already terminal.
    pub async fn update(&self, update: ProgressUpdate) -> Result<JobRecord, JobError> {
        self.transition(|record| record.apply_progress(update)).await
    }

    async fn complete(&self, result: JobResult) -> Result<JobRecord, JobError> {
        self.transition(|record| record.complete(result)).await
    }

    async fn fail(&self, message: String) -> Result<JobRecord, JobError> {
        self.transition(|record| record.fail(message)).await
    }

    async fn load(&self) -> Result<JobRecord, JobError> {
        self.store
            .get(self.job_id)
            .await
            .map_err(|e| JobError::Lookup {
                job_id: self.job_id,
                message: format!("{:#}", e),
            })?
            .ok_or(JobError::Missing {
                job_id: self.job_id,
            })
    }

    async fn transition<F>(&self, apply: F) -> Result<JobRecord, JobError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), TransitionError>,
    {
        let mut record = self.load().await?;
        apply(&mut record).map_err(|source| JobError::Transition {
            job_id: self.job_id,
            source,
        })?;
        self.store
            .set(&record, self.record_ttl)
            .await
            .map_err(|e| JobError::Store {
                job_id: self.job_id,
                message: format!("{:#}", e),
            })?;

        self.broadcaster.publish(
            &self.job_id.to_string(),
            EventPayload::progress(self.kind.as_str(), record.progress()),
        );
        Ok(record)
    }
}

pub struct JobWorker {
    store: Arc<dyn StatusStore>,
    broadcaster: Arc<EventBroadcaster>,
    handler: Arc<dyn JobHandler>,
    record_ttl: Duration,
}

impl JobWorker {
    pub fn new(
        store: Arc<dyn StatusStore>,
        broadcaster: Arc<EventBroadcaster>,
        handler: Arc<dyn JobHandler>,
        record_ttl: Duration,
    ) -> Self {
        Self {
            store,
            broadcaster,
            handler,
            record_ttl,
        }
    }

    /// Execute one delivered job and return the status it ended in.
    ///
    /// Redelivery of a job that already reached a terminal status is a no-op.
    pub async fn process(&self, job: QueuedJob) -> Result<JobStatus, JobError> {
        let kind = job.payload.request.kind();
        let progress = JobProgress {
            job_id: job.job_id,
            kind,
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
            record_ttl: self.record_ttl,
        };

        let record = progress.load().await?;
        if record.status.is_terminal() {
            tracing::debug!(job_id = %job.job_id, status = %record.status, "Skipping finished job");
            return Ok(record.status);
        }

        let operation_id = job.job_id.to_string();
        self.broadcaster
            .publish(&operation_id, EventPayload::started(kind.as_str(), 1));
        tracing::info!(job_id = %job.job_id, kind = kind.as_str(), "Job started");

        let started = Instant::now();
        let outcome = self.handler.run(&job.payload, &progress).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        // A rejected completion still has to leave the record terminal.
        let completion = match outcome {
            Ok(result) => progress.complete(result).await.map_err(|e| {
                tracing::warn!(
                    job_id = %job.job_id,
                    error = %e,
                    "Completion rejected, failing job"
                );
                e.to_string()
            }),
            Err(e) => Err(format!("{:#}", e)),
        };

        match completion {
            Ok(record) => {
                self.broadcaster
                    .publish(&operation_id, EventPayload::completed(kind.as_str(), duration_ms));
                tracing::info!(job_id = %job.job_id, duration_ms, "Job completed");
                Ok(record.status)
            }
            Err(message) => {
                let record = progress.fail(message.clone()).await?;
                self.broadcaster.publish(
                    &operation_id,
                    EventPayload::failed(kind.as_str(), 1, message.as_str(), duration_ms),
                );
                tracing::error!(job_id = %job.job_id, duration_ms, error = %message, "Job failed");
                Ok(record.status)
            }
        }
    }

    /// Drain the queue until every sender is gone.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<QueuedJob>) {
        while let Some(job) = rx.recv().await {
            let job_id = job.job_id;
            if let Err(e) = self.process(job).await {
                tracing::error!(job_id = %job_id, error = %e, "Job processing error");
            }
        }
        tracing::info!("Job queue closed, worker stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::event_broadcaster::{OperationEventType, SubscriptionFilter};
    use crate::kernel::jobs::record::JobDetails;
    use crate::kernel::jobs::request::{DeepResearchJob, JobRequest};
    use crate::kernel::jobs::store::MemoryStatusStore;
    use crate::kernel::test_dependencies::CollectingSink;

    struct StepsThenAnswer;

    #[async_trait]
    impl JobHandler for StepsThenAnswer {
        async fn run(&self, _payload: &JobPayload, progress: &JobProgress) -> Result<JobResult> {
            for steps in [2, 5] {
                progress
                    .update(ProgressUpdate::Research {
                        current_depth: 1,
                        completed_steps: steps,
                        activities: vec![serde_json::json!({"type": "analyze"})],
                        sources: Vec::new(),
                        findings: Vec::new(),
                        summaries: Vec::new(),
                    })
                    .await?;
            }
            Ok(JobResult::Research {
                final_analysis: "answer".into(),
            })
        }
    }

    async fn seeded(store: &MemoryStatusStore) -> QueuedJob {
        let job_id = Uuid::new_v4();
        let request = JobRequest::DeepResearch(DeepResearchJob::new("q").max_depth(1));
        store
            .set(&JobRecord::new(job_id, "team-a", &request), Duration::from_secs(60))
            .await
            .unwrap();
        QueuedJob {
            job_id,
            payload: JobPayload {
                request,
                owner_id: "team-a".into(),
                job_id,
            },
        }
    }

    #[tokio::test]
    async fn handler_progress_and_completion_are_persisted_and_published() {
        let store = Arc::new(MemoryStatusStore::new());
        let broadcaster = Arc::new(EventBroadcaster::new());
        let sink = CollectingSink::new();
        let job = seeded(&store).await;
        broadcaster.subscribe(
            "watcher",
            SubscriptionFilter::operations([job.job_id.to_string()]),
            sink.clone(),
        );

        let worker = JobWorker::new(
            store.clone(),
            broadcaster,
            Arc::new(StepsThenAnswer),
            Duration::from_secs(60),
        );
        let job_id = job.job_id;
        assert_eq!(worker.process(job).await.unwrap(), JobStatus::Completed);

        let record = store.get(job_id).await.unwrap().unwrap();
        let JobDetails::DeepResearch(state) = record.details else {
            panic!("expected research details");
        };
        assert_eq!(state.completed_steps, 5);
        assert_eq!(state.activities.len(), 2);
        assert_eq!(state.final_analysis.as_deref(), Some("answer"));

        assert_eq!(
            sink.event_types(),
            vec![
                OperationEventType::OperationStarted,
                OperationEventType::ProgressUpdate,
                OperationEventType::ProgressUpdate,
                OperationEventType::ProgressUpdate,
                OperationEventType::OperationCompleted,
            ]
        );
    }

    struct WrongKind;

    #[async_trait]
    impl JobHandler for WrongKind {
        async fn run(&self, _payload: &JobPayload, _progress: &JobProgress) -> Result<JobResult> {
            Ok(JobResult::LlmsTxt {
                generated_text: "# site".into(),
                full_text: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn rejected_completion_fails_the_job() {
        let store = Arc::new(MemoryStatusStore::new());
        let broadcaster = Arc::new(EventBroadcaster::new());
        let sink = CollectingSink::new();
        let job = seeded(&store).await;
        broadcaster.subscribe(
            "watcher",
            SubscriptionFilter::operations([job.job_id.to_string()]),
            sink.clone(),
        );

        let worker = JobWorker::new(
            store.clone(),
            broadcaster,
            Arc::new(WrongKind),
            Duration::from_secs(60),
        );
        let job_id = job.job_id;
        assert_eq!(worker.process(job).await.unwrap(), JobStatus::Failed);

        let record = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record
            .error
            .as_deref()
            .unwrap()
            .contains("does not match the job kind"));
        assert_eq!(
            sink.event_types().last(),
            Some(&OperationEventType::OperationFailed)
        );
    }
}
