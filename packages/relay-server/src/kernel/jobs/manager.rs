//! Job submission and status reads.
//!
//! The manager writes the initial record and hands the job to the queue.
//! After that only the worker advances the record; the read path here is
//! independent of the write path and never mutates.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::queue::{EnqueueOptions, WorkQueue};
use super::record::{JobRecord, JobStatus, TransitionError};
use super::request::{JobKind, JobPayload, JobRequest};
use super::store::StatusStore;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to record job {job_id}: {message}")]
    Store { job_id: Uuid, message: String },

    /// The record exists in `processing` but nothing will ever pick it up.
    #[error("job {job_id} was recorded but could not be queued: {message}")]
    Enqueue { job_id: Uuid, message: String },

    #[error("failed to read job {job_id}: {message}")]
    Lookup { job_id: Uuid, message: String },

    #[error("job {job_id} has no status record")]
    Missing { job_id: Uuid },

    #[error("job {job_id} rejected update: {source}")]
    Transition {
        job_id: Uuid,
        #[source]
        source: TransitionError,
    },
}

/// Outcome of a status read.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    Found(JobRecord),
    NotFound,
    Forbidden,
}

/// Wire shape of a status read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusResponse {
    Found {
        success: bool,
        status: JobStatus,
        data: JobRecord,
    },
    Error {
        success: bool,
        error: String,
        #[serde(skip)]
        code: u16,
    },
}

impl StatusResponse {
    pub fn new(kind: JobKind, outcome: Result<StatusOutcome, JobError>) -> Self {
        match outcome {
            Ok(StatusOutcome::Found(record)) => StatusResponse::Found {
                success: true,
                status: record.status,
                data: record,
            },
            Ok(StatusOutcome::NotFound) => Self::error(404, kind.not_found_message()),
            Ok(StatusOutcome::Forbidden) => Self::error(403, "Access denied"),
            Err(_) => Self::error(500, kind.lookup_failed_message()),
        }
    }

    fn error(code: u16, message: &str) -> Self {
        StatusResponse::Error {
            success: false,
            error: message.to_string(),
            code,
        }
    }

    /// HTTP status this response corresponds to.
    pub fn http_status(&self) -> u16 {
        match self {
            StatusResponse::Found { .. } => 200,
            StatusResponse::Error { code, .. } => *code,
        }
    }
}

/// Acknowledgement returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub id: Uuid,
}

impl SubmitResponse {
    pub fn accepted(id: Uuid) -> Self {
        Self { success: true, id }
    }
}

pub struct JobLifecycleManager {
    store: Arc<dyn StatusStore>,
    queue: Arc<dyn WorkQueue>,
    record_ttl: Duration,
}

impl JobLifecycleManager {
    pub fn new(
        store: Arc<dyn StatusStore>,
        queue: Arc<dyn WorkQueue>,
        record_ttl: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            record_ttl,
        }
    }

    /// Record a new job in `processing` and queue it for a worker.
    ///
    /// Exactly one store write followed by one enqueue. If the enqueue fails
    /// the record is left in place and [`JobError::Enqueue`] names the orphan.
    pub async fn submit(&self, owner_id: &str, request: JobRequest) -> Result<Uuid, JobError> {
        let job_id = Uuid::new_v4();
        let kind = request.kind();
        let record = JobRecord::new(job_id, owner_id, &request);

        self.store
            .set(&record, self.record_ttl)
            .await
            .map_err(|e| JobError::Store {
                job_id,
                message: format!("{:#}", e),
            })?;

        let payload = JobPayload {
            request,
            owner_id: owner_id.to_string(),
            job_id,
        };
        match self
            .queue
            .add(job_id, payload, EnqueueOptions::with_job_id(job_id))
            .await
        {
            Ok(result) => {
                tracing::info!(
                    job_id = %job_id,
                    kind = kind.as_str(),
                    owner_id,
                    created = result.is_created(),
                    "Job submitted"
                );
                Ok(job_id)
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    kind = kind.as_str(),
                    error = %e,
                    "Job recorded as processing but never queued"
                );
                Err(JobError::Enqueue {
                    job_id,
                    message: format!("{:#}", e),
                })
            }
        }
    }

    /// Read a job for `requesting_owner`. Ownership is checked before any
    /// record content leaves this function. A record of a different kind
    /// reads as absent.
    pub async fn get_status(
        &self,
        kind: JobKind,
        job_id: Uuid,
        requesting_owner: &str,
    ) -> Result<StatusOutcome, JobError> {
        let record = self
            .store
            .get(job_id)
            .await
            .map_err(|e| JobError::Lookup {
                job_id,
                message: format!("{:#}", e),
            })?;

        let Some(record) = record.filter(|r| r.kind() == kind) else {
            return Ok(StatusOutcome::NotFound);
        };
        if record.owner_id != requesting_owner {
            tracing::warn!(job_id = %job_id, requesting_owner, "Status read denied");
            return Ok(StatusOutcome::Forbidden);
        }
        Ok(StatusOutcome::Found(record))
    }

    /// Status read rendered as its wire response. Store failures become the
    /// 500-equivalent response.
    pub async fn status_response(
        &self,
        kind: JobKind,
        job_id: Uuid,
        requesting_owner: &str,
    ) -> StatusResponse {
        let outcome = self.get_status(kind, job_id, requesting_owner).await;
        if let Err(e) = &outcome {
            tracing::error!(job_id = %job_id, error = %e, "Status read failed");
        }
        StatusResponse::new(kind, outcome)
    }
}
