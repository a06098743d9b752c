//! Job status records and their state machine.
//!
//! A record is created in `processing` by the submitter and advanced only by
//! the worker that owns the job. Progress counters never go backwards and a
//! terminal record accepts no further writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::request::{JobKind, JobRequest};
use crate::kernel::event_broadcaster::ProgressSnapshot;

/// Research steps per unit of requested depth.
pub const STEPS_PER_DEPTH: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchState {
    pub query: String,
    pub current_depth: u32,
    pub max_depth: u32,
    pub completed_steps: u32,
    pub total_expected_steps: u32,
    pub findings: Vec<Value>,
    pub sources: Vec<Value>,
    pub activities: Vec<Value>,
    pub summaries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_analysis: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmsTxtState {
    pub url: String,
    pub max_urls: u32,
    pub show_full_text: bool,
    pub cache: bool,
    pub generated_text: String,
    pub full_text: String,
}

/// Kind-specific part of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobDetails {
    DeepResearch(ResearchState),
    #[serde(rename = "generate_llmstxt")]
    LlmsTxt(LlmsTxtState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub details: JobDetails,
}

/// Incremental progress reported by a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    Research {
        current_depth: u32,
        completed_steps: u32,
        /// Appended to the record
        activities: Vec<Value>,
        sources: Vec<Value>,
        findings: Vec<Value>,
        summaries: Vec<String>,
    },
    LlmsTxt {
        generated_text: String,
    },
}

/// Terminal output written on completion.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Research { final_analysis: String },
    LlmsTxt { generated_text: String, full_text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job is already {0} and cannot change")]
    AlreadyTerminal(JobStatus),

    #[error("{field} cannot decrease from {from} to {to}")]
    Regression {
        field: &'static str,
        from: u32,
        to: u32,
    },

    #[error("update does not match the job kind")]
    KindMismatch,
}

impl JobRecord {
    /// Initial `processing` record for a freshly submitted request.
    pub fn new(id: Uuid, owner_id: impl Into<String>, request: &JobRequest) -> Self {
        let now = Utc::now();
        let details = match request {
            JobRequest::DeepResearch(job) => JobDetails::DeepResearch(ResearchState {
                query: job.params.query.clone(),
                current_depth: 0,
                max_depth: job.params.max_depth,
                completed_steps: 0,
                total_expected_steps: job.params.max_depth.saturating_mul(STEPS_PER_DEPTH),
                findings: Vec::new(),
                sources: Vec::new(),
                activities: Vec::new(),
                summaries: Vec::new(),
                final_analysis: None,
            }),
            JobRequest::GenerateLlmsTxt(job) => JobDetails::LlmsTxt(LlmsTxtState {
                url: job.params.url.clone(),
                max_urls: job.params.max_urls,
                show_full_text: job.params.show_full_text.unwrap_or(false),
                cache: true,
                generated_text: String::new(),
                full_text: String::new(),
            }),
        };

        Self {
            id,
            owner_id: owner_id.into(),
            status: JobStatus::Processing,
            created_at: now,
            updated_at: now,
            error: None,
            details,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self.details {
            JobDetails::DeepResearch(_) => JobKind::DeepResearch,
            JobDetails::LlmsTxt(_) => JobKind::GenerateLlmsTxt,
        }
    }

    pub fn progress(&self) -> ProgressSnapshot {
        let (completed_steps, total_expected_steps) = match &self.details {
            JobDetails::DeepResearch(r) => (r.completed_steps, r.total_expected_steps),
            JobDetails::LlmsTxt(_) => (u32::from(self.status == JobStatus::Completed), 1),
        };
        ProgressSnapshot {
            status: self.status.as_str().to_string(),
            completed_steps,
            total_expected_steps,
        }
    }

    fn ensure_processing(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(self.status));
        }
        Ok(())
    }

    pub fn apply_progress(&mut self, update: ProgressUpdate) -> Result<(), TransitionError> {
        self.ensure_processing()?;

        match (&mut self.details, update) {
            (
                JobDetails::DeepResearch(state),
                ProgressUpdate::Research {
                    current_depth,
                    completed_steps,
                    activities,
                    sources,
                    findings,
                    summaries,
                },
            ) => {
                if current_depth < state.current_depth {
                    return Err(TransitionError::Regression {
                        field: "currentDepth",
                        from: state.current_depth,
                        to: current_depth,
                    });
                }
                if completed_steps < state.completed_steps {
                    return Err(TransitionError::Regression {
                        field: "completedSteps",
                        from: state.completed_steps,
                        to: completed_steps,
                    });
                }
                state.current_depth = current_depth;
                state.completed_steps = completed_steps;
                state.activities.extend(activities);
                state.sources.extend(sources);
                state.findings.extend(findings);
                state.summaries.extend(summaries);
            }
            (JobDetails::LlmsTxt(state), ProgressUpdate::LlmsTxt { generated_text }) => {
                state.generated_text = generated_text;
            }
            _ => return Err(TransitionError::KindMismatch),
        }

        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self, result: JobResult) -> Result<(), TransitionError> {
        self.ensure_processing()?;

        match (&mut self.details, result) {
            (JobDetails::DeepResearch(state), JobResult::Research { final_analysis }) => {
                state.completed_steps = state.completed_steps.max(state.total_expected_steps);
                state.final_analysis = Some(final_analysis);
            }
            (
                JobDetails::LlmsTxt(state),
                JobResult::LlmsTxt {
                    generated_text,
                    full_text,
                },
            ) => {
                state.generated_text = generated_text;
                state.full_text = if state.show_full_text {
                    full_text
                } else {
                    String::new()
                };
            }
            _ => return Err(TransitionError::KindMismatch),
        }

        self.status = JobStatus::Completed;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_processing()?;
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
        Ok(())
    }
}
