//! Asynchronous job lifecycle.
//!
//! Submission writes a `processing` record and queues the work; a worker
//! drives the record to a terminal status; status reads are served straight
//! from the store with an ownership check.
//!
//! # Architecture
//!
//! ```text
//! submit ─► StatusStore.set ─► WorkQueue.add ─► JobWorker ─► JobHandler
//!                 ▲                                  │
//!                 └──────── progress / terminal ─────┘
//! get_status ─► StatusStore.get ─► ownership check ─► StatusResponse
//! ```

pub mod manager;
pub mod queue;
pub mod record;
pub mod request;
pub mod store;
pub mod worker;

pub use manager::{JobError, JobLifecycleManager, StatusOutcome, StatusResponse, SubmitResponse};
pub use queue::{EnqueueOptions, EnqueueResult, MemoryWorkQueue, QueuedJob, WorkQueue};
pub use record::{
    JobDetails, JobRecord, JobResult, JobStatus, LlmsTxtState, ProgressUpdate, ResearchState,
    TransitionError,
};
pub use request::{DeepResearchJob, JobKind, JobPayload, JobRequest, LlmsTxtJob};
pub use store::{MemoryStatusStore, StatusStore};
pub use worker::{JobHandler, JobProgress, JobWorker};
