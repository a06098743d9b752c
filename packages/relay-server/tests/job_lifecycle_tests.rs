//! Integration tests for job submission, background execution and status reads.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use common::TestHarness;
use relay_core::kernel::jobs::{
    DeepResearchJob, JobDetails, JobError, JobHandler, JobKind, JobPayload, JobProgress,
    JobRequest, JobResult, JobStatus, LlmsTxtJob, ProgressUpdate, QueuedJob, StatusOutcome,
};
use relay_core::kernel::{CollectingSink, MockFirecrawl, OperationEventType, SubscriptionFilter};
use uuid::Uuid;

// =============================================================================
// Test Helpers
// =============================================================================

fn research(query: &str, max_depth: u32) -> JobRequest {
    JobRequest::DeepResearch(DeepResearchJob::new(query).max_depth(max_depth))
}

async fn next_job(harness: &TestHarness) -> QueuedJob {
    let mut rx = harness
        .kernel
        .work_queue
        .take_receiver()
        .expect("receiver available");
    rx.recv().await.expect("job queued")
}

/// Reports each depth, then answers.
struct DepthByDepth;

#[async_trait]
impl JobHandler for DepthByDepth {
    async fn run(&self, payload: &JobPayload, progress: &JobProgress) -> Result<JobResult> {
        let JobRequest::DeepResearch(job) = &payload.request else {
            bail!("not a research job");
        };
        for depth in 1..=job.params.max_depth {
            progress
                .update(ProgressUpdate::Research {
                    current_depth: depth,
                    completed_steps: depth * 5,
                    activities: vec![serde_json::json!({"type": "search", "depth": depth})],
                    sources: vec![
                        serde_json::json!({"url": format!("https://example.com/{}", depth)}),
                    ],
                    findings: Vec::new(),
                    summaries: vec![format!("depth {} done", depth)],
                })
                .await?;
        }
        Ok(JobResult::Research {
            final_analysis: format!("analysis of {}", job.params.query),
        })
    }
}

struct Unreachable;

#[async_trait]
impl JobHandler for Unreachable {
    async fn run(&self, _payload: &JobPayload, _progress: &JobProgress) -> Result<JobResult> {
        bail!("research engine unreachable")
    }
}

struct Generator;

#[async_trait]
impl JobHandler for Generator {
    async fn run(&self, _payload: &JobPayload, progress: &JobProgress) -> Result<JobResult> {
        progress
            .update(ProgressUpdate::LlmsTxt {
                generated_text: "# partial".into(),
            })
            .await?;
        Ok(JobResult::LlmsTxt {
            generated_text: "# example.com".into(),
            full_text: "# example.com\n\nfull".into(),
        })
    }
}

// =============================================================================
// Submission and status reads
// =============================================================================

#[tokio::test]
async fn submitted_research_job_reads_back_as_processing() {
    let harness = TestHarness::new(MockFirecrawl::new());
    let job_id = harness
        .kernel
        .jobs
        .submit("team-a", research("rust async runtimes", 3))
        .await
        .unwrap();

    let outcome = harness
        .kernel
        .jobs
        .get_status(JobKind::DeepResearch, job_id, "team-a")
        .await
        .unwrap();

    let StatusOutcome::Found(record) = outcome else {
        panic!("expected record, got {:?}", outcome);
    };
    assert_eq!(record.status, JobStatus::Processing);
    assert_eq!(record.owner_id, "team-a");
    let JobDetails::DeepResearch(state) = record.details else {
        panic!("expected research details");
    };
    assert_eq!(state.max_depth, 3);
    assert_eq!(state.total_expected_steps, 15);
    assert_eq!(state.completed_steps, 0);
    assert_eq!(harness.kernel.work_queue.enqueued(), vec![job_id]);
}

#[tokio::test]
async fn other_owner_is_denied_without_seeing_content() {
    let harness = TestHarness::new(MockFirecrawl::new());
    let job_id = harness
        .kernel
        .jobs
        .submit("team-a", research("q", 1))
        .await
        .unwrap();

    let outcome = harness
        .kernel
        .jobs
        .get_status(JobKind::DeepResearch, job_id, "team-b")
        .await
        .unwrap();
    assert_eq!(outcome, StatusOutcome::Forbidden);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let harness = TestHarness::new(MockFirecrawl::new());
    let outcome = harness
        .kernel
        .jobs
        .get_status(JobKind::GenerateLlmsTxt, Uuid::new_v4(), "team-a")
        .await
        .unwrap();
    assert_eq!(outcome, StatusOutcome::NotFound);

    let response = harness
        .kernel
        .jobs
        .status_response(JobKind::GenerateLlmsTxt, Uuid::new_v4(), "team-a")
        .await;
    assert_eq!(response.http_status(), 404);
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        serde_json::json!({"success": false, "error": "Generation job not found"})
    );
}

#[tokio::test]
async fn enqueue_failure_leaves_orphaned_processing_record() {
    let harness = TestHarness::new(MockFirecrawl::new());
    harness.kernel.work_queue.fail_enqueues(true);

    let err = harness
        .kernel
        .jobs
        .submit("team-a", research("q", 2))
        .await
        .unwrap_err();
    let JobError::Enqueue { job_id, .. } = err else {
        panic!("expected enqueue error, got {:?}", err);
    };

    assert!(harness.kernel.work_queue.enqueued().is_empty());
    assert_eq!(harness.kernel.status_store.write_count(), 1);
    let outcome = harness
        .kernel
        .jobs
        .get_status(JobKind::DeepResearch, job_id, "team-a")
        .await
        .unwrap();
    let StatusOutcome::Found(record) = outcome else {
        panic!("orphaned record should still be readable");
    };
    assert_eq!(record.status, JobStatus::Processing);
}

#[tokio::test(start_paused = true)]
async fn records_expire_after_ttl() {
    let harness = TestHarness::new(MockFirecrawl::new());
    let job_id = harness
        .kernel
        .jobs
        .submit("team-a", research("q", 1))
        .await
        .unwrap();

    tokio::time::advance(harness.kernel.job_ttl - Duration::from_secs(1)).await;
    assert!(matches!(
        harness
            .kernel
            .jobs
            .get_status(JobKind::DeepResearch, job_id, "team-a")
            .await
            .unwrap(),
        StatusOutcome::Found(_)
    ));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(
        harness
            .kernel
            .jobs
            .get_status(JobKind::DeepResearch, job_id, "team-a")
            .await
            .unwrap(),
        StatusOutcome::NotFound
    );
}

// =============================================================================
// Worker execution
// =============================================================================

#[tokio::test]
async fn worker_drives_research_job_to_completion() {
    let harness = TestHarness::new(MockFirecrawl::new());
    let job_id = harness
        .kernel
        .jobs
        .submit("team-a", research("rust", 2))
        .await
        .unwrap();

    let sink = CollectingSink::new();
    harness.kernel.broadcaster.subscribe(
        "watcher",
        SubscriptionFilter::operations([job_id.to_string()]),
        sink.clone(),
    );

    let worker = harness.kernel.worker(Arc::new(DepthByDepth));
    let job = next_job(&harness).await;
    assert_eq!(worker.process(job).await.unwrap(), JobStatus::Completed);

    let StatusOutcome::Found(record) = harness
        .kernel
        .jobs
        .get_status(JobKind::DeepResearch, job_id, "team-a")
        .await
        .unwrap()
    else {
        panic!("record missing after completion");
    };
    assert_eq!(record.status, JobStatus::Completed);
    let JobDetails::DeepResearch(state) = record.details else {
        panic!("expected research details");
    };
    assert_eq!(state.current_depth, 2);
    assert_eq!(state.completed_steps, 10);
    assert_eq!(state.sources.len(), 2);
    assert_eq!(state.summaries, vec!["depth 1 done", "depth 2 done"]);
    assert_eq!(state.final_analysis.as_deref(), Some("analysis of rust"));

    let events = sink.events();
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
    assert!(events.iter().all(|e| e.operation_id == job_id.to_string()));
    let last_progress = events[3].payload.progress.as_ref().unwrap();
    assert_eq!(last_progress.status, "completed");
    assert_eq!(last_progress.completed_steps, 10);
}

#[tokio::test]
async fn handler_error_marks_job_failed() {
    let harness = TestHarness::new(MockFirecrawl::new());
    let job_id = harness
        .kernel
        .jobs
        .submit("team-a", research("q", 1))
        .await
        .unwrap();

    let worker = harness.kernel.worker(Arc::new(Unreachable));
    let job = next_job(&harness).await;
    assert_eq!(worker.process(job).await.unwrap(), JobStatus::Failed);

    let response = harness
        .kernel
        .jobs
        .status_response(JobKind::DeepResearch, job_id, "team-a")
        .await;
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["data"]["error"], "research engine unreachable");
}

#[tokio::test]
async fn redelivered_finished_job_is_not_rerun() {
    let harness = TestHarness::new(MockFirecrawl::new());
    harness
        .kernel
        .jobs
        .submit("team-a", research("q", 1))
        .await
        .unwrap();

    let worker = harness.kernel.worker(Arc::new(DepthByDepth));
    let job = next_job(&harness).await;
    worker.process(job.clone()).await.unwrap();
    let writes = harness.kernel.status_store.write_count();

    assert_eq!(worker.process(job).await.unwrap(), JobStatus::Completed);
    assert_eq!(harness.kernel.status_store.write_count(), writes);
}

#[tokio::test]
async fn llmstxt_job_runs_through_worker_loop() {
    let harness = TestHarness::new(MockFirecrawl::new());
    let rx = harness.kernel.work_queue.take_receiver().unwrap();
    let worker = Arc::new(harness.kernel.worker(Arc::new(Generator)));
    let handle = tokio::spawn(worker.run(rx));

    let job_id = harness
        .kernel
        .jobs
        .submit(
            "team-a",
            JobRequest::GenerateLlmsTxt(
                LlmsTxtJob::new("https://example.com").show_full_text(true),
            ),
        )
        .await
        .unwrap();

    let record = loop {
        if let StatusOutcome::Found(record) = harness
            .kernel
            .jobs
            .get_status(JobKind::GenerateLlmsTxt, job_id, "team-a")
            .await
            .unwrap()
        {
            if record.status.is_terminal() {
                break record;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    assert_eq!(record.status, JobStatus::Completed);
    let JobDetails::LlmsTxt(state) = record.details else {
        panic!("expected llms.txt details");
    };
    assert_eq!(state.generated_text, "# example.com");
    assert!(state.show_full_text);

    handle.abort();
}
