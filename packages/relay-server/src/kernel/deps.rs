//! Relay dependencies (using traits for testability)
//!
//! `RelayKernel` is the composition root: it owns the broadcaster and the
//! metrics aggregator and hands the same instances to the executor, the
//! adapter and the job lifecycle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use firecrawl_client::FirecrawlClient;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::kernel::adapter::ToolAdapter;
use crate::kernel::event_broadcaster::EventBroadcaster;
use crate::kernel::jobs::{
    JobHandler, JobLifecycleManager, JobWorker, MemoryStatusStore, MemoryWorkQueue,
};
use crate::kernel::metrics::MetricsAggregator;
use crate::kernel::retry::{RetryPolicy, RetryingExecutor};
use crate::kernel::BaseFirecrawl;

// =============================================================================
// FirecrawlClient Adapter (implements BaseFirecrawl trait)
// =============================================================================

/// Wrapper around FirecrawlClient that implements BaseFirecrawl trait
pub struct FirecrawlAdapter(pub Arc<FirecrawlClient>);

impl FirecrawlAdapter {
    pub fn new(client: FirecrawlClient) -> Self {
        Self(Arc::new(client))
    }
}

#[async_trait]
impl BaseFirecrawl for FirecrawlAdapter {
    async fn post(&self, path: &str, body: &Value) -> firecrawl_client::Result<Value> {
        self.0.post_json(path, body).await
    }

    async fn get(&self, path: &str) -> firecrawl_client::Result<Value> {
        self.0.get_json(path).await
    }
}

// =============================================================================
// RelayKernel
// =============================================================================

/// Shared handles for one relay.
///
/// `jobs`, `status_store` and `work_queue` form the library-side job
/// lifecycle. The stdio server never reaches them; an embedding application
/// submits through `jobs` and runs [`RelayKernel::worker`] over
/// `work_queue.take_receiver()`. Until then they hold only empty maps.
#[derive(Clone)]
pub struct RelayKernel {
    pub firecrawl: Arc<dyn BaseFirecrawl>,
    /// In-process fan-out of operation and job events
    pub broadcaster: Arc<EventBroadcaster>,
    pub metrics: Arc<MetricsAggregator>,
    pub executor: Arc<RetryingExecutor>,
    pub adapter: Arc<ToolAdapter>,
    pub jobs: Arc<JobLifecycleManager>,
    pub status_store: Arc<MemoryStatusStore>,
    pub work_queue: Arc<MemoryWorkQueue>,
    pub job_ttl: Duration,
}

impl RelayKernel {
    pub fn new(
        firecrawl: Arc<dyn BaseFirecrawl>,
        retry_policy: RetryPolicy,
        job_ttl: Duration,
    ) -> Self {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let metrics = Arc::new(MetricsAggregator::new());
        let executor = Arc::new(RetryingExecutor::new(
            retry_policy,
            broadcaster.clone(),
            metrics.clone(),
        ));
        let adapter = Arc::new(ToolAdapter::new(
            firecrawl.clone(),
            executor.clone(),
            broadcaster.clone(),
            metrics.clone(),
        ));

        let status_store = Arc::new(MemoryStatusStore::new());
        let work_queue = Arc::new(MemoryWorkQueue::new());
        let jobs = Arc::new(JobLifecycleManager::new(
            status_store.clone(),
            work_queue.clone(),
            job_ttl,
        ));

        Self {
            firecrawl,
            broadcaster,
            metrics,
            executor,
            adapter,
            jobs,
            status_store,
            work_queue,
            job_ttl,
        }
    }

    /// Kernel talking to the Firecrawl deployment named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = FirecrawlClient::new(
            config.api_url.clone(),
            config.api_key.clone(),
            config.timeout,
        )
        .context("Failed to build Firecrawl client")?
        .with_rate_limit_warning(config.credit_warning_threshold);

        Ok(Self::new(
            Arc::new(FirecrawlAdapter::new(client)),
            config.retry_policy(),
            config.job_ttl,
        ))
    }

    /// Worker over this kernel's store and broadcaster, running `handler`.
    pub fn worker(&self, handler: Arc<dyn JobHandler>) -> JobWorker {
        JobWorker::new(
            self.status_store.clone(),
            self.broadcaster.clone(),
            handler,
            self.job_ttl,
        )
    }
}
