// Common test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use relay_core::kernel::{MockFirecrawl, RelayKernel, RetryPolicy};
use relay_core::Config;

/// Kernel wired to a scripted Firecrawl fake.
pub struct TestHarness {
    pub kernel: RelayKernel,
    pub firecrawl: Arc<MockFirecrawl>,
    pub config: Config,
}

impl TestHarness {
    pub fn new(firecrawl: MockFirecrawl) -> Self {
        Self::with_retries(firecrawl, 2)
    }

    pub fn with_retries(firecrawl: MockFirecrawl, max_retries: u32) -> Self {
        init_tracing();
        let firecrawl = Arc::new(firecrawl);
        let policy = RetryPolicy::builder()
            .max_retries(max_retries)
            .base_delay(Duration::from_millis(1000))
            .max_delay(Duration::from_millis(10_000))
            .build();
        let kernel = RelayKernel::new(firecrawl.clone(), policy, Duration::from_secs(3600));
        Self {
            kernel,
            firecrawl,
            config: test_config(),
        }
    }
}

/// Configuration as loaded from an empty environment.
pub fn test_config() -> Config {
    Config::from_lookup(|_| None).expect("defaults are valid")
}

/// Run tests with: RUST_LOG=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
