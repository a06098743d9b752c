//! Integration tests for capability invocation through the retrying adapter.

mod common;

use common::TestHarness;
use firecrawl_client::FirecrawlError;
use relay_core::kernel::adapter::MAX_SUBSCRIPTIONS;
use relay_core::kernel::{
    AdapterError, CollectingSink, MockFirecrawl, OperationEventType, SubscriptionFilter,
};
use serde_json::json;

// =============================================================================
// Test Helpers
// =============================================================================

fn api_error(status: u16, message: &str) -> FirecrawlError {
    FirecrawlError::Api {
        status,
        message: message.to_string(),
    }
}

// =============================================================================
// Outbound capabilities
// =============================================================================

#[tokio::test]
async fn scrape_posts_projected_arguments() {
    let harness = TestHarness::new(
        MockFirecrawl::new().with_response(json!({"success": true, "data": {"markdown": "# Hi"}})),
    );

    let output = harness
        .kernel
        .adapter
        .invoke(
            "firecrawl_scrape",
            json!({"url": "https://example.com", "onlyMainContent": true, "bogus": 1}),
        )
        .await
        .unwrap();

    let calls = harness.firecrawl.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "POST");
    assert_eq!(calls[0].path, "/v1/scrape");
    assert_eq!(
        calls[0].body,
        Some(json!({
            "url": "https://example.com",
            "formats": ["markdown"],
            "onlyMainContent": true,
        }))
    );

    assert_eq!(output.data["data"]["markdown"], "# Hi");
    assert!(output.text.contains("# Hi"));
    let operation_id = output.operation_id.unwrap();
    assert!(operation_id.starts_with("scrape_"));
}

#[tokio::test]
async fn unknown_tool_never_reaches_remote() {
    let harness = TestHarness::new(MockFirecrawl::new());

    let err = harness
        .kernel
        .adapter
        .invoke("firecrawl_teleport", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, AdapterError::UnknownCapability(_)));
    assert_eq!(err.to_string(), "Unknown tool: firecrawl_teleport");
    assert_eq!(harness.firecrawl.call_count(), 0);
}

#[tokio::test]
async fn invalid_arguments_never_reach_remote() {
    let harness = TestHarness::new(MockFirecrawl::new());

    let err = harness
        .kernel
        .adapter
        .invoke("firecrawl_map", json!({"limit": 5}))
        .await
        .unwrap_err();

    assert!(matches!(err, AdapterError::InvalidArguments { capability: "map", .. }));
    assert_eq!(harness.firecrawl.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_calls_are_retried_until_success() {
    let harness = TestHarness::with_retries(
        MockFirecrawl::new()
            .with_errors(api_error(429, "Too many requests"), 2)
            .with_response(json!({"success": true, "links": ["https://example.com/a"]})),
        2,
    );
    let sink = CollectingSink::new();
    harness
        .kernel
        .broadcaster
        .subscribe("watcher", SubscriptionFilter::all(), sink.clone());

    let output = harness
        .kernel
        .adapter
        .invoke("map", json!({"url": "https://example.com"}))
        .await
        .unwrap();

    assert_eq!(harness.firecrawl.call_count(), 3);
    assert_eq!(output.data["links"][0], "https://example.com/a");
    assert_eq!(
        sink.event_types(),
        vec![
            OperationEventType::OperationStarted,
            OperationEventType::OperationFailed,
            OperationEventType::OperationFailed,
            OperationEventType::OperationCompleted,
        ]
    );

    let metrics = harness.kernel.metrics.snapshot(Default::default(), false);
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.successful_requests, 1);
    assert_eq!(metrics.failed_requests, 2);
}

#[tokio::test(start_paused = true)]
async fn retries_stop_once_exhausted() {
    let harness = TestHarness::with_retries(
        MockFirecrawl::new().with_errors(api_error(503, "unavailable"), 5),
        2,
    );

    let err = harness
        .kernel
        .adapter
        .invoke("search", json!({"query": "rust"}))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AdapterError::Remote(FirecrawlError::Api { status: 503, .. })
    ));
    assert_eq!(harness.firecrawl.call_count(), 3);
}

#[tokio::test]
async fn unauthorized_is_not_retried() {
    let harness =
        TestHarness::new(MockFirecrawl::new().with_error(api_error(401, "Invalid API key")));

    let err = harness
        .kernel
        .adapter
        .invoke("scrape", json!({"url": "https://example.com"}))
        .await
        .unwrap_err();

    assert_eq!(harness.firecrawl.call_count(), 1);
    assert!(err.to_string().contains("Invalid API key"));
}

#[tokio::test]
async fn crawl_returns_job_acknowledgement() {
    let harness = TestHarness::new(MockFirecrawl::new().with_response(json!({
        "success": true,
        "id": "crawl-1",
        "url": "https://api.firecrawl.dev/v1/crawl/crawl-1",
    })));

    let output = harness
        .kernel
        .adapter
        .invoke("firecrawl_crawl", json!({"url": "https://example.com", "limit": 10}))
        .await
        .unwrap();

    assert_eq!(
        output.text,
        "Crawl job started. ID: crawl-1\nStatus URL: https://api.firecrawl.dev/v1/crawl/crawl-1"
    );
    assert_eq!(
        harness.firecrawl.calls()[0].body,
        Some(json!({"url": "https://example.com", "limit": 10}))
    );
}

#[tokio::test]
async fn batch_scrape_returns_queue_acknowledgement() {
    let harness = TestHarness::new(
        MockFirecrawl::new().with_response(json!({"success": true, "id": "batch-7"})),
    );

    let output = harness
        .kernel
        .adapter
        .invoke(
            "firecrawl_batch_scrape",
            json!({"urls": ["https://a.example", "https://b.example"]}),
        )
        .await
        .unwrap();

    assert_eq!(
        output.text,
        "Batch operation queued with ID: batch-7. Use firecrawl_check_batch_status to check progress."
    );
    assert_eq!(harness.firecrawl.calls()[0].path, "/v2/batch/scrape");
}

#[tokio::test]
async fn status_checks_publish_under_remote_job_id() {
    let harness = TestHarness::new(MockFirecrawl::new().with_response(json!({
        "status": "scraping",
        "completed": 3,
        "total": 10,
    })));
    let sink = CollectingSink::new();
    harness.kernel.broadcaster.subscribe(
        "watcher",
        SubscriptionFilter::operations(["crawl-1".to_string()]),
        sink.clone(),
    );

    let output = harness
        .kernel
        .adapter
        .invoke("firecrawl_check_crawl_status", json!({"id": "crawl-1"}))
        .await
        .unwrap();

    assert_eq!(output.operation_id.as_deref(), Some("crawl-1"));
    let calls = harness.firecrawl.calls();
    assert_eq!(calls[0].method, "GET");
    assert_eq!(calls[0].path, "/v1/crawl/crawl-1");
    assert_eq!(
        sink.event_types(),
        vec![
            OperationEventType::OperationStarted,
            OperationEventType::OperationCompleted,
        ]
    );
}

// =============================================================================
// Local capabilities
// =============================================================================

#[tokio::test]
async fn performance_metrics_report_server_info() {
    let harness = TestHarness::new(MockFirecrawl::new());
    harness
        .kernel
        .adapter
        .invoke("scrape", json!({"url": "https://example.com"}))
        .await
        .unwrap();

    let output = harness
        .kernel
        .adapter
        .invoke(
            "firecrawl_get_performance_metrics",
            json!({"timeRange": "last_hour", "includeDetailed": true}),
        )
        .await
        .unwrap();

    assert_eq!(output.data["totalRequests"], 1);
    assert_eq!(output.data["successfulRequests"], 1);
    assert_eq!(output.data["timeRange"], "last_hour");
    assert_eq!(output.data["operationBreakdown"]["scrape"]["count"], 1);
    assert_eq!(output.data["serverInfo"]["retainedSamples"], 1);
    assert_eq!(output.data["serverInfo"]["activeSubscribers"], 0);
    assert!(output.operation_id.is_none());
    assert_eq!(harness.firecrawl.call_count(), 1);
}

#[tokio::test]
async fn performance_metrics_reject_unknown_range() {
    let harness = TestHarness::new(MockFirecrawl::new());
    let err = harness
        .kernel
        .adapter
        .invoke("get-performance-metrics", json!({"timeRange": "last_century"}))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::InvalidArguments { .. }));
}

#[tokio::test]
async fn subscribe_registers_subscriber() {
    let harness = TestHarness::new(MockFirecrawl::new());

    let output = harness
        .kernel
        .adapter
        .invoke(
            "firecrawl_subscribe_updates",
            json!({"operationIds": ["crawl-1"], "eventTypes": ["completed"]}),
        )
        .await
        .unwrap();

    let client_id = output.data["clientId"].as_str().unwrap();
    assert!(client_id.starts_with("client_"));
    assert!(harness.kernel.broadcaster.is_subscribed(client_id));
    assert_eq!(harness.kernel.broadcaster.subscriber_count(), 1);
    assert!(output.text.contains("crawl-1"));
    assert_eq!(harness.firecrawl.call_count(), 0);
}

#[tokio::test]
async fn subscribe_rejects_unknown_event_type() {
    let harness = TestHarness::new(MockFirecrawl::new());

    let err = harness
        .kernel
        .adapter
        .invoke(
            "subscribe-updates",
            json!({"operationIds": ["crawl-1"], "eventTypes": ["exploded"]}),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AdapterError::InvalidArguments { .. }));
    assert_eq!(harness.kernel.broadcaster.subscriber_count(), 0);
}

#[tokio::test]
async fn oldest_subscription_is_evicted_beyond_cap() {
    let harness = TestHarness::new(MockFirecrawl::new());

    let mut client_ids = Vec::new();
    for _ in 0..=MAX_SUBSCRIPTIONS {
        let output = harness
            .kernel
            .adapter
            .invoke("subscribe-updates", json!({"operationIds": []}))
            .await
            .unwrap();
        client_ids.push(output.data["clientId"].as_str().unwrap().to_string());
    }

    let broadcaster = &harness.kernel.broadcaster;
    assert_eq!(broadcaster.subscriber_count(), MAX_SUBSCRIPTIONS);
    assert!(!broadcaster.is_subscribed(&client_ids[0]));
    assert!(broadcaster.is_subscribed(&client_ids[1]));
    assert!(broadcaster.is_subscribed(client_ids.last().unwrap()));
}

#[tokio::test]
async fn null_and_whole_float_counts_are_forwarded() {
    let harness = TestHarness::new(MockFirecrawl::new());

    harness
        .kernel
        .adapter
        .invoke("search", json!({"query": "x", "limit": null}))
        .await
        .unwrap();
    harness
        .kernel
        .adapter
        .invoke("deep-research", json!({"query": "x", "maxDepth": 2.0}))
        .await
        .unwrap();

    let calls = harness.firecrawl.calls();
    assert_eq!(calls[0].body.as_ref().unwrap()["limit"], 5);
    assert_eq!(calls[1].body.as_ref().unwrap()["maxDepth"], 2);
}
