//! Kernel module - relay infrastructure and dependencies.

pub mod adapter;
pub mod deps;
pub mod event_broadcaster;
pub mod jobs;
pub mod metrics;
pub mod retry;
pub mod test_dependencies;
pub mod traits;

pub use adapter::{AdapterError, Capability, ToolAdapter, ToolOutput};
pub use deps::{FirecrawlAdapter, RelayKernel};
pub use event_broadcaster::{
    ChannelSink, EventBroadcaster, EventPayload, EventSink, OperationEvent, OperationEventType,
    SubscriptionFilter,
};
pub use metrics::{MetricsAggregator, MetricsSnapshot, TimeRange};
pub use retry::{ClassifiedError, RetryPolicy, RetryingExecutor};
pub use test_dependencies::{CollectingSink, FailingSink, MockFirecrawl};
pub use traits::*;
