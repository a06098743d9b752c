//! Capability dispatch.
//!
//! [`ToolAdapter::invoke`] resolves a capability name, projects the caller's
//! arguments onto the remote request shape and runs the call through the
//! [`RetryingExecutor`]. Two capabilities are served locally and never touch
//! the remote service: subscribing to lifecycle events and reading
//! performance metrics.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use firecrawl_client::{
    endpoints, BatchScrapeRequest, CrawlRequest, DeepResearchRequest, ExtractRequest,
    FirecrawlError, GenerateLlmsTxtRequest, JobAccepted, MapRequest, ScrapeRequest, SearchRequest,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::event_broadcaster::{
    ChannelSink, EventBroadcaster, OperationEvent, OperationEventType, SubscriptionFilter,
};
use super::metrics::{MetricsAggregator, TimeRange};
use super::retry::RetryingExecutor;
use super::BaseFirecrawl;

/// Buffered events per local subscription before it is considered stalled.
const SUBSCRIPTION_BUFFER: usize = 256;

/// Local subscriptions kept alive at once; the oldest is evicted beyond this.
pub const MAX_SUBSCRIPTIONS: usize = 64;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Unknown tool: {0}")]
    UnknownCapability(String),

    #[error("Invalid arguments for {capability}: {message}")]
    InvalidArguments {
        capability: &'static str,
        message: String,
    },

    #[error(transparent)]
    Remote(#[from] FirecrawlError),

    #[error("Unexpected response from {capability}: {message}")]
    UnexpectedResponse {
        capability: &'static str,
        message: String,
    },

    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Scrape,
    Map,
    Crawl,
    CrawlStatus,
    Search,
    Extract,
    DeepResearch,
    GenerateLlmsTxt,
    BatchScrape,
    BatchStatus,
    SubscribeUpdates,
    PerformanceMetrics,
}

impl Capability {
    pub const ALL: [Capability; 12] = [
        Capability::Scrape,
        Capability::Map,
        Capability::Crawl,
        Capability::CrawlStatus,
        Capability::Search,
        Capability::Extract,
        Capability::DeepResearch,
        Capability::GenerateLlmsTxt,
        Capability::BatchScrape,
        Capability::BatchStatus,
        Capability::SubscribeUpdates,
        Capability::PerformanceMetrics,
    ];

    /// Accepts the bare capability name or its tool name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == name || c.tool_name() == name)
    }

    /// Bare name, also used as the operation name for metrics and events.
    pub fn name(self) -> &'static str {
        match self {
            Capability::Scrape => "scrape",
            Capability::Map => "map",
            Capability::Crawl => "crawl",
            Capability::CrawlStatus => "crawl-status",
            Capability::Search => "search",
            Capability::Extract => "extract",
            Capability::DeepResearch => "deep-research",
            Capability::GenerateLlmsTxt => "generate-llmstxt",
            Capability::BatchScrape => "batch-scrape",
            Capability::BatchStatus => "batch-status",
            Capability::SubscribeUpdates => "subscribe-updates",
            Capability::PerformanceMetrics => "get-performance-metrics",
        }
    }

    pub fn tool_name(self) -> &'static str {
        match self {
            Capability::Scrape => "firecrawl_scrape",
            Capability::Map => "firecrawl_map",
            Capability::Crawl => "firecrawl_crawl",
            Capability::CrawlStatus => "firecrawl_check_crawl_status",
            Capability::Search => "firecrawl_search",
            Capability::Extract => "firecrawl_extract",
            Capability::DeepResearch => "firecrawl_deep_research",
            Capability::GenerateLlmsTxt => "firecrawl_generate_llmstxt",
            Capability::BatchScrape => "firecrawl_batch_scrape",
            Capability::BatchStatus => "firecrawl_check_batch_status",
            Capability::SubscribeUpdates => "firecrawl_subscribe_updates",
            Capability::PerformanceMetrics => "firecrawl_get_performance_metrics",
        }
    }

    pub fn is_local(self) -> bool {
        matches!(
            self,
            Capability::SubscribeUpdates | Capability::PerformanceMetrics
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            Capability::Scrape => {
                "Scrape a single URL and return its content in the requested formats."
            }
            Capability::Map => "List the URLs of a website, optionally filtered by a search term.",
            Capability::Crawl => {
                "Start an asynchronous crawl of a website. Returns a crawl job ID."
            }
            Capability::CrawlStatus => {
                "Check the progress of a crawl job and retrieve its results."
            }
            Capability::Search => "Search the web and return content from the results.",
            Capability::Extract => "Extract structured data from one or more pages with an LLM.",
            Capability::DeepResearch => {
                "Research a question across many sources and synthesize an answer."
            }
            Capability::GenerateLlmsTxt => "Generate an llms.txt file describing a website.",
            Capability::BatchScrape => "Queue a scrape of many URLs. Returns a batch job ID.",
            Capability::BatchStatus => {
                "Check the progress of a batch scrape and retrieve its results."
            }
            Capability::SubscribeUpdates => {
                "Subscribe to lifecycle events for one or more operations."
            }
            Capability::PerformanceMetrics => {
                "Report request counts, failure counts and response times."
            }
        }
    }

    pub fn input_schema(self) -> Value {
        let scrape_options = json!({
            "formats": {
                "type": "array",
                "items": {
                    "type": "string",
                    "enum": ["markdown", "html", "rawHtml", "links", "screenshot"]
                },
                "default": ["markdown"]
            },
            "onlyMainContent": {"type": "boolean"},
            "includeTags": {"type": "array", "items": {"type": "string"}},
            "excludeTags": {"type": "array", "items": {"type": "string"}},
            "waitFor": {
                "type": "integer",
                "description": "Milliseconds to wait for dynamic content"
            },
            "timeout": {"type": "integer", "description": "Page load timeout in milliseconds"},
            "maxAge": {"type": "integer", "description": "Maximum cache age in milliseconds"}
        });

        match self {
            Capability::Scrape => schema(
                with_properties(json!({"url": {"type": "string"}}), &scrape_options),
                &["url"],
            ),
            Capability::BatchScrape => schema(
                with_properties(
                    json!({"urls": {"type": "array", "items": {"type": "string"}}}),
                    &scrape_options,
                ),
                &["urls"],
            ),
            Capability::Map => schema(
                json!({
                    "url": {"type": "string"},
                    "search": {"type": "string"},
                    "ignoreSitemap": {"type": "boolean"},
                    "sitemapOnly": {"type": "boolean"},
                    "includeSubdomains": {"type": "boolean"},
                    "limit": {"type": "integer"}
                }),
                &["url"],
            ),
            Capability::Crawl => schema(
                json!({
                    "url": {"type": "string"},
                    "excludePaths": {"type": "array", "items": {"type": "string"}},
                    "includePaths": {"type": "array", "items": {"type": "string"}},
                    "maxDepth": {"type": "integer"},
                    "ignoreSitemap": {"type": "boolean"},
                    "limit": {"type": "integer"},
                    "allowExternalLinks": {"type": "boolean"},
                    "deduplicateSimilarURLs": {"type": "boolean"}
                }),
                &["url"],
            ),
            Capability::CrawlStatus | Capability::BatchStatus => {
                schema(json!({"id": {"type": "string"}}), &["id"])
            }
            Capability::Search => schema(
                json!({
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "default": 5},
                    "lang": {"type": "string", "default": "en"},
                    "country": {"type": "string", "default": "us"},
                    "tbs": {"type": "string", "description": "Time filter, e.g. qdr:d"}
                }),
                &["query"],
            ),
            Capability::Extract => schema(
                json!({
                    "urls": {"type": "array", "items": {"type": "string"}},
                    "prompt": {"type": "string"},
                    "systemPrompt": {"type": "string"},
                    "schema": {"type": "object"},
                    "allowExternalLinks": {"type": "boolean"},
                    "enableWebSearch": {"type": "boolean"},
                    "includeSubdomains": {"type": "boolean"}
                }),
                &["urls", "prompt", "schema"],
            ),
            Capability::DeepResearch => schema(
                json!({
                    "query": {"type": "string"},
                    "maxDepth": {"type": "integer", "default": 3},
                    "timeLimit": {"type": "integer", "default": 120, "description": "Seconds"},
                    "maxUrls": {"type": "integer", "default": 50}
                }),
                &["query"],
            ),
            Capability::GenerateLlmsTxt => schema(
                json!({
                    "url": {"type": "string"},
                    "maxUrls": {"type": "integer", "default": 10},
                    "showFullText": {"type": "boolean", "default": false}
                }),
                &["url"],
            ),
            Capability::SubscribeUpdates => schema(
                json!({
                    "operationIds": {"type": "array", "items": {"type": "string"}},
                    "eventTypes": {
                        "type": "array",
                        "items": {
                            "type": "string",
                            "enum": ["started", "completed", "failed", "progress"]
                        },
                        "description": "Defaults to all event types"
                    }
                }),
                &["operationIds"],
            ),
            Capability::PerformanceMetrics => schema(
                json!({
                    "timeRange": {
                        "type": "string",
                        "enum": ["last_hour", "last_day", "last_week", "all_time"],
                        "default": "all_time"
                    },
                    "includeDetailed": {"type": "boolean", "default": false}
                }),
                &[],
            ),
        }
    }

    /// Remote request for an outbound capability; `None` for local ones.
    pub fn outbound_call(self, args: &Value) -> Result<Option<OutboundCall>, AdapterError> {
        let call = match self {
            Capability::Scrape => {
                OutboundCall::post(endpoints::SCRAPE, self.project::<ScrapeRequest>(args)?)
            }
            Capability::Map => {
                OutboundCall::post(endpoints::MAP, self.project::<MapRequest>(args)?)
            }
            Capability::Crawl => {
                OutboundCall::post(endpoints::CRAWL, self.project::<CrawlRequest>(args)?)
            }
            Capability::Search => {
                OutboundCall::post(endpoints::SEARCH, self.project::<SearchRequest>(args)?)
            }
            Capability::Extract => {
                OutboundCall::post(endpoints::EXTRACT, self.project::<ExtractRequest>(args)?)
            }
            Capability::DeepResearch => OutboundCall::post(
                endpoints::DEEP_RESEARCH,
                self.project::<DeepResearchRequest>(args)?,
            ),
            Capability::GenerateLlmsTxt => OutboundCall::post(
                endpoints::GENERATE_LLMSTXT,
                self.project::<GenerateLlmsTxtRequest>(args)?,
            ),
            Capability::BatchScrape => OutboundCall::post(
                endpoints::BATCH_SCRAPE,
                self.project::<BatchScrapeRequest>(args)?,
            ),
            Capability::CrawlStatus => {
                OutboundCall::get(endpoints::crawl_status(&self.parse_args::<IdArgs>(args)?.id))
            }
            Capability::BatchStatus => {
                OutboundCall::get(endpoints::batch_status(&self.parse_args::<IdArgs>(args)?.id))
            }
            Capability::SubscribeUpdates | Capability::PerformanceMetrics => return Ok(None),
        };
        Ok(Some(call))
    }

    fn parse_args<T: DeserializeOwned>(self, args: &Value) -> Result<T, AdapterError> {
        serde_json::from_value(args.clone()).map_err(|e| AdapterError::InvalidArguments {
            capability: self.name(),
            message: e.to_string(),
        })
    }

    /// Parse into the typed request, then re-encode it. Unknown argument
    /// keys are dropped and unset optionals are omitted.
    fn project<T: DeserializeOwned + Serialize>(self, args: &Value) -> Result<Value, AdapterError> {
        let typed: T = self.parse_args(args)?;
        Ok(serde_json::to_value(&typed)?)
    }
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn with_properties(mut base: Value, extra: &Value) -> Value {
    if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
        base.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    base
}

#[derive(Debug, Deserialize)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeArgs {
    operation_ids: Vec<String>,
    #[serde(default)]
    event_types: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricsArgs {
    #[serde(default)]
    time_range: Option<String>,
    #[serde(default)]
    include_detailed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One remote request, ready to be sent as many times as the retry policy
/// allows.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCall {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
}

impl OutboundCall {
    fn post(path: &str, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.to_string(),
            body: Some(body),
        }
    }

    fn get(path: String) -> Self {
        Self {
            method: HttpMethod::Get,
            path,
            body: None,
        }
    }

    async fn send(&self, firecrawl: &dyn BaseFirecrawl) -> Result<Value, FirecrawlError> {
        match (self.method, &self.body) {
            (HttpMethod::Post, Some(body)) => firecrawl.post(&self.path, body).await,
            (HttpMethod::Post, None) => firecrawl.post(&self.path, &Value::Null).await,
            (HttpMethod::Get, _) => firecrawl.get(&self.path).await,
        }
    }
}

/// Result of a capability invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Human-readable rendering returned to tool clients
    pub text: String,
    pub data: Value,
    /// Events for this invocation were published under this id
    pub operation_id: Option<String>,
}

pub struct ToolAdapter {
    firecrawl: Arc<dyn BaseFirecrawl>,
    executor: Arc<RetryingExecutor>,
    broadcaster: Arc<EventBroadcaster>,
    metrics: Arc<MetricsAggregator>,
    /// Client ids minted by `subscribe-updates`, oldest first
    subscriptions: Mutex<VecDeque<String>>,
}

impl ToolAdapter {
    pub fn new(
        firecrawl: Arc<dyn BaseFirecrawl>,
        executor: Arc<RetryingExecutor>,
        broadcaster: Arc<EventBroadcaster>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            firecrawl,
            executor,
            broadcaster,
            metrics,
            subscriptions: Mutex::new(VecDeque::new()),
        }
    }

    /// Every capability as a `tools/list` entry.
    pub fn catalogue() -> Vec<Value> {
        Capability::ALL
            .into_iter()
            .map(|c| {
                json!({
                    "name": c.tool_name(),
                    "description": c.description(),
                    "inputSchema": c.input_schema(),
                })
            })
            .collect()
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<ToolOutput, AdapterError> {
        let capability = Capability::parse(name)
            .ok_or_else(|| AdapterError::UnknownCapability(name.to_string()))?;
        let args = if args.is_null() { json!({}) } else { args };

        match capability {
            Capability::SubscribeUpdates => self.subscribe(capability, &args),
            Capability::PerformanceMetrics => self.performance_metrics(capability, &args),
            _ => self.call_remote(capability, &args).await,
        }
    }

    async fn call_remote(
        &self,
        capability: Capability,
        args: &Value,
    ) -> Result<ToolOutput, AdapterError> {
        let Some(call) = capability.outbound_call(args)? else {
            return Err(AdapterError::UnknownCapability(capability.name().to_string()));
        };

        let operation_id = match capability {
            Capability::CrawlStatus | Capability::BatchStatus => {
                capability.parse_args::<IdArgs>(args)?.id
            }
            _ => format!("{}_{}", capability.name(), Uuid::new_v4()),
        };

        tracing::debug!(
            operation = capability.name(),
            operation_id = %operation_id,
            path = %call.path,
            "Invoking capability"
        );

        let call = &call;
        let firecrawl: &dyn BaseFirecrawl = self.firecrawl.as_ref();
        let data = self
            .executor
            .execute(capability.name(), Some(&operation_id), move || async move {
                call.send(firecrawl).await
            })
            .await?;

        let text = match capability {
            Capability::Crawl => {
                let accepted = accepted_job(capability, &data)?;
                format!(
                    "Crawl job started. ID: {}\nStatus URL: {}",
                    accepted.id,
                    accepted.url.as_deref().unwrap_or("unavailable")
                )
            }
            Capability::BatchScrape => {
                let accepted = accepted_job(capability, &data)?;
                format!(
                    "Batch operation queued with ID: {}. Use firecrawl_check_batch_status to check progress.",
                    accepted.id
                )
            }
            _ => serde_json::to_string_pretty(&data)?,
        };

        Ok(ToolOutput {
            text,
            data,
            operation_id: Some(operation_id),
        })
    }

    fn subscribe(&self, capability: Capability, args: &Value) -> Result<ToolOutput, AdapterError> {
        let args: SubscribeArgs = capability.parse_args(args)?;
        let event_types = args
            .event_types
            .iter()
            .map(|name| {
                OperationEventType::parse(name).ok_or_else(|| AdapterError::InvalidArguments {
                    capability: capability.name(),
                    message: format!("unknown event type '{}'", name),
                })
            })
            .collect::<Result<HashSet<_>, _>>()?;

        let client_id = format!("client_{}", Uuid::new_v4().simple());
        let filter = SubscriptionFilter::operations(args.operation_ids.iter().cloned())
            .with_event_types(event_types);
        let (sink, rx) = ChannelSink::bounded(SUBSCRIPTION_BUFFER);
        self.broadcaster
            .subscribe(client_id.clone(), filter, Arc::new(sink));
        tokio::spawn(drain_to_log(client_id.clone(), rx));
        self.evict_oldest_beyond_cap(&client_id);

        let operations = if args.operation_ids.is_empty() {
            "all".to_string()
        } else {
            args.operation_ids.join(", ")
        };
        let types = if args.event_types.is_empty() {
            "all".to_string()
        } else {
            args.event_types.join(", ")
        };

        Ok(ToolOutput {
            text: format!(
                "Subscribed to updates for operations: {}\nClient ID: {}\nEvent types: {}",
                operations, client_id, types
            ),
            data: json!({
                "clientId": client_id,
                "operationIds": args.operation_ids,
                "eventTypes": args.event_types,
            }),
            operation_id: None,
        })
    }

    /// Dropping a registration closes its channel, which ends its drain task.
    fn evict_oldest_beyond_cap(&self, client_id: &str) {
        let evicted: Vec<String> = {
            let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
            subscriptions.push_back(client_id.to_string());
            let excess = subscriptions.len().saturating_sub(MAX_SUBSCRIPTIONS);
            subscriptions.drain(..excess).collect()
        };
        for oldest in evicted {
            if self.broadcaster.unsubscribe(&oldest) {
                tracing::info!(subscriber_id = %oldest, "Evicted oldest subscription");
            }
        }
    }

    fn performance_metrics(
        &self,
        capability: Capability,
        args: &Value,
    ) -> Result<ToolOutput, AdapterError> {
        let args: MetricsArgs = capability.parse_args(args)?;
        let time_range = match args.time_range.as_deref() {
            None => TimeRange::default(),
            Some(raw) => TimeRange::parse(raw).ok_or_else(|| AdapterError::InvalidArguments {
                capability: capability.name(),
                message: format!("unknown time range '{}'", raw),
            })?,
        };

        let snapshot = self.metrics.snapshot(time_range, args.include_detailed);
        let uptime_ms = (Utc::now() - self.metrics.started_at())
            .num_milliseconds()
            .max(0);
        let mut data = serde_json::to_value(&snapshot)?;
        data["serverInfo"] = json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime": uptime_ms,
            "activeSubscribers": self.broadcaster.subscriber_count(),
            "retainedSamples": self.metrics.retained_samples(),
        });

        Ok(ToolOutput {
            text: serde_json::to_string_pretty(&data)?,
            data,
            operation_id: None,
        })
    }
}

fn accepted_job(capability: Capability, data: &Value) -> Result<JobAccepted, AdapterError> {
    serde_json::from_value(data.clone()).map_err(|e| AdapterError::UnexpectedResponse {
        capability: capability.name(),
        message: e.to_string(),
    })
}

async fn drain_to_log(subscriber_id: String, mut rx: mpsc::Receiver<OperationEvent>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => {
                tracing::debug!(
                    subscriber_id = %subscriber_id,
                    event = %line,
                    "Subscription update"
                )
            }
            Err(e) => {
                tracing::warn!(subscriber_id = %subscriber_id, error = %e, "Unencodable event")
            }
        }
    }
    tracing::debug!(subscriber_id = %subscriber_id, "Subscription closed");
}
