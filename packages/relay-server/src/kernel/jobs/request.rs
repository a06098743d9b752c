use firecrawl_client::{DeepResearchRequest, GenerateLlmsTxtRequest};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_origin() -> String {
    "api".to_string()
}

fn default_integration() -> String {
    "mcp".to_string()
}

/// A deep-research submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepResearchJob {
    #[serde(flatten)]
    pub params: DeepResearchRequest,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_integration")]
    pub integration: String,
}

impl DeepResearchJob {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            params: DeepResearchRequest {
                query: query.into(),
                max_depth: 3,
                time_limit: 120,
                max_urls: 50,
            },
            origin: default_origin(),
            integration: default_integration(),
        }
    }

    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.params.max_depth = max_depth;
        self
    }
}

/// An llms.txt generation submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmsTxtJob {
    #[serde(flatten)]
    pub params: GenerateLlmsTxtRequest,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_integration")]
    pub integration: String,
}

impl LlmsTxtJob {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            params: GenerateLlmsTxtRequest {
                url: url.into(),
                max_urls: 10,
                show_full_text: None,
            },
            origin: default_origin(),
            integration: default_integration(),
        }
    }

    pub fn show_full_text(mut self, show: bool) -> Self {
        self.params.show_full_text = Some(show);
        self
    }
}

/// Work accepted for asynchronous execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobRequest {
    DeepResearch(DeepResearchJob),
    #[serde(rename = "generate_llmstxt")]
    GenerateLlmsTxt(LlmsTxtJob),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::DeepResearch(_) => JobKind::DeepResearch,
            JobRequest::GenerateLlmsTxt(_) => JobKind::GenerateLlmsTxt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DeepResearch,
    #[serde(rename = "generate_llmstxt")]
    GenerateLlmsTxt,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::DeepResearch => "deep_research",
            JobKind::GenerateLlmsTxt => "generate_llmstxt",
        }
    }

    pub fn not_found_message(self) -> &'static str {
        match self {
            JobKind::DeepResearch => "Research job not found",
            JobKind::GenerateLlmsTxt => "Generation job not found",
        }
    }

    pub fn lookup_failed_message(self) -> &'static str {
        match self {
            JobKind::DeepResearch => "Failed to retrieve research status",
            JobKind::GenerateLlmsTxt => "Failed to retrieve generation status",
        }
    }
}

/// What the worker receives from the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub request: JobRequest,
    pub owner_id: String,
    pub job_id: Uuid,
}
