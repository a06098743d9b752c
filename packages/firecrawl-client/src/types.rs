use serde::{Deserialize, Deserializer, Serialize};

// Optional fields are omitted from the wire, never sent as null.
// Counts accept integral floats (`2.0`) and a null count takes its default.

mod count {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Number;

    fn whole<E: Error>(n: &Number) -> Result<u64, E> {
        if let Some(v) = n.as_u64() {
            return Ok(v);
        }
        match n.as_f64() {
            Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
            _ => Err(E::custom(format!("expected a non-negative whole number, got {}", n))),
        }
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Option::<Number>::deserialize(d)?.map(|n| whole(&n)).transpose()
    }

    pub fn opt_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        opt_u64(d)?
            .map(|v| {
                u32::try_from(v).map_err(|_| D::Error::custom(format!("{} is out of range", v)))
            })
            .transpose()
    }
}

fn default_formats() -> Vec<String> {
    vec!["markdown".to_string()]
}

/// Page-level options shared by single and batch scrapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOptions {
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_main_content: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_tags: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "count::opt_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub wait_for: Option<u64>,
    #[serde(
        default,
        deserialize_with = "count::opt_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<u64>,
    #[serde(
        default,
        deserialize_with = "count::opt_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_age: Option<u64>,
}

/// Body for `POST /v1/scrape`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(flatten)]
    pub options: ScrapeOptions,
}

/// Body for `POST /v1/map`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_sitemap: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sitemap_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_subdomains: Option<bool>,
    #[serde(
        default,
        deserialize_with = "count::opt_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub limit: Option<u32>,
}

/// Body for `POST /v1/crawl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_paths: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "count::opt_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_sitemap: Option<bool>,
    #[serde(
        default,
        deserialize_with = "count::opt_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_external_links: Option<bool>,
    #[serde(
        rename = "deduplicateSimilarURLs",
        skip_serializing_if = "Option::is_none"
    )]
    pub deduplicate_similar_urls: Option<bool>,
}

fn default_search_limit() -> u32 {
    5
}

fn search_limit<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(count::opt_u32(d)?.unwrap_or_else(default_search_limit))
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_country() -> String {
    "us".to_string()
}

/// Body for `POST /v1/search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_search_limit", deserialize_with = "search_limit")]
    pub limit: u32,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tbs: Option<String>,
}

/// Body for `POST /v1/extract`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_external_links: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_web_search: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_subdomains: Option<bool>,
}

fn default_research_depth() -> u32 {
    3
}

fn research_depth<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(count::opt_u32(d)?.unwrap_or_else(default_research_depth))
}

fn default_research_time_limit() -> u32 {
    120
}

fn research_time_limit<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(count::opt_u32(d)?.unwrap_or_else(default_research_time_limit))
}

fn default_research_max_urls() -> u32 {
    50
}

fn research_max_urls<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(count::opt_u32(d)?.unwrap_or_else(default_research_max_urls))
}

/// Body for `POST /v2/deep-research`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepResearchRequest {
    pub query: String,
    #[serde(default = "default_research_depth", deserialize_with = "research_depth")]
    pub max_depth: u32,
    #[serde(default = "default_research_time_limit", deserialize_with = "research_time_limit")]
    pub time_limit: u32,
    #[serde(default = "default_research_max_urls", deserialize_with = "research_max_urls")]
    pub max_urls: u32,
}

fn default_llmstxt_max_urls() -> u32 {
    10
}

fn llmstxt_max_urls<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(count::opt_u32(d)?.unwrap_or_else(default_llmstxt_max_urls))
}

/// Body for `POST /v2/generate-llmstxt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateLlmsTxtRequest {
    pub url: String,
    #[serde(default = "default_llmstxt_max_urls", deserialize_with = "llmstxt_max_urls")]
    pub max_urls: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_full_text: Option<bool>,
}

/// Body for `POST /v2/batch/scrape`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchScrapeRequest {
    pub urls: Vec<String>,
    #[serde(flatten)]
    pub options: ScrapeOptions,
}

/// Acknowledgement returned when the remote accepts an asynchronous job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobAccepted {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}
