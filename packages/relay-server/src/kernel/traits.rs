// Trait definitions for dependency injection
//
// Infrastructure seams only. The relay's own logic lives in the adapter,
// executor and job manager, which are written against these traits.
//
// Naming convention: Base* for trait names (e.g., BaseFirecrawl)

use async_trait::async_trait;
use firecrawl_client::Result;
use serde_json::Value;

// =============================================================================
// Firecrawl Trait (Infrastructure - one HTTP round trip per call)
// =============================================================================

#[async_trait]
pub trait BaseFirecrawl: Send + Sync {
    /// POST a JSON body to `path`, returning the decoded response body.
    async fn post(&self, path: &str, body: &Value) -> Result<Value>;

    /// GET `path`, returning the decoded response body.
    async fn get(&self, path: &str) -> Result<Value>;
}
