//! cache_snapshot tool implementation.
//!
//! Rebuilds a cache's archive immediately when it is stale.

use doccache_core::Engine;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the cache_snapshot tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheSnapshotParams {
    /// Cache to archive.
    pub cache: String,
}

/// Implementation of the cache_snapshot tool.
pub async fn snapshot_impl(engine: &Engine, params: CacheSnapshotParams) -> Result<CallToolResult, McpError> {
    let outcome = engine.force_snapshot(&params.cache).await?;
    json_result(&outcome)
}
