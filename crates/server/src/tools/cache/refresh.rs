//! cache_refresh tool implementation.
//!
//! Forces a cache up to date: the master pulls from the remote source, a
//! derived cache re-materializes every stale entry.

use doccache_core::Engine;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the cache_refresh tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheRefreshParams {
    /// Cache to refresh.
    pub cache: String,
}

/// Implementation of the cache_refresh tool.
pub async fn refresh_impl(engine: &Engine, params: CacheRefreshParams) -> Result<CallToolResult, McpError> {
    let report = engine.force_refresh(&params.cache).await?;
    json_result(&report)
}
