//! cache_archive tool implementation.
//!
//! Reports where the latest archive of a cache is and how big it is.

use doccache_core::Engine;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the cache_archive tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheArchiveParams {
    /// Cache whose archive to describe.
    pub cache: String,
}

/// Implementation of the cache_archive tool.
pub async fn archive_impl(engine: &Engine, params: CacheArchiveParams) -> Result<CallToolResult, McpError> {
    let info = engine.archive_info(&params.cache).await?;
    json_result(&info)
}
