//! cache_status tool implementation.

use doccache_core::Engine;
use rmcp::{ErrorData as McpError, model::CallToolResult};

use super::json_result;

/// Implementation of the cache_status tool.
pub async fn status_impl(engine: &Engine) -> Result<CallToolResult, McpError> {
    json_result(&engine.status())
}
