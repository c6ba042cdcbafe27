//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use doccache_core::Engine;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

use crate::tools::{
    CacheArchiveParams, CacheChangesParams, CacheGetParams, CacheRefreshParams, CacheSnapshotParams, archive_impl,
    changes_impl, get_impl, refresh_impl, snapshot_impl, status_impl,
};

/// The main MCP server handler for doccache.
#[derive(Clone)]
pub struct DocCacheServer {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl DocCacheServer {
    /// Create a new server handler over a running engine.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine, tool_router: Self::tool_router() }
    }

    #[tool(description = "Read the current version of one document from a cache. Returns its timestamp and text.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        get_impl(&self.engine, params.0).await
    }

    /// List entries changed since a timestamp.
    ///
    /// The bound is inclusive and results are oldest first, so `next_since`
    /// can be fed back to page through a large delta.
    #[tool(
        description = "List the entries of a cache modified at or after a timestamp (ms), oldest first. since=0 returns everything. Continue with since=next_since and after=next_after."
    )]
    async fn cache_changes(&self, params: Parameters<CacheChangesParams>) -> Result<CallToolResult, McpError> {
        changes_impl(&self.engine, params.0).await
    }

    #[tool(
        description = "Force a cache up to date now. The master pulls remote changes; a derived cache re-derives stale entries."
    )]
    async fn cache_refresh(&self, params: Parameters<CacheRefreshParams>) -> Result<CallToolResult, McpError> {
        refresh_impl(&self.engine, params.0).await
    }

    #[tool(description = "Rebuild a cache's zip archive immediately if anything changed since the last one.")]
    async fn cache_snapshot(&self, params: Parameters<CacheSnapshotParams>) -> Result<CallToolResult, McpError> {
        snapshot_impl(&self.engine, params.0).await
    }

    #[tool(description = "Describe the latest zip archive of a cache: path, size and timestamp.")]
    async fn cache_archive(&self, params: Parameters<CacheArchiveParams>) -> Result<CallToolResult, McpError> {
        archive_impl(&self.engine, params.0).await
    }

    #[tool(description = "Show every cache with its sync and snapshot timestamps, the remote cursor and the queue length.")]
    async fn cache_status(&self) -> Result<CallToolResult, McpError> {
        status_impl(&self.engine).await
    }
}

impl ServerHandler for DocCacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "doccache".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Replicated document caches. Read entries with cache_get or cache_changes; \
                 force updates with cache_refresh and cache_snapshot."
                    .into(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
