//! Cache-related MCP tools.
//!
//! This module provides tools for reading cache entries and archives and for
//! driving forced refreshes and snapshot builds.

pub mod archive;
pub mod changes;
pub mod get;
pub mod refresh;
pub mod snapshot;
pub mod status;

pub use archive::{CacheArchiveParams, archive_impl};
pub use changes::{CacheChangesParams, changes_impl};
pub use get::{CacheGetParams, get_impl};
pub use refresh::{CacheRefreshParams, refresh_impl};
pub use snapshot::{CacheSnapshotParams, snapshot_impl};
pub use status::status_impl;

use bytes::Bytes;
use doccache_core::Error;
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

/// Render `output` as the pretty-printed JSON text of a successful result.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Document bytes as text, when they are valid UTF-8.
pub(crate) fn text_content(content: Bytes) -> Option<String> {
    String::from_utf8(content.to_vec()).ok()
}
