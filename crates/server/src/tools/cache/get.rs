//! cache_get tool implementation.
//!
//! Retrieves the current version of one document from a cache.

use doccache_core::{DocId, Engine};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{json_result, text_content};

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// Cache to read from (the master or a derived cache).
    pub cache: String,

    /// Document id.
    pub doc_id: String,
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetOutput {
    pub cache: String,
    pub doc_id: String,
    /// Version of the returned content, in milliseconds since the epoch.
    pub timestamp: i64,
    pub bytes: usize,
    /// Document text; absent when the content is not UTF-8.
    pub content: Option<String>,
}

/// Implementation of the cache_get tool.
pub async fn get_impl(engine: &Engine, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    let doc_id = DocId::new(params.doc_id)?;
    let entry = engine.read_entry(&params.cache, &doc_id).await?;

    let output = CacheGetOutput {
        cache: params.cache,
        doc_id: entry.doc_id.to_string(),
        timestamp: entry.timestamp.as_millis(),
        bytes: entry.content.len(),
        content: text_content(entry.content),
    };
    json_result(&output)
}
