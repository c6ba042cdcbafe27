//! cache_changes tool implementation.
//!
//! Lists the entries of a cache modified at or after a timestamp, oldest
//! first, ties by doc id. A `since` of 0 walks the whole cache. Paging
//! resumes from `(next_since, next_after)`, which is unique even when many
//! entries share a timestamp.

use doccache_core::{DocId, Engine, Error, Timestamp};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{json_result, text_content};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1_000;

/// Parameters for the cache_changes tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheChangesParams {
    /// Cache to read from.
    pub cache: String,

    /// Inclusive lower bound, in milliseconds since the epoch.
    #[serde(default)]
    pub since: i64,

    /// Skip entries at `since` up to and including this doc id.
    #[serde(default)]
    pub after: Option<String>,

    /// Maximum number of entries to return (default 100, max 1000).
    #[serde(default)]
    pub limit: Option<usize>,

    /// Whether to include document text in each entry.
    #[serde(default)]
    pub include_content: bool,
}

/// One returned entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChangedEntry {
    pub doc_id: String,
    pub timestamp: i64,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Output from the cache_changes tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheChangesOutput {
    pub cache: String,
    pub since: i64,
    pub entries: Vec<ChangedEntry>,
    /// Matching entries not returned because of `limit`.
    pub remaining: usize,
    /// Pass as `since` to continue; equal to the last returned timestamp.
    pub next_since: Option<i64>,
    /// Pass as `after` to continue; the last returned doc id.
    pub next_after: Option<String>,
}

/// Implementation of the cache_changes tool.
pub async fn changes_impl(engine: &Engine, params: CacheChangesParams) -> Result<CallToolResult, McpError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(Error::InvalidInput(format!("limit must be between 1 and {MAX_LIMIT}")).into());
    }

    let since = Timestamp::from_millis(params.since);
    let after = params.after.map(DocId::new).transpose()?;

    let mut reader = engine.read_all_since(&params.cache, since).await?;
    if let Some(after) = &after {
        reader.skip_through(since, after);
    }

    let mut entries = Vec::new();
    while entries.len() < limit {
        let Some(entry) = reader.next_entry().await else {
            break;
        };
        let entry = entry?;
        entries.push(ChangedEntry {
            doc_id: entry.doc_id.to_string(),
            timestamp: entry.timestamp.as_millis(),
            bytes: entry.content.len(),
            content: if params.include_content { text_content(entry.content) } else { None },
        });
    }

    let output = CacheChangesOutput {
        cache: params.cache,
        since: params.since,
        next_since: entries.last().map(|e| e.timestamp),
        next_after: entries.last().map(|e| e.doc_id.clone()),
        remaining: reader.remaining(),
        entries,
    };
    json_result(&output)
}
