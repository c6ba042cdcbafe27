//! MCP tool implementations.
//!
//! This module contains all tools exposed by the doccache server.

pub mod cache;

pub use cache::{
    CacheArchiveParams, CacheChangesParams, CacheGetParams, CacheRefreshParams, CacheSnapshotParams, archive_impl,
    changes_impl, get_impl, refresh_impl, snapshot_impl, status_impl,
};
