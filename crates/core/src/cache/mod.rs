//! File-backed storage for master and derived caches.
//!
//! Each cache is a two-level shard tree of document files whose modification
//! times carry the source timestamp. There is no index: every fact about a
//! cache is recovered from the tree itself. This module provides:
//!
//! - Atomic, idempotent per-document writes guarded by an in-progress marker
//! - Lazy scans and timestamp-ordered delta reads
//! - Compressed full-dump archives

mod archive;
mod layout;
pub mod scan;
pub mod store;
pub mod writer;

pub use archive::ArchiveSummary;
pub use scan::{EntriesSince, Scan, ScanEntry};
pub use store::{CacheStore, StoredEntry};
pub use writer::{EntryWriter, SkipReason, WriteOutcome};
