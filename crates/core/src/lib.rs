//! Core types and shared functionality for doccache.
//!
//! This crate provides:
//! - File-backed cache stores with atomic, timestamped entries
//! - The deduplicating update queue
//! - The engine: master synchronization, derived cache materialization,
//!   delta scans, snapshot archives and the background loops
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod queue;
pub mod source;
pub mod transform;

pub use cache::{CacheStore, EntriesSince, StoredEntry, WriteOutcome};
pub use config::{ConfigError, EngineConfig, TransformConfig};
pub use document::{ChangedDocument, DocId, Timestamp};
pub use engine::{Engine, Workers};
pub use error::Error;
pub use queue::{PendingUpdate, UpdateId, UpdateQueue};
pub use source::DocumentSource;
pub use transform::{Identity, Transform, TransformRegistry};
