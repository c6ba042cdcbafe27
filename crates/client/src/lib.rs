//! Client code for doccache.
//!
//! This crate provides the concrete collaborators the engine talks to: an
//! HTTP client for the remote document service and external-program
//! transform pipelines for derived caches.

pub mod source;
pub mod transform;

pub use source::{HttpSource, SourceConfig};
pub use transform::{CommandTransform, transform_registry};
