//! Transform pipelines applied when materializing derived caches.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{DocId, Error};

/// Maps one master document to its derived form.
///
/// Implementations are opaque to the engine; they only need to be pure
/// with respect to the input bytes.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Short label used in logs and status output.
    fn name(&self) -> &str;

    async fn apply(&self, doc_id: &DocId, content: Bytes) -> Result<Bytes, Error>;
}

/// The master cache's transform.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

#[async_trait]
impl Transform for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    async fn apply(&self, _doc_id: &DocId, content: Bytes) -> Result<Bytes, Error> {
        Ok(content)
    }
}

/// Derived cache name → transform.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, cache_name: impl Into<String>, transform: Arc<dyn Transform>) -> Self {
        self.insert(cache_name, transform);
        self
    }

    pub fn insert(&mut self, cache_name: impl Into<String>, transform: Arc<dyn Transform>) {
        self.transforms.insert(cache_name.into(), transform);
    }

    pub fn get(&self, cache_name: &str) -> Result<Arc<dyn Transform>, Error> {
        self.transforms
            .get(cache_name)
            .cloned()
            .ok_or_else(|| Error::UnknownCache(cache_name.to_string()))
    }

    /// Registered cache names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.transforms.iter().map(|(cache, t)| (cache, t.name())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Transform for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn apply(&self, _doc_id: &DocId, content: Bytes) -> Result<Bytes, Error> {
            Ok(Bytes::from(content.to_ascii_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_identity_returns_input() {
        let id = DocId::new("docA").unwrap();
        let out = Identity.apply(&id, Bytes::from_static(b"<a/>")).await.unwrap();
        assert_eq!(out, Bytes::from_static(b"<a/>"));
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = TransformRegistry::new().with("upper", Arc::new(Upper));
        let id = DocId::new("docA").unwrap();

        let t = registry.get("upper").unwrap();
        assert_eq!(t.apply(&id, Bytes::from_static(b"<a/>")).await.unwrap(), Bytes::from_static(b"<A/>"));
        assert!(matches!(registry.get("missing"), Err(Error::UnknownCache(_))));
        assert_eq!(registry.names(), vec!["upper".to_string()]);
    }
}
