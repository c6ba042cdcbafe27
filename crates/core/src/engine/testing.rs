//! In-memory collaborators for engine tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;

use super::Engine;
use crate::config::EngineConfig;
use crate::source::DocumentSource;
use crate::transform::{Transform, TransformRegistry};
use crate::{ChangedDocument, DocId, Error, Timestamp};

#[derive(Default)]
struct SourceState {
    documents: BTreeMap<DocId, (Timestamp, Bytes)>,
    failing: HashSet<DocId>,
    listings: Vec<Timestamp>,
    fetches: usize,
}

/// Remote source backed by a map. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct FakeSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&self, doc_id: &str, timestamp: i64, content: &str) {
        let doc_id = DocId::new(doc_id).unwrap();
        self.state
            .lock()
            .unwrap()
            .documents
            .insert(doc_id, (Timestamp::from_millis(timestamp), Bytes::from(content.to_string())));
    }

    pub(crate) fn fail(&self, doc_id: &str) {
        self.state.lock().unwrap().failing.insert(DocId::new(doc_id).unwrap());
    }

    pub(crate) fn heal(&self, doc_id: &str) {
        self.state.lock().unwrap().failing.remove(&DocId::new(doc_id).unwrap());
    }

    /// Every `since` argument seen by `list_changed_since`, in call order.
    pub(crate) fn listings(&self) -> Vec<Timestamp> {
        self.state.lock().unwrap().listings.clone()
    }

    pub(crate) fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }
}

#[async_trait]
impl DocumentSource for FakeSource {
    async fn list_changed_since(&self, since: Timestamp) -> Result<Vec<ChangedDocument>, Error> {
        let mut state = self.state.lock().unwrap();
        state.listings.push(since);
        // Reverse order: the synchronizer must sort.
        Ok(state
            .documents
            .iter()
            .rev()
            .filter(|(_, (ts, _))| *ts > since)
            .map(|(id, (ts, _))| ChangedDocument::new(id.clone(), *ts))
            .collect())
    }

    async fn fetch_document(&self, doc_id: &DocId) -> Result<Bytes, Error> {
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        if state.failing.contains(doc_id) {
            return Err(Error::SourceFailed(format!("fetch of {doc_id} refused")));
        }
        state
            .documents
            .get(doc_id)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| Error::SourceFailed(format!("{doc_id} not found")))
    }
}

/// Upper-cases ASCII; fails on documents containing `boom`.
pub(crate) struct Upper;

#[async_trait]
impl Transform for Upper {
    fn name(&self) -> &str {
        "upper"
    }

    async fn apply(&self, doc_id: &DocId, content: Bytes) -> Result<Bytes, Error> {
        if content.windows(4).any(|w| w == b"boom") {
            return Err(Error::TransformFailed(format!("{doc_id}: refused")));
        }
        Ok(Bytes::from(content.to_ascii_uppercase()))
    }
}

pub(crate) fn test_config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        cache_root: dir.path().to_path_buf(),
        startup_delay_secs: 0,
        snapshot_pause_ms: 0,
        queue_wait_ms: 10,
        ..Default::default()
    }
}

/// Engine with master `xml` and one derived cache `upper`.
pub(crate) async fn open_engine(dir: &TempDir, source: &FakeSource) -> Arc<Engine> {
    let transforms = TransformRegistry::new().with("upper", Arc::new(Upper));
    Engine::open(&test_config(dir), Arc::new(source.clone()), transforms).await.unwrap()
}

/// Apply queued updates until the queue is empty. Returns how many ran.
pub(crate) async fn drain(engine: &Engine) -> usize {
    let mut applied = 0;
    while let Some(update) = engine.queue().try_dequeue() {
        engine.apply_update(update).await;
        applied += 1;
    }
    applied
}
