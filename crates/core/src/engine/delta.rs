//! Delta scans between the master and derived caches.

use std::sync::Arc;

use serde::Serialize;

use super::{CacheState, Engine, RefreshReport};
use crate::cache::CacheStore;
use crate::cache::writer::stored_timestamp;
use crate::queue::{PendingUpdate, UpdateId};
use crate::{DocId, Error, Timestamp};

/// A target entry that is missing or older than the master's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaItem {
    pub cache: String,
    pub doc_id: DocId,
    /// The master's timestamp for the document.
    pub timestamp: Timestamp,
}

/// Compare every master entry against each target. Blocking.
///
/// Items are ordered by master timestamp, then id, then cache name.
pub fn compute_delta(master: &CacheStore, targets: &[CacheStore]) -> Result<Vec<DeltaItem>, Error> {
    let mut delta = Vec::new();

    for entry in master.scan()? {
        let entry = entry?;
        for target in targets {
            let stored = stored_timestamp(&target.layout().entry_path(&entry.doc_id))?;
            if stored.is_none_or(|ts| ts < entry.timestamp) {
                delta.push(DeltaItem {
                    cache: target.name().to_string(),
                    doc_id: entry.doc_id.clone(),
                    timestamp: entry.timestamp,
                });
            }
        }
    }

    delta.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
            .then_with(|| a.cache.cmp(&b.cache))
    });
    Ok(delta)
}

impl Engine {
    async fn delta_for(&self, targets: &[Arc<CacheState>]) -> Result<Vec<DeltaItem>, Error> {
        let master = self.master.store.clone();
        let targets: Vec<CacheStore> = targets.iter().map(|cache| cache.store.clone()).collect();
        tokio::task::spawn_blocking(move || compute_delta(&master, &targets)).await?
    }

    /// Background delta pass: queue every stale derived entry.
    pub(crate) async fn enqueue_derived_deltas(&self) -> Result<usize, Error> {
        let delta = self.delta_for(&self.derived).await?;
        let total = delta.len();
        let queued = delta
            .into_iter()
            .filter(|item| {
                self.queue
                    .enqueue(PendingUpdate::materialize(item.cache.clone(), item.doc_id.clone(), item.timestamp))
            })
            .count();
        tracing::info!(stale = total, queued, "derived delta scan finished");
        Ok(queued)
    }

    /// Forced refresh of one derived cache: materialize its delta inline.
    ///
    /// Queued updates for the same documents are withdrawn first. Every
    /// item is attempted; any failure is reported after the pass.
    pub(crate) async fn refresh_derived(&self, cache: &Arc<CacheState>) -> Result<RefreshReport, Error> {
        let delta = self.delta_for(std::slice::from_ref(cache)).await?;
        let mut report = RefreshReport::new(cache.name(), delta.len());
        let mut failed = 0;

        for item in &delta {
            self.queue.cancel(&UpdateId::document(cache.name(), &item.doc_id));
            match self.materialize(cache, &item.doc_id).await {
                Ok(true) => report.written += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(cache = cache.name(), doc_id = %item.doc_id, error = %e, "forced materialization failed");
                }
            }
        }

        tracing::info!(
            cache = cache.name(),
            total = report.total,
            written = report.written,
            failed,
            "derived cache refreshed"
        );
        if failed > 0 {
            return Err(Error::RefreshIncomplete { cache: report.cache, failed, total: report.total });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FakeSource, drain, open_engine};
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn id(raw: &str) -> DocId {
        DocId::new(raw).unwrap()
    }

    async fn put(store: &CacheStore, doc: &str, ts: i64) {
        store
            .write(&id(doc), Bytes::from(doc.to_string()), Timestamp::from_millis(ts))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delta_reports_missing_entry() {
        let dir = TempDir::new().unwrap();
        let master = CacheStore::open("xml", dir.path().join("xml"), ".xml").await.unwrap();
        let derived = CacheStore::open("html", dir.path().join("html"), ".xml").await.unwrap();
        put(&master, "docA", 10).await;
        put(&master, "docB", 20).await;
        put(&derived, "docA", 10).await;

        let delta = compute_delta(&master, &[derived]).unwrap();
        assert_eq!(
            delta,
            vec![DeltaItem { cache: "html".into(), doc_id: id("docB"), timestamp: Timestamp::from_millis(20) }]
        );
    }

    #[tokio::test]
    async fn test_delta_reports_older_entries_in_order() {
        let dir = TempDir::new().unwrap();
        let master = CacheStore::open("xml", dir.path().join("xml"), ".xml").await.unwrap();
        let html = CacheStore::open("html", dir.path().join("html"), ".xml").await.unwrap();
        let text = CacheStore::open("text", dir.path().join("text"), ".xml").await.unwrap();
        put(&master, "docA", 30).await;
        put(&master, "docB", 10).await;
        put(&html, "docA", 25).await;
        put(&html, "docB", 10).await;

        let delta = compute_delta(&master, &[text, html]).unwrap();
        let got: Vec<_> = delta.iter().map(|d| (d.cache.as_str(), d.doc_id.as_str(), d.timestamp.as_millis())).collect();
        assert_eq!(got, vec![("text", "docB", 10), ("html", "docA", 30), ("text", "docA", 30)]);
    }

    #[tokio::test]
    async fn test_background_delta_enqueues_stale_entries() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new();
        let engine = open_engine(&dir, &source).await;
        put(engine.store("xml").unwrap(), "docA", 10).await;
        put(engine.store("xml").unwrap(), "docB", 20).await;

        assert_eq!(engine.enqueue_derived_deltas().await.unwrap(), 2);
        assert_eq!(engine.enqueue_derived_deltas().await.unwrap(), 0);
        assert_eq!(drain(&engine).await, 2);
        assert_eq!(engine.enqueue_derived_deltas().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_forced_refresh_supersedes_queued_items() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new();
        source.put("docA", 10, "<a/>");
        let engine = open_engine(&dir, &source).await;
        engine.force_refresh("xml").await.unwrap();
        assert_eq!(engine.queue().len(), 1);

        let report = engine.force_refresh("upper").await.unwrap();
        assert_eq!((report.total, report.written), (1, 1));
        assert!(engine.queue().is_empty());
        assert_eq!(engine.read("upper", &id("docA")).await.unwrap(), Bytes::from_static(b"<A/>"));
        assert_eq!(engine.status().caches[1].last_sync, Timestamp::from_millis(10));
    }

    #[tokio::test]
    async fn test_forced_refresh_reports_failures() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir, &FakeSource::new()).await;
        let master = engine.store("xml").unwrap();
        master.write(&id("docA"), Bytes::from_static(b"boom"), Timestamp::from_millis(1)).await.unwrap();
        master.write(&id("docB"), Bytes::from_static(b"ok"), Timestamp::from_millis(2)).await.unwrap();

        let err = engine.force_refresh("upper").await.unwrap_err();
        assert!(matches!(err, Error::RefreshIncomplete { failed: 1, total: 2, .. }));
        assert_eq!(engine.read("upper", &id("docB")).await.unwrap(), Bytes::from_static(b"OK"));
    }
}
