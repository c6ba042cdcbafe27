//! Master synchronizer: pulls remote changes into the master cache.

use std::sync::atomic::Ordering;

use super::{Engine, RefreshReport};
use crate::cache::{SkipReason, WriteOutcome};
use crate::queue::PendingUpdate;
use crate::{ChangedDocument, Error};

impl Engine {
    /// Remote changes since the cursor, oldest first, ties by id.
    async fn list_master_changes(&self) -> Result<Vec<ChangedDocument>, Error> {
        let since = self.last_seen();
        let mut batch = self.source.list_changed_since(since).await?;
        batch.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.doc_id.cmp(&b.doc_id)));
        tracing::debug!(since = %since, listed = batch.len(), "listed remote changes");
        Ok(batch)
    }

    /// Forced pass: list and apply inline, propagating the first failure.
    pub(crate) async fn sync_master(&self) -> Result<RefreshReport, Error> {
        let _pass = self.master_pass.lock().await;
        let batch = self.list_master_changes().await?;
        self.write_master_batch(&batch).await
    }

    /// Background pass: queue the listing as one master batch.
    ///
    /// The cursor moves only when the batch is applied, so a batch that is
    /// still pending is simply listed again on the next poll.
    pub(crate) async fn enqueue_master_batch(&self) -> Result<usize, Error> {
        let batch = self.list_master_changes().await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let listed = batch.len();
        if !self.queue.enqueue(PendingUpdate::master_batch(self.master.name(), batch)) {
            tracing::debug!(listed, "previous master batch still pending");
            return Ok(0);
        }
        Ok(listed)
    }

    /// Apply a queued master batch.
    pub(crate) async fn apply_master_batch(&self, batch: &[ChangedDocument]) -> Result<RefreshReport, Error> {
        let _pass = self.master_pass.lock().await;
        self.write_master_batch(batch).await
    }

    /// Write a sorted batch into the master cache. Callers hold `master_pass`.
    ///
    /// On success the cursor advances to the newest timestamp in the batch.
    /// On the first failure the rest is abandoned and the cursor is set just
    /// below the failed document's timestamp, so the next listing includes
    /// it and anything sharing its timestamp. A document whose key is held
    /// by another writer caps the cursor the same way, since that write may
    /// still fail.
    async fn write_master_batch(&self, batch: &[ChangedDocument]) -> Result<RefreshReport, Error> {
        let mut report = RefreshReport::new(self.master.name(), batch.len());
        let mut contended: Option<&ChangedDocument> = None;

        for doc in batch {
            match self.sync_document(doc).await {
                Ok(WriteOutcome::Written) => report.written += 1,
                Ok(WriteOutcome::Skipped(reason)) => {
                    report.skipped += 1;
                    if reason == SkipReason::InProgress && contended.is_none() {
                        contended = Some(doc);
                    }
                }
                Err(e) => {
                    // The batch is sorted, so an earlier busy entry is never newer.
                    let retry_from = contended.unwrap_or(doc).timestamp.pred();
                    self.last_seen.store(retry_from.as_millis(), Ordering::Release);
                    tracing::warn!(
                        doc_id = %doc.doc_id,
                        timestamp = %doc.timestamp,
                        retry_from = %retry_from,
                        written = report.written,
                        error = %e,
                        "master sync aborted"
                    );
                    return Err(e);
                }
            }
        }

        if let Some(doc) = contended {
            let retry_from = doc.timestamp.pred();
            self.last_seen.store(retry_from.as_millis(), Ordering::Release);
            tracing::info!(
                doc_id = %doc.doc_id,
                timestamp = %doc.timestamp,
                retry_from = %retry_from,
                "master entry busy, will be listed again"
            );
        } else if let Some(newest) = batch.last() {
            self.last_seen.fetch_max(newest.timestamp.as_millis(), Ordering::AcqRel);
        }

        if report.written > 0 {
            tracing::info!(
                written = report.written,
                skipped = report.skipped,
                last_seen = %self.last_seen(),
                "master cache synchronized"
            );
        }
        Ok(report)
    }

    /// Fetch and store one document, then queue it for every derived cache.
    ///
    /// Skips without fetching when the master already holds this version or
    /// another writer is on it.
    async fn sync_document(&self, doc: &ChangedDocument) -> Result<WriteOutcome, Error> {
        let writer = match self.master.store.claim(&doc.doc_id, doc.timestamp).await? {
            Ok(writer) => writer,
            Err(reason) => return Ok(WriteOutcome::Skipped(reason)),
        };
        let content = self.source.fetch_document(&doc.doc_id).await?;
        writer.commit(content).await?;
        self.master.raise_last_sync(doc.timestamp);
        tracing::debug!(doc_id = %doc.doc_id, timestamp = %doc.timestamp, "master entry written");

        for cache in &self.derived {
            self.queue
                .enqueue(PendingUpdate::materialize(cache.name(), doc.doc_id.clone(), doc.timestamp));
        }
        Ok(WriteOutcome::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FakeSource, drain, open_engine};
    use crate::queue::UpdateId;
    use crate::{DocId, Timestamp};
    use bytes::Bytes;
    use tempfile::TempDir;

    fn id(raw: &str) -> DocId {
        DocId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_failed_document_is_listed_again() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new();
        source.put("docA", 100, "<a/>");
        source.put("docB", 105, "<b/>");
        source.fail("docB");
        let engine = open_engine(&dir, &source).await;

        let err = engine.force_refresh("xml").await.unwrap_err();
        assert!(err.to_string().starts_with("SOURCE_FAILED"));
        assert_eq!(engine.last_seen(), Timestamp::from_millis(104));
        assert_eq!(engine.read("xml", &id("docA")).await.unwrap(), Bytes::from_static(b"<a/>"));
        assert!(engine.read("xml", &id("docB")).await.unwrap_err().is_miss());

        source.heal("docB");
        let report = engine.force_refresh("xml").await.unwrap();
        assert_eq!(source.listings(), vec![Timestamp::ZERO, Timestamp::from_millis(104)]);
        assert_eq!((report.total, report.written), (1, 1));
        assert_eq!(engine.last_seen(), Timestamp::from_millis(105));
    }

    #[tokio::test]
    async fn test_batch_is_applied_in_timestamp_order() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new();
        source.put("docC", 30, "c");
        source.put("docA", 10, "a");
        source.put("docB", 20, "b");
        source.fail("docB");
        let engine = open_engine(&dir, &source).await;

        assert!(engine.force_refresh("xml").await.is_err());
        // docA (10) went in before docB (20) failed; docC (30) was never tried.
        assert!(engine.store("xml").unwrap().exists(&id("docA")).await.unwrap().is_some());
        assert!(engine.store("xml").unwrap().exists(&id("docC")).await.unwrap().is_none());
        assert_eq!(engine.last_seen(), Timestamp::from_millis(19));
    }

    #[tokio::test]
    async fn test_up_to_date_document_is_not_fetched() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new();
        source.put("docA", 10, "a");
        let engine = open_engine(&dir, &source).await;

        engine.force_refresh("xml").await.unwrap();
        assert_eq!(source.fetches(), 1);
        drain(&engine).await;

        // Rewind the cursor as a rollback would; the listing repeats docA.
        engine.last_seen.store(0, std::sync::atomic::Ordering::Release);
        let report = engine.force_refresh("xml").await.unwrap();
        assert_eq!((report.written, report.skipped), (0, 1));
        assert_eq!(source.fetches(), 1);
        assert!(engine.queue().is_empty());
    }

    #[tokio::test]
    async fn test_background_batch_advances_cursor_only_when_applied() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new();
        source.put("docA", 10, "a");
        let engine = open_engine(&dir, &source).await;

        assert_eq!(engine.enqueue_master_batch().await.unwrap(), 1);
        assert_eq!(engine.last_seen(), Timestamp::ZERO);

        // A second poll while the batch waits neither duplicates nor loses it.
        source.put("docB", 20, "b");
        assert_eq!(engine.enqueue_master_batch().await.unwrap(), 0);
        assert!(engine.queue().is_pending(&UpdateId::master_batch("xml")));

        drain(&engine).await;
        assert_eq!(engine.last_seen(), Timestamp::from_millis(10));

        assert_eq!(engine.enqueue_master_batch().await.unwrap(), 1);
        drain(&engine).await;
        assert_eq!(engine.last_seen(), Timestamp::from_millis(20));
        assert_eq!(engine.read("upper", &id("docB")).await.unwrap(), Bytes::from_static(b"B"));
    }

    #[tokio::test]
    async fn test_busy_entry_is_listed_again() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new();
        source.put("docA", 100, "a");
        source.put("docB", 105, "b");
        source.put("docC", 110, "c");
        let engine = open_engine(&dir, &source).await;

        // Another writer holds docB while the pass runs.
        let claim = engine
            .store("xml")
            .unwrap()
            .begin(&id("docB"), Timestamp::from_millis(105))
            .await
            .unwrap()
            .unwrap();
        let report = engine.force_refresh("xml").await.unwrap();
        assert_eq!((report.total, report.written, report.skipped), (3, 2, 1));
        assert_eq!(engine.last_seen(), Timestamp::from_millis(104));

        // That writer gives up without committing.
        drop(claim);
        let report = engine.force_refresh("xml").await.unwrap();
        assert_eq!(source.listings().last(), Some(&Timestamp::from_millis(104)));
        assert_eq!((report.total, report.written, report.skipped), (2, 1, 1));
        assert_eq!(engine.read("xml", &id("docB")).await.unwrap(), Bytes::from_static(b"b"));
        assert_eq!(engine.last_seen(), Timestamp::from_millis(110));
    }

    #[tokio::test]
    async fn test_failure_after_busy_entry_rolls_back_below_both() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new();
        source.put("docA", 100, "a");
        source.put("docB", 105, "b");
        source.fail("docB");
        let engine = open_engine(&dir, &source).await;

        let _claim = engine
            .store("xml")
            .unwrap()
            .begin(&id("docA"), Timestamp::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert!(engine.force_refresh("xml").await.is_err());
        assert_eq!(engine.last_seen(), Timestamp::from_millis(99));
    }

    #[tokio::test]
    async fn test_master_passes_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new();
        source.put("docA", 10, "a");
        source.put("docB", 20, "b");
        let engine = open_engine(&dir, &source).await;

        let (first, second) = tokio::join!(engine.force_refresh("xml"), engine.force_refresh("xml"));
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.written + second.written, 2);
        assert_eq!(first.skipped + second.skipped, 0);
        assert_eq!(source.fetches(), 2);
        assert_eq!(engine.last_seen(), Timestamp::from_millis(20));
    }
}
