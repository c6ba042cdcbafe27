//! Deduplicating FIFO of pending cache updates.
//!
//! One mutex guards both the order and the identity set, so "is it pending"
//! and "enqueue it" are a single step. Consumers block on a [`Notify`] with
//! a bounded wait.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use crate::{ChangedDocument, DocId, Timestamp};

/// Reserved key of the master's batch update.
pub const MASTER_BATCH_KEY: &str = "masterCacheUpdate";

/// Dedup key of a pending update: `(cache name, document key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateId {
    pub cache: String,
    pub key: String,
}

impl UpdateId {
    pub fn document(cache: impl Into<String>, doc_id: &DocId) -> Self {
        Self { cache: cache.into(), key: doc_id.as_str().to_string() }
    }

    pub fn master_batch(master: impl Into<String>) -> Self {
        Self { cache: master.into(), key: MASTER_BATCH_KEY.to_string() }
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cache, self.key)
    }
}

/// What applying an update does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateTask {
    /// Write a sorted listing into the master cache.
    MasterBatch(Vec<ChangedDocument>),
    /// Re-derive one document from the master.
    Materialize(DocId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub id: UpdateId,
    /// Version the update was enqueued for. Advisory: appliers read the
    /// current master state.
    pub timestamp: Timestamp,
    pub task: UpdateTask,
}

impl PendingUpdate {
    pub fn materialize(cache: impl Into<String>, doc_id: DocId, timestamp: Timestamp) -> Self {
        Self { id: UpdateId::document(cache, &doc_id), timestamp, task: UpdateTask::Materialize(doc_id) }
    }

    /// A master batch, tagged with the newest timestamp it carries.
    pub fn master_batch(master: impl Into<String>, batch: Vec<ChangedDocument>) -> Self {
        let timestamp = batch.iter().map(|doc| doc.timestamp).max().unwrap_or_default();
        Self { id: UpdateId::master_batch(master), timestamp, task: UpdateTask::MasterBatch(batch) }
    }
}

#[derive(Default)]
struct Inner {
    order: VecDeque<PendingUpdate>,
    pending: HashSet<UpdateId>,
}

/// At most one outstanding update per [`UpdateId`].
///
/// An identity stays pending from `enqueue` until `apply` (or `cancel`)
/// clears it, including while the dequeued item waits to be applied.
#[derive(Default)]
pub struct UpdateQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(op, result = "poisoned_recovered", "Recovered from poisoned update queue lock");
                poisoned.into_inner()
            }
        }
    }

    /// Append `update` unless its identity is already pending.
    ///
    /// Returns whether the update was added. The first enqueue keeps its
    /// position and payload.
    pub fn enqueue(&self, update: PendingUpdate) -> bool {
        {
            let mut inner = self.lock("enqueue");
            if !inner.pending.insert(update.id.clone()) {
                tracing::trace!(id = %update.id, "update already pending");
                return false;
            }
            inner.order.push_back(update);
        }
        self.notify.notify_one();
        true
    }

    /// Take the oldest update, waiting up to `wait` for one to arrive.
    pub async fn dequeue(&self, wait: Duration) -> Option<PendingUpdate> {
        if let Some(update) = self.try_dequeue() {
            return Some(update);
        }
        let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        self.try_dequeue()
    }

    pub fn try_dequeue(&self) -> Option<PendingUpdate> {
        self.lock("dequeue").order.pop_front()
    }

    /// Run `action` for a dequeued update if its identity is still pending.
    ///
    /// The identity is cleared before `action` starts, so an enqueue made
    /// while it runs queues a fresh update. Returns whether `action` ran.
    pub async fn apply<F, Fut>(&self, update: PendingUpdate, action: F) -> bool
    where
        F: FnOnce(PendingUpdate) -> Fut,
        Fut: Future<Output = ()>,
    {
        let still_pending = self.lock("apply").pending.remove(&update.id);
        if !still_pending {
            tracing::debug!(id = %update.id, "update withdrawn before apply");
            return false;
        }
        action(update).await;
        true
    }

    /// Withdraw a pending identity, queued or already dequeued.
    pub fn cancel(&self, id: &UpdateId) -> bool {
        let mut inner = self.lock("cancel");
        if !inner.pending.remove(id) {
            return false;
        }
        inner.order.retain(|update| &update.id != id);
        true
    }

    pub fn is_pending(&self, id: &UpdateId) -> bool {
        self.lock("is_pending").pending.contains(id)
    }

    /// Outstanding identities, including dequeued ones not yet applied.
    pub fn len(&self) -> usize {
        self.lock("len").pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateQueue").field("pending", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id(raw: &str) -> DocId {
        DocId::new(raw).unwrap()
    }

    fn update(cache: &str, doc: &str, ts: i64) -> PendingUpdate {
        PendingUpdate::materialize(cache, id(doc), Timestamp::from_millis(ts))
    }

    #[test]
    fn test_enqueue_dedups_by_identity() {
        let queue = UpdateQueue::new();
        assert!(queue.enqueue(update("html", "docA", 1)));
        assert!(!queue.enqueue(update("html", "docA", 2)));
        assert!(queue.enqueue(update("text", "docA", 1)));
        assert_eq!(queue.len(), 2);

        // First enqueue wins position and payload.
        let first = queue.try_dequeue().unwrap();
        assert_eq!(first.timestamp, Timestamp::from_millis(1));
        assert_eq!(first.id.cache, "html");
    }

    #[tokio::test]
    async fn test_identity_stays_pending_until_applied() {
        let queue = UpdateQueue::new();
        queue.enqueue(update("html", "docA", 1));
        let taken = queue.dequeue(Duration::from_millis(10)).await.unwrap();

        assert!(queue.is_pending(&taken.id));
        assert!(!queue.enqueue(update("html", "docA", 2)));

        let ran = queue.apply(taken, |_| async {}).await;
        assert!(ran);
        assert!(queue.is_empty());
        assert!(queue.enqueue(update("html", "docA", 3)));
    }

    #[tokio::test]
    async fn test_enqueue_during_apply_requeues() {
        let queue = Arc::new(UpdateQueue::new());
        queue.enqueue(update("html", "docA", 1));
        let taken = queue.try_dequeue().unwrap();

        let inner = Arc::clone(&queue);
        queue
            .apply(taken, |_| async move {
                assert!(inner.enqueue(update("html", "docA", 2)));
            })
            .await;

        let again = queue.try_dequeue().unwrap();
        assert_eq!(again.timestamp, Timestamp::from_millis(2));
    }

    #[tokio::test]
    async fn test_cancelled_update_is_not_applied() {
        let queue = UpdateQueue::new();
        queue.enqueue(update("html", "docA", 1));
        queue.enqueue(update("html", "docB", 1));

        let taken = queue.try_dequeue().unwrap();
        assert!(queue.cancel(&taken.id));
        assert!(queue.cancel(&UpdateId::document("html", &id("docB"))));
        assert!(queue.try_dequeue().is_none());

        let calls = AtomicUsize::new(0);
        let ran = queue
            .apply(taken, |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(!ran);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = UpdateQueue::new();
        assert!(queue.dequeue(Duration::from_millis(5)).await.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(UpdateQueue::new());
        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.enqueue(update("html", "docA", 1));
        });

        let taken = queue.dequeue(Duration::from_secs(5)).await;
        assert_eq!(taken.map(|u| u.id.key), Some("docA".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_keeps_one_pending() {
        let queue = Arc::new(UpdateQueue::new());
        let mut handles = Vec::new();
        for ts in 0..32 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move { queue.enqueue(update("html", "docA", ts)) }));
        }
        let mut added = 0;
        for handle in handles {
            if handle.await.unwrap() {
                added += 1;
            }
        }
        assert_eq!(added, 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_master_batch_identity() {
        let batch = vec![
            ChangedDocument::new(id("docA"), Timestamp::from_millis(100)),
            ChangedDocument::new(id("docB"), Timestamp::from_millis(105)),
        ];
        let update = PendingUpdate::master_batch("xml", batch);
        assert_eq!(update.id, UpdateId { cache: "xml".into(), key: MASTER_BATCH_KEY.into() });
        assert_eq!(update.timestamp, Timestamp::from_millis(105));
        assert_eq!(update.id.to_string(), "xml/masterCacheUpdate");
    }
}
