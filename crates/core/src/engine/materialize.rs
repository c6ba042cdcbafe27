//! Derived cache materialization.

use super::{CacheState, Engine};
use crate::{DocId, Error};

impl Engine {
    /// Re-derive `doc_id` into `cache` from the master's current version.
    ///
    /// The master entry is read once, bytes and timestamp together, and the
    /// derived entry is stamped with that timestamp, so a derived entry is
    /// never newer than its master. Returns `false` when the derived cache
    /// already holds that version or another writer is on it.
    pub(crate) async fn materialize(&self, cache: &CacheState, doc_id: &DocId) -> Result<bool, Error> {
        let master = self.master.store.read_entry(doc_id).await?;
        let Some(writer) = cache.store.begin(doc_id, master.timestamp).await? else {
            return Ok(false);
        };

        let derived = cache.transform.apply(doc_id, master.content).await?;
        writer.commit(derived).await?;
        cache.raise_last_sync(master.timestamp);

        tracing::debug!(
            cache = cache.name(),
            doc_id = %doc_id,
            timestamp = %master.timestamp,
            "derived entry written"
        );
        Ok(true)
    }
}
