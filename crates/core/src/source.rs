//! Remote document source consumed by the master synchronizer.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{ChangedDocument, DocId, Error, Timestamp};

/// A document collection that can report changes and serve documents.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Documents whose source timestamp is strictly greater than `since`.
    ///
    /// Order is not relied upon; the synchronizer sorts the listing.
    async fn list_changed_since(&self, since: Timestamp) -> Result<Vec<ChangedDocument>, Error>;

    /// Current content of one document.
    async fn fetch_document(&self, doc_id: &DocId) -> Result<Bytes, Error>;
}
