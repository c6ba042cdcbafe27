//! Lazy walks over the shard tree.

use std::collections::VecDeque;
use std::fs::{self, ReadDir};
use std::io;
use std::sync::Arc;

use serde::Serialize;

use super::layout::Layout;
use super::store::{CacheStore, StoredEntry};
use crate::{DocId, Error, Timestamp};

/// One committed entry as seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanEntry {
    pub doc_id: DocId,
    pub timestamp: Timestamp,
}

/// Depth-first iterator over `<root>/<aa>/<bb>/<entry>`.
///
/// Finite and cheap to restart: call [`CacheStore::scan`] again. Markers and
/// files that do not parse as entries are skipped. A missing root yields an
/// empty scan.
pub struct Scan {
    layout: Arc<Layout>,
    levels: Vec<ReadDir>,
}

impl Scan {
    pub(crate) fn new(layout: Arc<Layout>) -> Result<Self, Error> {
        let levels = match fs::read_dir(layout.root()) {
            Ok(root) => vec![root],
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { layout, levels })
    }
}

impl Iterator for Scan {
    type Item = Result<ScanEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let depth = self.levels.len();
            let dir = self.levels.last_mut()?;

            let entry = match dir.next() {
                None => {
                    self.levels.pop();
                    continue;
                }
                Some(Err(e)) => return Some(Err(e.into())),
                Some(Ok(entry)) => entry,
            };

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };

            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => return Some(Err(e.into())),
            };

            if depth < 3 {
                if file_type.is_dir() && Layout::is_shard_dir_name(file_name) {
                    match fs::read_dir(entry.path()) {
                        Ok(child) => self.levels.push(child),
                        Err(e) => return Some(Err(e.into())),
                    }
                }
                continue;
            }

            if !file_type.is_file() {
                continue;
            }
            let Some(doc_id) = self.layout.doc_id_from_file_name(file_name) else {
                continue;
            };

            match entry.metadata().and_then(|meta| meta.modified()) {
                Ok(modified) => {
                    return Some(Ok(ScanEntry { doc_id, timestamp: Timestamp::from_system_time(modified) }));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Timestamp-ordered reader over the entries of one cache.
///
/// The order is fixed when the reader is created; bytes are read one entry
/// at a time as the caller advances.
pub struct EntriesSince {
    store: CacheStore,
    pending: VecDeque<ScanEntry>,
}

impl EntriesSince {
    pub(crate) fn new(store: CacheStore, entries: Vec<ScanEntry>) -> Self {
        Self { store, pending: entries.into() }
    }

    /// Entries not yet read.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Drop pending entries ordered at or before `(timestamp, doc_id)`, so a
    /// read that stopped there resumes with the entry after it.
    pub fn skip_through(&mut self, timestamp: Timestamp, doc_id: &DocId) {
        while self
            .pending
            .front()
            .is_some_and(|next| (next.timestamp, &next.doc_id) <= (timestamp, doc_id))
        {
            self.pending.pop_front();
        }
    }

    /// Read the next entry's current bytes.
    pub async fn next_entry(&mut self) -> Option<Result<StoredEntry, Error>> {
        while let Some(next) = self.pending.pop_front() {
            match self.store.read_entry(&next.doc_id).await {
                Err(e) if e.is_miss() => continue,
                other => return Some(other),
            }
        }
        None
    }
}
