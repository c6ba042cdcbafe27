//! Sharded, timestamp-indexed file store for one cache.
//!
//! Filesystem work runs on tokio's blocking pool; every async method hands a
//! closure over the shared [`Layout`] to [`CacheStore::call`].

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use super::layout::Layout;
use super::scan::{EntriesSince, Scan, ScanEntry};
use super::writer::{EntryWriter, SkipReason, WriteOutcome, stored_timestamp};
use crate::{DocId, Error, Timestamp};

/// A committed entry read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub doc_id: DocId,
    pub timestamp: Timestamp,
    pub content: Bytes,
}

/// Storage handle for one named cache. Cheap to clone.
#[derive(Clone, Debug)]
pub struct CacheStore {
    layout: Arc<Layout>,
}

impl CacheStore {
    /// Open the cache rooted at `root`, creating directories as needed.
    ///
    /// Leftovers of interrupted writes (in-progress markers and a partial
    /// archive) are removed before the store is handed out.
    pub async fn open(name: &str, root: impl Into<PathBuf>, extension: &str) -> Result<Self, Error> {
        let layout = Arc::new(Layout::new(name, root, extension));
        let store = Self { layout };

        let removed = store
            .call(|layout| {
                fs::create_dir_all(layout.root())?;
                recover(layout)
            })
            .await?;

        if removed > 0 {
            tracing::warn!(cache = name, removed, "removed leftovers of interrupted writes");
        }

        Ok(store)
    }

    async fn call<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Layout) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let layout = Arc::clone(&self.layout);
        tokio::task::spawn_blocking(move || f(&layout)).await?
    }

    pub fn name(&self) -> &str {
        self.layout.name()
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn extension(&self) -> &str {
        self.layout.extension()
    }

    pub fn archive_path(&self) -> PathBuf {
        self.layout.archive_path()
    }

    pub(crate) fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    /// Claim `(this cache, doc_id)` for a write at `timestamp`.
    ///
    /// Returns `Ok(None)` when the write should be skipped: another writer
    /// holds the key, or the entry is already at `timestamp`.
    pub async fn begin(&self, doc_id: &DocId, timestamp: Timestamp) -> Result<Option<EntryWriter>, Error> {
        match self.claim(doc_id, timestamp).await? {
            Ok(writer) => Ok(Some(writer)),
            Err(reason) => {
                tracing::trace!(cache = self.name(), ?reason, "write skipped");
                Ok(None)
            }
        }
    }

    /// Like [`CacheStore::begin`], but reports why a write is skipped.
    pub async fn claim(&self, doc_id: &DocId, timestamp: Timestamp) -> Result<Result<EntryWriter, SkipReason>, Error> {
        let doc_id = doc_id.clone();
        self.call(move |layout| EntryWriter::claim(layout, &doc_id, timestamp))
            .await
    }

    /// Store `content` as the version of `doc_id` at `timestamp`.
    pub async fn write(&self, doc_id: &DocId, content: Bytes, timestamp: Timestamp) -> Result<WriteOutcome, Error> {
        let doc_id = doc_id.clone();
        self.call(move |layout| match EntryWriter::claim(layout, &doc_id, timestamp)? {
            Ok(writer) => {
                writer.commit_blocking(&content)?;
                Ok(WriteOutcome::Written)
            }
            Err(reason) => Ok(WriteOutcome::Skipped(reason)),
        })
        .await
    }

    /// Current bytes of `doc_id`.
    pub async fn read(&self, doc_id: &DocId) -> Result<Bytes, Error> {
        Ok(self.read_entry(doc_id).await?.content)
    }

    /// Current bytes of `doc_id` with the timestamp of that same version.
    pub async fn read_entry(&self, doc_id: &DocId) -> Result<StoredEntry, Error> {
        let doc_id = doc_id.clone();
        self.call(move |layout| {
            let path = layout.entry_path(&doc_id);
            let mut file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(Error::CacheMiss(format!("{}/{}", layout.name(), doc_id)));
                }
                Err(e) => return Err(e.into()),
            };
            // Same handle for both reads: a concurrent rename cannot split them.
            let timestamp = Timestamp::from_system_time(file.metadata()?.modified()?);
            let mut content = Vec::new();
            file.read_to_end(&mut content)?;
            Ok(StoredEntry { doc_id, timestamp, content: Bytes::from(content) })
        })
        .await
    }

    /// Stored timestamp of `doc_id`, or `None` if the cache does not hold it.
    pub async fn exists(&self, doc_id: &DocId) -> Result<Option<Timestamp>, Error> {
        let doc_id = doc_id.clone();
        self.call(move |layout| stored_timestamp(&layout.entry_path(&doc_id)))
            .await
    }

    /// Lazily walk every committed entry. Blocking; see [`CacheStore::entries`].
    pub fn scan(&self) -> Result<Scan, Error> {
        Scan::new(Arc::clone(&self.layout))
    }

    /// Collect a full scan on the blocking pool.
    pub async fn entries(&self) -> Result<Vec<ScanEntry>, Error> {
        let layout = Arc::clone(&self.layout);
        self.call(move |_| Scan::new(layout)?.collect()).await
    }

    /// Entries with `timestamp >= min`, oldest first.
    pub async fn entries_since(&self, min: Timestamp) -> Result<EntriesSince, Error> {
        let layout = Arc::clone(&self.layout);
        let mut entries = self
            .call(move |_| {
                Scan::new(layout)?
                    .filter(|entry| entry.as_ref().map_or(true, |e| e.timestamp >= min))
                    .collect::<Result<Vec<_>, Error>>()
            })
            .await?;
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.doc_id.cmp(&b.doc_id)));
        Ok(EntriesSince::new(self.clone(), entries))
    }

    /// Oldest entry timestamp, or zero for an empty cache.
    ///
    /// Used to bootstrap `lastSync` after a restart. Taking the minimum
    /// re-fetches slightly more than needed rather than missing updates.
    pub async fn cache_timestamp(&self) -> Result<Timestamp, Error> {
        let layout = Arc::clone(&self.layout);
        self.call(move |_| {
            let mut oldest: Option<Timestamp> = None;
            for entry in Scan::new(layout)? {
                let ts = entry?.timestamp;
                oldest = Some(oldest.map_or(ts, |current| current.min(ts)));
            }
            Ok(oldest.unwrap_or(Timestamp::ZERO))
        })
        .await
    }

    /// Modification time of the latest archive, zero if none exists.
    pub async fn archive_timestamp(&self) -> Result<Timestamp, Error> {
        self.call(|layout| Ok(stored_timestamp(&layout.archive_path())?.unwrap_or(Timestamp::ZERO)))
            .await
    }
}

/// Remove markers and a partial archive left behind by a crash.
fn recover(layout: &Layout) -> Result<usize, Error> {
    let mut removed = 0;

    match fs::remove_file(layout.archive_temp_path()) {
        Ok(()) => removed += 1,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    for first in shard_subdirs(layout.root())? {
        for second in shard_subdirs(&first)? {
            for entry in fs::read_dir(&second)? {
                let entry = entry?;
                let name = entry.file_name();
                if name.to_str().is_some_and(Layout::is_marker_file_name) {
                    fs::remove_file(entry.path())?;
                    removed += 1;
                }
            }
        }
    }

    Ok(removed)
}

fn shard_subdirs(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let is_shard = entry.file_type()?.is_dir() && entry.file_name().to_str().is_some_and(Layout::is_shard_dir_name);
        if is_shard {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}
