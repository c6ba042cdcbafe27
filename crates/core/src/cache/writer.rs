//! Two-phase entry writes.
//!
//! A write first claims the key by exclusively creating the in-progress
//! marker, which doubles as the temp file that receives the new bytes.
//! Commit stamps the temp file with the source timestamp and renames it over
//! the previous entry, so readers only ever see whole versions.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::layout::Layout;
use crate::{DocId, Error, Timestamp};

/// Result of a store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Skipped(SkipReason),
}

impl WriteOutcome {
    pub fn is_written(self) -> bool {
        matches!(self, WriteOutcome::Written)
    }
}

/// Why a write did not happen. Neither case is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another writer holds the in-progress marker for this key.
    InProgress,
    /// The stored entry already carries the requested timestamp.
    UpToDate,
}

/// Exclusive claim on one `(cache, docId)` key until committed or dropped.
///
/// Dropping an uncommitted writer removes its marker and leaves the stored
/// entry untouched.
#[derive(Debug)]
pub struct EntryWriter {
    doc_id: DocId,
    timestamp: Timestamp,
    file: Option<File>,
    marker: PathBuf,
    target: PathBuf,
    shard_dirs: (PathBuf, PathBuf),
    committed: bool,
}

impl EntryWriter {
    /// Claim the key, or return `Err(reason)` when the write should be skipped.
    pub(crate) fn claim(layout: &Layout, doc_id: &DocId, timestamp: Timestamp) -> Result<Result<Self, SkipReason>, Error> {
        let (first, second) = layout.shard_dirs(doc_id);
        fs::create_dir_all(&second)?;

        let marker = layout.marker_path(doc_id);
        if marker.exists() {
            return Ok(Err(SkipReason::InProgress));
        }

        let target = layout.entry_path(doc_id);
        if stored_timestamp(&target)? == Some(timestamp) {
            return Ok(Err(SkipReason::UpToDate));
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(Err(SkipReason::InProgress)),
            Err(e) => return Err(e.into()),
        };

        let writer = Self {
            doc_id: doc_id.clone(),
            timestamp,
            file: Some(file),
            marker,
            target,
            shard_dirs: (first, second),
            committed: false,
        };

        // A concurrent writer may have committed the same version between the
        // freshness check and the claim.
        if stored_timestamp(&writer.target)? == Some(timestamp) {
            return Ok(Err(SkipReason::UpToDate));
        }

        Ok(Ok(writer))
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Write `content` and atomically replace the stored entry.
    pub async fn commit(self, content: Bytes) -> Result<(), Error> {
        tokio::task::spawn_blocking(move || self.commit_blocking(&content)).await?
    }

    pub(crate) fn commit_blocking(mut self, content: &[u8]) -> Result<(), Error> {
        let Some(mut file) = self.file.take() else {
            return Err(Error::InvalidInput(format!("writer for '{}' already used", self.doc_id)));
        };

        file.write_all(content)?;
        file.sync_all()?;
        file.set_modified(self.timestamp.to_system_time())?;
        drop(file);

        fs::rename(&self.marker, &self.target)?;
        self.committed = true;

        touch_dir(&self.shard_dirs.1, self.timestamp);
        touch_dir(&self.shard_dirs.0, self.timestamp);
        Ok(())
    }
}

impl Drop for EntryWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.file.take();
        if let Err(e) = fs::remove_file(&self.marker)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(marker = %self.marker.display(), error = %e, "failed to remove abandoned write marker");
        }
    }
}

/// Modification time of a committed entry, `None` if absent.
pub(crate) fn stored_timestamp(path: &Path) -> Result<Option<Timestamp>, Error> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(Timestamp::from_system_time(meta.modified()?))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Directory mtimes are a freshness hint only; failing to set one is not fatal.
fn touch_dir(dir: &Path, timestamp: Timestamp) {
    let result = File::open(dir).and_then(|handle| handle.set_modified(timestamp.to_system_time()));
    if let Err(e) = result {
        tracing::debug!(dir = %dir.display(), error = %e, "could not stamp shard directory");
    }
}
