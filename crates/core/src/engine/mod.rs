//! The cache engine.
//!
//! One [`Engine`] owns every cache, the update queue, the remote source and
//! the synchronization cursor. It is shared as `Arc<Engine>` between the
//! caller-facing operations and the two background loops in [`Workers`].

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::cache::{CacheStore, EntriesSince, StoredEntry};
use crate::config::EngineConfig;
use crate::queue::{PendingUpdate, UpdateQueue, UpdateTask};
use crate::source::DocumentSource;
use crate::transform::{Identity, Transform, TransformRegistry};
use crate::{DocId, Error, Timestamp};

mod delta;
mod materialize;
mod snapshot;
mod sync;
#[cfg(test)]
mod testing;
mod workers;

pub use delta::{DeltaItem, compute_delta};
pub use snapshot::SnapshotOutcome;
pub use workers::Workers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheRole {
    Master,
    Derived,
}

/// Timing knobs the engine and its loops read.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub update_interval: Duration,
    pub startup_delay: Duration,
    pub snapshot_interval: Duration,
    pub snapshot_pause: Duration,
    pub queue_wait: Duration,
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            update_interval: config.update_interval(),
            startup_delay: config.startup_delay(),
            snapshot_interval: config.snapshot_interval(),
            snapshot_pause: config.snapshot_pause(),
            queue_wait: config.queue_wait(),
        }
    }
}

/// One cache plus its in-memory cursors.
pub(crate) struct CacheState {
    store: CacheStore,
    role: CacheRole,
    transform: Arc<dyn Transform>,
    last_sync: AtomicI64,
    last_snapshot: AtomicI64,
    building: AtomicBool,
    /// Whether the running archive build pauses between files.
    throttle: Arc<AtomicBool>,
}

impl CacheState {
    async fn open(
        config: &EngineConfig,
        name: &str,
        role: CacheRole,
        transform: Arc<dyn Transform>,
    ) -> Result<Self, Error> {
        let store = CacheStore::open(name, config.cache_dir(name), &config.file_extension).await?;
        let last_sync = store.cache_timestamp().await?;
        let last_snapshot = store.archive_timestamp().await?;
        tracing::info!(
            cache = name,
            ?role,
            last_sync = %last_sync,
            last_snapshot = %last_snapshot,
            "cache opened"
        );

        Ok(Self {
            store,
            role,
            transform,
            last_sync: AtomicI64::new(last_sync.as_millis()),
            last_snapshot: AtomicI64::new(last_snapshot.as_millis()),
            building: AtomicBool::new(false),
            throttle: Arc::new(AtomicBool::new(false)),
        })
    }

    pub(crate) fn name(&self) -> &str {
        self.store.name()
    }

    pub(crate) fn last_sync(&self) -> Timestamp {
        Timestamp::from_millis(self.last_sync.load(Ordering::Acquire))
    }

    pub(crate) fn raise_last_sync(&self, timestamp: Timestamp) {
        self.last_sync.fetch_max(timestamp.as_millis(), Ordering::AcqRel);
    }

    pub(crate) fn last_snapshot(&self) -> Timestamp {
        Timestamp::from_millis(self.last_snapshot.load(Ordering::Acquire))
    }

    fn status(&self) -> CacheStatus {
        CacheStatus {
            name: self.name().to_string(),
            role: self.role,
            root: self.store.root().to_path_buf(),
            transform: self.transform.name().to_string(),
            last_sync: self.last_sync(),
            last_snapshot: self.last_snapshot(),
            building: self.building.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub name: String,
    pub role: CacheRole,
    pub root: PathBuf,
    pub transform: String,
    pub last_sync: Timestamp,
    pub last_snapshot: Timestamp,
    pub building: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub master: String,
    /// Cursor for the next remote listing.
    pub last_seen: Timestamp,
    /// Outstanding update identities.
    pub queued: usize,
    pub caches: Vec<CacheStatus>,
}

/// Result of a forced refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub cache: String,
    /// Documents considered (listing size or delta size).
    pub total: usize,
    pub written: usize,
    /// Already current or being written by someone else.
    pub skipped: usize,
}

impl RefreshReport {
    fn new(cache: &str, total: usize) -> Self {
        Self { cache: cache.to_string(), total, ..Default::default() }
    }
}

/// Where the latest archive of a cache lives.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    pub cache: String,
    pub path: PathBuf,
    pub size: u64,
    pub timestamp: Timestamp,
}

pub struct Engine {
    master: Arc<CacheState>,
    /// Derived caches, sorted by name.
    derived: Vec<Arc<CacheState>>,
    queue: UpdateQueue,
    source: Arc<dyn DocumentSource>,
    /// Timestamp passed to the next `list_changed_since`.
    last_seen: AtomicI64,
    /// Held for the whole of a master pass; passes never interleave.
    master_pass: tokio::sync::Mutex<()>,
    settings: EngineSettings,
}

impl Engine {
    /// Open every configured cache and bootstrap the cursors from disk.
    ///
    /// Derived caches are the ones `transforms` names; the master always
    /// uses the identity transform.
    pub async fn open(
        config: &EngineConfig,
        source: Arc<dyn DocumentSource>,
        transforms: TransformRegistry,
    ) -> Result<Arc<Self>, Error> {
        let master = CacheState::open(config, &config.master_name, CacheRole::Master, Arc::new(Identity)).await?;

        let mut derived = Vec::new();
        for name in transforms.names() {
            if name == config.master_name {
                return Err(Error::InvalidInput(format!("derived cache '{name}' shadows the master cache")));
            }
            let transform = transforms.get(&name)?;
            derived.push(Arc::new(CacheState::open(config, &name, CacheRole::Derived, transform).await?));
        }

        let last_seen = master.last_sync();
        tracing::info!(
            master = master.name(),
            derived = derived.len(),
            last_seen = %last_seen,
            "engine ready"
        );

        Ok(Arc::new(Self {
            master: Arc::new(master),
            derived,
            queue: UpdateQueue::new(),
            source,
            last_seen: AtomicI64::new(last_seen.as_millis()),
            master_pass: tokio::sync::Mutex::new(()),
            settings: EngineSettings::from(config),
        }))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    pub fn master_name(&self) -> &str {
        self.master.name()
    }

    /// Every cache name, master first.
    pub fn cache_names(&self) -> Vec<String> {
        self.caches().map(|cache| cache.name().to_string()).collect()
    }

    pub fn last_seen(&self) -> Timestamp {
        Timestamp::from_millis(self.last_seen.load(Ordering::Acquire))
    }

    fn caches(&self) -> impl Iterator<Item = &Arc<CacheState>> {
        std::iter::once(&self.master).chain(self.derived.iter())
    }

    pub(crate) fn cache(&self, name: &str) -> Result<&Arc<CacheState>, Error> {
        self.caches()
            .find(|cache| cache.name() == name)
            .ok_or_else(|| Error::UnknownCache(name.to_string()))
    }

    /// Storage handle of a cache, for direct inspection.
    pub fn store(&self, name: &str) -> Result<&CacheStore, Error> {
        Ok(&self.cache(name)?.store)
    }

    /// Current bytes of one entry.
    pub async fn read(&self, cache: &str, doc_id: &DocId) -> Result<bytes::Bytes, Error> {
        Ok(self.read_entry(cache, doc_id).await?.content)
    }

    /// Current bytes of one entry with the timestamp of that version.
    pub async fn read_entry(&self, cache: &str, doc_id: &DocId) -> Result<StoredEntry, Error> {
        self.cache(cache)?.store.read_entry(doc_id).await
    }

    /// Every entry with `timestamp >= min`, oldest first. Zero is a full dump.
    pub async fn read_all_since(&self, cache: &str, min: Timestamp) -> Result<EntriesSince, Error> {
        self.cache(cache)?.store.entries_since(min).await
    }

    /// Open the latest archive of `cache`.
    pub async fn read_snapshot_archive(&self, cache: &str) -> Result<tokio::fs::File, Error> {
        let path = self.cache(cache)?.store.archive_path();
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::CacheMiss(format!("no archive for cache '{cache}'")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Path, size and timestamp of the latest archive of `cache`.
    pub async fn archive_info(&self, cache: &str) -> Result<ArchiveInfo, Error> {
        let file = self.read_snapshot_archive(cache).await?;
        let metadata = file.metadata().await?;
        Ok(ArchiveInfo {
            cache: cache.to_string(),
            path: self.cache(cache)?.store.archive_path(),
            size: metadata.len(),
            timestamp: Timestamp::from_system_time(metadata.modified()?),
        })
    }

    /// Bring `cache` up to date before returning.
    ///
    /// The master runs a synchronizer pass against the remote source; a
    /// derived cache re-materializes every document its delta scan reports.
    pub async fn force_refresh(&self, cache: &str) -> Result<RefreshReport, Error> {
        let state = self.cache(cache)?;
        match state.role {
            CacheRole::Master => self.sync_master().await,
            CacheRole::Derived => self.refresh_derived(state).await,
        }
    }

    /// Rebuild the archive of `cache` now, without pauses between files.
    pub async fn force_snapshot(&self, cache: &str) -> Result<SnapshotOutcome, Error> {
        self.snapshot(self.cache(cache)?, false).await
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            master: self.master.name().to_string(),
            last_seen: self.last_seen(),
            queued: self.queue.len(),
            caches: self.caches().map(|cache| cache.status()).collect(),
        }
    }

    /// Apply one dequeued update. Failures are logged, never returned.
    pub async fn apply_update(&self, update: PendingUpdate) {
        self.queue
            .apply(update, |update| async move {
                match update.task {
                    UpdateTask::MasterBatch(batch) => {
                        if let Err(e) = self.apply_master_batch(&batch).await {
                            tracing::warn!(error = %e, "master batch aborted");
                        }
                    }
                    UpdateTask::Materialize(doc_id) => {
                        let result = match self.cache(&update.id.cache) {
                            Ok(cache) => self.materialize(cache, &doc_id).await,
                            Err(e) => Err(e),
                        };
                        if let Err(e) = result {
                            tracing::warn!(
                                cache = %update.id.cache,
                                doc_id = %doc_id,
                                queued = %update.timestamp,
                                error = %e,
                                "materialization failed"
                            );
                        }
                    }
                }
            })
            .await;
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("master", &self.master.name())
            .field("derived", &self.derived.iter().map(|c| c.name()).collect::<Vec<_>>())
            .field("last_seen", &self.last_seen())
            .field("queue", &self.queue)
            .finish()
    }
}
