//! Snapshot archiver and its schedule.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::{CacheState, Engine};
use crate::Error;
use crate::cache::ArchiveSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SnapshotOutcome {
    Built(ArchiveSummary),
    /// Nothing synchronized since the last archive.
    UpToDate,
    /// Another build of this cache is running.
    AlreadyBuilding,
}

/// Clears the building flag however the build ends.
struct BuildGuard<'a>(&'a AtomicBool);

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Engine {
    /// Rebuild the archive of `cache` if it is stale.
    ///
    /// `regular` builds pause between files. A forced call that finds a
    /// build running lifts that build's pauses instead of starting another.
    pub(crate) async fn snapshot(&self, cache: &CacheState, regular: bool) -> Result<SnapshotOutcome, Error> {
        if cache
            .building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            if !regular {
                cache.throttle.store(false, Ordering::Release);
            }
            tracing::debug!(cache = cache.name(), "snapshot already building");
            return Ok(SnapshotOutcome::AlreadyBuilding);
        }
        let _guard = BuildGuard(&cache.building);

        // After a restart last_sync is the oldest entry while last_snapshot
        // is the archive's newest, so only a newer sync marks it stale.
        let last_sync = cache.last_sync();
        if last_sync <= cache.last_snapshot() {
            tracing::debug!(cache = cache.name(), last_sync = %last_sync, "snapshot up to date");
            return Ok(SnapshotOutcome::UpToDate);
        }

        cache.throttle.store(regular, Ordering::Release);
        let pause = if regular { self.settings.snapshot_pause } else { Duration::ZERO };
        let summary = cache
            .store
            .build_archive(Arc::clone(&cache.throttle), pause)
            .await
            .inspect_err(|e| tracing::error!(cache = cache.name(), error = %e, "snapshot build failed"))?;

        cache.last_snapshot.store(last_sync.as_millis(), Ordering::Release);
        tracing::info!(
            cache = cache.name(),
            entries = summary.entries,
            newest = %summary.timestamp,
            tag = %last_sync,
            regular,
            "snapshot built"
        );
        Ok(SnapshotOutcome::Built(summary))
    }

    /// Scheduled build of `cache`; outcome and errors are only logged.
    pub(crate) async fn scheduled_snapshot(&self, cache: &str) {
        let result = match self.cache(cache) {
            Ok(state) => self.snapshot(state, true).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(cache, error = %e, "scheduled snapshot failed");
        }
    }
}

/// When each cache's next scheduled archive build is due.
///
/// First builds are spread evenly over one interval by cache index, so the
/// caches do not all archive at once; each cache then repeats every interval.
#[derive(Debug)]
pub(crate) struct SnapshotSchedule {
    interval: Duration,
    next: Vec<(String, Instant)>,
}

impl SnapshotSchedule {
    pub(crate) fn new(caches: Vec<String>, interval: Duration, start: Instant) -> Self {
        let count = u32::try_from(caches.len()).unwrap_or(u32::MAX).max(1);
        let next = caches
            .into_iter()
            .zip(0u32..)
            .map(|(name, index)| (name, start + interval / count * index))
            .collect();
        Self { interval, next }
    }

    /// Caches due at `now`; each is rescheduled one interval later.
    pub(crate) fn due(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        for (name, at) in &mut self.next {
            if *at <= now {
                due.push(name.clone());
                while *at <= now {
                    *at += self.interval;
                }
            }
        }
        due
    }
}
