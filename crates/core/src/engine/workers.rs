//! Background fetch and apply loops.
//!
//! The fetch loop polls the remote source and starts scheduled archive
//! builds; the apply loop drains the update queue. Both stop when the
//! shutdown watch flips to `true` (or its sender is dropped).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::Engine;
use super::snapshot::SnapshotSchedule;

/// Handle to the running background loops.
pub struct Workers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Spawn the fetch and apply loops for `engine`.
    pub fn spawn(engine: Arc<Engine>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let handles = vec![
            tokio::spawn(fetch_loop(Arc::clone(&engine), shutdown.subscribe())),
            tokio::spawn(apply_loop(engine, shutdown.subscribe())),
        ];
        tracing::info!("background workers started");
        Self { shutdown, handles }
    }

    /// Signal both loops and wait for them to finish their current step.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "background worker ended abnormally");
            }
        }
        tracing::info!("background workers stopped");
    }
}

/// Sleep for `duration` unless shutdown is signalled first.
///
/// Returns `true` when the loop should stop.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn fetch_loop(engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) {
    let settings = engine.settings().clone();
    tracing::info!(
        startup_delay_secs = settings.startup_delay.as_secs(),
        update_interval_secs = settings.update_interval.as_secs(),
        "fetch loop started"
    );

    if sleep_or_shutdown(&mut shutdown, settings.startup_delay).await {
        return;
    }

    if let Err(e) = engine.enqueue_derived_deltas().await {
        tracing::warn!(error = %e, "initial derived delta scan failed");
    }

    let mut schedule = SnapshotSchedule::new(engine.cache_names(), settings.snapshot_interval, Instant::now());
    loop {
        match engine.enqueue_master_batch().await {
            Ok(0) => {}
            Ok(listed) => tracing::info!(listed, "master batch queued"),
            Err(e) => tracing::warn!(error = %e, last_seen = %engine.last_seen(), "remote listing failed"),
        }

        for cache in schedule.due(Instant::now()) {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.scheduled_snapshot(&cache).await });
        }

        if sleep_or_shutdown(&mut shutdown, settings.update_interval).await {
            break;
        }
    }
    tracing::info!("fetch loop stopped");
}

async fn apply_loop(engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) {
    let wait = engine.settings().queue_wait;
    tracing::info!(queue_wait_ms = wait.as_millis() as u64, "apply loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            update = engine.queue().dequeue(wait) => {
                if let Some(update) = update {
                    engine.apply_update(update).await;
                }
            }
        }
    }
    tracing::info!(pending = engine.queue().len(), "apply loop stopped");
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FakeSource, open_engine};
    use super::*;
    use crate::DocId;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_workers_materialize_remote_documents() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new();
        source.put("docA", 1, "<a/>");
        let engine = open_engine(&dir, &source).await;

        let workers = Workers::spawn(Arc::clone(&engine));
        let doc = DocId::new("docA").unwrap();
        let derived = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Ok(content) = engine.read("upper", &doc).await {
                    return content;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(derived, Bytes::from_static(b"<A/>"));

        tokio::time::timeout(Duration::from_secs(5), workers.shutdown()).await.unwrap();
        assert_eq!(engine.read("xml", &doc).await.unwrap(), Bytes::from_static(b"<a/>"));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_startup_delay() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new();
        let config = crate::EngineConfig {
            cache_root: dir.path().to_path_buf(),
            startup_delay_secs: 3_600,
            ..Default::default()
        };
        let engine = crate::Engine::open(&config, Arc::new(source.clone()), crate::TransformRegistry::new())
            .await
            .unwrap();

        let workers = Workers::spawn(engine);
        tokio::time::timeout(Duration::from_secs(5), workers.shutdown()).await.unwrap();
        assert!(source.listings().is_empty());
    }
}
