//! Snapshotter Tickers
//!
//! One background task per configured `(seconds, changes)` rule. Every
//! `seconds` the task samples the keyspace's modification counter; once it
//! reaches `changes`, the whole keyspace is serialized and the snapshot
//! file is rewritten (create/truncate). The counter resets only after the
//! bytes hit disk: a failed write is logged and the counter survives, so
//! the next tick retries.
//!
//! All rule tasks share one shutdown signal; dropping the
//! [`SnapshotSaver`] handle stops them.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::SaveRule;
use crate::persistence::snapshot;
use crate::storage::Keyspace;

/// Handle to the running snapshotter tasks.
///
/// Dropping the handle stops every rule's ticker.
#[derive(Debug)]
pub struct SnapshotSaver {
    shutdown_tx: watch::Sender<bool>,
}

impl SnapshotSaver {
    /// Starts one ticker per rule, all writing to `path`.
    pub fn start(keyspace: Arc<Keyspace>, rules: &[SaveRule], path: PathBuf) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for rule in rules {
            tokio::spawn(saver_loop(
                Arc::clone(&keyspace),
                *rule,
                path.clone(),
                shutdown_rx.clone(),
            ));
        }
        info!(rules = rules.len(), "snapshotter started");

        Self { shutdown_tx }
    }

    /// Stops every rule ticker. Also called when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("snapshotter stopped");
    }
}

impl Drop for SnapshotSaver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn saver_loop(
    keyspace: Arc<Keyspace>,
    rule: SaveRule,
    path: PathBuf,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(rule.every) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("snapshotter rule received shutdown signal");
                    return;
                }
            }
        }

        let modifications = keyspace.modifications();
        if modifications < rule.changes {
            continue;
        }

        info!(modifications, "saving snapshot");
        let bytes = snapshot::serialize(&keyspace);
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => {
                keyspace.reset_modifications();
                info!(path = %path.display(), "finished saving snapshot");
            }
            Err(e) => {
                // Keep the counter so the next tick tries again
                error!(path = %path.display(), error = %e, "failed to save snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;
    use std::time::Duration;

    fn rule(every_ms: u64, changes: u64) -> SaveRule {
        SaveRule {
            every: Duration::from_millis(every_ms),
            changes,
        }
    }

    #[tokio::test]
    async fn test_saves_once_threshold_is_reached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.rdb");

        let keyspace = Arc::new(Keyspace::new());
        keyspace.set("k", Value::Str("v".to_string()), None);

        let _saver = SnapshotSaver::start(Arc::clone(&keyspace), &[rule(10, 1)], path.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let bytes = tokio::fs::read(&path).await.expect("snapshot must exist");
        assert!(bytes.starts_with(b"*3\r\n$3\r\nset\r\n"));
        assert_eq!(keyspace.modifications(), 0, "successful save resets counter");
    }

    #[tokio::test]
    async fn test_does_not_save_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.rdb");

        let keyspace = Arc::new(Keyspace::new());
        keyspace.set("k", Value::Str("v".to_string()), None);

        // One modification, threshold of 100
        let _saver = SnapshotSaver::start(Arc::clone(&keyspace), &[rule(10, 100)], path.clone());
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(tokio::fs::read(&path).await.is_err(), "no snapshot expected");
        assert_eq!(keyspace.modifications(), 1);
    }

    #[tokio::test]
    async fn test_stops_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.rdb");

        let keyspace = Arc::new(Keyspace::new());
        {
            let _saver =
                SnapshotSaver::start(Arc::clone(&keyspace), &[rule(10, 1)], path.clone());
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        // Saver is gone; new modifications never reach disk
        keyspace.set("late", Value::Str("v".to_string()), None);
        let _ = tokio::fs::remove_file(&path).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(tokio::fs::read(&path).await.is_err());
    }
}
