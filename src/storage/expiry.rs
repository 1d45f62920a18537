//! Background Key Expirer
//!
//! Active expiration: a background task that periodically scans the
//! keyspace for keys past their deadline and deletes them in bulk.
//!
//! Lazy expiration (checking on access) alone would leave a key in memory
//! forever if nothing ever reads it again; the expirer guarantees expired
//! keys eventually become unreachable either way.
//!
//! The scan runs on a fixed 100 ms cadence. Deletion goes through the same
//! `bulk_delete` used by DEL, so every reaped key counts as a modification
//! and shows up in the next snapshot.

use crate::storage::Keyspace;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// How often the expirer scans the keyspace.
pub const EXPIRE_INTERVAL: Duration = Duration::from_millis(100);

/// A handle to the running expirer task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct KeyExpirer {
    shutdown_tx: watch::Sender<bool>,
}

impl KeyExpirer {
    /// Starts the expirer on its own task, scanning every
    /// [`EXPIRE_INTERVAL`].
    pub fn start(keyspace: Arc<Keyspace>) -> Self {
        Self::start_with_interval(keyspace, EXPIRE_INTERVAL)
    }

    /// Starts the expirer with a custom scan interval. Used by tests to
    /// avoid waiting on the production cadence.
    pub fn start_with_interval(keyspace: Arc<Keyspace>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(expirer_loop(keyspace, interval, shutdown_rx));
        info!("background key expirer started");

        Self { shutdown_tx }
    }

    /// Stops the expirer. Also called when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("background key expirer stopped");
    }
}

impl Drop for KeyExpirer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn expirer_loop(
    keyspace: Arc<Keyspace>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("key expirer received shutdown signal");
                    return;
                }
            }
        }

        let expired = keyspace.expired_keys();
        if !expired.is_empty() {
            info!(count = expired.len(), "deleting expired keys");
            keyspace.bulk_delete(&expired);
        }
    }
}
