//! Persistence: Snapshot Save/Load and the Snapshotter
//!
//! State survives restarts as a *replay log*: a file of RESP command
//! frames that, executed in order through the ordinary command path,
//! rebuild every key. There is no separate on-disk format and no
//! separate decoder: the loader is the command pipeline itself.
//!
//! ## Modules
//!
//! - `snapshot`: serializing the keyspace to replay-log bytes, replaying
//!   bytes back, and the startup load
//! - `saver`: the background tickers that write the snapshot file when a
//!   `(seconds, changes)` rule triggers
//!
//! ## Counter Discipline
//!
//! The keyspace counts every write since the last snapshot. A rule fires
//! when the counter reaches its threshold; the counter resets only after
//! the snapshot file is written successfully, so disk failures are retried
//! on the next tick rather than silently dropped.

pub mod saver;
pub mod snapshot;

// Re-export commonly used items
pub use saver::SnapshotSaver;
pub use snapshot::{load_if_exists, replay, save_to, serialize};
