//! Snapshot Format: a Replay Log of Commands
//!
//! A snapshot is a concatenation of RESP array frames, each a command
//! that rebuilds part of the keyspace when fed back through the ordinary
//! command path:
//!
//! - `SET key value` for every string key
//! - `RPUSH key v1 v2 ...` for every non-empty list key
//! - `ZADD key score1 member1 ...` for every non-empty sorted-set key
//! - `EXPIREAT key <unix-seconds>` after any volatile key's value frame
//!
//! Loading frames the byte stream with the RESP parser itself, with no
//! byte-search heuristics, so values containing `\n*` or any other binary
//! content round-trip safely. A corrupt region is logged, skipped to the
//! next `*` byte, and loading continues; a single bad frame never aborts
//! recovery.

use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;

use bytes::Bytes;
use tracing::{info, warn};

use crate::commands::CommandHandler;
use crate::protocol::{RespParser, RespValue};
use crate::storage::{Keyspace, RecordValue, SnapshotRecord};

/// Serializes the keyspace's current records into replay-log bytes.
pub fn serialize(keyspace: &Keyspace) -> Vec<u8> {
    serialize_records(&keyspace.snapshot_records())
}

/// Serializes one set of records into replay-log bytes.
pub fn serialize_records(records: &[SnapshotRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    for record in records {
        let mut parts: Vec<String> = match &record.value {
            RecordValue::Str(value) => {
                vec!["set".to_string(), record.key.clone(), value.clone()]
            }
            RecordValue::Items(values) => {
                let mut parts = Vec::with_capacity(values.len() + 2);
                parts.push("rpush".to_string());
                parts.push(record.key.clone());
                parts.extend(values.iter().cloned());
                parts
            }
            RecordValue::Scored(pairs) => {
                let mut parts = Vec::with_capacity(pairs.len() * 2 + 2);
                parts.push("zadd".to_string());
                parts.push(record.key.clone());
                for (score, member) in pairs {
                    parts.push(score.to_string());
                    parts.push(member.clone());
                }
                parts
            }
        };
        command_frame(&mut buf, parts);

        if let Some(deadline) = record.expires_at_unix {
            parts = vec![
                "expireat".to_string(),
                record.key.clone(),
                deadline.to_string(),
            ];
            command_frame(&mut buf, parts);
        }
    }
    buf
}

fn command_frame(buf: &mut Vec<u8>, parts: Vec<String>) {
    RespValue::array(
        parts
            .into_iter()
            .map(|p| RespValue::bulk_string(Bytes::from(p)))
            .collect(),
    )
    .serialize_into(buf);
}

/// Writes a snapshot of `keyspace` to `out` and, on success, resets the
/// modification counter. A failed write leaves the counter untouched so
/// the next snapshotter tick retries.
pub fn save_to<W: Write>(keyspace: &Keyspace, out: &mut W) -> std::io::Result<()> {
    let bytes = serialize(keyspace);
    out.write_all(&bytes)?;
    out.flush()?;
    keyspace.reset_modifications();
    Ok(())
}

/// Replays log bytes through the command path. Returns how many frames
/// applied cleanly; corrupt or rejected frames are logged and skipped.
pub fn replay(bytes: &[u8], handler: &CommandHandler) -> usize {
    // Replayed frames carry no real connection; the sender only matters
    // for pub/sub, which never appears in a snapshot.
    let replay_sender: SocketAddr = "127.0.0.1:0".parse().unwrap();

    let mut parser = RespParser::new();
    let mut offset = 0;
    let mut applied = 0;

    while offset < bytes.len() {
        match parser.parse(&bytes[offset..]) {
            Ok(Some((frame, consumed))) => {
                offset += consumed;
                let result = handler.execute(frame, replay_sender);
                if result.frames.iter().any(|f| f.is_error()) {
                    warn!("skipping snapshot frame the command layer rejected");
                } else {
                    applied += 1;
                }
            }
            Ok(None) => {
                warn!(offset, "snapshot ends mid-frame, discarding the tail");
                break;
            }
            Err(e) => {
                warn!(offset, error = %e, "corrupt snapshot frame, resynchronizing");
                match bytes[offset + 1..].iter().position(|&b| b == b'*') {
                    Some(next) => offset += next + 1,
                    None => break,
                }
            }
        }
    }
    applied
}

/// Loads the snapshot at `path` if it exists, replaying it into the
/// keyspace behind `handler`. Missing file means a fresh start; a broken
/// file is logged and the state stays as far as replay got. The
/// modification counter is reset either way, so replayed writes do not
/// immediately trigger a snapshot.
pub async fn load_if_exists(path: impl AsRef<Path>, handler: &CommandHandler, keyspace: &Keyspace) {
    match tokio::fs::read(path.as_ref()).await {
        Ok(bytes) => {
            info!(path = %path.as_ref().display(), "loading previous state from snapshot");
            let applied = replay(&bytes, handler);
            keyspace.reset_modifications();
            info!(applied, "done loading snapshot");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(error = %e, "failed to load snapshot, proceeding with empty state");
            keyspace.reset_modifications();
        }
    }
}
