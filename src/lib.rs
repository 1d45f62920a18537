//! # BlazeKV - A RESP-Compatible In-Memory Key-Value Server
//!
//! BlazeKV is an in-memory key-value server speaking the RESP protocol used
//! by Redis clients. It supports strings, lists and sorted sets, per-key
//! expiration, pub/sub fan-out, and periodic snapshots to a replayable
//! command log.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              BlazeKV                                 │
//! │                                                                      │
//! │  ┌────────────┐   ┌────────────┐   ┌───────────────────────────┐     │
//! │  │ TCP        │──>│ Reader     │──>│ Request channel (mpsc)    │     │
//! │  │ Acceptor   │   │ (per conn) │   └────────────┬──────────────┘     │
//! │  └─────┬──────┘   └────────────┘                │                    │
//! │        │ registers                              ▼                    │
//! │        ▼                             ┌──────────────────────┐        │
//! │  ┌────────────┐   subscribers        │ Consumer (serial)    │        │
//! │  │ Client     │<──────────────────── │  parse → execute →   │        │
//! │  │ Registry   │                      │  respond + fan out   │        │
//! │  └────────────┘                      └──────────┬───────────┘        │
//! │                                                 ▼                    │
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────────────┐          │
//! │  │ Expirer    │──>│            │<──│      Keyspace        │          │
//! │  │ (100ms)    │   │  RwLock    │   │ strings/lists/zsets  │          │
//! │  ├────────────┤   │            │   └──────────────────────┘          │
//! │  │ Snapshotter│──>│            │                                     │
//! │  └────────────┘   └────────────┘                                     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All commands flow through a single consumer task, so command execution
//! is strictly serial even though connections are read concurrently. The
//! keyspace is still lock-protected because the expirer and snapshotter
//! tickers access it from their own tasks.
//!
//! ## Supported Commands
//!
//! - Strings: `SET key value [EX secs | PX millis]`, `GET`, `INCR`, `DECR`
//! - Keys: `DEL`, `EXISTS`, `EXPIRE`, `EXPIREAT`
//! - Lists: `RPUSH`, `LPUSH`
//! - Sorted sets: `ZADD`, `ZRANGE`
//! - Pub/sub: `SUBSCRIBE`, `PUBLISH`
//! - Server: `PING`, `ECHO`, `CONFIG GET`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP frame decoding and response serialization
//! - [`storage`]: the keyspace engine, list and red-black tree values,
//!   and the background expirer
//! - [`commands`]: command parsing and execution
//! - [`connection`]: per-connection readers feeding the request channel
//! - [`server`]: acceptor, client registry and the serial consumer
//! - [`persistence`]: snapshot save/load and the snapshotter tickers
//! - [`config`]: the `appendonly`/`save` configuration surfaced by
//!   `CONFIG GET`
//!
//! ## Persistence Model
//!
//! Snapshots are a replay log: a concatenation of RESP command frames
//! (`SET`, `RPUSH`, `ZADD`, `EXPIREAT`) that rebuild the keyspace when fed
//! back through the ordinary command path. Snapshots are written whenever a
//! configured `(seconds, changes)` rule observes enough modifications since
//! the last save.

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::ServerConfig;
pub use connection::ConnectionStats;
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::ClientRegistry;
pub use storage::Keyspace;

/// The default port BlazeKV listens on
pub const DEFAULT_PORT: u16 = 6700;

/// The default host BlazeKV binds to
pub const DEFAULT_HOST: &str = "localhost";

/// File name of the snapshot in the working directory. Kept byte-for-byte
/// compatible with the servers this one replaces.
pub const SNAPSHOT_FILE: &str = "redis-go.rdb";

/// Version of BlazeKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
