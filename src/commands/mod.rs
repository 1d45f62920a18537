//! Command Processing Layer
//!
//! Turns decoded RESP frames into typed commands and executes them.
//!
//! ## Architecture
//!
//! ```text
//! Decoded frame (protocol module)
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Command         │  arity + argument validation,
//! │ ::from_frame    │  exact client-visible error strings
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐      ┌─────────────────┐
//! │ CommandHandler  │─────>│ Keyspace        │
//! │ ::execute       │      ├─────────────────┤
//! └────────┬────────┘─────>│ ClientRegistry  │  (SUBSCRIBE/PUBLISH)
//!          ▼               └─────────────────┘
//! ┌─────────────────┐
//! │ CommandResult   │  frames for the sender +
//! │                 │  optional pub/sub fan-out
//! └─────────────────┘
//! ```
//!
//! ## Command Vocabulary
//!
//! `PING`, `ECHO`, `SET`, `GET`, `CONFIG GET`, `EXPIRE`, `EXPIREAT`,
//! `EXISTS`, `DEL`, `INCR`, `DECR`, `RPUSH`, `LPUSH`, `SUBSCRIBE`,
//! `PUBLISH`, `ZADD`, `ZRANGE`. Anything else answers
//! `invalid command: '<name>'`.

pub mod handler;

// Re-export the main command types
pub use handler::{Command, CommandError, CommandHandler, CommandResult, FanOut};
