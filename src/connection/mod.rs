//! Connection Handling
//!
//! Per-connection reader tasks and shared connection statistics.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  TCP Acceptor (server)                   │
//! └──────────────────────┬───────────────────────────────────┘
//!                        │ accept() + split()
//!                        ▼
//!        write half ──> ClientRegistry
//!        read half  ──> ConnectionReader task
//!                        │
//!                        │ Message { frame, sender }
//!                        ▼
//!               shared request channel ──> consumer
//! ```
//!
//! Readers only read: they frame requests and push them into the channel.
//! All writing happens on the consumer side through the registry's writer
//! handles, which keeps responses ordered per connection.

pub mod reader;

// Re-export commonly used types
pub use reader::{ConnectionError, ConnectionReader, ConnectionStats};
