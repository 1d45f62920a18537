//! RESP Protocol Implementation
//!
//! The wire layer shared by the connection readers (decoding requests), the
//! command layer (building responses) and the snapshot code (the replay log
//! is a concatenation of RESP command frames).
//!
//! ## Modules
//!
//! - `types`: the `RespValue` enum and response serialization
//! - `parser`: incremental decoder for incoming frames
//!
//! ## Example
//!
//! ```ignore
//! use blazekv::protocol::{parse_message, RespValue};
//!
//! let (frame, _consumed) = parse_message(b"*1\r\n$4\r\nPING\r\n")?;
//! let reply = RespValue::pong();
//! let bytes = reply.serialize(); // b"+PONG\r\n"
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_message, ParseError, ParseResult, RespParser, MAX_BULK_SIZE};
pub use types::RespValue;
