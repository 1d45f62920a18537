//! Incremental RESP Request Parser
//!
//! Decodes the frames clients are allowed to send: bulk strings (`$`) and
//! arrays of bulk strings (`*`). Responses use the full type set in
//! [`super::types`], but on the way *in* anything else is a protocol error.
//!
//! ## How the Parser Works
//!
//! The parser reads from a byte slice and returns either:
//! - `Ok(Some((frame, consumed)))` - a complete frame, `consumed` bytes used
//! - `Ok(None)` - the frame is incomplete, more bytes are needed
//! - `Err(ParseError)` - the data violates the protocol
//!
//! The caller appends incoming network data to a buffer, calls
//! [`RespParser::parse`], and on success advances the buffer by `consumed`
//! bytes. This lets one TCP read carry a partial frame, a single frame, or
//! several pipelined frames. The snapshot loader uses the same contract to
//! split a replay log into frames without any byte-search heuristics.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Errors that can occur while decoding a request frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The frame is empty
    #[error("empty message")]
    EmptyMessage,

    /// The first byte is not `$` or `*`
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// A length or count field did not parse as an integer
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Bulk string length is negative (and not the -1 null sentinel)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array count is negative
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Declared length does not match the data, missing CRLF, or an array
    /// element that is not a bulk string
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The declared payload exceeds the maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// A RESP request parser.
///
/// # Example
///
/// ```ignore
/// use blazekv::protocol::RespParser;
/// use bytes::BytesMut;
///
/// let mut parser = RespParser::new();
/// let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..]);
///
/// if let Some((frame, consumed)) = parser.parse(&buffer)? {
///     buffer.advance(consumed);
///     println!("decoded: {}", frame);
/// }
/// ```
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer holds only a prefix of a frame.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        match buf[0] {
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Decodes a bulk string: `$<len>\r\n<data>\r\n`.
    ///
    /// `$-1\r\n` decodes to the null sentinel, `$0\r\n\r\n` to one empty
    /// string. The declared length must match the payload exactly.
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::BULK_STRING);

        let length_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let length = parse_length(&buf[1..1 + length_end])?;

        // Null sentinel
        if length == -1 {
            let consumed = 1 + length_end + 2;
            return Ok(Some((RespValue::Null, consumed)));
        }

        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let data_start = 1 + length_end + 2;
        let total_needed = data_start + length + 2;
        if buf.len() < total_needed {
            return Ok(None);
        }

        // The declared length must land exactly on a CRLF; anything else is
        // a length/data mismatch.
        if &buf[data_start + length..data_start + length + 2] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string length does not match data".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
        Ok(Some((RespValue::BulkString(data), total_needed)))
    }

    /// Decodes an array: `*<count>\r\n` followed by `count` bulk strings.
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::ARRAY);

        let count_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let count = parse_length(&buf[1..1 + count_end])?;
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut elements = Vec::with_capacity(count);
        let mut consumed = 1 + count_end + 2;

        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None);
            }

            // Requests are arrays of bulk strings, nothing else.
            if buf[consumed] != prefix::BULK_STRING {
                return Err(ParseError::ProtocolError(format!(
                    "array element must be a bulk string, got prefix {:#04x}",
                    buf[consumed]
                )));
            }

            match self.parse_bulk_string(&buf[consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    consumed += element_consumed;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Parses a length/count field as a signed integer.
fn parse_length(raw: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(raw)
        .map_err(|e| ParseError::InvalidInteger(e.to_string()))?;
    s.parse()
        .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

/// Finds the position of the first CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single complete message from `buf`.
///
/// Unlike [`RespParser::parse`], an empty or truncated input is an error
/// here: this is the entry point for callers that already hold what they
/// believe to be one whole frame.
pub fn parse_message(buf: &[u8]) -> ParseResult<(RespValue, usize)> {
    if buf.is_empty() {
        return Err(ParseError::EmptyMessage);
    }
    match RespParser::new().parse(buf)? {
        Some(parsed) => Ok(parsed),
        None => Err(ParseError::ProtocolError(
            "incomplete message".to_string(),
        )),
    }
}
