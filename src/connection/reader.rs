//! Per-Connection Reader
//!
//! Each accepted connection gets one reader task owning the read half of
//! the socket. The reader accumulates bytes in a `BytesMut` buffer, frames
//! complete RESP messages with the incremental parser, and forwards each
//! frame into the shared request channel where the single consumer
//! executes it. TCP is a stream: one read may carry a partial frame or
//! several pipelined frames, and the buffer handles both.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! accept ──> reader task ──┬─> read bytes into buffer
//!                          │
//!                          ├─> frame complete messages ──> request channel
//!                          │
//!                          ├─ protocol error: best-effort error reply,
//!                          │  clear buffer, keep the connection
//!                          │
//!                          └─ EOF: drop registry entry, task ends
//! ```
//!
//! Responses never pass through the reader; the consumer writes them via
//! the registry's writer handles. This keeps the per-connection ordering
//! guarantee trivially: frames enter the channel in read order and the
//! consumer is serial.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::protocol::{RespParser, RespValue};
use crate::server::registry::ClientRegistry;
use crate::server::Message;

/// Maximum size of the per-connection read buffer (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Counters for connection handling, shared across all readers.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Reasons a reader task ends.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client closed the connection between frames
    #[error("client disconnected")]
    ClientDisconnected,

    /// Client closed the connection mid-frame
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("buffer size limit exceeded")]
    BufferFull,

    /// The server is shutting down and the request channel is closed
    #[error("request channel closed")]
    ConsumerGone,
}

/// Reads frames from one connection and forwards them to the consumer.
///
/// Generic over the read half so tests can drive it with in-memory
/// streams.
pub struct ConnectionReader<R> {
    read_half: R,
    addr: SocketAddr,
    buffer: BytesMut,
    parser: RespParser,
    requests: mpsc::Sender<Message>,
    registry: Arc<ClientRegistry>,
    stats: Arc<ConnectionStats>,
}

impl<R: AsyncRead + Unpin> ConnectionReader<R> {
    pub fn new(
        read_half: R,
        addr: SocketAddr,
        requests: mpsc::Sender<Message>,
        registry: Arc<ClientRegistry>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            read_half,
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            requests,
            registry,
            stats,
        }
    }

    /// Runs the reader until the peer disconnects or the server shuts
    /// down, then unregisters the connection.
    pub async fn run(mut self) {
        info!(client = %self.addr, "client connected");

        let result = self.read_loop().await;
        match result {
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "connection ended"),
            Ok(()) => {}
        }

        self.registry.remove_client(&self.addr);
        self.stats.connection_closed();
    }

    async fn read_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.drain_frames().await?;
            self.read_more_data().await?;
        }
    }

    /// Forwards every complete frame currently in the buffer.
    async fn drain_frames(&mut self) -> Result<(), ConnectionError> {
        loop {
            if self.buffer.is_empty() {
                return Ok(());
            }

            match self.parser.parse(&self.buffer) {
                Ok(Some((frame, consumed))) => {
                    let _ = self.buffer.split_to(consumed);
                    trace!(
                        client = %self.addr,
                        consumed,
                        remaining = self.buffer.len(),
                        "framed request"
                    );

                    let message = Message {
                        frame,
                        sender: self.addr,
                    };
                    if self.requests.send(message).await.is_err() {
                        return Err(ConnectionError::ConsumerGone);
                    }
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    // A malformed frame does not cost the client its
                    // connection: answer with an error and resynchronize
                    // by dropping the buffered bytes.
                    warn!(client = %self.addr, error = %e, "protocol error");
                    self.report_error(&e.to_string()).await;
                    self.buffer.clear();
                    return Ok(());
                }
            }
        }
    }

    /// Best-effort simple-error reply straight from the reader.
    async fn report_error(&self, message: &str) {
        if let Some(writer) = self.registry.writer(&self.addr) {
            let bytes = RespValue::error(message).serialize();
            let mut writer = writer.lock().await;
            if writer.write_all(&bytes).await.is_ok() {
                let _ = writer.flush().await;
                self.stats.bytes_written(bytes.len());
            }
        }
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.read_half.read_buf(&mut self.buffer).await?;
        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "read data");
        Ok(())
    }
}
