//! Client Registry
//!
//! Tracks every accepted connection: its writer half, whether it has
//! entered subscribe mode, and the channels it subscribed to, plus the
//! reverse index channel → (client address → writer) used for PUBLISH
//! fan-out.
//!
//! The registry is touched from three places: the acceptor (add), the
//! per-connection readers (remove on EOF) and the consumer (SUBSCRIBE and
//! fan-out lookups). Both maps are `DashMap`s, so concurrent access is
//! handled by the map itself without a registry-wide lock. Map guards are
//! short-lived and never held across an await: writer handles are cloned
//! out first and all network I/O happens on the clones.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWrite;

/// A shareable handle to a connection's writer half.
///
/// Boxed as a trait object so tests can register in-memory writers where
/// production registers TCP write halves.
pub type ClientWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

struct ClientEntry {
    writer: ClientWriter,
    subscribe_mode: bool,
    subscriptions: HashSet<String>,
}

/// The connection registry shared by acceptor, readers and consumer.
#[derive(Default)]
pub struct ClientRegistry {
    /// Connections keyed by peer address.
    clients: DashMap<SocketAddr, ClientEntry>,
    /// Fan-out index: channel name → subscriber address → writer.
    channels: DashMap<String, HashMap<SocketAddr, ClientWriter>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted connection under its peer address.
    pub fn add_client(&self, addr: SocketAddr, writer: Box<dyn AsyncWrite + Send + Unpin>) {
        self.clients.insert(
            addr,
            ClientEntry {
                writer: Arc::new(tokio::sync::Mutex::new(writer)),
                subscribe_mode: false,
                subscriptions: HashSet::new(),
            },
        );
    }

    /// Removes a connection and its channel memberships. Called by the
    /// reader when the peer disconnects, so entries do not outlive their
    /// sockets. Channels left without subscribers are dropped entirely.
    pub fn remove_client(&self, addr: &SocketAddr) {
        if let Some((_, entry)) = self.clients.remove(addr) {
            for channel in &entry.subscriptions {
                if let Some(mut members) = self.channels.get_mut(channel) {
                    members.remove(addr);
                }
                // Second lookup on purpose: the guard above must be gone
                // before removing from the same map
                self.channels
                    .remove_if(channel, |_, members| members.is_empty());
            }
        }
    }

    /// The writer handle for a connection, if it is still registered.
    pub fn writer(&self, addr: &SocketAddr) -> Option<ClientWriter> {
        self.clients.get(addr).map(|entry| entry.writer.clone())
    }

    /// Puts the client in subscribe mode and adds it to `channel`.
    /// Returns false when the client is not registered.
    pub fn subscribe(&self, addr: &SocketAddr, channel: &str) -> bool {
        let writer = match self.clients.get_mut(addr) {
            Some(mut entry) => {
                entry.subscribe_mode = true;
                entry.subscriptions.insert(channel.to_string());
                entry.writer.clone()
            }
            None => return false,
        };

        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(*addr, writer);
        true
    }

    /// The fan-out targets of a channel, excluding the publisher itself.
    pub fn subscribers_excluding(
        &self,
        channel: &str,
        except: &SocketAddr,
    ) -> Vec<(SocketAddr, ClientWriter)> {
        self.channels
            .get(channel)
            .map(|members| {
                members
                    .iter()
                    .filter(|(addr, _)| *addr != except)
                    .map(|(addr, writer)| (*addr, writer.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the connection has entered subscribe mode.
    pub fn is_on_subscribe_mode(&self, addr: &SocketAddr) -> bool {
        self.clients
            .get(addr)
            .map_or(false, |entry| entry.subscribe_mode)
    }

    /// Whether the connection is subscribed to `channel`.
    pub fn is_subscribed(&self, addr: &SocketAddr, channel: &str) -> bool {
        self.clients
            .get(addr)
            .map_or(false, |entry| entry.subscriptions.contains(channel))
    }

    /// Number of registered connections.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
