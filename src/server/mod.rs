//! Server Loop
//!
//! The acceptor, the client registry and the single consumer that executes
//! every command.
//!
//! ## Scheduling Model
//!
//! Connections are read concurrently (one reader task each) but all
//! commands funnel through one bounded mpsc channel into a single consumer
//! task that processes them strictly serially. Serial execution is the
//! invariant that keeps the coarse keyspace lock safe to hold across an
//! entire operation: no two commands ever contend, only the background
//! tickers do.
//!
//! The consumer writes each result itself: first the response frames to
//! the sender, then (for PUBLISH) the fan-out payload to every subscriber.
//! That ordering is what guarantees a publisher sees its subscriber count
//! before any subscriber sees the message.
//!
//! ## Shutdown
//!
//! A `watch` channel signals shutdown. The acceptor stops accepting and
//! drops its channel handle; the consumer finishes the command in flight
//! and exits. Readers end on their own when peers disconnect.

pub mod registry;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::commands::CommandHandler;
use crate::connection::{ConnectionReader, ConnectionStats};
use crate::protocol::RespValue;

pub use registry::{ClientRegistry, ClientWriter};

/// One framed request on its way to the consumer.
#[derive(Debug)]
pub struct Message {
    pub frame: RespValue,
    pub sender: SocketAddr,
}

/// Capacity of the shared request channel. Readers back-pressure when the
/// consumer falls this far behind.
pub const REQUEST_QUEUE_DEPTH: usize = 1024;

/// Accepts connections and serves them until `shutdown` fires.
///
/// This is the blocking entry point: it owns the acceptor loop and joins
/// the consumer before returning, so a caller that awaits `listen` knows
/// the pipeline is fully drained.
pub async fn listen(
    listener: TcpListener,
    handler: CommandHandler,
    registry: Arc<ClientRegistry>,
    stats: Arc<ConnectionStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);

    let consumer = tokio::spawn(consume_requests(
        requests_rx,
        handler,
        Arc::clone(&registry),
        Arc::clone(&stats),
        shutdown.clone(),
    ));

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "server listening");
    }

    loop {
        tokio::select! {
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    debug!("acceptor received shutdown signal");
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let (read_half, write_half) = stream.into_split();
                        registry.add_client(addr, Box::new(write_half));

                        let reader = ConnectionReader::new(
                            read_half,
                            addr,
                            requests_tx.clone(),
                            Arc::clone(&registry),
                            Arc::clone(&stats),
                        );
                        tokio::spawn(reader.run());
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                }
            }
        }
    }

    drop(requests_tx);
    let _ = consumer.await;
    info!("server loop finished");
}

/// The single consumer: dequeues framed requests and executes them one at
/// a time.
async fn consume_requests(
    mut requests: mpsc::Receiver<Message>,
    handler: CommandHandler,
    registry: Arc<ClientRegistry>,
    stats: Arc<ConnectionStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    debug!("consumer received shutdown signal");
                    return;
                }
            }
            message = requests.recv() => {
                let Some(message) = message else {
                    debug!("request channel closed, consumer exiting");
                    return;
                };
                process_message(message, &handler, &registry, &stats).await;
            }
        }
    }
}

async fn process_message(
    message: Message,
    handler: &CommandHandler,
    registry: &ClientRegistry,
    stats: &ConnectionStats,
) {
    stats.command_processed();

    let sender = message.sender;
    let result = handler.execute(message.frame, sender);

    // Sender first. A missing writer means the connection went away while
    // the request was queued; the work itself already happened.
    let response = result.serialize_frames();
    match registry.writer(&sender) {
        Some(writer) => {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.write_all(&response).await {
                warn!(client = %sender, error = %e, "failed to write response");
            } else {
                let _ = writer.flush().await;
                stats.bytes_written(response.len());
            }
        }
        None => {
            warn!(client = %sender, "response dropped, connection no longer registered");
        }
    }

    // Then the pub/sub fan-out, subscriber by subscriber.
    if let Some(fan_out) = result.fan_out {
        let payload = fan_out.payload.serialize();
        for (addr, writer) in fan_out.targets {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.write_all(&payload).await {
                warn!(client = %addr, error = %e, "failed to deliver publication");
                continue;
            }
            let _ = writer.flush().await;
            stats.bytes_written(payload.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::storage::Keyspace;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    struct TestServer {
        addr: SocketAddr,
        keyspace: Arc<Keyspace>,
        shutdown_tx: watch::Sender<bool>,
        server: tokio::task::JoinHandle<()>,
    }

    async fn start_server() -> TestServer {
        let keyspace = Arc::new(Keyspace::new());
        let registry = Arc::new(ClientRegistry::new());
        let config = Arc::new(ServerConfig::default());
        let stats = Arc::new(ConnectionStats::new());
        let handler = CommandHandler::new(Arc::clone(&keyspace), Arc::clone(&registry), config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server = tokio::spawn(listen(listener, handler, registry, stats, shutdown_rx));

        TestServer {
            addr,
            keyspace,
            shutdown_tx,
            server,
        }
    }

    async fn read_reply(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        buf[..n].to_vec()
    }

    async fn send(stream: &mut TcpStream, bytes: &[u8]) {
        stream.write_all(bytes).await.unwrap();
    }

    #[tokio::test]
    async fn test_ping() {
        let server = start_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        send(&mut client, b"*1\r\n$4\r\nping\r\n").await;
        assert_eq!(read_reply(&mut client).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get_with_expiry() {
        let server = start_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        send(
            &mut client,
            b"*5\r\n$3\r\nset\r\n$4\r\nName\r\n$4\r\nJohn\r\n$2\r\npx\r\n$2\r\n80\r\n",
        )
        .await;
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        send(&mut client, b"*2\r\n$3\r\nget\r\n$4\r\nName\r\n").await;
        assert_eq!(read_reply(&mut client).await, b"$4\r\nJohn\r\n");

        tokio::time::sleep(Duration::from_millis(150)).await;

        send(&mut client, b"*2\r\n$3\r\nget\r\n$4\r\nName\r\n").await;
        assert_eq!(read_reply(&mut client).await, b"$-1\r\n");

        send(&mut client, b"*2\r\n$6\r\nexists\r\n$4\r\nName\r\n").await;
        assert_eq!(read_reply(&mut client).await, b":0\r\n");
    }

    #[tokio::test]
    async fn test_incr_of_non_integer() {
        let server = start_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        send(
            &mut client,
            b"*3\r\n$3\r\nset\r\n$4\r\nName\r\n$4\r\nJohn\r\n",
        )
        .await;
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        send(&mut client, b"*2\r\n$4\r\nincr\r\n$4\r\nName\r\n").await;
        assert_eq!(
            read_reply(&mut client).await,
            b"-key 'Name' cannot be parsed to integer\r\n"
        );
    }

    #[tokio::test]
    async fn test_lpush_ordering() {
        let server = start_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        send(&mut client, b"*3\r\n$5\r\nrpush\r\n$6\r\nmylist\r\n$2\r\nhi\r\n").await;
        assert_eq!(read_reply(&mut client).await, b":1\r\n");

        send(
            &mut client,
            b"*5\r\n$5\r\nlpush\r\n$6\r\nmylist\r\n$5\r\nhello\r\n$5\r\nworld\r\n$4\r\ntest\r\n",
        )
        .await;
        assert_eq!(read_reply(&mut client).await, b":4\r\n");

        let result = server.keyspace.get("mylist");
        assert_eq!(
            result,
            crate::storage::KeyResult::Items(vec![
                "test".to_string(),
                "world".to_string(),
                "hello".to_string(),
                "hi".to_string(),
            ])
        );
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let server = start_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        send(
            &mut client,
            b"*3\r\n$3\r\nset\r\n$2\r\nk1\r\n$2\r\nv1\r\n*2\r\n$3\r\nget\r\n$2\r\nk1\r\n",
        )
        .await;

        // Both responses, in order, possibly in one read
        let mut collected = Vec::new();
        while collected.len() < b"+OK\r\n$2\r\nv1\r\n".len() {
            collected.extend_from_slice(&read_reply(&mut client).await);
        }
        assert_eq!(collected, b"+OK\r\n$2\r\nv1\r\n");
    }

    #[tokio::test]
    async fn test_pub_sub_fan_out() {
        let server = start_server().await;

        // Three subscribers: {first}, {second}, {first, second, third}
        let mut sub1 = TcpStream::connect(server.addr).await.unwrap();
        let mut sub2 = TcpStream::connect(server.addr).await.unwrap();
        let mut sub3 = TcpStream::connect(server.addr).await.unwrap();

        send(&mut sub1, b"*2\r\n$9\r\nsubscribe\r\n$5\r\nfirst\r\n").await;
        assert_eq!(
            read_reply(&mut sub1).await,
            b"*3\r\n$9\r\nsubscribe\r\n$5\r\nfirst\r\n:1\r\n"
        );

        send(&mut sub2, b"*2\r\n$9\r\nsubscribe\r\n$6\r\nsecond\r\n").await;
        assert_eq!(
            read_reply(&mut sub2).await,
            b"*3\r\n$9\r\nsubscribe\r\n$6\r\nsecond\r\n:1\r\n"
        );

        send(
            &mut sub3,
            b"*4\r\n$9\r\nsubscribe\r\n$5\r\nfirst\r\n$6\r\nsecond\r\n$5\r\nthird\r\n",
        )
        .await;
        assert_eq!(
            read_reply(&mut sub3).await,
            b"*3\r\n$9\r\nsubscribe\r\n$5\r\nfirst\r\n:1\r\n\
              *3\r\n$9\r\nsubscribe\r\n$6\r\nsecond\r\n:2\r\n\
              *3\r\n$9\r\nsubscribe\r\n$5\r\nthird\r\n:3\r\n"
                .as_ref()
        );

        // Publish on "first": two receivers
        let mut publisher = TcpStream::connect(server.addr).await.unwrap();
        send(
            &mut publisher,
            b"*3\r\n$7\r\npublish\r\n$5\r\nfirst\r\n$11\r\nhello first\r\n",
        )
        .await;
        assert_eq!(read_reply(&mut publisher).await, b":2\r\n");

        let expected = b"*3\r\n$7\r\nmessage\r\n$5\r\nfirst\r\n$11\r\nhello first\r\n";
        assert_eq!(read_reply(&mut sub1).await, expected);
        assert_eq!(read_reply(&mut sub3).await, expected);

        // Publish on "third": only the third subscriber
        send(
            &mut publisher,
            b"*3\r\n$7\r\npublish\r\n$5\r\nthird\r\n$11\r\nhello third\r\n",
        )
        .await;
        assert_eq!(read_reply(&mut publisher).await, b":1\r\n");
        assert_eq!(
            read_reply(&mut sub3).await,
            b"*3\r\n$7\r\nmessage\r\n$5\r\nthird\r\n$11\r\nhello third\r\n"
        );
    }

    #[tokio::test]
    async fn test_unknown_command_answers_error() {
        let server = start_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        send(&mut client, b"*1\r\n$5\r\nbogus\r\n").await;
        assert_eq!(
            read_reply(&mut client).await,
            b"-invalid command: 'bogus'\r\n"
        );
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let server = start_server().await;

        let mut client = TcpStream::connect(server.addr).await.unwrap();
        send(&mut client, b"*1\r\n$4\r\nping\r\n").await;
        assert_eq!(read_reply(&mut client).await, b"+PONG\r\n");

        server.shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), server.server)
            .await
            .expect("server loop must exit on shutdown")
            .unwrap();
    }
}
