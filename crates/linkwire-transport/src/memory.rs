//! In-process transport.
//!
//! [`MemoryConnector`] hands every opened channel to a paired
//! [`MemoryServer`], which plays the remote endpoint. Nothing touches the OS,
//! so the pair works under a paused tokio clock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::{channel_pair, BoxFuture, Channel, ChannelPeer, Connector};
use crate::error::{Result, TransportError};

#[derive(Debug, Default)]
struct Shared {
    refusing: AtomicBool,
    attempts: AtomicUsize,
}

/// Client-side connector of an in-memory transport.
#[derive(Clone)]
pub struct MemoryConnector {
    incoming: mpsc::UnboundedSender<MemoryConnection>,
    shared: Arc<Shared>,
    queue_capacity: usize,
}

impl MemoryConnector {
    /// Create a connector and the server that receives its connections.
    pub fn pair() -> (MemoryConnector, MemoryServer) {
        Self::pair_with_capacity(crate::channel::DEFAULT_QUEUE_CAPACITY)
    }

    pub fn pair_with_capacity(queue_capacity: usize) -> (MemoryConnector, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        (
            MemoryConnector {
                incoming: tx,
                shared: Arc::clone(&shared),
                queue_capacity,
            },
            MemoryServer {
                incoming: rx,
                shared,
            },
        )
    }
}

impl Connector for MemoryConnector {
    fn open(&self, host: &str, port: u16) -> BoxFuture<'static, Result<Channel>> {
        let host = host.to_string();
        let incoming = self.incoming.clone();
        let shared = Arc::clone(&self.shared);
        let capacity = self.queue_capacity;
        Box::pin(async move {
            shared.attempts.fetch_add(1, Ordering::SeqCst);
            if shared.refusing.load(Ordering::SeqCst) {
                return Err(TransportError::connect(
                    &host,
                    port,
                    std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                ));
            }

            let (channel, peer) = channel_pair(capacity);
            let connection = MemoryConnection {
                peer,
                host: host.clone(),
                port,
            };
            incoming.send(connection).map_err(|_| {
                TransportError::connect(
                    &host,
                    port,
                    std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                )
            })?;
            debug!(%host, port, "opened in-memory channel");
            Ok(channel)
        })
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

/// Accepts channels opened through the paired [`MemoryConnector`].
pub struct MemoryServer {
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
    shared: Arc<Shared>,
}

impl MemoryServer {
    /// Wait for the next opened channel.
    pub async fn accept(&mut self) -> Option<MemoryConnection> {
        self.incoming.recv().await
    }

    /// Make subsequent `open` calls fail with `ConnectionRefused`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refusing.store(refuse, Ordering::SeqCst);
    }

    /// Number of `open` calls seen so far, refused ones included.
    pub fn connect_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// Server end of one in-memory channel.
pub struct MemoryConnection {
    peer: ChannelPeer,
    host: String,
    port: u16,
}

impl MemoryConnection {
    /// Next chunk written by the client, or `None` once closed.
    pub async fn read(&mut self) -> Option<Bytes> {
        self.peer.recv().await
    }

    /// Write bytes towards the client.
    pub async fn write(&self, data: impl Into<Bytes>) -> bool {
        self.peer.events().deliver(data.into()).await
    }

    /// Drop the connection with a transport-level error.
    pub async fn disconnect(self, reason: &str) {
        self.peer.events().disconnected(reason).await;
    }

    pub fn is_closed(&self) -> bool {
        self.peer.is_closed()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
