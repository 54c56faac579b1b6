use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Default capacity of the outbound and event queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Boxed future returned by [`Connector::open`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Why a send was refused by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendFailure {
    /// No channel is open.
    NotConnected,
    /// The payload cannot be written (empty write).
    InvalidData,
    /// The outbound queue is full.
    QueueFull,
    /// The channel has been closed by either side.
    ChannelClosed,
}

impl SendFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            SendFailure::NotConnected => "not_connected",
            SendFailure::InvalidData => "invalid_data",
            SendFailure::QueueFull => "queue_full",
            SendFailure::ChannelClosed => "channel_closed",
        }
    }
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification raised by the transport side of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Raw inbound bytes. Chunk boundaries carry no meaning.
    Data(Bytes),
    /// A queued write could not be completed.
    SendFailed(SendFailure),
    /// The transport is gone. No further events follow.
    Disconnected(String),
}

/// Opens channels to a remote endpoint.
///
/// Implementations own the socket API; the client only ever sees the
/// resulting [`Channel`].
pub trait Connector: Send + Sync + 'static {
    /// Open a channel to `host:port`.
    fn open(&self, host: &str, port: u16) -> BoxFuture<'static, Result<Channel>>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

/// Create a connected channel/peer pair.
///
/// The [`Channel`] half goes to the client; the [`ChannelPeer`] half is
/// driven by the transport implementation.
pub fn channel_pair(capacity: usize) -> (Channel, ChannelPeer) {
    let capacity = capacity.max(1);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (evt_tx, evt_rx) = mpsc::channel(capacity);
    let cancel = CancellationToken::new();

    let channel = Channel {
        sender: ChannelSender {
            tx: out_tx,
            cancel: cancel.clone(),
        },
        events: evt_rx,
    };
    let peer = ChannelPeer {
        outbound: OutboundQueue {
            rx: out_rx,
            cancel: cancel.clone(),
        },
        events: EventSink { tx: evt_tx, cancel },
    };
    (channel, peer)
}

/// Client side of an open duplex channel.
///
/// Dropping the channel closes it.
pub struct Channel {
    sender: ChannelSender,
    events: mpsc::Receiver<ChannelEvent>,
}

impl Channel {
    /// A cloneable handle for queueing outbound bytes.
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Queue bytes for writing.
    pub fn send(&self, bytes: Bytes) -> std::result::Result<(), SendFailure> {
        self.sender.send(bytes)
    }

    /// Wait for the next transport notification.
    ///
    /// Returns `None` once the transport side has gone away.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Close the channel. Pending outbound bytes are discarded.
    pub fn close(&self) {
        self.sender.close();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.sender.close();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Cloneable write handle of a [`Channel`].
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl ChannelSender {
    /// Queue bytes without waiting. Never blocks.
    pub fn send(&self, bytes: Bytes) -> std::result::Result<(), SendFailure> {
        if self.cancel.is_cancelled() {
            return Err(SendFailure::ChannelClosed);
        }
        if bytes.is_empty() {
            return Err(SendFailure::InvalidData);
        }
        self.tx.try_send(bytes).map_err(|err| match err {
            TrySendError::Full(_) => SendFailure::QueueFull,
            TrySendError::Closed(_) => SendFailure::ChannelClosed,
        })
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

impl fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Transport side of a channel.
pub struct ChannelPeer {
    outbound: OutboundQueue,
    events: EventSink,
}

impl ChannelPeer {
    /// Split into the outbound queue and the event sink so reader and
    /// writer tasks can own one half each.
    pub fn split(self) -> (OutboundQueue, EventSink) {
        (self.outbound, self.events)
    }

    /// Next chunk queued by the client, or `None` once closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Outbound bytes queued by the client.
pub struct OutboundQueue {
    rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
}

impl OutboundQueue {
    /// Next queued chunk, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            next = self.rx.recv() => next,
        }
    }
}

/// Raises [`ChannelEvent`]s towards the client.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    /// Deliver inbound bytes. Returns `false` if the client is gone.
    pub async fn deliver(&self, data: Bytes) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(ChannelEvent::Data(data)).await.is_ok()
    }

    pub async fn send_failed(&self, reason: SendFailure) {
        let _ = self.tx.send(ChannelEvent::SendFailed(reason)).await;
    }

    /// Report that the transport is gone and close the channel.
    pub async fn disconnected(&self, reason: impl Into<String>) {
        let _ = self
            .tx
            .send(ChannelEvent::Disconnected(reason.into()))
            .await;
        self.cancel.cancel();
    }

    /// Resolves once either side closes the channel.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}
