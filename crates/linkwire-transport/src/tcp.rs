use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::channel::{
    channel_pair, BoxFuture, Channel, Connector, EventSink, OutboundQueue, SendFailure,
    DEFAULT_QUEUE_CAPACITY,
};
use crate::error::{Result, TransportError};

const DEFAULT_READ_CHUNK_SIZE: usize = 16 * 1024;

/// Configuration for [`TcpConnector`].
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Disable Nagle's algorithm. Default: true.
    pub nodelay: bool,
    /// Bytes requested per socket read. Default: 16 KiB.
    pub read_chunk_size: usize,
    /// Capacity of the outbound and event queues.
    pub queue_capacity: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Reliable byte-stream transport over TCP.
///
/// Each opened channel runs one reader task and one writer task; both stop
/// when the channel is closed from either side.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: TcpConfig,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }
}

impl Connector for TcpConnector {
    fn open(&self, host: &str, port: u16) -> BoxFuture<'static, Result<Channel>> {
        let host = host.to_string();
        let config = self.config.clone();
        Box::pin(async move {
            let stream = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|source| TransportError::connect(&host, port, source))?;
            stream.set_nodelay(config.nodelay)?;
            debug!(%host, port, "connected to tcp endpoint");

            let (channel, peer) = channel_pair(config.queue_capacity);
            let (queue, sink) = peer.split();
            let (read_half, write_half) = stream.into_split();

            tokio::spawn(read_loop(
                read_half,
                sink.clone(),
                config.read_chunk_size.max(1),
            ));
            tokio::spawn(write_loop(write_half, queue, sink));

            Ok(channel)
        })
    }

    fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

async fn read_loop(mut reader: OwnedReadHalf, sink: EventSink, chunk_size: usize) {
    let mut buf = BytesMut::with_capacity(chunk_size);
    loop {
        buf.reserve(chunk_size);
        tokio::select! {
            _ = sink.closed() => break,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    debug!("tcp stream reached eof");
                    sink.disconnected("connection closed by peer").await;
                    break;
                }
                Ok(_) => {
                    if !sink.deliver(buf.split().freeze()).await {
                        break;
                    }
                }
                Err(err) => {
                    debug!(error = %err, "tcp read failed");
                    sink.disconnected(err.to_string()).await;
                    break;
                }
            },
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut queue: OutboundQueue, sink: EventSink) {
    while let Some(bytes) = queue.recv().await {
        if let Err(err) = writer.write_all(&bytes).await {
            debug!(error = %err, "tcp write failed");
            sink.send_failed(SendFailure::ChannelClosed).await;
            sink.disconnected(err.to_string()).await;
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::channel::ChannelEvent;

    #[tokio::test]
    async fn roundtrip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            stream.write_all(b"pong").await.unwrap();
        });

        let mut channel = TcpConnector::new().open("127.0.0.1", port).await.unwrap();
        channel.send(bytes::Bytes::from_static(b"ping")).unwrap();

        let mut received = Vec::new();
        while received.len() < 4 {
            match channel.recv().await {
                Some(ChannelEvent::Data(chunk)) => received.extend_from_slice(&chunk),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(received, b"pong");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn remote_close_raises_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut channel = TcpConnector::new().open("127.0.0.1", port).await.unwrap();
        server.await.unwrap();

        match channel.recv().await {
            Some(ChannelEvent::Disconnected(_)) => {}
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpConnector::new()
            .open("127.0.0.1", port)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
