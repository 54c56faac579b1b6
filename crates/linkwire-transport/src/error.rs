/// Errors that can occur while opening or driving a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Build a connect error for `host:port`.
    pub fn connect(host: &str, port: u16, source: std::io::Error) -> Self {
        Self::Connect {
            addr: format!("{host}:{port}"),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
