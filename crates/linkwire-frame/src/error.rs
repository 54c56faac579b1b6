/// Errors that can occur during frame encoding/decoding.
///
/// `FrameTooLarge` and `MalformedEnvelope` on the receive path are fatal to
/// the connection that produced them.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The declared or encoded body length exceeds the frame limit.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The frame body does not parse into an envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// A route key string that is neither `<primary>:<secondary>` nor an integer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid route key '{0}' (expected <primary>:<secondary> or a raw integer)")]
pub struct ParseRouteKeyError(pub String);
