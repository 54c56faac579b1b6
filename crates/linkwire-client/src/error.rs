use std::fmt;
use std::time::Duration;

use linkwire_frame::{CorrelationId, FrameError, RouteKey};
use linkwire_transport::{SendFailure, TransportError};

use crate::state::ConnectionState;

/// Stable reason code carried by every [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotConnected,
    RateLimited,
    Timeout,
    Cancelled,
    Closed,
    ConnectFailed,
    SendFailed,
    FrameTooLarge,
    MalformedEnvelope,
    Application,
    InvalidTransition,
    DuplicateCorrelationId,
    InvalidConfig,
    InvalidPayload,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotConnected => "not_connected",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Closed => "closed",
            ErrorCode::ConnectFailed => "connect_failed",
            ErrorCode::SendFailed => "send_failed",
            ErrorCode::FrameTooLarge => "frame_too_large",
            ErrorCode::MalformedEnvelope => "malformed_envelope",
            ErrorCode::Application => "application",
            ErrorCode::InvalidTransition => "invalid_transition",
            ErrorCode::DuplicateCorrelationId => "duplicate_correlation_id",
            ErrorCode::InvalidConfig => "invalid_config",
            ErrorCode::InvalidPayload => "invalid_payload",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No live connection, or the connection dropped while the request was
    /// outstanding.
    #[error("not connected: {reason}")]
    NotConnected {
        reason: String,
        route_key: Option<RouteKey>,
        correlation_id: Option<CorrelationId>,
    },

    /// Outbound rate limit exceeded. Never queued.
    #[error("rate limited on route {route_key}")]
    RateLimited { route_key: RouteKey },

    /// No response before the request deadline.
    #[error("request {correlation_id} on route {route_key} timed out after {after:?}")]
    Timeout {
        route_key: RouteKey,
        correlation_id: CorrelationId,
        after: Duration,
    },

    /// The caller cancelled the request.
    #[error("request {correlation_id} on route {route_key} cancelled")]
    Cancelled {
        route_key: RouteKey,
        correlation_id: CorrelationId,
    },

    /// The client was closed. Terminal.
    #[error("client is closed")]
    Closed,

    /// The transport did not open within the connect timeout.
    #[error("connect to {addr} timed out after {after:?}")]
    ConnectTimeout { addr: String, after: Duration },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The channel refused outbound bytes.
    #[error("send on route {route_key} failed: {failure}")]
    SendFailed {
        route_key: RouteKey,
        failure: SendFailure,
    },

    /// Protocol error. Fatal to the connection that produced it.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The server answered with a nonzero status.
    #[error("request {correlation_id} on route {route_key} failed with status {status}: {message}")]
    Application {
        status: i32,
        message: String,
        route_key: RouteKey,
        correlation_id: CorrelationId,
    },

    /// A state transition outside the allowed table was requested.
    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// The correlation id is already outstanding.
    #[error("correlation id {0} is already outstanding")]
    DuplicateCorrelationId(CorrelationId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub(crate) fn not_connected(reason: impl Into<String>) -> Self {
        Self::NotConnected {
            reason: reason.into(),
            route_key: None,
            correlation_id: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::NotConnected { .. } => ErrorCode::NotConnected,
            ClientError::RateLimited { .. } => ErrorCode::RateLimited,
            ClientError::Timeout { .. } => ErrorCode::Timeout,
            ClientError::Cancelled { .. } => ErrorCode::Cancelled,
            ClientError::Closed => ErrorCode::Closed,
            ClientError::ConnectTimeout { .. } | ClientError::Transport(_) => {
                ErrorCode::ConnectFailed
            }
            ClientError::SendFailed { .. } => ErrorCode::SendFailed,
            ClientError::Frame(FrameError::FrameTooLarge { .. }) => ErrorCode::FrameTooLarge,
            ClientError::Frame(FrameError::MalformedEnvelope(_)) => ErrorCode::MalformedEnvelope,
            ClientError::Frame(FrameError::Io(_)) => ErrorCode::SendFailed,
            ClientError::Application { .. } => ErrorCode::Application,
            ClientError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            ClientError::DuplicateCorrelationId(_) => ErrorCode::DuplicateCorrelationId,
            ClientError::InvalidConfig(_) => ErrorCode::InvalidConfig,
            ClientError::Json(_) => ErrorCode::InvalidPayload,
        }
    }

    pub fn route_key(&self) -> Option<RouteKey> {
        match self {
            ClientError::NotConnected { route_key, .. } => *route_key,
            ClientError::RateLimited { route_key }
            | ClientError::Timeout { route_key, .. }
            | ClientError::Cancelled { route_key, .. }
            | ClientError::SendFailed { route_key, .. }
            | ClientError::Application { route_key, .. } => Some(*route_key),
            _ => None,
        }
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            ClientError::NotConnected { correlation_id, .. } => *correlation_id,
            ClientError::Timeout { correlation_id, .. }
            | ClientError::Cancelled { correlation_id, .. }
            | ClientError::Application { correlation_id, .. } => Some(*correlation_id),
            ClientError::DuplicateCorrelationId(id) => Some(*id),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_context_are_exposed() {
        let err = ClientError::Timeout {
            route_key: RouteKey::new(2, 3),
            correlation_id: 17,
            after: Duration::from_millis(5000),
        };
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(err.code().as_str(), "timeout");
        assert_eq!(err.route_key(), Some(RouteKey::new(2, 3)));
        assert_eq!(err.correlation_id(), Some(17));
    }

    #[test]
    fn frame_errors_map_to_protocol_codes() {
        let err = ClientError::from(FrameError::FrameTooLarge {
            size: 2_000_000,
            max: 1_048_576,
        });
        assert_eq!(err.code(), ErrorCode::FrameTooLarge);
        assert!(err.route_key().is_none());
    }

    #[test]
    fn rate_limited_carries_route() {
        let err = ClientError::RateLimited {
            route_key: RouteKey::new(8, 1),
        };
        assert_eq!(err.code().to_string(), "rate_limited");
        assert_eq!(err.to_string(), "rate limited on route 8:1");
        assert_eq!(err.correlation_id(), None);
    }
}
