use std::fmt;
use std::io;

use linkwire_client::{ClientError, ErrorCode};
use linkwire_frame::FrameError;
use linkwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
/// The server answered with a nonzero status.
pub const REMOTE_ERROR: i32 = 4;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
/// Conventional exit status after SIGINT.
pub const INTERRUPTED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::FrameTooLarge { .. } | FrameError::MalformedEnvelope(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    let code = match err.code() {
        ErrorCode::Timeout => TIMEOUT,
        ErrorCode::ConnectFailed => match err {
            ClientError::Transport(err) => return transport_error(context, err),
            _ => TIMEOUT,
        },
        ErrorCode::NotConnected | ErrorCode::SendFailed => TRANSPORT_ERROR,
        ErrorCode::Application => REMOTE_ERROR,
        ErrorCode::FrameTooLarge | ErrorCode::MalformedEnvelope | ErrorCode::InvalidPayload => {
            DATA_INVALID
        }
        ErrorCode::InvalidConfig => USAGE,
        ErrorCode::RateLimited => FAILURE,
        ErrorCode::Cancelled => INTERRUPTED,
        ErrorCode::Closed | ErrorCode::InvalidTransition | ErrorCode::DuplicateCorrelationId => {
            INTERNAL
        }
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use linkwire_frame::RouteKey;

    use super::*;

    #[test]
    fn refused_connect_is_a_plain_failure() {
        let err = ClientError::Transport(TransportError::connect(
            "127.0.0.1",
            9,
            io::Error::from(io::ErrorKind::ConnectionRefused),
        ));
        assert_eq!(client_error("connect failed", err).code, FAILURE);
    }

    #[test]
    fn connect_timeout_maps_to_timeout() {
        let err = ClientError::ConnectTimeout {
            addr: "10.0.0.1:7000".to_string(),
            after: Duration::from_secs(1),
        };
        assert_eq!(client_error("connect failed", err).code, TIMEOUT);
    }

    #[test]
    fn application_status_is_a_remote_error() {
        let err = ClientError::Application {
            status: 3,
            message: "denied".to_string(),
            route_key: RouteKey::new(1, 1),
            correlation_id: 7,
        };
        let cli = client_error("request failed", err);
        assert_eq!(cli.code, REMOTE_ERROR);
        assert!(cli.message.contains("denied"));
    }
}
