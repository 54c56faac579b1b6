//! Payloads of the non-business message types.
//!
//! Heartbeats carry nothing. Time-sync and disconnect-notify envelopes carry
//! small JSON documents.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use linkwire_frame::{Envelope, MessageType, RouteKey};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Why the server dropped the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    IdleTimeout,
    NetworkError,
    Unknown,
    DuplicateLogin,
    Banned,
    ServerMaintenance,
    AuthenticationFailed,
    ServerClose,
}

impl DisconnectReason {
    /// Whether auto-reconnect may follow this reason.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            DisconnectReason::IdleTimeout
                | DisconnectReason::NetworkError
                | DisconnectReason::Unknown
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::IdleTimeout => "idle_timeout",
            DisconnectReason::NetworkError => "network_error",
            DisconnectReason::Unknown => "unknown",
            DisconnectReason::DuplicateLogin => "duplicate_login",
            DisconnectReason::Banned => "banned",
            DisconnectReason::ServerMaintenance => "server_maintenance",
            DisconnectReason::AuthenticationFailed => "authentication_failed",
            DisconnectReason::ServerClose => "server_close",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disconnect-notify payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectNotice {
    pub reason: DisconnectReason,
    #[serde(default)]
    pub message: String,
    /// When the server expects to accept clients again (ms since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_recovery_ms: Option<u64>,
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl DisconnectNotice {
    pub fn new(reason: DisconnectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            estimated_recovery_ms: None,
            timestamp_ms: unix_millis(),
        }
    }

    pub fn with_estimated_recovery(mut self, at_ms: u64) -> Self {
        self.estimated_recovery_ms = Some(at_ms);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.reason.is_retryable()
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::new(
            MessageType::DisconnectNotify,
            RouteKey::NONE,
            serde_json::to_vec(self)?,
        ))
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        Ok(serde_json::from_slice(&envelope.payload)?)
    }
}

impl fmt::Display for DisconnectNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}: {}", self.reason, self.message)
        }
    }
}

/// Time-sync request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSyncRequest {
    pub client_send_ms: u64,
}

/// Time-sync reply payload: the request echoed plus the server clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSyncResponse {
    pub client_send_ms: u64,
    pub server_ms: u64,
}

impl TimeSyncResponse {
    /// Build the server's reply to a time-sync request.
    pub fn reply_to(request: &Envelope, server_ms: u64) -> Result<Envelope> {
        let sync: TimeSyncRequest = serde_json::from_slice(&request.payload)?;
        let reply = TimeSyncResponse {
            client_send_ms: sync.client_send_ms,
            server_ms,
        };
        Ok(Envelope::response_to(request, serde_json::to_vec(&reply)?))
    }
}

/// One completed clock exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSyncSample {
    pub round_trip: Duration,
    /// Server clock minus local clock, in milliseconds.
    pub offset_ms: i64,
}

impl TimeSyncSample {
    /// `offset = server_ms + rtt / 2 - local_receive_ms`
    pub fn from_exchange(round_trip: Duration, server_ms: u64, local_receive_ms: u64) -> Self {
        let half_rtt = (round_trip.as_millis() / 2) as i64;
        Self {
            round_trip,
            offset_ms: server_ms as i64 + half_rtt - local_receive_ms as i64,
        }
    }
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
