use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, ParseRouteKeyError, Result};

/// Identifier pairing a request with its response. `0` marks a server push.
pub type CorrelationId = u32;

/// Envelope message type (first body byte on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Heartbeat = 0,
    Business = 1,
    TimeSync = 2,
    DisconnectNotify = 3,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Heartbeat => "heartbeat",
            MessageType::Business => "business",
            MessageType::TimeSync => "time-sync",
            MessageType::DisconnectNotify => "disconnect-notify",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageType::Heartbeat),
            1 => Ok(MessageType::Business),
            2 => Ok(MessageType::TimeSync),
            3 => Ok(MessageType::DisconnectNotify),
            other => Err(FrameError::malformed(format!(
                "unknown message type {other}"
            ))),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Route selector: high 16 bits primary command, low 16 bits sub-command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(i32);

impl RouteKey {
    /// Route key used by control envelopes (heartbeat, time-sync, notices).
    pub const NONE: RouteKey = RouteKey(0);

    pub const fn new(primary: u16, secondary: u16) -> Self {
        RouteKey((((primary as u32) << 16) | secondary as u32) as i32)
    }

    pub const fn from_raw(raw: i32) -> Self {
        RouteKey(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn primary(self) -> u16 {
        ((self.0 as u32) >> 16) as u16
    }

    pub const fn secondary(self) -> u16 {
        ((self.0 as u32) & 0xFFFF) as u16
    }
}

impl From<i32> for RouteKey {
    fn from(raw: i32) -> Self {
        RouteKey(raw)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.primary(), self.secondary())
    }
}

impl FromStr for RouteKey {
    type Err = ParseRouteKeyError;

    /// Accepts `<primary>:<secondary>` or a raw `i32`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ParseRouteKeyError(s.to_string());
        match s.split_once(':') {
            Some((primary, secondary)) => {
                let primary = primary.trim().parse::<u16>().map_err(|_| invalid())?;
                let secondary = secondary.trim().parse::<u16>().map_err(|_| invalid())?;
                Ok(RouteKey::new(primary, secondary))
            }
            None => s.parse::<i32>().map(RouteKey).map_err(|_| invalid()),
        }
    }
}

/// One complete application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message_type: MessageType,
    pub route_key: RouteKey,
    /// `0` on success; anything else is an application error.
    pub response_status: i32,
    pub error_text: String,
    pub payload: Bytes,
    pub correlation_id: CorrelationId,
}

impl Envelope {
    pub fn new(message_type: MessageType, route_key: RouteKey, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            route_key,
            response_status: 0,
            error_text: String::new(),
            payload: payload.into(),
            correlation_id: 0,
        }
    }

    /// Keepalive envelope. Carries no payload.
    pub fn heartbeat() -> Self {
        Self::new(MessageType::Heartbeat, RouteKey::NONE, Bytes::new())
    }

    /// Business request expecting a response with the same correlation id.
    pub fn request(
        route_key: RouteKey,
        correlation_id: CorrelationId,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::new(MessageType::Business, route_key, payload).with_correlation_id(correlation_id)
    }

    /// Fire-and-forget business message (correlation id 0).
    pub fn push(route_key: RouteKey, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageType::Business, route_key, payload)
    }

    /// Successful reply to `request`, echoing its type, route and id.
    pub fn response_to(request: &Envelope, payload: impl Into<Bytes>) -> Self {
        Self::new(request.message_type, request.route_key, payload)
            .with_correlation_id(request.correlation_id)
    }

    /// Failed reply to `request` with a nonzero status.
    pub fn error_response(request: &Envelope, status: i32, error_text: impl Into<String>) -> Self {
        let mut envelope = Self::response_to(request, Bytes::new());
        envelope.response_status = status;
        envelope.error_text = error_text.into();
        envelope
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn is_success(&self) -> bool {
        self.response_status == 0
    }

    /// Server-initiated message (no correlation).
    pub fn is_push(&self) -> bool {
        self.correlation_id == 0
    }

    /// Serialized body length, excluding the frame header.
    pub fn encoded_len(&self) -> usize {
        crate::codec::ENVELOPE_FIXED_SIZE + self.error_text.len() + self.payload.len()
    }

    /// Serialize the envelope body (no length header).
    ///
    /// Layout (big-endian):
    /// ```text
    /// ┌──────┬───────────┬────────┬─────────────┬──────────────────┬───────────────────┐
    /// │ type │ route key │ status │ correlation │ error text       │ payload           │
    /// │ (1B) │ (4B i32)  │ (4B)   │ (4B u32)    │ (2B len + UTF-8) │ (4B len + bytes)  │
    /// └──────┴───────────┴────────┴─────────────┴──────────────────┴───────────────────┘
    /// ```
    pub fn encode_body(&self, dst: &mut BytesMut) -> Result<()> {
        self.check_field_lengths()?;

        dst.reserve(self.encoded_len());
        dst.put_u8(self.message_type as u8);
        dst.put_i32(self.route_key.raw());
        dst.put_i32(self.response_status);
        dst.put_u32(self.correlation_id);
        dst.put_u16(self.error_text.len() as u16);
        dst.put_slice(self.error_text.as_bytes());
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Fail if a length-prefixed field cannot be represented on the wire.
    pub(crate) fn check_field_lengths(&self) -> Result<()> {
        if self.error_text.len() > u16::MAX as usize {
            return Err(FrameError::malformed(format!(
                "error text too long ({} bytes, max {})",
                self.error_text.len(),
                u16::MAX
            )));
        }
        if self.payload.len() > u32::MAX as usize {
            return Err(FrameError::FrameTooLarge {
                size: self.payload.len(),
                max: u32::MAX as usize,
            });
        }
        Ok(())
    }

    /// Parse an envelope body. The whole slice must be consumed.
    pub fn decode_body(mut src: &[u8]) -> Result<Self> {
        if src.len() < crate::codec::ENVELOPE_FIXED_SIZE {
            return Err(FrameError::malformed(format!(
                "body too short ({} bytes, min {})",
                src.len(),
                crate::codec::ENVELOPE_FIXED_SIZE
            )));
        }

        let message_type = MessageType::try_from(src.get_u8())?;
        let route_key = RouteKey(src.get_i32());
        let response_status = src.get_i32();
        let correlation_id = src.get_u32();

        let text_len = src.get_u16() as usize;
        if src.remaining() < text_len {
            return Err(FrameError::malformed("error text runs past end of frame"));
        }
        let error_text = std::str::from_utf8(&src[..text_len])
            .map_err(|_| FrameError::malformed("error text is not valid UTF-8"))?
            .to_string();
        src.advance(text_len);

        if src.remaining() < 4 {
            return Err(FrameError::malformed("missing payload length"));
        }
        let payload_len = src.get_u32() as usize;
        if src.remaining() != payload_len {
            return Err(FrameError::malformed(format!(
                "payload length {} does not match remaining {} bytes",
                payload_len,
                src.remaining()
            )));
        }
        let payload = Bytes::copy_from_slice(src);

        Ok(Self {
            message_type,
            route_key,
            response_status,
            error_text,
            payload,
            correlation_id,
        })
    }
}
