use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::buffer::BufferConfig;
use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

/// Frame header: body length (4B big-endian), excluding the header itself.
pub const HEADER_SIZE: usize = 4;

/// Hard cap on a frame body: 1 MiB.
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Fixed part of an envelope body: type (1) + route key (4) + status (4) +
/// correlation id (4) + error text length (2) + payload length (4).
pub const ENVELOPE_FIXED_SIZE: usize = 19;

/// Encode an envelope as one frame and append it to `dst`.
///
/// Wire format:
/// ```text
/// ┌────────────────┬──────────────────────────┐
/// │ Length (4B BE) │ Envelope body            │
/// │                │ (Length bytes)           │
/// └────────────────┴──────────────────────────┘
/// ```
pub fn encode_frame(envelope: &Envelope, dst: &mut BytesMut, max_frame_size: usize) -> Result<()> {
    let body_len = envelope.encoded_len();
    let max = max_frame_size.min(MAX_FRAME_SIZE);
    if body_len > max {
        return Err(FrameError::FrameTooLarge {
            size: body_len,
            max,
        });
    }

    envelope.check_field_lengths()?;

    dst.reserve(HEADER_SIZE + body_len);
    dst.put_u32(body_len as u32);
    envelope.encode_body(dst)
}

/// Encode an envelope into a standalone frame under the default cap.
pub fn encode(envelope: &Envelope) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + envelope.encoded_len());
    encode_frame(envelope, &mut buf, MAX_FRAME_SIZE)?;
    Ok(buf.freeze())
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` while the frame is incomplete and consumes nothing.
/// An oversized declared length fails before any body bytes are needed.
pub fn decode_frame(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Envelope>> {
    let Some(body_len) = declared_length(src, max_frame_size)? else {
        return Ok(None);
    };

    let total = HEADER_SIZE + body_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len);
    Envelope::decode_body(&body).map(Some)
}

/// Read and check the length header at the start of `src`.
pub(crate) fn declared_length(src: &[u8], max_frame_size: usize) -> Result<Option<usize>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    let max = max_frame_size.min(MAX_FRAME_SIZE);
    if len > max {
        return Err(FrameError::FrameTooLarge { size: len, max });
    }
    Ok(Some(len))
}

/// Configuration for frame decoding.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Values above 1 MiB are clamped.
    pub max_frame_size: usize,
    /// Receive buffer sizing.
    pub buffer: BufferConfig,
}

impl FrameConfig {
    pub fn effective_max_frame_size(&self) -> usize {
        self.max_frame_size.min(MAX_FRAME_SIZE)
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            buffer: BufferConfig::default(),
        }
    }
}
