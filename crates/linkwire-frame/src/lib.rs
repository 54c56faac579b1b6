//! Length-prefixed envelope framing for linkwire.
//!
//! Every message on the wire is one envelope behind a length header:
//! - A 4-byte big-endian body length (excluding itself)
//! - The serialized envelope (type, route key, status, correlation id,
//!   error text, payload)
//!
//! Frames above 1 MiB are rejected. Decoding is incremental: feed raw bytes
//! in whatever chunks the transport delivers and pull complete envelopes out.

pub mod buffer;
pub mod codec;
pub mod decoder;
pub mod envelope;
pub mod error;
#[cfg(feature = "async")]
pub mod framed;

pub use buffer::{AdaptiveBuffer, BufferConfig};
pub use codec::{
    decode_frame, encode, encode_frame, FrameConfig, ENVELOPE_FIXED_SIZE, HEADER_SIZE,
    MAX_FRAME_SIZE,
};
pub use decoder::{FrameDecoder, Frames};
pub use envelope::{CorrelationId, Envelope, MessageType, RouteKey};
pub use error::{FrameError, ParseRouteKeyError, Result};
#[cfg(feature = "async")]
pub use framed::EnvelopeCodec;
