use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, MAX_FRAME_SIZE};
use crate::envelope::Envelope;
use crate::error::FrameError;

/// `tokio_util` codec speaking the envelope wire format.
///
/// Wrap any `AsyncRead + AsyncWrite` with `Framed::new(io, EnvelopeCodec::new())`
/// to get a `Stream` of envelopes and a `Sink` accepting them. Used by the
/// reference server and by tests that play the remote side over TCP.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_frame_size: usize,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, FrameError> {
        decode_frame(src, self.max_frame_size)
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&item, dst, self.max_frame_size)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::envelope::RouteKey;

    #[tokio::test]
    async fn envelopes_cross_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(client, EnvelopeCodec::new());
        let mut stream = FramedRead::new(server, EnvelopeCodec::new());

        let sent = vec![
            Envelope::request(RouteKey::new(5, 1), 11, vec![0x42; 500]),
            Envelope::heartbeat(),
        ];
        let to_send = sent.clone();
        let writer = tokio::spawn(async move {
            for envelope in to_send {
                sink.send(envelope).await.unwrap();
            }
        });

        let mut received = Vec::new();
        while received.len() < sent.len() {
            received.push(stream.next().await.unwrap().unwrap());
        }
        writer.await.unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn rejected_envelope_does_not_corrupt_later_frames() {
        let mut codec = EnvelopeCodec::new();
        let mut dst = BytesMut::new();
        let mut bad = Envelope::push(RouteKey::new(2, 2), &b""[..]);
        bad.error_text = "e".repeat(u16::MAX as usize + 1);
        assert!(codec.encode(bad, &mut dst).is_err());

        let good = Envelope::request(RouteKey::new(2, 3), 9, &b"after"[..]);
        codec.encode(good.clone(), &mut dst).unwrap();
        assert_eq!(codec.decode(&mut dst).unwrap(), Some(good));
        assert!(dst.is_empty());
    }

    #[tokio::test]
    async fn oversized_header_surfaces_as_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = FramedRead::new(server, EnvelopeCodec::new());

        client
            .write_all(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes())
            .await
            .unwrap();
        assert!(matches!(
            stream.next().await,
            Some(Err(FrameError::FrameTooLarge { .. }))
        ));
    }
}
