use crate::buffer::AdaptiveBuffer;
use crate::codec::{declared_length, FrameConfig, HEADER_SIZE};
use crate::envelope::Envelope;
use crate::error::Result;

/// Incremental decoder: raw stream chunks in, envelopes out.
///
/// Chunk boundaries carry no meaning. A trailing partial frame stays in the
/// adaptive buffer until the next [`feed`](FrameDecoder::feed). After a
/// protocol error the decoder yields nothing until [`reset`](FrameDecoder::reset).
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: AdaptiveBuffer,
    max_frame_size: usize,
    failed: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            max_frame_size: config.effective_max_frame_size(),
            buffer: AdaptiveBuffer::new(config.buffer),
            failed: false,
        }
    }

    /// Feed a chunk and iterate the envelopes it completes.
    ///
    /// The iterator is lazy: input is only copied into the buffer as frames
    /// are pulled. Dropping it early keeps the unread input buffered, so a
    /// later [`frames`](FrameDecoder::frames) call picks up where it stopped.
    pub fn feed<'a>(&'a mut self, data: &'a [u8]) -> Frames<'a> {
        Frames {
            decoder: self,
            input: data,
        }
    }

    /// Iterate envelopes already sitting in the buffer.
    pub fn frames(&mut self) -> Frames<'_> {
        self.feed(&[])
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer(&self) -> &AdaptiveBuffer {
        &self.buffer
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Whether a protocol error has poisoned the stream.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Discard buffered bytes and clear the failure flag.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.failed = false;
    }

    fn decode_buffered(&mut self) -> Result<Option<Envelope>> {
        let pending = self.buffer.as_slice();
        let Some(body_len) = declared_length(pending, self.max_frame_size)? else {
            return Ok(None);
        };
        let total = HEADER_SIZE + body_len;
        if pending.len() < total {
            return Ok(None);
        }
        let envelope = Envelope::decode_body(&pending[HEADER_SIZE..total]);
        self.buffer.consume(total);
        envelope.map(Some)
    }

    /// Bytes still missing before the buffered frame (or header) is complete.
    fn bytes_wanted(&self) -> usize {
        let pending = self.buffer.as_slice();
        if pending.len() < HEADER_SIZE {
            return HEADER_SIZE - pending.len();
        }
        match declared_length(pending, self.max_frame_size) {
            Ok(Some(body_len)) => (HEADER_SIZE + body_len).saturating_sub(pending.len()),
            _ => 0,
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy sequence of envelopes produced by [`FrameDecoder::feed`].
///
/// Yields `Err` at most once; the decoder is failed afterwards.
#[derive(Debug)]
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    input: &'a [u8],
}

impl Frames<'_> {
    /// Input bytes not yet moved into the decoder.
    pub fn remaining_input(&self) -> usize {
        self.input.len()
    }

    fn fail<T>(&mut self, err: crate::error::FrameError) -> Option<Result<T>> {
        self.decoder.failed = true;
        self.input = &[];
        Some(Err(err))
    }

    /// Decode straight from the input when nothing is buffered.
    fn decode_direct(&mut self) -> Option<Result<Envelope>> {
        let body_len = match declared_length(self.input, self.decoder.max_frame_size) {
            Ok(Some(len)) => len,
            Ok(None) => return None,
            Err(err) => return self.fail(err),
        };
        let total = HEADER_SIZE + body_len;
        if self.input.len() < total {
            return None;
        }
        let (frame, rest) = self.input.split_at(total);
        self.input = rest;
        match Envelope::decode_body(&frame[HEADER_SIZE..]) {
            Ok(envelope) => Some(Ok(envelope)),
            Err(err) => self.fail(err),
        }
    }
}

impl Iterator for Frames<'_> {
    type Item = Result<Envelope>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.decoder.failed {
            return None;
        }

        loop {
            if self.decoder.buffer.is_empty() {
                if let Some(item) = self.decode_direct() {
                    return Some(item);
                }
            } else {
                match self.decoder.decode_buffered() {
                    Ok(Some(envelope)) => return Some(Ok(envelope)),
                    Ok(None) => {}
                    Err(err) => return self.fail(err),
                }
            }

            if self.input.is_empty() {
                return None;
            }
            let take = self.decoder.bytes_wanted().max(1).min(self.input.len());
            let (head, tail) = self.input.split_at(take);
            self.decoder.buffer.extend_from_slice(head);
            self.input = tail;
        }
    }
}

impl Drop for Frames<'_> {
    fn drop(&mut self) {
        if self.decoder.failed {
            return;
        }
        if !self.input.is_empty() {
            self.decoder.buffer.extend_from_slice(self.input);
        }
        self.decoder.buffer.end_cycle();
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, MAX_FRAME_SIZE};
    use crate::envelope::RouteKey;
    use crate::error::FrameError;

    fn wire(envelopes: &[Envelope]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for envelope in envelopes {
            encode_frame(envelope, &mut buf, MAX_FRAME_SIZE).unwrap();
        }
        buf.to_vec()
    }

    fn sample() -> Vec<Envelope> {
        vec![
            Envelope::request(RouteKey::new(1, 1), 1, &b"alpha"[..]),
            Envelope::heartbeat(),
            Envelope::push(RouteKey::new(2, 9), vec![0xEE; 300]),
        ]
    }

    #[test]
    fn whole_stream_in_one_chunk() {
        let expected = sample();
        let mut decoder = FrameDecoder::new();
        let decoded: Vec<_> = decoder
            .feed(&wire(&expected))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(decoded, expected);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn every_split_point_yields_same_envelopes() {
        let expected = sample();
        let bytes = wire(&expected);

        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut decoded: Vec<Envelope> = decoder
                .feed(&bytes[..split])
                .collect::<Result<_>>()
                .unwrap();
            decoded.extend(
                decoder
                    .feed(&bytes[split..])
                    .collect::<Result<Vec<_>>>()
                    .unwrap(),
            );
            assert_eq!(decoded, expected, "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time() {
        let expected = sample();
        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for byte in wire(&expected) {
            for envelope in decoder.feed(&[byte]) {
                decoded.push(envelope.unwrap());
            }
        }
        assert_eq!(decoded, expected);
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let bytes = wire(&sample()[..1]);
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&bytes[..bytes.len() - 3]).count(), 0);
        assert_eq!(decoder.buffered(), bytes.len() - 3);
        assert_eq!(decoder.feed(&bytes[bytes.len() - 3..]).count(), 1);
    }

    #[test]
    fn dropped_iterator_can_be_resumed() {
        let expected = sample();
        let mut decoder = FrameDecoder::new();

        let first: Vec<_> = decoder.feed(&wire(&expected)).take(1).collect();
        assert_eq!(first.len(), 1);
        assert!(decoder.buffered() > 0);

        let rest: Vec<Envelope> = decoder.frames().collect::<Result<_>>().unwrap();
        assert_eq!(rest, expected[1..]);
    }

    #[test]
    fn too_large_declared_length_fails_once() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(MAX_FRAME_SIZE as u32 + 1);
        bytes.put_slice(&[0u8; 16]);

        let mut decoder = FrameDecoder::new();
        let mut frames = decoder.feed(&bytes);
        assert!(matches!(
            frames.next(),
            Some(Err(FrameError::FrameTooLarge { .. }))
        ));
        assert!(frames.next().is_none());
        drop(frames);

        assert!(decoder.is_failed());
        assert_eq!(decoder.feed(&wire(&sample())).count(), 0);

        decoder.reset();
        assert_eq!(decoder.feed(&wire(&sample())).count(), 3);
    }

    #[test]
    fn too_large_detected_from_header_alone() {
        let header = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&header[..2]).count(), 0);
        let result: Vec<_> = decoder.feed(&header[2..]).collect();
        assert!(matches!(
            result.as_slice(),
            [Err(FrameError::FrameTooLarge { .. })]
        ));
    }

    #[test]
    fn frames_before_a_malformed_one_are_delivered() {
        let mut bytes = BytesMut::from(wire(&sample()[..1]).as_slice());
        bytes.put_u32(2);
        bytes.put_slice(&[0xFF, 0xFF]);

        let mut decoder = FrameDecoder::new();
        let results: Vec<_> = decoder.feed(&bytes).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(FrameError::MalformedEnvelope(_))));
    }

    #[test]
    fn large_frame_grows_buffer() {
        let big = Envelope::push(RouteKey::new(3, 3), vec![0x11; 100_000]);
        let bytes = wire(std::slice::from_ref(&big));

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for chunk in bytes.chunks(4096) {
            decoded.extend(decoder.feed(chunk).map(|r| r.unwrap()));
        }
        assert_eq!(decoded, vec![big]);
        assert!(decoder.buffer().capacity() >= 100_000);
    }
}
