//! # Frame Codec
//!
//! Length-prefixed framing over a byte stream.
//!
//! ```text
//! [Length(8, big-endian u64)] [Payload(Length)]
//! ```
//!
//! Decoding is a two-state machine. In `AwaitingLength` the codec needs at
//! least eight buffered bytes; once the header is consumed it moves to
//! `AwaitingPayload` and waits for the declared number of payload bytes. A
//! decoded frame is split off the front of the buffer without copying and the
//! codec returns to `AwaitingLength`, so coalesced reads are drained by calling
//! `decode` until it yields `None`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{DEFAULT_PACKET_SIZE_LIMIT, FRAME_HEADER_LEN};
use crate::error::{Result, ServerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingLength,
    AwaitingPayload(usize),
}

/// Codec for the 8-byte length-prefixed wire format
#[derive(Debug, Clone)]
pub struct FrameCodec {
    packet_size_limit: u64,
    state: DecodeState,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_PACKET_SIZE_LIMIT)
    }
}

impl FrameCodec {
    /// Create a codec accepting frames up to `packet_size_limit` bytes, header included
    pub fn new(packet_size_limit: u64) -> Self {
        Self {
            packet_size_limit,
            state: DecodeState::AwaitingLength,
        }
    }

    /// Largest payload this codec will accept
    pub fn max_payload_size(&self) -> u64 {
        self.packet_size_limit
            .saturating_sub(FRAME_HEADER_LEN as u64)
    }

    /// Whether a header has been consumed and its payload is still pending
    pub fn is_mid_frame(&self) -> bool {
        matches!(self.state, DecodeState::AwaitingPayload(_))
    }

    /// Bytes still missing from `src` before the next `decode` can make progress
    pub fn bytes_needed(&self, src: &BytesMut) -> usize {
        match self.state {
            DecodeState::AwaitingLength => FRAME_HEADER_LEN.saturating_sub(src.len()),
            DecodeState::AwaitingPayload(len) => len.saturating_sub(src.len()),
        }
    }

    fn check_declared(&self, declared: u64) -> Result<usize> {
        let max = self.max_payload_size();
        if declared > max {
            return Err(ServerError::OversizedFrame {
                size: declared,
                limit: max,
            });
        }
        usize::try_from(declared).map_err(|_| ServerError::OversizedFrame {
            size: declared,
            limit: max,
        })
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ServerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let len = match self.state {
            DecodeState::AwaitingLength => {
                if src.len() < FRAME_HEADER_LEN {
                    return Ok(None);
                }
                let declared = src.get_u64();
                let len = self.check_declared(declared)?;
                self.state = DecodeState::AwaitingPayload(len);
                len
            }
            DecodeState::AwaitingPayload(len) => len,
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.state = DecodeState::AwaitingLength;
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ServerError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&[u8]>::encode(self, &item[..], dst)
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = ServerError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        self.check_declared(item.len() as u64)?;
        dst.reserve(FRAME_HEADER_LEN + item.len());
        dst.put_u64(item.len() as u64);
        dst.put_slice(item);
        Ok(())
    }
}

/// Frame a payload for the wire without any size check
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u64(payload.len() as u64);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode exactly one frame from a complete buffer.
///
/// Returns `Ok(None)` when `data` holds less than one frame. Trailing bytes
/// beyond the first frame are ignored.
pub fn decode_frame(data: &[u8], packet_size_limit: u64) -> Result<Option<Bytes>> {
    let mut codec = FrameCodec::new(packet_size_limit);
    let mut buf = BytesMut::from(data);
    codec.decode(&mut buf)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn encodes_big_endian_length_prefix() {
        let frame = encode_frame(b"hello");
        assert_eq!(&frame[..8], &[0, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(&frame[8..], b"hello");
    }

    #[test]
    fn partial_header_keeps_state() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 4);
        assert!(!codec.is_mid_frame());
    }

    #[test]
    fn header_then_payload_in_two_steps() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0, 0, 0, 0, 3, b'a'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.is_mid_frame());
        assert_eq!(codec.bytes_needed(&buf), 2);

        buf.extend_from_slice(b"bc");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"abc");
        assert!(buf.is_empty());
        assert!(!codec.is_mid_frame());
    }

    #[test]
    fn coalesced_frames_drain_without_more_input() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"one"));
        buf.extend_from_slice(&encode_frame(b""));
        buf.extend_from_slice(&encode_frame(b"three"));

        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames, vec![Bytes::from("one"), Bytes::new(), Bytes::from("three")]);
    }

    #[test]
    fn declared_length_over_limit_is_rejected() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::new();
        buf.put_u64(9);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ServerError::OversizedFrame { size: 9, limit: 8 }));
    }

    #[test]
    fn payload_at_limit_is_accepted() {
        let payload = vec![7u8; 8];
        let frame = decode_frame(&encode_frame(&payload), 16).unwrap().unwrap();
        assert_eq!(&frame[..], &payload[..]);
    }

    #[test]
    fn encoder_refuses_oversized_payload() {
        let mut codec = FrameCodec::new(10);
        let mut dst = BytesMut::new();
        assert!(codec.encode(&b"abc"[..], &mut dst).is_err());
        assert!(dst.is_empty());
    }
}
