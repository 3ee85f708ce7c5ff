use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Discriminant byte for a data frame.
pub const DATA_TAG: u8 = 0x00;

/// Discriminant byte for a handshake frame.
pub const HANDSHAKE_TAG: u8 = 0x01;

/// Data frame header: tag (1) + sequence (4) + session (4) + cpu (4) = 13 bytes.
pub const DATA_HEADER_SIZE: usize = 13;

/// A handshake frame occupies exactly 5 bytes on the wire.
pub const HANDSHAKE_WIRE_SIZE: usize = 5;

/// One wire-level record.
///
/// There is no length field anywhere: the discriminant byte alone determines
/// how many bytes the record occupies. A handshake is always 5 bytes; a data
/// frame is always `13 + payload_size` bytes, where `payload_size` is fixed
/// for the lifetime of a benchmark run and agreed out-of-band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Sent once per connection; binds the connection to a worker.
    Handshake { worker_id: u32 },
    /// One ping-pong message belonging to the session `session_id`.
    Data {
        sequence_id: u32,
        session_id: u32,
        cpu_usage: u32,
        payload: Bytes,
    },
}

impl Frame {
    /// Create a handshake frame.
    pub fn handshake(worker_id: u32) -> Self {
        Self::Handshake { worker_id }
    }

    /// Create a data frame.
    pub fn data(
        sequence_id: u32,
        session_id: u32,
        cpu_usage: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::Data {
            sequence_id,
            session_id,
            cpu_usage,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame under the run's payload size.
    pub fn wire_size(&self, payload_size: usize) -> usize {
        match self {
            Self::Handshake { .. } => HANDSHAKE_WIRE_SIZE,
            Self::Data { .. } => DATA_HEADER_SIZE + payload_size,
        }
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// Handshake:  ┌──────────┬────────────────┐
///             │ 0x01     │ worker (4B LE) │
///             └──────────┴────────────────┘
/// Data:       ┌──────────┬──────────────┬───────────────┬───────────┬──────────────────┐
///             │ 0x00     │ seq (4B LE)  │ session (4B LE)│ cpu (4B LE)│ payload (P bytes) │
///             └──────────┴──────────────┴───────────────┴───────────┴──────────────────┘
/// ```
///
/// A data payload shorter than `payload_size` is padded with zero bytes so
/// the record always occupies exactly `13 + payload_size` bytes; a longer
/// payload is a caller error.
pub fn encode_frame(frame: &Frame, payload_size: usize, dst: &mut BytesMut) -> Result<()> {
    match frame {
        Frame::Handshake { worker_id } => {
            dst.reserve(HANDSHAKE_WIRE_SIZE);
            dst.put_u8(HANDSHAKE_TAG);
            dst.put_u32_le(*worker_id);
        }
        Frame::Data {
            sequence_id,
            session_id,
            cpu_usage,
            payload,
        } => {
            if payload.len() > payload_size {
                return Err(FrameError::PayloadTooLarge {
                    size: payload.len(),
                    max: payload_size,
                });
            }
            dst.reserve(DATA_HEADER_SIZE + payload_size);
            dst.put_u8(DATA_TAG);
            dst.put_u32_le(*sequence_id);
            dst.put_u32_le(*session_id);
            dst.put_u32_le(*cpu_usage);
            dst.put_slice(payload);
            dst.put_bytes(0, payload_size - payload.len());
        }
    }
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't yet contain the complete record
/// indicated by the discriminant byte; the bytes are left untouched so the
/// caller can append the next inbound chunk and retry. On success, consumes
/// exactly the record's fixed length from the buffer.
pub fn decode_frame(src: &mut BytesMut, payload_size: usize) -> Result<Option<Frame>> {
    let Some(&tag) = src.first() else {
        return Ok(None); // Need more data
    };

    match tag {
        HANDSHAKE_TAG => {
            if src.len() < HANDSHAKE_WIRE_SIZE {
                return Ok(None); // Need more data
            }
            let worker_id = u32::from_le_bytes(src[1..5].try_into().unwrap());
            src.advance(HANDSHAKE_WIRE_SIZE);
            Ok(Some(Frame::Handshake { worker_id }))
        }
        DATA_TAG => {
            if src.len() < DATA_HEADER_SIZE + payload_size {
                return Ok(None); // Need more data
            }
            let sequence_id = u32::from_le_bytes(src[1..5].try_into().unwrap());
            let session_id = u32::from_le_bytes(src[5..9].try_into().unwrap());
            let cpu_usage = u32::from_le_bytes(src[9..13].try_into().unwrap());
            src.advance(DATA_HEADER_SIZE);
            let payload = src.split_to(payload_size).freeze();
            Ok(Some(Frame::Data {
                sequence_id,
                session_id,
                cpu_usage,
                payload,
            }))
        }
        other => Err(FrameError::InvalidDiscriminant(other)),
    }
}

/// Decode every complete frame currently in the buffer.
///
/// Stops at the first incomplete record, leaving its bytes in `src` for the
/// next chunk to complete (stream framing, not datagram framing).
pub fn decode_all(src: &mut BytesMut, payload_size: usize) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    while let Some(frame) = decode_frame(src, payload_size)? {
        frames.push(frame);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = b"hello, muxbench!";
        let frame = Frame::data(7, 42, 0, payload.as_ref());

        encode_frame(&frame, payload.len(), &mut buf).unwrap();

        assert_eq!(buf.len(), DATA_HEADER_SIZE + payload.len());

        let decoded = decode_frame(&mut buf, payload.len()).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn handshake_roundtrip() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::handshake(3), 256, &mut buf).unwrap();

        assert_eq!(buf.len(), HANDSHAKE_WIRE_SIZE);

        let decoded = decode_frame(&mut buf, 256).unwrap().unwrap();
        assert_eq!(decoded, Frame::Handshake { worker_id: 3 });
        assert!(buf.is_empty());
    }

    #[test]
    fn short_payload_is_zero_padded() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::data(1, 1, 0, b"abc".as_ref()), 8, &mut buf).unwrap();

        assert_eq!(buf.len(), DATA_HEADER_SIZE + 8);
        assert_eq!(&buf[DATA_HEADER_SIZE..], b"abc\0\0\0\0\0");

        let decoded = decode_frame(&mut buf, 8).unwrap().unwrap();
        match decoded {
            Frame::Data { payload, .. } => assert_eq!(payload.as_ref(), b"abc\0\0\0\0\0"),
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[test]
    fn fixed_wire_size_regardless_of_payload_length() {
        for len in [0usize, 1, 100, 256] {
            let mut buf = BytesMut::new();
            let payload = vec![0xAB; len];
            encode_frame(&Frame::data(1, 2, 3, payload), 256, &mut buf).unwrap();
            assert_eq!(buf.len(), DATA_HEADER_SIZE + 256);
        }
    }

    #[test]
    fn payload_longer_than_run_size_rejected() {
        let mut buf = BytesMut::new();
        let err = encode_frame(&Frame::data(1, 1, 0, vec![0u8; 9]), 8, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadTooLarge { size: 9, max: 8 }
        ));
    }

    #[test]
    fn decode_empty_buffer() {
        let mut buf = BytesMut::new();
        assert!(decode_frame(&mut buf, 16).unwrap().is_none());
    }

    #[test]
    fn decode_incomplete_handshake() {
        let mut buf = BytesMut::from(&[HANDSHAKE_TAG, 0x01, 0x00][..]);
        assert!(decode_frame(&mut buf, 16).unwrap().is_none());
        assert_eq!(buf.len(), 3); // Bytes retained for reassembly
    }

    #[test]
    fn decode_incomplete_data() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::data(1, 1, 0, b"full".as_ref()), 4, &mut buf).unwrap();
        buf.truncate(DATA_HEADER_SIZE + 2);

        assert!(decode_frame(&mut buf, 4).unwrap().is_none());
        assert_eq!(buf.len(), DATA_HEADER_SIZE + 2);
    }

    #[test]
    fn decode_invalid_discriminant() {
        let mut buf = BytesMut::from(&[0x7F, 0x00, 0x00, 0x00, 0x00][..]);
        let result = decode_frame(&mut buf, 16);
        assert!(matches!(result, Err(FrameError::InvalidDiscriminant(0x7F))));
    }

    #[test]
    fn exact_wire_layout() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::data(0x0102_0304, 0x0A0B_0C0D, 5, b"x".as_ref()), 2, &mut buf)
            .unwrap();

        // Little-endian fields after the zero tag byte, then the padded payload.
        assert_eq!(
            buf.as_ref(),
            &[
                0x00, 0x04, 0x03, 0x02, 0x01, 0x0D, 0x0C, 0x0B, 0x0A, 0x05, 0x00, 0x00, 0x00,
                b'x', 0x00
            ]
        );

        let mut hs = BytesMut::new();
        encode_frame(&Frame::handshake(0x0102_0304), 2, &mut hs).unwrap();
        assert_eq!(hs.as_ref(), &[0x01, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn mixed_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::handshake(9), 4, &mut buf).unwrap();
        encode_frame(&Frame::data(1, 100, 0, b"ping".as_ref()), 4, &mut buf).unwrap();
        encode_frame(&Frame::data(2, 101, 0, b"pong".as_ref()), 4, &mut buf).unwrap();

        let frames = decode_all(&mut buf, 4).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], Frame::Handshake { worker_id: 9 });
        assert_eq!(frames[1], Frame::data(1, 100, 0, b"ping".as_ref()));
        assert_eq!(frames[2], Frame::data(2, 101, 0, b"pong".as_ref()));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_all_retains_trailing_partial_frame() {
        let mut wire = BytesMut::new();
        encode_frame(&Frame::data(1, 1, 0, b"one!".as_ref()), 4, &mut wire).unwrap();
        encode_frame(&Frame::data(2, 1, 0, b"two!".as_ref()), 4, &mut wire).unwrap();

        let split = wire.len() - 3;
        let mut first = BytesMut::from(&wire[..split]);

        let frames = decode_all(&mut first, 4).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(first.len(), DATA_HEADER_SIZE + 4 - 3);

        first.extend_from_slice(&wire[split..]);
        let rest = decode_all(&mut first, 4).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0], Frame::data(2, 1, 0, b"two!".as_ref()));
    }

    #[test]
    fn split_at_every_boundary_decodes_identically() {
        let mut wire = BytesMut::new();
        encode_frame(&Frame::handshake(4), 6, &mut wire).unwrap();
        encode_frame(&Frame::data(1, 10, 0, b"aaaaaa".as_ref()), 6, &mut wire).unwrap();
        encode_frame(&Frame::data(2, 11, 7, b"bb".as_ref()), 6, &mut wire).unwrap();

        let mut whole = BytesMut::from(wire.as_ref());
        let expected = decode_all(&mut whole, 6).unwrap();
        assert_eq!(expected.len(), 3);

        for split in 0..=wire.len() {
            let mut buf = BytesMut::from(&wire[..split]);
            let mut frames = decode_all(&mut buf, 6).unwrap();
            buf.extend_from_slice(&wire[split..]);
            frames.extend(decode_all(&mut buf, 6).unwrap());

            assert_eq!(frames, expected, "split at byte {split}");
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn zero_payload_size_run() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::data(1, 1, 0, b"".as_ref()), 0, &mut buf).unwrap();
        assert_eq!(buf.len(), DATA_HEADER_SIZE);

        let decoded = decode_frame(&mut buf, 0).unwrap().unwrap();
        match decoded {
            Frame::Data { payload, .. } => assert!(payload.is_empty()),
            other => panic!("expected data frame, got {other:?}"),
        }
    }
}
