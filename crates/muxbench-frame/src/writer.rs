use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// Each `send` writes the frame's entire fixed-size record before returning,
/// so callers holding exclusive access to the writer never interleave partial
/// records from different sessions on the wire.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    payload_size: usize,
}

impl<T: Write> FrameWriter<T> {
    /// Create a frame writer for a run with the given fixed payload size.
    pub fn new(inner: T, payload_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            payload_size,
        }
    }

    /// Encode and write a complete frame (blocking).
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        self.buf.clear();
        encode_frame(frame, self.payload_size, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Fixed payload size this writer encodes with.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{decode_frame, DATA_HEADER_SIZE, HANDSHAKE_WIRE_SIZE};

    #[test]
    fn write_single_frame() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = FrameWriter::new(cursor, 5);

        writer.send(&Frame::data(1, 9, 0, b"hello".as_ref())).unwrap();

        let inner = writer.into_inner();
        let mut wire = BytesMut::from(inner.into_inner().as_slice());
        let frame = decode_frame(&mut wire, 5).unwrap().unwrap();
        assert_eq!(frame, Frame::data(1, 9, 0, b"hello".as_ref()));
    }

    #[test]
    fn write_multiple_frames() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = FrameWriter::new(cursor, 3);

        writer.send(&Frame::handshake(1)).unwrap();
        writer.send(&Frame::data(1, 2, 0, b"two".as_ref())).unwrap();
        writer.send(&Frame::data(2, 2, 0, b"thr".as_ref())).unwrap();

        let inner = writer.into_inner();
        let wire = inner.into_inner();
        assert_eq!(wire.len(), HANDSHAKE_WIRE_SIZE + 2 * (DATA_HEADER_SIZE + 3));

        let mut wire = BytesMut::from(wire.as_slice());
        assert_eq!(
            decode_frame(&mut wire, 3).unwrap().unwrap(),
            Frame::Handshake { worker_id: 1 }
        );
        assert_eq!(
            decode_frame(&mut wire, 3).unwrap().unwrap(),
            Frame::data(1, 2, 0, b"two".as_ref())
        );
        assert_eq!(
            decode_frame(&mut wire, 3).unwrap().unwrap(),
            Frame::data(2, 2, 0, b"thr".as_ref())
        );
    }

    #[test]
    fn payload_too_large_rejected() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = FrameWriter::new(cursor, 4);

        let err = writer
            .send(&Frame::data(1, 1, 0, b"oversized".as_ref()))
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn every_record_padded_to_run_size() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = FrameWriter::new(cursor, 16);

        writer.send(&Frame::data(1, 1, 0, b"a".as_ref())).unwrap();
        writer.send(&Frame::data(2, 1, 0, b"".as_ref())).unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(wire.len(), 2 * (DATA_HEADER_SIZE + 16));
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink, 1);

        writer.send(&Frame::data(1, 1, 0, b"x".as_ref())).unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = FrameWriter::new(cursor, 8);

        assert_eq!(writer.payload_size(), 8);
        let _ = writer.get_ref();
        let _ = writer.get_mut();
        let _inner = writer.into_inner();
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let writer_impl = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };

        let mut writer = FrameWriter::new(writer_impl, 5);
        writer.send(&Frame::data(5, 1, 0, b"retry".as_ref())).unwrap();

        let inner = writer.into_inner();
        assert_eq!(inner.data.len(), DATA_HEADER_SIZE + 5);
    }

    #[test]
    fn handles_would_block_write_and_flush() {
        let writer_impl = WouldBlockWriteThenFlush {
            wrote_once: false,
            flush_would_block: false,
            data: Vec::new(),
        };

        let mut writer = FrameWriter::new(writer_impl, 5);
        writer.send(&Frame::data(6, 1, 0, b"retry".as_ref())).unwrap();

        let inner = writer.into_inner();
        assert_eq!(inner.data.len(), DATA_HEADER_SIZE + 5);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter, 1);
        let err = writer.send(&Frame::data(1, 1, 0, b"x".as_ref())).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct WouldBlockWriteThenFlush {
        wrote_once: bool,
        flush_would_block: bool,
        data: Vec<u8>,
    }

    impl Write for WouldBlockWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_would_block {
                self.flush_would_block = true;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn written_bytes_read_back() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = FrameWriter::new(cursor, 1);

        writer.send(&Frame::data(3, 2, 1, b"z".as_ref())).unwrap();

        let wire = writer.into_inner().into_inner();
        let mut framed = crate::reader::FrameReader::new(Cursor::new(wire), 1);
        let frame = framed.read_frame().unwrap();
        assert_eq!(frame, Frame::data(3, 2, 1, b"z".as_ref()));
    }
}
