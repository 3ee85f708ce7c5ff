use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_frame, Frame};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// The transport delivers an arbitrary chunking of the byte stream; the
/// reader keeps a per-connection leftover buffer so a record split across
/// chunks is reassembled before it is yielded. Callers always get complete
/// frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    payload_size: usize,
}

impl<T: Read> FrameReader<T> {
    /// Create a frame reader for a run with the given fixed payload size.
    pub fn new(inner: T, payload_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            payload_size,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.payload_size)? {
                return Ok(frame);
            }

            if !self.buf.is_empty() {
                tracing::trace!(buffered = self.buf.len(), "partial frame, awaiting next chunk");
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
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

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Fixed payload size this reader decodes with.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }
}
