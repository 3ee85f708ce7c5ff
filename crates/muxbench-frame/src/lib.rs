//! Fixed-layout binary framing for the muxbench wire protocol.
//!
//! Two record shapes, tagged by a 1-byte discriminant and carrying no length
//! prefix:
//! - Handshake: `[0x01][worker id, 4B LE]` — 5 bytes.
//! - Data: `[0x00][sequence, 4B LE][session, 4B LE][cpu, 4B LE][payload]` —
//!   `13 + P` bytes, where P is the run's fixed payload size.
//!
//! Because record sizes are known only from the discriminant, decoding
//! requires the full record to be buffered; the reader reassembles records
//! split across transport chunks. No partial reads, no buffer management in
//! user code.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_all, decode_frame, encode_frame, Frame, DATA_HEADER_SIZE, DATA_TAG,
    HANDSHAKE_TAG, HANDSHAKE_WIRE_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
