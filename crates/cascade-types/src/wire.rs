//! On-wire chunk layout.
//!
//! A transmitted chunk is exactly `(chunk_id: u32 LE, payload: [u8; CHUNK_SIZE])`
//! with no version byte; the outer protocol owns framing above this boundary
//! and carries `(object_size, object_id)` separately.

use bytes::{Buf, BufMut, BytesMut};

use crate::{CHUNK_COUNT_MAX, CHUNK_ID_SIZE, CHUNK_SIZE, Chunk};

/// Serialized size of one wire chunk.
pub const WIRE_CHUNK_SIZE: usize = CHUNK_ID_SIZE + CHUNK_SIZE;

/// Errors decoding a wire chunk.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The buffer holds fewer than [`WIRE_CHUNK_SIZE`] bytes.
    #[error("short wire chunk: {got} of {WIRE_CHUNK_SIZE} bytes")]
    ShortFrame {
        /// Bytes available.
        got: usize,
    },

    /// The chunk id is outside the 24-bit id space.
    #[error("chunk id {chunk_id} outside id space (max {})", CHUNK_COUNT_MAX - 1)]
    IdOutOfRange {
        /// The rejected id.
        chunk_id: u32,
    },
}

/// One chunk as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireChunk {
    /// Chunk id in `[0, CHUNK_COUNT_MAX)`.
    pub chunk_id: u32,
    /// The fixed-size payload.
    pub payload: Chunk,
}

impl WireChunk {
    /// Append the exact wire encoding to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(WIRE_CHUNK_SIZE);
        buf.put_u32_le(self.chunk_id);
        buf.put_slice(self.payload.as_bytes());
    }

    /// Consume one wire chunk from `buf`.
    pub fn decode(buf: &mut impl Buf) -> Result<WireChunk, WireError> {
        if buf.remaining() < WIRE_CHUNK_SIZE {
            return Err(WireError::ShortFrame {
                got: buf.remaining(),
            });
        }
        let chunk_id = buf.get_u32_le();
        if chunk_id >= CHUNK_COUNT_MAX {
            return Err(WireError::IdOutOfRange { chunk_id });
        }
        let mut payload = Chunk::ZERO;
        buf.copy_to_slice(payload.as_mut_bytes());
        Ok(WireChunk { chunk_id, payload })
    }
}
