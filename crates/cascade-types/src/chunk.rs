//! The fixed-size chunk payload type.

use std::fmt;

use crate::CHUNK_SIZE;

/// A single FEC chunk payload: exactly [`CHUNK_SIZE`] bytes, 16-byte aligned.
///
/// Every chunk on the wire is this size; a short final data chunk is
/// zero-padded. The alignment lets GF(2^8) slice kernels use aligned vector
/// loads.
#[derive(Clone, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct Chunk([u8; CHUNK_SIZE]);

const _: () = assert!(std::mem::size_of::<Chunk>() == CHUNK_SIZE);
const _: () = assert!(std::mem::align_of::<Chunk>() == 16);

impl Chunk {
    /// An all-zero chunk.
    pub const ZERO: Chunk = Chunk([0u8; CHUNK_SIZE]);

    /// Build a chunk from a slice of at most [`CHUNK_SIZE`] bytes,
    /// zero-padding the tail.
    ///
    /// # Panics
    ///
    /// Panics if `src` is longer than [`CHUNK_SIZE`].
    pub fn from_slice_padded(src: &[u8]) -> Chunk {
        assert!(
            src.len() <= CHUNK_SIZE,
            "chunk source too long: {} > {CHUNK_SIZE}",
            src.len()
        );
        let mut chunk = Chunk::ZERO;
        chunk.0[..src.len()].copy_from_slice(src);
        chunk
    }

    /// The payload bytes.
    pub fn as_bytes(&self) -> &[u8; CHUNK_SIZE] {
        &self.0
    }

    /// The payload bytes, mutably.
    pub fn as_mut_bytes(&mut self) -> &mut [u8; CHUNK_SIZE] {
        &mut self.0
    }

    /// Reset the payload to all zeroes.
    pub fn clear(&mut self) {
        self.0.fill(0);
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Chunk::ZERO
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; CHUNK_SIZE]> for Chunk {
    fn from(bytes: [u8; CHUNK_SIZE]) -> Self {
        Chunk(bytes)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 1152 bytes of hex is useless in assertion output; show a prefix.
        write!(f, "Chunk({:02x}{:02x}{:02x}{:02x}…)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Number of data chunks for an object of `object_size` bytes.
pub fn chunk_count_for(object_size: u64) -> usize {
    object_size.div_ceil(CHUNK_SIZE as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_padded_zero_fills() {
        let chunk = Chunk::from_slice_padded(b"abc");
        assert_eq!(&chunk.as_bytes()[..3], b"abc");
        assert!(chunk.as_bytes()[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_from_slice_padded_full_chunk() {
        let src = [0xAB; CHUNK_SIZE];
        let chunk = Chunk::from_slice_padded(&src);
        assert_eq!(chunk.as_bytes(), &src);
    }

    #[test]
    #[should_panic(expected = "chunk source too long")]
    fn test_from_slice_padded_rejects_oversize() {
        let src = vec![0u8; CHUNK_SIZE + 1];
        let _ = Chunk::from_slice_padded(&src);
    }

    #[test]
    fn test_clear_zeroes_payload() {
        let mut chunk = Chunk::from_slice_padded(&[0xFF; 100]);
        chunk.clear();
        assert_eq!(chunk, Chunk::ZERO);
    }

    #[test]
    fn test_chunk_count_for_boundaries() {
        assert_eq!(chunk_count_for(1), 1);
        assert_eq!(chunk_count_for(CHUNK_SIZE as u64), 1);
        assert_eq!(chunk_count_for(CHUNK_SIZE as u64 + 1), 2);
        assert_eq!(chunk_count_for(27 * CHUNK_SIZE as u64), 27);
        assert_eq!(chunk_count_for(27 * CHUNK_SIZE as u64 + 1), 28);
    }
}
