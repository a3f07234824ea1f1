//! FEC decoder: accepts chunks until the object can be reconstructed.
//!
//! The decoder moves through `Collecting -> Solving -> Ready`: chunks are
//! deduplicated, stored and routed to the active code engine while
//! collecting; the first [`decode_ready`](FecDecoder::decode_ready) call
//! after enough chunks arrived performs the heavy solve and memoizes the
//! result. A fountain solve that fails for lack of independent rows drops
//! back to collecting without losing anything.
//!
//! `provide_chunk` calls need not be ordered by chunk id, but the decoder is
//! not internally thread-safe: it expects to be driven from a single thread
//! (in the receiver pipeline, the ring-buffer consumer).

use std::path::Path;

use cascade_erasure::fountain::FountainDecoder;
use cascade_erasure::small;
use cascade_types::{
    CHUNK_COUNT_MAX, CHUNK_SIZE, Chunk, CodeMode, MAX_OBJECT_SIZE, ObjectDescriptor,
    SMALL_ID_SPACE,
};
use tracing::{debug, warn};

use crate::error::CodecError;
use crate::storage::{ChunkStorage, MemoryMode, ScratchFile};
use crate::tracker::ChunkTracker;

enum DecodeState {
    Collecting,
    Ready,
}

enum Engine {
    Small { recovered: Option<Vec<Chunk>> },
    Fountain(FountainDecoder),
}

/// Decoder for one object, constructed from its descriptor.
pub struct FecDecoder {
    descriptor: ObjectDescriptor,
    d: usize,
    tracker: ChunkTracker,
    storage: ChunkStorage,
    chunks_recvd: usize,
    solve_attempted_at: usize,
    state: DecodeState,
    engine: Engine,
}

/// Slots allocated beyond `d`: enough to solve even from a redundancy-only
/// stream with a comfortable margin, while bounding memory against a hostile
/// sender.
fn storage_capacity(d: usize) -> usize {
    d + d / 2 + 8
}

impl FecDecoder {
    /// Decoder for the object described by `descriptor`, storing chunks per
    /// `mode`.
    ///
    /// # Errors
    ///
    /// `CodecError::InvalidObjectSize` for an out-of-range size (possible
    /// when the descriptor arrived through deserialization);
    /// `CodecError::Storage` if the mmap scratch file cannot be set up —
    /// fatal for this decoder.
    pub fn new(descriptor: &ObjectDescriptor, mode: MemoryMode) -> Result<FecDecoder, CodecError> {
        let size = descriptor.object_size();
        if size == 0 || size > MAX_OBJECT_SIZE {
            return Err(CodecError::InvalidObjectSize {
                size,
                max: MAX_OBJECT_SIZE,
            });
        }
        let d = descriptor.chunk_count();
        let capacity = storage_capacity(d);
        let storage = match &mode {
            MemoryMode::Memory => ChunkStorage::memory(capacity),
            MemoryMode::Mmap { dir } => {
                ChunkStorage::mmap(dir, descriptor.object_id(), capacity)?
            }
        };
        let engine = match descriptor.code_mode() {
            CodeMode::Small => Engine::Small { recovered: None },
            CodeMode::Fountain => Engine::Fountain(FountainDecoder::new(d)),
        };
        debug!(
            object_id = descriptor.object_id(),
            object_size = size,
            d,
            mode = ?descriptor.code_mode(),
            "decoder constructed"
        );
        Ok(FecDecoder {
            descriptor: descriptor.clone(),
            d,
            tracker: ChunkTracker::new(d),
            storage,
            chunks_recvd: 0,
            solve_attempted_at: 0,
            state: DecodeState::Collecting,
            engine,
        })
    }

    /// Accept one chunk.
    ///
    /// Returns `Ok(true)` when the chunk was new and counted, `Ok(false)`
    /// for no-ops (duplicates, chunks past readiness or past the redundancy
    /// budget). Invalid input — wrong payload length, id outside the id
    /// space, id outside `[0, 256)` in small mode — is an error and leaves
    /// every observable value unchanged.
    pub fn provide_chunk(&mut self, bytes: &[u8], chunk_id: u32) -> Result<bool, CodecError> {
        if bytes.len() != CHUNK_SIZE {
            return Err(CodecError::InvalidChunkLength {
                got: bytes.len(),
                expected: CHUNK_SIZE,
            });
        }
        if chunk_id >= CHUNK_COUNT_MAX {
            return Err(CodecError::InvalidChunkId {
                chunk_id,
                max: CHUNK_COUNT_MAX - 1,
            });
        }
        if matches!(self.descriptor.code_mode(), CodeMode::Small) && chunk_id >= SMALL_ID_SPACE {
            return Err(CodecError::InvalidChunkId {
                chunk_id,
                max: SMALL_ID_SPACE - 1,
            });
        }

        if matches!(self.state, DecodeState::Ready) {
            return Ok(false);
        }
        if self.tracker.check_present_and_mark(chunk_id) {
            debug!(chunk_id, "duplicate chunk ignored");
            return Ok(false);
        }

        match &mut self.engine {
            Engine::Small { .. } => {
                // Any d distinct ids solve the small code; further chunks are
                // dead weight.
                if self.chunks_recvd >= self.d {
                    return Ok(false);
                }
            }
            Engine::Fountain(_) => {
                if self.storage.len() >= self.storage.capacity() {
                    warn!(chunk_id, "chunk beyond redundancy budget dropped");
                    return Ok(false);
                }
            }
        }

        let slot = self.storage.len();
        self.storage.insert(bytes, chunk_id, slot)?;

        if let Engine::Fountain(fountain) = &mut self.engine {
            let bytes: &[u8; CHUNK_SIZE] = bytes.try_into().expect("length checked above");
            if (chunk_id as usize) < self.d {
                fountain.provide_systematic(chunk_id as usize, bytes);
            } else {
                fountain.provide_row(chunk_id, bytes);
            }
        }

        self.chunks_recvd += 1;
        Ok(true)
    }

    /// Whether `chunk_id` has been seen (including pre-seeded chunks).
    pub fn has_chunk(&self, chunk_id: u32) -> bool {
        self.tracker.check_present(chunk_id)
    }

    /// Number of data chunks (`D`).
    pub fn chunk_count(&self) -> usize {
        self.d
    }

    /// Distinct chunks accepted so far.
    pub fn chunks_recvd(&self) -> usize {
        self.chunks_recvd
    }

    /// The descriptor this decoder was built from.
    pub fn descriptor(&self) -> &ObjectDescriptor {
        &self.descriptor
    }

    /// Path of the mmap scratch file, if that mode is active.
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage.path()
    }

    /// Whether the object can be (or has been) reconstructed.
    ///
    /// Lazy: the first call after enough chunks arrived runs the heavy solve
    /// and memoizes success. Once `true`, stays `true`. A failed fountain
    /// solve changes nothing and will be retried when more chunks arrive.
    pub fn decode_ready(&mut self) -> bool {
        if matches!(self.state, DecodeState::Ready) {
            return true;
        }
        if self.chunks_recvd < self.d || self.solve_attempted_at == self.chunks_recvd {
            return false;
        }
        self.solve_attempted_at = self.chunks_recvd;

        match &mut self.engine {
            Engine::Small { recovered } => {
                let received: Vec<(u32, &[u8; CHUNK_SIZE])> = (0..self.storage.len())
                    .map(|i| (self.storage.chunk_id(i), self.storage.chunk(i)))
                    .collect();
                match small::solve(self.d, &received) {
                    Ok(chunks) => {
                        *recovered = Some(chunks);
                        self.state = DecodeState::Ready;
                        debug!(d = self.d, "small-code decode complete");
                        true
                    }
                    Err(e) => {
                        // Unreachable with d distinct valid ids; never guess.
                        warn!(error = %e, "small-code solve failed");
                        false
                    }
                }
            }
            Engine::Fountain(fountain) => match fountain.try_solve() {
                Ok(()) => {
                    self.state = DecodeState::Ready;
                    debug!(d = self.d, recvd = self.chunks_recvd, "fountain decode complete");
                    true
                }
                Err(e) => {
                    debug!(error = %e, recvd = self.chunks_recvd, "fountain solve not ready");
                    false
                }
            },
        }
    }

    /// Reconstructed data chunk `chunk_id`, once ready.
    ///
    /// Valid until the next mutating call; callers that need the bytes
    /// afterwards must copy them out.
    pub fn data_chunk(&self, chunk_id: u32) -> Option<&[u8; CHUNK_SIZE]> {
        if !matches!(self.state, DecodeState::Ready) || chunk_id as usize >= self.d {
            return None;
        }
        match &self.engine {
            Engine::Small { recovered } => recovered
                .as_ref()
                .map(|chunks| chunks[chunk_id as usize].as_bytes()),
            Engine::Fountain(fountain) => fountain.source(chunk_id as usize).map(Chunk::as_bytes),
        }
    }

    /// The reconstructed object, truncated to its true size.
    ///
    /// # Errors
    ///
    /// `CodecError::NotReady` before the decode completes.
    pub fn decoded_data(&self) -> Result<Vec<u8>, CodecError> {
        if !matches!(self.state, DecodeState::Ready) {
            return Err(CodecError::NotReady);
        }
        let mut data = Vec::with_capacity(self.d * CHUNK_SIZE);
        for chunk_id in 0..self.d as u32 {
            let chunk = self.data_chunk(chunk_id).ok_or(CodecError::NotReady)?;
            data.extend_from_slice(chunk);
        }
        data.truncate(self.descriptor.object_size() as usize);
        Ok(data)
    }

    /// Tear the decoder down into its reconstructed chunks and (in mmap
    /// mode) the scratch-file deletion obligation, for handoff to an
    /// encoder.
    ///
    /// # Errors
    ///
    /// `CodecError::NotReady` if the decode has not completed.
    pub(crate) fn into_recovered(
        mut self,
    ) -> Result<(Vec<Chunk>, Option<ScratchFile>), CodecError> {
        if !matches!(self.state, DecodeState::Ready) {
            return Err(CodecError::NotReady);
        }
        let engine = std::mem::replace(&mut self.engine, Engine::Small { recovered: None });
        let chunks = match engine {
            Engine::Small { recovered } => recovered.ok_or(CodecError::NotReady)?,
            Engine::Fountain(fountain) => fountain.into_sources()?,
        };
        let FecDecoder { storage, .. } = self;
        Ok((chunks, storage.into_scratch_file()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{ChunkTable, FecEncoder};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn make_data(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        data
    }

    fn descriptor(len: usize, id: &str) -> ObjectDescriptor {
        ObjectDescriptor::new(len as u64, id).unwrap()
    }

    fn systematic_chunk(data: &[u8], index: usize) -> Chunk {
        let start = index * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(data.len());
        Chunk::from_slice_padded(&data[start..end])
    }

    #[test]
    fn test_invalid_inputs_leave_state_unchanged() {
        let data = make_data(500, 1);
        let mut decoder = FecDecoder::new(&descriptor(500, "a"), MemoryMode::Memory).unwrap();

        // Wrong payload length.
        assert!(matches!(
            decoder.provide_chunk(&data[..100], 0),
            Err(CodecError::InvalidChunkLength { got: 100, .. })
        ));
        // Id outside the 24-bit space.
        let chunk = systematic_chunk(&data, 0);
        assert!(matches!(
            decoder.provide_chunk(chunk.as_bytes(), CHUNK_COUNT_MAX),
            Err(CodecError::InvalidChunkId { .. })
        ));
        // Small mode rejects ids past the 8-bit space.
        assert!(matches!(
            decoder.provide_chunk(chunk.as_bytes(), SMALL_ID_SPACE),
            Err(CodecError::InvalidChunkId { .. })
        ));

        assert_eq!(decoder.chunks_recvd(), 0);
        assert!(!decoder.has_chunk(0));
        assert!(!decoder.decode_ready());
    }

    #[test]
    fn test_single_chunk_object_roundtrip() {
        let data = make_data(500, 2);
        let mut decoder = FecDecoder::new(&descriptor(500, "hdr"), MemoryMode::Memory).unwrap();

        assert!(matches!(decoder.decoded_data(), Err(CodecError::NotReady)));
        let chunk = systematic_chunk(&data, 0);
        assert!(decoder.provide_chunk(chunk.as_bytes(), 0).unwrap());
        assert!(decoder.decode_ready());
        assert_eq!(decoder.decoded_data().unwrap(), data);
    }

    #[test]
    fn test_duplicate_counts_once() {
        let data = make_data(3 * CHUNK_SIZE, 3);
        let mut decoder =
            FecDecoder::new(&descriptor(3 * CHUNK_SIZE, "dup"), MemoryMode::Memory).unwrap();

        let chunk = systematic_chunk(&data, 1);
        assert!(decoder.provide_chunk(chunk.as_bytes(), 1).unwrap());
        assert!(!decoder.provide_chunk(chunk.as_bytes(), 1).unwrap());
        assert_eq!(decoder.chunks_recvd(), 1);
        assert!(decoder.has_chunk(1));
        assert!(!decoder.has_chunk(0));
    }

    #[test]
    fn test_small_mode_mixed_ids() {
        let data = make_data(4 * CHUNK_SIZE - 17, 4);
        let mut table = ChunkTable::new(10);
        FecEncoder::with_rng(&data, &mut table, StdRng::seed_from_u64(9))
            .unwrap()
            .prefill_chunks()
            .unwrap();

        let mut decoder =
            FecDecoder::new(&descriptor(data.len(), "mixed"), MemoryMode::Memory).unwrap();
        // Feed two systematic and two redundancy chunks, skipping ids 1 and 3.
        for (id, chunk) in table.entries() {
            if id == 1 || id == 3 {
                continue;
            }
            if decoder.decode_ready() {
                break;
            }
            decoder.provide_chunk(chunk.as_bytes(), id).unwrap();
        }
        assert!(decoder.decode_ready());
        assert_eq!(decoder.decoded_data().unwrap(), data);
    }

    #[test]
    fn test_chunks_past_readiness_are_noops() {
        let data = make_data(2 * CHUNK_SIZE, 5);
        let mut decoder =
            FecDecoder::new(&descriptor(2 * CHUNK_SIZE, "extra"), MemoryMode::Memory).unwrap();
        for index in 0..2 {
            let chunk = systematic_chunk(&data, index);
            decoder.provide_chunk(chunk.as_bytes(), index as u32).unwrap();
        }
        assert!(decoder.decode_ready());

        let chunk = systematic_chunk(&data, 0);
        assert!(!decoder.provide_chunk(chunk.as_bytes(), 100).unwrap());
        assert_eq!(decoder.chunks_recvd(), 2);
        assert_eq!(decoder.decoded_data().unwrap(), data);
    }

    #[test]
    fn test_data_chunk_accessor_bounds() {
        let data = make_data(2 * CHUNK_SIZE - 9, 6);
        let mut decoder =
            FecDecoder::new(&descriptor(data.len(), "ptr"), MemoryMode::Memory).unwrap();
        assert!(decoder.data_chunk(0).is_none(), "not ready yet");

        for index in 0..2 {
            let chunk = systematic_chunk(&data, index);
            decoder.provide_chunk(chunk.as_bytes(), index as u32).unwrap();
        }
        assert!(decoder.decode_ready());
        assert_eq!(decoder.data_chunk(0).unwrap(), systematic_chunk(&data, 0).as_bytes());
        assert_eq!(decoder.data_chunk(1).unwrap(), systematic_chunk(&data, 1).as_bytes());
        assert!(decoder.data_chunk(2).is_none(), "id past d");
    }

    #[test]
    fn test_mmap_construction_failure_is_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        let result = FecDecoder::new(
            &descriptor(500, "x"),
            MemoryMode::Mmap { dir: missing },
        );
        assert!(matches!(result, Err(CodecError::Storage(_))));
    }

    #[test]
    fn test_into_recovered_requires_ready() {
        let decoder = FecDecoder::new(&descriptor(500, "early"), MemoryMode::Memory).unwrap();
        assert!(matches!(
            decoder.into_recovered(),
            Err(CodecError::NotReady)
        ));
    }
}
