//! FEC encoder: builds the output chunk stream for one object.
//!
//! The encoder owns a chunked copy of the source and fills a caller-owned
//! [`ChunkTable`] one slot at a time. Ids are chosen randomly — systematic
//! ids in random order until all have been emitted, then redundancy ids drawn
//! uniformly from the remaining id space — but chunk *content* for a given id
//! depends only on the source, so any two encoders over the same object agree
//! byte-for-byte on every id.

use std::collections::HashSet;
use std::path::Path;

use cascade_erasure::fountain::FountainEncoder;
use cascade_erasure::small;
use cascade_types::{
    CHUNK_COUNT_MAX, CHUNK_SIZE, Chunk, CodeMode, MAX_OBJECT_SIZE, SMALL_ID_SPACE,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::decoder::FecDecoder;
use crate::error::CodecError;
use crate::storage::ScratchFile;

/// Random-id draws attempted per slot before giving up.
const MAX_ID_ATTEMPTS: usize = 64;

/// Caller-owned output table of `(chunk, chunk_id)` pairs.
///
/// Ids start at 0, the table-level "unfilled" sentinel; every filled slot
/// holds an id and payload ready to be put on the wire (and accepted verbatim
/// by [`FecDecoder::provide_chunk`](crate::FecDecoder::provide_chunk)).
pub struct ChunkTable {
    chunks: Box<[Chunk]>,
    ids: Box<[u32]>,
}

impl ChunkTable {
    /// A table of `len` unfilled slots.
    pub fn new(len: usize) -> ChunkTable {
        ChunkTable {
            chunks: vec![Chunk::ZERO; len].into_boxed_slice(),
            ids: vec![0u32; len].into_boxed_slice(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Payload of slot `idx`.
    pub fn chunk(&self, idx: usize) -> &Chunk {
        &self.chunks[idx]
    }

    /// Id of slot `idx` (0 until the slot is built).
    pub fn chunk_id(&self, idx: usize) -> u32 {
        self.ids[idx]
    }

    /// `(chunk_id, chunk)` pairs in slot order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &Chunk)> {
        self.ids.iter().copied().zip(self.chunks.iter())
    }
}

/// Encoder for one object over a borrowed output table.
pub struct FecEncoder<'t> {
    source_chunks: Vec<Chunk>,
    mode: CodeMode,
    table: &'t mut ChunkTable,
    filled: Vec<bool>,
    used_ids: HashSet<u32>,
    unsent_systematic: Vec<u32>,
    rng: StdRng,
    /// Deletion obligation inherited from a moved-from decoder.
    scratch: Option<ScratchFile>,
}

impl<'t> FecEncoder<'t> {
    /// Encoder over `source`, with the id schedule seeded from OS entropy.
    pub fn new(source: &[u8], table: &'t mut ChunkTable) -> Result<FecEncoder<'t>, CodecError> {
        Self::with_rng(source, table, StdRng::from_os_rng())
    }

    /// Encoder with a caller-supplied RNG; two encoders over the same source
    /// with equal seeds produce identical tables.
    pub fn with_rng(
        source: &[u8],
        table: &'t mut ChunkTable,
        rng: StdRng,
    ) -> Result<FecEncoder<'t>, CodecError> {
        if source.is_empty() || source.len() as u64 > MAX_OBJECT_SIZE {
            return Err(CodecError::InvalidObjectSize {
                size: source.len() as u64,
                max: MAX_OBJECT_SIZE,
            });
        }
        let source_chunks = source
            .chunks(CHUNK_SIZE)
            .map(Chunk::from_slice_padded)
            .collect();
        Ok(Self::from_parts(source_chunks, None, table, rng))
    }

    /// Reuse a completed decoder's reconstructed chunks (and, in mmap mode,
    /// its scratch-file obligation) to serve the object onward.
    ///
    /// The decoder is consumed; it must be
    /// [`decode_ready`](FecDecoder::decode_ready).
    pub fn from_decoder(
        decoder: FecDecoder,
        table: &'t mut ChunkTable,
    ) -> Result<FecEncoder<'t>, CodecError> {
        let (source_chunks, scratch) = decoder.into_recovered()?;
        Ok(Self::from_parts(
            source_chunks,
            scratch,
            table,
            StdRng::from_os_rng(),
        ))
    }

    fn from_parts(
        source_chunks: Vec<Chunk>,
        scratch: Option<ScratchFile>,
        table: &'t mut ChunkTable,
        rng: StdRng,
    ) -> FecEncoder<'t> {
        let d = source_chunks.len();
        let filled = vec![false; table.len()];
        FecEncoder {
            mode: CodeMode::for_chunks(d),
            source_chunks,
            table,
            filled,
            used_ids: HashSet::new(),
            unsent_systematic: (0..d as u32).collect(),
            rng,
            scratch,
        }
    }

    /// Number of data chunks (`D`).
    pub fn chunk_count(&self) -> usize {
        self.source_chunks.len()
    }

    /// Code selected for this object.
    pub fn mode(&self) -> CodeMode {
        self.mode
    }

    /// Scratch file inherited from a moved-from decoder, if any.
    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchFile::path)
    }

    /// The `(chunk_id, chunk)` pair in slot `idx`, if that slot has been
    /// built.
    ///
    /// Lets callers stream slots out while the encoder still borrows the
    /// table.
    pub fn built_chunk(&self, idx: usize) -> Option<(u32, &Chunk)> {
        self.filled[idx].then(|| (self.table.ids[idx], &self.table.chunks[idx]))
    }

    /// Build output slot `idx`: choose a fresh chunk id and fill the slot
    /// with that id's encoding.
    ///
    /// Returns `Ok(false)` without touching anything if the slot is already
    /// built and `overwrite` is false.
    ///
    /// # Errors
    ///
    /// `CodecError::ResourceExhausted` if no unused id turns up within the
    /// retry bound — fatal for the slot, state unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of table bounds.
    pub fn build_chunk(&mut self, idx: usize, overwrite: bool) -> Result<bool, CodecError> {
        assert!(idx < self.table.len(), "slot {idx} out of table bounds");
        if self.filled[idx] && !overwrite {
            return Ok(false);
        }

        // Choose the new id before releasing the slot's old one, so a failed
        // draw leaves the slot intact and the fresh id never repeats it.
        let chunk_id = self.pick_id()?;
        if self.filled[idx] {
            let old = self.table.ids[idx];
            self.used_ids.remove(&old);
            if (old as usize) < self.chunk_count() {
                self.unsent_systematic.push(old);
            }
        }

        match self.mode {
            CodeMode::Small => {
                small::encode_chunk(&self.source_chunks, chunk_id, &mut self.table.chunks[idx])?;
            }
            CodeMode::Fountain => {
                FountainEncoder::new(&self.source_chunks)
                    .encode_chunk(chunk_id, &mut self.table.chunks[idx])?;
            }
        }
        self.table.ids[idx] = chunk_id;
        self.filled[idx] = true;
        self.used_ids.insert(chunk_id);
        debug!(idx, chunk_id, "built output chunk");
        Ok(true)
    }

    /// Build every slot not yet filled.
    pub fn prefill_chunks(&mut self) -> Result<(), CodecError> {
        for idx in 0..self.table.len() {
            if !self.filled[idx] {
                self.build_chunk(idx, false)?;
            }
        }
        Ok(())
    }

    /// Random unused id: systematic first (in random order), then redundancy.
    fn pick_id(&mut self) -> Result<u32, CodecError> {
        if !self.unsent_systematic.is_empty() {
            let pick = self.rng.random_range(0..self.unsent_systematic.len());
            return Ok(self.unsent_systematic.swap_remove(pick));
        }

        let d = self.chunk_count() as u32;
        let ceiling = match self.mode {
            CodeMode::Small => SMALL_ID_SPACE,
            CodeMode::Fountain => CHUNK_COUNT_MAX,
        };
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = self.rng.random_range(d..ceiling);
            if !self.used_ids.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(CodecError::ResourceExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }
}

/// Fill `table` completely from `source` in one call.
pub fn build_fec_chunks(source: &[u8], table: &mut ChunkTable) -> Result<(), CodecError> {
    FecEncoder::new(source, table)?.prefill_chunks()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_types::K_SMALL;

    fn make_data(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        data
    }

    #[test]
    fn test_prefill_emits_systematic_first_then_distinct_redundancy() {
        let data = make_data(5 * CHUNK_SIZE, 1);
        let mut table = ChunkTable::new(12);
        let mut encoder =
            FecEncoder::with_rng(&data, &mut table, StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(encoder.chunk_count(), 5);
        assert_eq!(encoder.mode(), CodeMode::Small);
        encoder.prefill_chunks().unwrap();

        let ids: Vec<u32> = table.entries().map(|(id, _)| id).collect();
        // First 5 slots carry the systematic ids, in some order.
        let mut head = ids[..5].to_vec();
        head.sort_unstable();
        assert_eq!(head, vec![0, 1, 2, 3, 4]);
        // The rest are distinct redundancy ids within the small id space.
        for &id in &ids[5..] {
            assert!((5..SMALL_ID_SPACE).contains(&id), "id {id}");
        }
        let mut all = ids.clone();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 12, "ids must be unique: {ids:?}");
    }

    #[test]
    fn test_systematic_chunks_match_source() {
        let data = make_data(3 * CHUNK_SIZE - 100, 2);
        let mut table = ChunkTable::new(3);
        FecEncoder::with_rng(&data, &mut table, StdRng::seed_from_u64(1))
            .unwrap()
            .prefill_chunks()
            .unwrap();

        for (id, chunk) in table.entries() {
            let start = id as usize * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(data.len());
            assert_eq!(chunk, &Chunk::from_slice_padded(&data[start..end]));
        }
    }

    #[test]
    fn test_same_seed_same_table() {
        let data = make_data(40 * CHUNK_SIZE, 3);

        let mut table_a = ChunkTable::new(90);
        FecEncoder::with_rng(&data, &mut table_a, StdRng::seed_from_u64(99))
            .unwrap()
            .prefill_chunks()
            .unwrap();

        let mut table_b = ChunkTable::new(90);
        FecEncoder::with_rng(&data, &mut table_b, StdRng::seed_from_u64(99))
            .unwrap()
            .prefill_chunks()
            .unwrap();

        for idx in 0..table_a.len() {
            assert_eq!(table_a.chunk_id(idx), table_b.chunk_id(idx), "slot {idx}");
            assert_eq!(table_a.chunk(idx), table_b.chunk(idx), "slot {idx}");
        }
    }

    #[test]
    fn test_fountain_content_is_id_determined() {
        // Two encoders with different RNG seeds pick different ids, but must
        // agree on the bytes for any id they both emit.
        let data = make_data((K_SMALL + 3) * CHUNK_SIZE, 4);
        let mut table_a = ChunkTable::new(60);
        FecEncoder::with_rng(&data, &mut table_a, StdRng::seed_from_u64(1))
            .unwrap()
            .prefill_chunks()
            .unwrap();
        let mut table_b = ChunkTable::new(60);
        FecEncoder::with_rng(&data, &mut table_b, StdRng::seed_from_u64(2))
            .unwrap()
            .prefill_chunks()
            .unwrap();

        for (id_a, chunk_a) in table_a.entries() {
            for (id_b, chunk_b) in table_b.entries() {
                if id_a == id_b {
                    assert_eq!(chunk_a, chunk_b, "id {id_a}");
                }
            }
        }
    }

    #[test]
    fn test_build_chunk_respects_filled_slots() {
        let data = make_data(CHUNK_SIZE, 5);
        let mut table = ChunkTable::new(2);
        let mut encoder =
            FecEncoder::with_rng(&data, &mut table, StdRng::seed_from_u64(3)).unwrap();

        assert!(encoder.build_chunk(0, false).unwrap());
        assert!(!encoder.build_chunk(0, false).unwrap());
    }

    #[test]
    fn test_overwrite_rebuilds_with_fresh_id() {
        let data = make_data(CHUNK_SIZE, 6);
        let mut table = ChunkTable::new(4);
        let mut encoder =
            FecEncoder::with_rng(&data, &mut table, StdRng::seed_from_u64(4)).unwrap();

        assert!(encoder.build_chunk(0, false).unwrap());
        let first_id = encoder.table.chunk_id(0);
        assert!(encoder.build_chunk(0, true).unwrap());
        let second_id = encoder.table.chunk_id(0);
        assert_ne!(first_id, second_id);
    }

    #[test]
    fn test_id_space_exhaustion_is_reported() {
        // d=1 in small mode: only 256 ids exist, so a 300-slot table cannot
        // be prefilled.
        let data = make_data(100, 7);
        let mut table = ChunkTable::new(300);
        let mut encoder =
            FecEncoder::with_rng(&data, &mut table, StdRng::seed_from_u64(5)).unwrap();
        let err = encoder.prefill_chunks().unwrap_err();
        assert!(matches!(err, CodecError::ResourceExhausted { .. }));
    }

    #[test]
    fn test_rejects_empty_source() {
        let mut table = ChunkTable::new(1);
        assert!(matches!(
            FecEncoder::new(&[], &mut table),
            Err(CodecError::InvalidObjectSize { size: 0, .. })
        ));
    }

    #[test]
    fn test_build_fec_chunks_convenience() {
        let data = make_data(2 * CHUNK_SIZE, 8);
        let mut table = ChunkTable::new(6);
        build_fec_chunks(&data, &mut table).unwrap();
        let mut ids: Vec<u32> = table.entries().map(|(id, _)| id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 6);
    }
}
