//! Pre-seeding the decoder from a partially known object.
//!
//! A receiver often holds much of an object before the first chunk arrives —
//! for a block, the transactions already sitting in its mempool. The partial
//! object iteratively fills in the chunks it can produce locally; every chunk
//! it marks available is handed to the decoder exactly as if it had been
//! received on the wire, cutting the effective erasure rate. After the decode
//! completes, [`absorb_decoded`] copies the remaining chunks back and
//! finalizes the object.

use cascade_types::CHUNK_SIZE;
use tracing::debug;

use crate::decoder::FecDecoder;
use crate::error::CodecError;

/// Errors crossing the pre-seed boundary.
#[derive(Debug, thiserror::Error)]
pub enum PreseedError {
    /// The partial object failed an iterative fill round.
    #[error("iterative fill failed: {0}")]
    Fill(String),

    /// The partial object rejected finalization.
    #[error("finalize failed: {0}")]
    Finalize(String),

    /// The decoder rejected a chunk or was not ready.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// The partially known object the receiver collaborates with.
///
/// The codec treats this as an oracle that may produce some data chunks
/// before (and during) reception; it never looks inside the object.
pub trait PartialObject {
    /// Total data chunks of the object.
    fn chunk_count(&self) -> usize;

    /// Whether chunk `index` holds valid data.
    fn is_chunk_available(&self, index: usize) -> bool;

    /// The chunk buffer at `index`.
    fn chunk_mut(&mut self, index: usize) -> &mut [u8; CHUNK_SIZE];

    /// Mark chunk `index` as holding valid data.
    fn mark_chunk_available(&mut self, index: usize);

    /// Run one fill round; on success, `first_new_index` is set to the first
    /// chunk index this round may have produced.
    fn do_iterative_fill(&mut self, first_new_index: &mut usize) -> Result<(), PreseedError>;

    /// Whether further fill rounds can produce anything.
    fn is_iterative_fill_done(&self) -> bool;

    /// Validate and seal the fully reconstructed object.
    fn finalize(&mut self) -> Result<(), PreseedError>;
}

/// Counters for one pre-seed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreseedStats {
    /// Chunks handed to the decoder from local knowledge.
    pub chunks_preseeded: usize,
    /// Iterative fill rounds executed.
    pub fill_rounds: usize,
}

/// Drive the partial object's fill loop, providing every chunk that becomes
/// available to `decoder` as if it had arrived on the wire.
pub fn preseed_from_partial(
    decoder: &mut FecDecoder,
    partial: &mut impl PartialObject,
) -> Result<PreseedStats, PreseedError> {
    let total = partial.chunk_count();
    let mut stats = PreseedStats::default();

    while !partial.is_iterative_fill_done() {
        let mut index = 0usize;
        partial.do_iterative_fill(&mut index)?;
        stats.fill_rounds += 1;

        while index < total && partial.is_chunk_available(index) {
            let accepted = decoder.provide_chunk(partial.chunk_mut(index), index as u32)?;
            if accepted {
                stats.chunks_preseeded += 1;
            }
            index += 1;
        }
    }

    debug!(
        chunks_preseeded = stats.chunks_preseeded,
        fill_rounds = stats.fill_rounds,
        "pre-seed complete"
    );
    Ok(stats)
}

/// Copy every chunk the partial object still lacks out of a completed
/// decoder, then finalize it. Returns the number of chunks copied.
pub fn absorb_decoded(
    decoder: &FecDecoder,
    partial: &mut impl PartialObject,
) -> Result<usize, PreseedError> {
    let total = partial.chunk_count().min(decoder.chunk_count());
    let mut copied = 0usize;
    for index in 0..total {
        if partial.is_chunk_available(index) {
            continue;
        }
        let chunk = decoder
            .data_chunk(index as u32)
            .ok_or(CodecError::NotReady)?;
        partial.chunk_mut(index).copy_from_slice(chunk);
        partial.mark_chunk_available(index);
        copied += 1;
    }
    partial.finalize()?;
    debug!(copied, "absorbed decoded chunks into partial object");
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryMode;
    use cascade_types::{Chunk, ObjectDescriptor};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Minimal in-memory stand-in for a partially downloaded block: a set of
    /// chunks that become available over a fixed number of fill rounds.
    struct TestPartial {
        chunks: Vec<Chunk>,
        available: Vec<bool>,
        /// Chunk indices released per remaining fill round (front = next).
        pending_rounds: Vec<Vec<usize>>,
        reference: Vec<Chunk>,
        finalized: bool,
    }

    impl TestPartial {
        fn new(reference: &[Chunk], rounds: Vec<Vec<usize>>) -> TestPartial {
            TestPartial {
                chunks: vec![Chunk::ZERO; reference.len()],
                available: vec![false; reference.len()],
                pending_rounds: rounds,
                reference: reference.to_vec(),
                finalized: false,
            }
        }
    }

    impl PartialObject for TestPartial {
        fn chunk_count(&self) -> usize {
            self.chunks.len()
        }

        fn is_chunk_available(&self, index: usize) -> bool {
            self.available[index]
        }

        fn chunk_mut(&mut self, index: usize) -> &mut [u8; CHUNK_SIZE] {
            self.chunks[index].as_mut_bytes()
        }

        fn mark_chunk_available(&mut self, index: usize) {
            self.available[index] = true;
        }

        fn do_iterative_fill(&mut self, first_new_index: &mut usize) -> Result<(), PreseedError> {
            let released = self.pending_rounds.remove(0);
            *first_new_index = released.iter().copied().min().unwrap_or(self.chunks.len());
            for index in released {
                self.chunks[index] = self.reference[index].clone();
                self.available[index] = true;
            }
            Ok(())
        }

        fn is_iterative_fill_done(&self) -> bool {
            self.pending_rounds.is_empty()
        }

        fn finalize(&mut self) -> Result<(), PreseedError> {
            if self.available.iter().all(|&a| a) {
                self.finalized = true;
                Ok(())
            } else {
                Err(PreseedError::Finalize("chunks missing".into()))
            }
        }
    }

    fn random_chunks(d: usize, seed: u64) -> Vec<Chunk> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..d)
            .map(|_| {
                let mut chunk = Chunk::ZERO;
                rng.fill(&mut chunk.as_mut_bytes()[..]);
                chunk
            })
            .collect()
    }

    fn decoder_for(d: usize, id: &str) -> FecDecoder {
        let descriptor = ObjectDescriptor::new((d * CHUNK_SIZE) as u64, id).unwrap();
        FecDecoder::new(&descriptor, MemoryMode::Memory).unwrap()
    }

    #[test]
    fn test_preseed_counts_contiguous_chunks() {
        let reference = random_chunks(6, 1);
        // Round 1 releases 0..3 contiguously; round 2 releases 4 (5 missing).
        let mut partial = TestPartial::new(&reference, vec![vec![0, 1, 2], vec![4]]);
        let mut decoder = decoder_for(6, "pre");

        let stats = preseed_from_partial(&mut decoder, &mut partial).unwrap();
        // Round 1 seeds the contiguous run 0..3; round 2 seeds chunk 4. The
        // scan stops at the first unavailable index each round, so chunks 3
        // and 5 stay unseeded.
        assert_eq!(stats.fill_rounds, 2);
        assert_eq!(stats.chunks_preseeded, 4);
        assert_eq!(decoder.chunks_recvd(), 4);
        assert!(decoder.has_chunk(0));
        assert!(decoder.has_chunk(2));
        assert!(!decoder.has_chunk(3));
        assert!(decoder.has_chunk(4));
        assert!(!decoder.has_chunk(5));
    }

    #[test]
    fn test_preseed_is_equivalent_to_wire_reception() {
        let reference = random_chunks(4, 2);
        let mut partial = TestPartial::new(&reference, vec![vec![0, 1]]);
        let mut preseeded = decoder_for(4, "eq-a");
        preseed_from_partial(&mut preseeded, &mut partial).unwrap();

        let mut wired = decoder_for(4, "eq-b");
        for index in [0usize, 1] {
            wired
                .provide_chunk(reference[index].as_bytes(), index as u32)
                .unwrap();
        }

        assert_eq!(preseeded.chunks_recvd(), wired.chunks_recvd());
        for id in 0..4u32 {
            assert_eq!(preseeded.has_chunk(id), wired.has_chunk(id));
        }

        // Both finish identically from the same remaining chunks.
        for (index, chunk) in reference.iter().enumerate().skip(2) {
            preseeded.provide_chunk(chunk.as_bytes(), index as u32).unwrap();
            wired.provide_chunk(chunk.as_bytes(), index as u32).unwrap();
        }
        assert!(preseeded.decode_ready());
        assert!(wired.decode_ready());
        assert_eq!(preseeded.decoded_data().unwrap(), wired.decoded_data().unwrap());
    }

    #[test]
    fn test_absorb_decoded_completes_partial() {
        let reference = random_chunks(5, 3);
        let mut partial = TestPartial::new(&reference, vec![vec![0, 1, 2]]);
        let mut decoder = decoder_for(5, "absorb");
        preseed_from_partial(&mut decoder, &mut partial).unwrap();

        // The rest arrives on the wire.
        for (index, chunk) in reference.iter().enumerate().skip(3) {
            decoder.provide_chunk(chunk.as_bytes(), index as u32).unwrap();
        }
        assert!(decoder.decode_ready());

        let copied = absorb_decoded(&decoder, &mut partial).unwrap();
        assert_eq!(copied, 2);
        assert!(partial.finalized);
        for (index, expected) in reference.iter().enumerate() {
            assert_eq!(&partial.chunks[index], expected, "chunk {index}");
        }
    }

    #[test]
    fn test_absorb_requires_ready_decoder() {
        let reference = random_chunks(3, 4);
        let mut partial = TestPartial::new(&reference, vec![vec![0]]);
        let mut decoder = decoder_for(3, "early");
        preseed_from_partial(&mut decoder, &mut partial).unwrap();

        let err = absorb_decoded(&decoder, &mut partial).unwrap_err();
        assert!(matches!(err, PreseedError::Codec(CodecError::NotReady)));
    }
}
