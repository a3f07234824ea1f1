//! Duplicate detection over the 24-bit chunk-id space.
//!
//! Systematic ids (`< d`) are tracked in a dense bitset: one bit per data
//! chunk, O(1) by index. Redundancy ids land in an open-addressed set with
//! linear probing and *identity* hashing — redundancy ids are already
//! pseudo-random over the id space, so hashing them again buys nothing.
//!
//! The set's empty-slot sentinel is id 0. Id 0 is systematic for every
//! non-trivial object (`d >= 1`), so it can never be inserted into the set
//! and the sentinel is unambiguous.

use tracing::trace;

/// Tracks which chunk ids have been seen for one object.
pub struct ChunkTracker {
    data_bits: Vec<u64>,
    data_chunks: usize,
    marked: usize,
    fec_ids: OpenIdSet,
}

impl ChunkTracker {
    /// Tracker for an object of `data_chunks` systematic chunks.
    pub fn new(data_chunks: usize) -> ChunkTracker {
        ChunkTracker {
            data_bits: vec![0u64; data_chunks.div_ceil(64)],
            data_chunks,
            marked: 0,
            fec_ids: OpenIdSet::new(),
        }
    }

    /// Whether `chunk_id` was already marked; marks it either way.
    pub fn check_present_and_mark(&mut self, chunk_id: u32) -> bool {
        let present = if (chunk_id as usize) < self.data_chunks {
            let word = chunk_id as usize / 64;
            let bit = 1u64 << (chunk_id % 64);
            let present = self.data_bits[word] & bit != 0;
            self.data_bits[word] |= bit;
            present
        } else {
            !self.fec_ids.insert(chunk_id)
        };
        if !present {
            self.marked += 1;
            trace!(chunk_id, "marked chunk id");
        }
        present
    }

    /// Read-only presence query.
    pub fn check_present(&self, chunk_id: u32) -> bool {
        if (chunk_id as usize) < self.data_chunks {
            self.data_bits[chunk_id as usize / 64] & (1u64 << (chunk_id % 64)) != 0
        } else {
            self.fec_ids.contains(chunk_id)
        }
    }

    /// Number of distinct ids marked so far.
    pub fn len(&self) -> usize {
        self.marked
    }

    /// Whether nothing has been marked yet.
    pub fn is_empty(&self) -> bool {
        self.marked == 0
    }
}

/// Open-addressed set of nonzero u32 ids: linear probing, identity hash,
/// load factor kept at or below 1/2, grow-by-doubling.
struct OpenIdSet {
    slots: Vec<u32>,
    len: usize,
}

const INITIAL_SLOTS: usize = 16;

impl OpenIdSet {
    fn new() -> OpenIdSet {
        OpenIdSet {
            slots: vec![0u32; INITIAL_SLOTS],
            len: 0,
        }
    }

    /// Insert `id`; returns `false` if it was already present.
    fn insert(&mut self, id: u32) -> bool {
        debug_assert_ne!(id, 0, "id 0 is the empty-slot sentinel");
        if (self.len + 1) * 2 > self.slots.len() {
            self.grow();
        }
        let mask = self.slots.len() - 1;
        let mut idx = id as usize & mask;
        loop {
            match self.slots[idx] {
                0 => {
                    self.slots[idx] = id;
                    self.len += 1;
                    return true;
                }
                existing if existing == id => return false,
                _ => idx = (idx + 1) & mask,
            }
        }
    }

    fn contains(&self, id: u32) -> bool {
        let mask = self.slots.len() - 1;
        let mut idx = id as usize & mask;
        loop {
            match self.slots[idx] {
                0 => return false,
                existing if existing == id => return true,
                _ => idx = (idx + 1) & mask,
            }
        }
    }

    fn grow(&mut self) {
        let new_len = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, vec![0u32; new_len]);
        let mask = self.slots.len() - 1;
        for id in old {
            if id == 0 {
                continue;
            }
            let mut idx = id as usize & mask;
            while self.slots[idx] != 0 {
                idx = (idx + 1) & mask;
            }
            self.slots[idx] = id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systematic_dedup() {
        let mut tracker = ChunkTracker::new(10);
        assert!(!tracker.check_present_and_mark(3));
        assert!(tracker.check_present_and_mark(3));
        assert!(tracker.check_present(3));
        assert!(!tracker.check_present(4));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_id_zero_is_systematic() {
        let mut tracker = ChunkTracker::new(1);
        assert!(!tracker.check_present(0));
        assert!(!tracker.check_present_and_mark(0));
        assert!(tracker.check_present_and_mark(0));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_redundancy_dedup() {
        let mut tracker = ChunkTracker::new(4);
        assert!(!tracker.check_present_and_mark(1_000_000));
        assert!(tracker.check_present_and_mark(1_000_000));
        assert!(tracker.check_present(1_000_000));
        assert!(!tracker.check_present(1_000_001));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_no_false_positives_across_ranges() {
        let mut tracker = ChunkTracker::new(64);
        // Mark every even systematic id and a spread of redundancy ids.
        for id in (0..64u32).step_by(2) {
            assert!(!tracker.check_present_and_mark(id));
        }
        for id in (64..4096u32).step_by(7) {
            assert!(!tracker.check_present_and_mark(id));
        }
        for id in (1..64u32).step_by(2) {
            assert!(!tracker.check_present(id), "id {id}");
        }
        for id in (65..4096u32).step_by(7) {
            assert!(!tracker.check_present(id), "id {id}");
        }
    }

    #[test]
    fn test_growth_preserves_membership() {
        let mut tracker = ChunkTracker::new(8);
        // Far more redundancy ids than the initial table, forcing several
        // doublings.
        let ids: Vec<u32> = (0..1000).map(|i| 8 + i * 37).collect();
        for &id in &ids {
            assert!(!tracker.check_present_and_mark(id));
        }
        for &id in &ids {
            assert!(tracker.check_present(id), "id {id} lost in growth");
            assert!(tracker.check_present_and_mark(id), "id {id} lost in growth");
        }
        assert_eq!(tracker.len(), ids.len());
    }

    #[test]
    fn test_clustered_ids_probe_correctly() {
        // Consecutive ids collide into neighbouring slots; linear probing
        // must still keep them distinct.
        let mut tracker = ChunkTracker::new(2);
        for id in 100..164u32 {
            assert!(!tracker.check_present_and_mark(id));
        }
        for id in 100..164u32 {
            assert!(tracker.check_present(id));
        }
        assert!(!tracker.check_present(164));
    }

    #[test]
    fn test_len_counts_distinct_only() {
        let mut tracker = ChunkTracker::new(4);
        assert!(tracker.is_empty());
        tracker.check_present_and_mark(0);
        tracker.check_present_and_mark(0);
        tracker.check_present_and_mark(77);
        tracker.check_present_and_mark(77);
        assert_eq!(tracker.len(), 2);
        assert!(!tracker.is_empty());
    }
}
