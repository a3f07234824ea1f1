//! Rateless fountain code for large objects.
//!
//! Objects of more than `K_SMALL` data chunks use a random linear fountain:
//! chunk ids below `d` are systematic pass-throughs, every id in
//! `[d, CHUNK_COUNT_MAX)` is the XOR-accumulation of a pseudo-random subset
//! of source chunks, each weighted by a nonzero GF(2^8) coefficient. The
//! subset and the coefficients are derived from `(d, chunk_id)` through a
//! splitmix64 stream pinned in this file — that derivation is the wire
//! contract, so a library PRNG whose output may change between versions is
//! not an option here.
//!
//! Decoding runs the classic pipeline: substitute already-known sources into
//! incoming rows, peel rows that collapse to a single term, and finish the
//! residual system with Gaussian elimination over GF(2^8). A failed solve
//! keeps all state; the caller simply feeds more chunks and retries.

use cascade_types::{CHUNK_COUNT_MAX, CHUNK_SIZE, Chunk};
use tracing::debug;

use crate::error::CodeError;
use crate::gf256::{self, Gf256};

// ---------------------------------------------------------------------------
// Row derivation (wire contract)
// ---------------------------------------------------------------------------

/// Deterministic byte stream for one `(d, chunk_id)` pair.
///
/// splitmix64: tiny, fast, and fixed forever.
struct RowRng {
    state: u64,
    buf: u64,
    avail: u8,
}

impl RowRng {
    fn new(d: usize, chunk_id: u32) -> RowRng {
        RowRng {
            state: ((d as u64) << 24) ^ u64::from(chunk_id),
            buf: 0,
            avail: 0,
        }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn next_byte(&mut self) -> u8 {
        if self.avail == 0 {
            self.buf = self.next_u64();
            self.avail = 8;
        }
        let byte = self.buf as u8;
        self.buf >>= 8;
        self.avail -= 1;
        byte
    }

    /// Uniform nonzero field element (rejection-sampled).
    fn next_coefficient(&mut self) -> u8 {
        loop {
            let byte = self.next_byte();
            if byte != 0 {
                return byte;
            }
        }
    }
}

/// The combination row for redundancy chunk `chunk_id` of a `d`-chunk object:
/// `(source index, coefficient)` pairs in ascending index order.
///
/// Each source index is selected with probability 1/2; selected indices carry
/// a uniform nonzero coefficient. A row that would come out empty falls back
/// to the single term `(chunk_id mod d, 1)`.
pub fn redundancy_row(d: usize, chunk_id: u32) -> Vec<(u32, u8)> {
    debug_assert!(chunk_id as usize >= d);
    debug_assert!(chunk_id < CHUNK_COUNT_MAX);

    let mut rng = RowRng::new(d, chunk_id);

    // Selection mask first, then one coefficient per selected index, so the
    // stream layout is unambiguous on both ends.
    let words: Vec<u64> = (0..d.div_ceil(64)).map(|_| rng.next_u64()).collect();

    let mut terms = Vec::with_capacity(d / 2 + 1);
    for j in 0..d {
        if words[j / 64] >> (j % 64) & 1 == 1 {
            terms.push((j as u32, rng.next_coefficient()));
        }
    }
    if terms.is_empty() {
        terms.push((chunk_id % d as u32, 1));
    }
    terms
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Fountain encoder over a borrowed, immutable source.
pub struct FountainEncoder<'a> {
    source: &'a [Chunk],
}

impl<'a> FountainEncoder<'a> {
    /// Wrap the source chunks. The slice must not be empty.
    pub fn new(source: &'a [Chunk]) -> FountainEncoder<'a> {
        debug_assert!(!source.is_empty());
        FountainEncoder { source }
    }

    /// Produce the chunk with id `chunk_id`. Bit-identical for equal
    /// `(source, chunk_id)`.
    ///
    /// # Errors
    ///
    /// `CodeError::InvalidChunkId` for ids outside the 24-bit id space.
    pub fn encode_chunk(&self, chunk_id: u32, out: &mut Chunk) -> Result<(), CodeError> {
        if chunk_id >= CHUNK_COUNT_MAX {
            return Err(CodeError::InvalidChunkId {
                chunk_id,
                max: CHUNK_COUNT_MAX - 1,
            });
        }
        let d = self.source.len();
        if (chunk_id as usize) < d {
            *out = self.source[chunk_id as usize].clone();
            return Ok(());
        }

        let gf = gf256::tables();
        out.clear();
        for (j, coefficient) in redundancy_row(d, chunk_id) {
            gf.mul_acc_slice(
                out.as_mut_bytes(),
                self.source[j as usize].as_bytes(),
                coefficient,
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// One received redundancy chunk, reduced against whatever was known when it
/// was last touched: the terms still reference unknown sources only.
struct PendingRow {
    chunk_id: u32,
    terms: Vec<(u32, u8)>,
    payload: Box<Chunk>,
}

/// Accumulates chunks for one object until the source is recovered.
pub struct FountainDecoder {
    d: usize,
    sources: Vec<Option<Box<Chunk>>>,
    known: usize,
    rows: Vec<PendingRow>,
}

impl FountainDecoder {
    /// Decoder for an object of `d` data chunks.
    pub fn new(d: usize) -> FountainDecoder {
        FountainDecoder {
            d,
            sources: (0..d).map(|_| None).collect(),
            known: 0,
            rows: Vec::new(),
        }
    }

    /// Number of source chunks recovered so far.
    pub fn known(&self) -> usize {
        self.known
    }

    /// Whether every source chunk has been recovered.
    pub fn is_complete(&self) -> bool {
        self.known == self.d
    }

    /// Redundancy rows currently held.
    pub fn rows_held(&self) -> usize {
        self.rows.len()
    }

    /// A recovered source chunk, if known.
    pub fn source(&self, index: usize) -> Option<&Chunk> {
        self.sources.get(index).and_then(|s| s.as_deref())
    }

    /// Consume the decoder, yielding all `d` source chunks in order.
    ///
    /// # Errors
    ///
    /// `CodeError::NeedMoreChunks` if the decode is not complete.
    pub fn into_sources(self) -> Result<Vec<Chunk>, CodeError> {
        if !self.is_complete() {
            return Err(CodeError::NeedMoreChunks {
                needed: self.d,
                got: self.known,
            });
        }
        Ok(self
            .sources
            .into_iter()
            .map(|s| *s.expect("complete decoder has every source"))
            .collect())
    }

    /// Accept systematic chunk `index` verbatim. Returns `false` if that
    /// source was already known (the payload is then ignored).
    pub fn provide_systematic(&mut self, index: usize, bytes: &[u8; CHUNK_SIZE]) -> bool {
        debug_assert!(index < self.d);
        if self.sources[index].is_some() {
            return false;
        }
        self.sources[index] = Some(Box::new(Chunk::from_slice_padded(bytes)));
        self.known += 1;
        true
    }

    /// Accept redundancy chunk `chunk_id`.
    ///
    /// The row is immediately reduced against known sources; a row that
    /// collapses to one term resolves that source and cascades.
    pub fn provide_row(&mut self, chunk_id: u32, bytes: &[u8; CHUNK_SIZE]) {
        debug_assert!(chunk_id as usize >= self.d);
        let mut terms = redundancy_row(self.d, chunk_id);
        let mut payload = Box::new(Chunk::from_slice_padded(bytes));

        let gf = gf256::tables();
        fold_known(gf, &self.sources, &mut terms, &mut payload);

        match terms.len() {
            0 => {
                // Linearly dependent on what we already know; nothing left in it.
                debug!(chunk_id, "dropping dependent fountain row");
            }
            1 => {
                let (index, coefficient) = terms[0];
                self.resolve(index, coefficient, payload);
                self.peel();
            }
            _ => self.rows.push(PendingRow {
                chunk_id,
                terms,
                payload,
            }),
        }
    }

    /// Attempt to recover the remaining sources.
    ///
    /// Runs substitution and peeling, then Gaussian elimination over the
    /// residual system. On `Err(Indeterminate)` every row is retained and the
    /// caller may feed more chunks and retry.
    pub fn try_solve(&mut self) -> Result<(), CodeError> {
        self.peel();
        if self.is_complete() {
            return Ok(());
        }

        let unknowns: Vec<u32> = (0..self.d as u32)
            .filter(|&j| self.sources[j as usize].is_none())
            .collect();
        let m = unknowns.len();
        if self.rows.len() < m {
            return Err(CodeError::Indeterminate {
                rows: self.rows.len(),
                unknowns: m,
            });
        }

        let mut column_of = vec![usize::MAX; self.d];
        for (col, &j) in unknowns.iter().enumerate() {
            column_of[j as usize] = col;
        }

        // Work on copies so a rank-deficient attempt leaves the rows intact.
        let mut matrix: Vec<Vec<u8>> = Vec::with_capacity(self.rows.len());
        let mut payloads: Vec<Box<Chunk>> = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut dense = vec![0u8; m];
            for &(j, c) in &row.terms {
                dense[column_of[j as usize]] = c;
            }
            matrix.push(dense);
            payloads.push(row.payload.clone());
        }

        let gf = gf256::tables();
        for col in 0..m {
            let Some(pivot) = (col..matrix.len()).find(|&r| matrix[r][col] != 0) else {
                debug!(
                    rows = self.rows.len(),
                    unknowns = m,
                    pivot_col = col,
                    "fountain solve rank-deficient, keeping rows"
                );
                return Err(CodeError::Indeterminate {
                    rows: self.rows.len(),
                    unknowns: m,
                });
            };
            matrix.swap(col, pivot);
            payloads.swap(col, pivot);

            let scale = gf.inv(matrix[col][col]);
            gf.mul_slice(&mut matrix[col], scale);
            gf.mul_slice(payloads[col].as_mut_bytes(), scale);

            for r in 0..matrix.len() {
                if r == col || matrix[r][col] == 0 {
                    continue;
                }
                let factor = matrix[r][col];
                let (pivot_row, row) = disjoint_pair(&mut matrix, col, r);
                gf.mul_acc_slice(row, pivot_row, factor);
                let (pivot_payload, payload) = disjoint_pair(&mut payloads, col, r);
                gf.mul_acc_slice(payload.as_mut_bytes(), pivot_payload.as_bytes(), factor);
            }
        }

        for (col, &j) in unknowns.iter().enumerate() {
            self.sources[j as usize] = Some(payloads[col].clone());
        }
        self.known = self.d;
        self.rows.clear();
        debug!(d = self.d, solved_by_elimination = m, "fountain solve complete");
        Ok(())
    }

    /// Store a resolved source chunk, normalizing by the term coefficient.
    fn resolve(&mut self, index: u32, coefficient: u8, mut payload: Box<Chunk>) {
        let gf = gf256::tables();
        if self.sources[index as usize].is_some() {
            // Redundant resolution of an already-known source.
            return;
        }
        if coefficient != 1 {
            gf.mul_slice(payload.as_mut_bytes(), gf.inv(coefficient));
        }
        self.sources[index as usize] = Some(payload);
        self.known += 1;
    }

    /// Substitute known sources into every held row; peel rows that collapse
    /// to a single term, cascading until a fixed point.
    fn peel(&mut self) {
        let gf = gf256::tables();
        let mut progressed = true;
        while progressed {
            progressed = false;
            let mut i = 0;
            while i < self.rows.len() {
                let row = &mut self.rows[i];
                fold_known(gf, &self.sources, &mut row.terms, &mut row.payload);
                match row.terms.len() {
                    0 => {
                        debug!(chunk_id = row.chunk_id, "dropping dependent fountain row");
                        self.rows.swap_remove(i);
                    }
                    1 => {
                        let row = self.rows.swap_remove(i);
                        let (index, coefficient) = row.terms[0];
                        self.resolve(index, coefficient, row.payload);
                        progressed = true;
                    }
                    _ => i += 1,
                }
            }
        }
    }
}

/// Fold every already-known source out of `terms` into `payload`.
fn fold_known(
    gf: &Gf256,
    sources: &[Option<Box<Chunk>>],
    terms: &mut Vec<(u32, u8)>,
    payload: &mut Chunk,
) {
    terms.retain(|&(j, c)| match &sources[j as usize] {
        Some(source) => {
            gf.mul_acc_slice(payload.as_mut_bytes(), source.as_bytes(), c);
            false
        }
        None => true,
    });
}

/// Borrow element `a` immutably and element `b` mutably from one slice.
fn disjoint_pair<T>(items: &mut [T], a: usize, b: usize) -> (&T, &mut T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (head, tail) = items.split_at_mut(b);
        (&head[a], &mut tail[0])
    } else {
        let (head, tail) = items.split_at_mut(a);
        (&tail[0], &mut head[b])
    }
}
