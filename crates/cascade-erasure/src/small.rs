//! Systematic MDS block code for small objects.
//!
//! Objects of `d <= K_SMALL` data chunks use a systematic code over GF(2^8)
//! with chunk ids in `[0, 256)`: ids below `d` are the source chunks verbatim,
//! ids in `[d, 256)` are Cauchy-matrix combinations. Any `d` chunks with
//! distinct ids reconstruct the object exactly.
//!
//! The generator is the stacked matrix `[I; C]` with
//! `C[id][j] = inv(id ^ j)` for `id in [d, 256)`, `j in [0, d)`. The row and
//! column index sets are disjoint, so `id ^ j != 0` and every square
//! submatrix of `C` is invertible — which is exactly the MDS property.

use cascade_types::{CHUNK_SIZE, Chunk, SMALL_ID_SPACE};
use tracing::debug;

use crate::error::CodeError;
use crate::gf256;

/// Generator coefficient for redundancy row `chunk_id`, column `j`.
///
/// `chunk_id` must be in `[d, 256)` and `j` in `[0, d)`.
pub fn cauchy_coefficient(chunk_id: u32, j: usize) -> u8 {
    debug_assert!(chunk_id < SMALL_ID_SPACE);
    debug_assert!(j < chunk_id as usize);
    gf256::tables().inv(chunk_id as u8 ^ j as u8)
}

/// Produce the chunk with id `chunk_id` for the given source.
///
/// Ids below `source.len()` are systematic pass-throughs; the rest are Cauchy
/// combinations. Output is bit-identical for equal `(source, chunk_id)`.
///
/// # Errors
///
/// `CodeError::InvalidChunkId` if `chunk_id` is outside `[0, 256)`.
pub fn encode_chunk(source: &[Chunk], chunk_id: u32, out: &mut Chunk) -> Result<(), CodeError> {
    if chunk_id >= SMALL_ID_SPACE {
        return Err(CodeError::InvalidChunkId {
            chunk_id,
            max: SMALL_ID_SPACE - 1,
        });
    }
    let d = source.len();

    if (chunk_id as usize) < d {
        *out = source[chunk_id as usize].clone();
        return Ok(());
    }

    let gf = gf256::tables();
    out.clear();
    for (j, src) in source.iter().enumerate() {
        gf.mul_acc_slice(
            out.as_mut_bytes(),
            src.as_bytes(),
            cauchy_coefficient(chunk_id, j),
        );
    }
    Ok(())
}

/// Recover the `d` source chunks from any `d` received chunks with distinct
/// ids.
///
/// Builds the `d x d` generator submatrix for the received ids, inverts it
/// with Gauss-Jordan over GF(2^8), and applies the inverse to the received
/// payloads. `O(d^2 * CHUNK_SIZE)`. Never returns wrong data.
///
/// # Errors
///
/// - `CodeError::NeedMoreChunks` with fewer than `d` chunks.
/// - `CodeError::InvalidChunkId` / `DuplicateChunkId` on bad ids.
pub fn solve(
    d: usize,
    received: &[(u32, &[u8; CHUNK_SIZE])],
) -> Result<Vec<Chunk>, CodeError> {
    if received.len() < d {
        return Err(CodeError::NeedMoreChunks {
            needed: d,
            got: received.len(),
        });
    }
    let received = &received[..d];

    for (i, &(id, _)) in received.iter().enumerate() {
        if id >= SMALL_ID_SPACE {
            return Err(CodeError::InvalidChunkId {
                chunk_id: id,
                max: SMALL_ID_SPACE - 1,
            });
        }
        if received[..i].iter().any(|&(other, _)| other == id) {
            return Err(CodeError::DuplicateChunkId { chunk_id: id });
        }
    }

    let gf = gf256::tables();

    // Generator submatrix: row i describes received chunk i as a combination
    // of the d source chunks.
    let mut matrix: Vec<Vec<u8>> = received
        .iter()
        .map(|&(id, _)| {
            let mut row = vec![0u8; d];
            if (id as usize) < d {
                row[id as usize] = 1;
            } else {
                for (j, cell) in row.iter_mut().enumerate() {
                    *cell = cauchy_coefficient(id, j);
                }
            }
            row
        })
        .collect();

    let inverse = invert(&mut matrix, d)?;

    debug!(d, "small-code solve: matrix inverted, applying");

    let mut recovered = Vec::with_capacity(d);
    for j in 0..d {
        // A systematic chunk that arrived verbatim needs no arithmetic.
        if let Some(&(_, bytes)) = received.iter().find(|&&(id, _)| id as usize == j) {
            recovered.push(Chunk::from_slice_padded(bytes));
            continue;
        }
        let mut out = Chunk::ZERO;
        for (k, &(_, bytes)) in received.iter().enumerate() {
            gf.mul_acc_slice(out.as_mut_bytes(), bytes, inverse[j][k]);
        }
        recovered.push(out);
    }
    Ok(recovered)
}

/// Gauss-Jordan inversion over GF(2^8). Consumes `matrix` as scratch.
fn invert(matrix: &mut [Vec<u8>], d: usize) -> Result<Vec<Vec<u8>>, CodeError> {
    let gf = gf256::tables();

    let mut inverse: Vec<Vec<u8>> = (0..d)
        .map(|i| {
            let mut row = vec![0u8; d];
            row[i] = 1;
            row
        })
        .collect();

    for col in 0..d {
        // With distinct ids the generator submatrix is MDS, so a pivot always
        // exists; a missing pivot can only mean caller misuse.
        let pivot = (col..d).find(|&r| matrix[r][col] != 0).ok_or(
            CodeError::Indeterminate {
                rows: d,
                unknowns: d,
            },
        )?;
        matrix.swap(col, pivot);
        inverse.swap(col, pivot);

        let scale = gf.inv(matrix[col][col]);
        gf.mul_slice(&mut matrix[col], scale);
        gf.mul_slice(&mut inverse[col], scale);

        for r in 0..d {
            if r == col || matrix[r][col] == 0 {
                continue;
            }
            let factor = matrix[r][col];
            let (m_pivot, m_row) = disjoint_rows(matrix, col, r);
            gf.mul_acc_slice(m_row, m_pivot, factor);
            let (i_pivot, i_row) = disjoint_rows(&mut inverse, col, r);
            gf.mul_acc_slice(i_row, i_pivot, factor);
        }
    }
    Ok(inverse)
}

/// Borrow row `a` immutably and row `b` mutably from the same matrix.
fn disjoint_rows(rows: &mut [Vec<u8>], a: usize, b: usize) -> (&[u8], &mut [u8]) {
    debug_assert_ne!(a, b);
    if a < b {
        let (head, tail) = rows.split_at_mut(b);
        (&head[a], &mut tail[0])
    } else {
        let (head, tail) = rows.split_at_mut(a);
        (&tail[0], &mut head[b])
    }
}
