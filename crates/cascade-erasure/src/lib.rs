//! The two code engines behind the cascade codec.
//!
//! This crate provides:
//! - [`gf256`] — GF(2^8) table arithmetic shared by both codes.
//! - [`small`] — systematic Cauchy MDS block code for objects of at most
//!   [`K_SMALL`](cascade_types::K_SMALL) data chunks.
//! - [`fountain`] — rateless code for everything larger: deterministic
//!   per-id row derivation on the encoder side, substitution + peeling +
//!   Gaussian elimination on the decoder side.
//!
//! Everything here is part of the wire contract: for a given
//! `(chunk_count, chunk_id)` both ends must derive bit-identical coefficients,
//! which is why the field tables and the row PRNG are pinned in-crate.

pub mod fountain;
pub mod gf256;
pub mod small;

mod error;

pub use error::CodeError;
pub use fountain::{FountainDecoder, FountainEncoder};

/// Force the one-time process-wide table initialization.
///
/// Encoding and decoding call this lazily; invoking it up front moves the
/// (small) table-build cost out of the first chunk's latency. Idempotent.
pub fn init() {
    gf256::tables();
}
