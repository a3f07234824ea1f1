//! Error types for the codec crate.

use std::path::PathBuf;

/// Errors from the chunk storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Creating, sizing or mapping the scratch file failed.
    ///
    /// Fatal for the decoder being constructed.
    #[error("scratch file {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A slot index past the fixed storage capacity.
    #[error("slot {idx} out of bounds (capacity {capacity})")]
    SlotOutOfBounds {
        /// The rejected index.
        idx: usize,
        /// Number of slots allocated.
        capacity: usize,
    },
}

/// Errors surfaced by the encoder and decoder.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Object size outside the supported range.
    #[error("invalid object size {size} (supported 1..={max})")]
    InvalidObjectSize {
        /// The rejected size.
        size: u64,
        /// Largest supported object.
        max: u64,
    },

    /// A provided chunk whose payload is not exactly `CHUNK_SIZE` bytes.
    #[error("chunk payload length {got}, expected {expected}")]
    InvalidChunkLength {
        /// Bytes provided.
        got: usize,
        /// Required length.
        expected: usize,
    },

    /// A chunk id the active code cannot address.
    #[error("chunk id {chunk_id} invalid here (max {max})")]
    InvalidChunkId {
        /// The rejected id.
        chunk_id: u32,
        /// Largest acceptable id.
        max: u32,
    },

    /// The encoder could not find an unused chunk id within its retry bound.
    ///
    /// Fatal for the slot; the caller may retry with `overwrite`.
    #[error("no unused chunk id after {attempts} attempts")]
    ResourceExhausted {
        /// Attempts made.
        attempts: usize,
    },

    /// An operation that requires a completed decode was called too early.
    #[error("decode not ready")]
    NotReady,

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Code engine failure.
    #[error("code error: {0}")]
    Code(#[from] cascade_erasure::CodeError),
}
