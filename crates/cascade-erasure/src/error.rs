//! Error types for the code engines.

/// Errors that can occur while encoding or solving.
#[derive(Debug, thiserror::Error)]
pub enum CodeError {
    /// A chunk id outside the range the selected code can address.
    #[error("chunk id {chunk_id} outside code id space (max {max})")]
    InvalidChunkId {
        /// The rejected id.
        chunk_id: u32,
        /// Largest id the code accepts.
        max: u32,
    },

    /// Two received chunks carried the same id.
    #[error("duplicate chunk id {chunk_id}")]
    DuplicateChunkId {
        /// The repeated id.
        chunk_id: u32,
    },

    /// Fewer chunks than the code needs to solve.
    #[error("need {needed} distinct chunks, got {got}")]
    NeedMoreChunks {
        /// Chunks required.
        needed: usize,
        /// Chunks provided.
        got: usize,
    },

    /// The accumulated linear system does not determine the source yet.
    ///
    /// Not fatal: the caller keeps accepting chunks and retries.
    #[error("system indeterminate: {rows} usable rows for {unknowns} unknowns")]
    Indeterminate {
        /// Usable equation rows.
        rows: usize,
        /// Source chunks still unknown.
        unknowns: usize,
    },
}
