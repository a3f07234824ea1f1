//! Immutable per-object parameters fixed before any chunk is exchanged.

use serde::{Deserialize, Serialize};

use crate::{K_SMALL, MAX_OBJECT_SIZE, chunk_count_for};

/// Which of the two codes an object uses.
///
/// Derived from the data-chunk count, never configured: both ends must reach
/// the same answer from the object size alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeMode {
    /// Systematic MDS block code over GF(2^8); objects of at most
    /// [`K_SMALL`] data chunks.
    Small,
    /// Rateless fountain code for everything larger.
    Fountain,
}

impl CodeMode {
    /// Select the code for an object of `chunk_count` data chunks.
    pub fn for_chunks(chunk_count: usize) -> CodeMode {
        if chunk_count <= K_SMALL {
            CodeMode::Small
        } else {
            CodeMode::Fountain
        }
    }
}

/// Errors validating an [`ObjectDescriptor`].
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    /// Object size is zero or exceeds the supported maximum.
    #[error("object size {size} out of range (1..={max})")]
    SizeOutOfRange {
        /// The rejected size.
        size: u64,
        /// The supported maximum ([`MAX_OBJECT_SIZE`]).
        max: u64,
    },
}

/// Identity and geometry of one object in flight.
///
/// The outer protocol carries this to the receiver before any chunk arrives;
/// the decoder is constructed from it and it never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    object_size: u64,
    object_id: String,
}

impl ObjectDescriptor {
    /// Create a descriptor, validating the object size.
    pub fn new(object_size: u64, object_id: impl Into<String>) -> Result<Self, DescriptorError> {
        if object_size == 0 || object_size > MAX_OBJECT_SIZE {
            return Err(DescriptorError::SizeOutOfRange {
                size: object_size,
                max: MAX_OBJECT_SIZE,
            });
        }
        Ok(Self {
            object_size,
            object_id: object_id.into(),
        })
    }

    /// Object size in bytes.
    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    /// Caller-supplied identifier, used to name the mmap scratch file.
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Number of data chunks (`D`).
    pub fn chunk_count(&self) -> usize {
        chunk_count_for(self.object_size)
    }

    /// Code selected for this object.
    pub fn code_mode(&self) -> CodeMode {
        CodeMode::for_chunks(self.chunk_count())
    }
}
