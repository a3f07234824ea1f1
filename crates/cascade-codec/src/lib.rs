//! Encoder/decoder pair, dedup tracker and chunk storage for the cascade
//! FEC codec.
//!
//! A sender wraps its serialized object in a [`FecEncoder`] and emits
//! `(chunk_id, chunk)` pairs on demand; a receiver constructs a [`FecDecoder`]
//! from the [`ObjectDescriptor`](cascade_types::ObjectDescriptor) carried by
//! the outer protocol and feeds it every chunk that arrives. Any sufficient
//! subset reconstructs the object exactly. Chunks already known locally can be
//! injected up front through the [`preseed`] collaborator contract, cutting
//! the effective erasure rate before the first network chunk lands.
//!
//! Received chunks are deduplicated by a [`ChunkTracker`] and stored either on
//! the heap or in a memory-mapped scratch file ([`MemoryMode`]); the two
//! backends are externally identical.

pub mod preseed;

mod decoder;
mod encoder;
mod error;
mod storage;
mod tracker;

pub use cascade_erasure::init;
pub use decoder::FecDecoder;
pub use encoder::{ChunkTable, FecEncoder, build_fec_chunks};
pub use error::{CodecError, StorageError};
pub use storage::{ChunkStorage, MemoryMode, ScratchFile};
pub use tracker::ChunkTracker;
