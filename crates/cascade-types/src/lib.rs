//! Shared types and constants for the cascade FEC codec.
//!
//! This crate defines everything both ends of the channel must agree on:
//! the fixed chunk geometry ([`Chunk`], [`CHUNK_SIZE`]), the id space and
//! code-selection threshold ([`CHUNK_COUNT_MAX`], [`K_SMALL`], [`CodeMode`]),
//! the immutable per-object parameters ([`ObjectDescriptor`]), and the exact
//! on-wire chunk layout ([`WireChunk`]).

mod chunk;
mod descriptor;
mod wire;

pub use chunk::{Chunk, chunk_count_for};
pub use descriptor::{CodeMode, DescriptorError, ObjectDescriptor};
pub use wire::{WIRE_CHUNK_SIZE, WireChunk, WireError};

/// Size of every chunk on the wire, in bytes.
///
/// Divisible by 16 so aligned SIMD loads over chunk payloads never straddle
/// a vector boundary.
pub const CHUNK_SIZE: usize = 1152;

/// Serialized size of a chunk id (u32, little-endian).
pub const CHUNK_ID_SIZE: usize = 4;

/// Largest number of data chunks handled by the small (block) code.
///
/// Objects with more data chunks use the fountain code. Both ends derive the
/// mode from the object size alone, so this threshold is part of the wire
/// contract.
pub const K_SMALL: usize = 27;

/// Exclusive upper bound of the chunk-id space.
pub const CHUNK_COUNT_MAX: u32 = 1 << 24;

/// Exclusive upper bound of chunk ids in small-code mode.
pub const SMALL_ID_SPACE: u32 = 256;

/// Largest supported data-chunk count for a single object.
///
/// Keeping this at 1/256th of the id space leaves at least 255 redundancy
/// ids per data chunk.
pub const MAX_OBJECT_CHUNKS: usize = (CHUNK_COUNT_MAX as usize) / 256;

/// Largest supported object size in bytes.
pub const MAX_OBJECT_SIZE: u64 = (MAX_OBJECT_CHUNKS * CHUNK_SIZE) as u64;
