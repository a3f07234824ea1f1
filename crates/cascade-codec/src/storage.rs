//! Decoder chunk storage: heap-backed or file-backed.
//!
//! Both backends expose the same operations over a fixed number of slots,
//! each slot holding one chunk payload and its id. The mmap backend lays the
//! scratch file out as `capacity` chunk records followed by `capacity`
//! little-endian u32 id records, and unlinks the file when its owner drops —
//! unless ownership was explicitly transferred with
//! [`ChunkStorage::into_scratch_file`].

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use cascade_types::{CHUNK_ID_SIZE, CHUNK_SIZE, Chunk};
use memmap2::MmapMut;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::StorageError;

/// Where a decoder keeps the chunks it has received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryMode {
    /// Heap arrays; freed on drop.
    Memory,
    /// A memory-mapped scratch file under `dir`, named
    /// `fec_<object_id>_<nonce>.dat`; unlinked when the owner drops.
    Mmap {
        /// Directory the scratch file is created in.
        dir: PathBuf,
    },
}

/// Deletion obligation for a scratch file.
///
/// Exactly one object holds this at any time; dropping it unlinks the file.
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// The file this obligation covers.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to unlink scratch file");
        } else {
            debug!(path = %self.path.display(), "unlinked scratch file");
        }
    }
}

enum Backend {
    Memory {
        chunks: Vec<Chunk>,
        ids: Vec<u32>,
    },
    Mmap {
        map: MmapMut,
        file: ScratchFile,
    },
}

/// Fixed-capacity slot array of `(chunk, chunk_id)` records.
pub struct ChunkStorage {
    backend: Backend,
    capacity: usize,
    len: usize,
}

impl std::fmt::Debug for ChunkStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStorage")
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .finish()
    }
}

impl ChunkStorage {
    /// Heap-backed storage with `capacity` slots.
    pub fn memory(capacity: usize) -> ChunkStorage {
        ChunkStorage {
            backend: Backend::Memory {
                chunks: vec![Chunk::ZERO; capacity],
                ids: vec![0u32; capacity],
            },
            capacity,
            len: 0,
        }
    }

    /// File-backed storage with `capacity` slots.
    ///
    /// Creates `<dir>/fec_<object_id>_<nonce>.dat`, sizes it to
    /// `capacity * (CHUNK_SIZE + CHUNK_ID_SIZE)` bytes and maps it
    /// read-write. The nonce keeps concurrent decoders of equally named
    /// objects apart within one process and across restarts.
    pub fn mmap(dir: &Path, object_id: &str, capacity: usize) -> Result<ChunkStorage, StorageError> {
        let nonce: u64 = rand::rng().random();
        let path = dir.join(format!("fec_{object_id}_{nonce:016x}.dat"));
        let io_err = |source| StorageError::Io {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_err)?;
        let file_size = (capacity * (CHUNK_SIZE + CHUNK_ID_SIZE)) as u64;
        file.set_len(file_size).map_err(io_err)?;

        // SAFETY: the file was just created by us with the mapped length and
        // the handle stays private to this storage; nothing else truncates or
        // remaps it while the mapping is alive.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(io_err)?;

        debug!(path = %path.display(), capacity, file_size, "created scratch file");
        Ok(ChunkStorage {
            backend: Backend::Mmap {
                map,
                file: ScratchFile { path },
            },
            capacity,
            len: 0,
        })
    }

    /// Store `(bytes, chunk_id)` in slot `idx`.
    pub fn insert(&mut self, bytes: &[u8], chunk_id: u32, idx: usize) -> Result<(), StorageError> {
        debug_assert_eq!(bytes.len(), CHUNK_SIZE);
        if idx >= self.capacity {
            return Err(StorageError::SlotOutOfBounds {
                idx,
                capacity: self.capacity,
            });
        }
        match &mut self.backend {
            Backend::Memory { chunks, ids } => {
                chunks[idx].as_mut_bytes().copy_from_slice(bytes);
                ids[idx] = chunk_id;
            }
            Backend::Mmap { map, .. } => {
                let chunk_off = idx * CHUNK_SIZE;
                map[chunk_off..chunk_off + CHUNK_SIZE].copy_from_slice(bytes);
                let id_off = self.capacity * CHUNK_SIZE + idx * CHUNK_ID_SIZE;
                map[id_off..id_off + CHUNK_ID_SIZE].copy_from_slice(&chunk_id.to_le_bytes());
            }
        }
        self.len = self.len.max(idx + 1);
        Ok(())
    }

    /// The chunk payload in slot `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is at or past [`len`](Self::len).
    pub fn chunk(&self, idx: usize) -> &[u8; CHUNK_SIZE] {
        assert!(idx < self.len, "slot {idx} not yet filled (len {})", self.len);
        match &self.backend {
            Backend::Memory { chunks, .. } => chunks[idx].as_bytes(),
            Backend::Mmap { map, .. } => {
                let off = idx * CHUNK_SIZE;
                (&map[off..off + CHUNK_SIZE])
                    .try_into()
                    .expect("slot slice is CHUNK_SIZE bytes")
            }
        }
    }

    /// The chunk id in slot `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is at or past [`len`](Self::len).
    pub fn chunk_id(&self, idx: usize) -> u32 {
        assert!(idx < self.len, "slot {idx} not yet filled (len {})", self.len);
        match &self.backend {
            Backend::Memory { ids, .. } => ids[idx],
            Backend::Mmap { map, .. } => {
                let off = self.capacity * CHUNK_SIZE + idx * CHUNK_ID_SIZE;
                u32::from_le_bytes(
                    map[off..off + CHUNK_ID_SIZE]
                        .try_into()
                        .expect("id slice is CHUNK_ID_SIZE bytes"),
                )
            }
        }
    }

    /// Slots filled so far. Monotone until the decode completes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no slot has been filled yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total slots allocated.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Path of the scratch file, in mmap mode.
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Memory { .. } => None,
            Backend::Mmap { file, .. } => Some(file.path()),
        }
    }

    /// Tear down the storage, transferring the scratch-file deletion
    /// obligation to the caller (`None` in memory mode).
    pub fn into_scratch_file(self) -> Option<ScratchFile> {
        match self.backend {
            Backend::Memory { .. } => None,
            Backend::Mmap { map, file } => {
                drop(map);
                Some(file)
            }
        }
    }
}
