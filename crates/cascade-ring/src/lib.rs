//! Bounded single-producer/single-consumer ring buffer with transactional
//! reads and writes.
//!
//! Hands chunks from the network-ingest thread to the decode/dispatch thread
//! with backpressure: [`RingBuffer::write_element`] blocks while the buffer is
//! full and fills the reserved slot in place (no copy through an intermediate
//! value), reads go through a guard that either confirms (advancing the read
//! pointer) or aborts (re-delivering the same element to the next reader).
//! A blocked writer can be released without writing via
//! [`RingBuffer::abort_write`].
//!
//! The buffer is FIFO. One thread writes, one thread reads; the interior
//! mutex provides the publish/acquire pairing between them. Optional rate
//! statistics ([`RingStats`]) are EWMA-smoothed over fixed update windows.

mod stats;

use std::ops::Deref;
use std::sync::{Condvar, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use stats::StatsState;

/// Buffer depth used when none is specified.
pub const DEFAULT_DEPTH: usize = 64;

/// Rate statistics snapshot.
///
/// `rd_per_sec` and `byterate` are exponentially weighted moving averages
/// over the update windows configured in [`RingBuffer::enable_stats`]; the
/// counters are totals since statistics were enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RingStats {
    /// Total payload bytes confirmed by readers.
    pub rd_bytes: u64,
    /// Total elements confirmed by readers.
    pub rd_count: u64,
    /// Smoothed element read rate, per second.
    pub rd_per_sec: f64,
    /// Smoothed payload byte rate, per second.
    pub byterate: f64,
}

struct Inner<T, const DEPTH: usize> {
    slots: [T; DEPTH],
    /// Total committed writes.
    write_idx: u64,
    /// Total confirmed reads.
    read_idx: u64,
    /// A pending request to release a blocked writer.
    write_abort: bool,
    stats: Option<StatsState>,
}

impl<T, const DEPTH: usize> Inner<T, DEPTH> {
    fn len(&self) -> u64 {
        self.write_idx - self.read_idx
    }

    fn is_full(&self) -> bool {
        self.len() == DEPTH as u64
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded SPSC FIFO of `DEPTH` elements of `T`.
pub struct RingBuffer<T, const DEPTH: usize = DEFAULT_DEPTH> {
    inner: Mutex<Inner<T, DEPTH>>,
    space_freed: Condvar,
}

impl<T: Default, const DEPTH: usize> RingBuffer<T, DEPTH> {
    /// An empty buffer with default-initialized slots.
    pub fn new() -> Self {
        const { assert!(DEPTH > 0, "ring buffer depth must be nonzero") };
        RingBuffer {
            inner: Mutex::new(Inner {
                slots: std::array::from_fn(|_| T::default()),
                write_idx: 0,
                read_idx: 0,
                write_abort: false,
                stats: None,
            }),
            space_freed: Condvar::new(),
        }
    }
}

impl<T: Default, const DEPTH: usize> Default for RingBuffer<T, DEPTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const DEPTH: usize> RingBuffer<T, DEPTH> {
    /// Write one element, blocking while the buffer is full.
    ///
    /// Reserves the next slot and calls `fill` on it in place; the write
    /// commits when `fill` returns. Returns `false` without writing iff
    /// [`abort_write`](Self::abort_write) released a blocked call.
    pub fn write_element(&self, fill: impl FnOnce(&mut T)) -> bool {
        let mut inner = self.inner.lock().expect("lock poisoned");
        while inner.is_full() {
            if inner.write_abort {
                inner.write_abort = false;
                debug!("blocked write aborted");
                return false;
            }
            inner = self.space_freed.wait(inner).expect("lock poisoned");
        }
        // A pending abort that never met a blocked writer has no target.
        inner.write_abort = false;

        let slot = (inner.write_idx % DEPTH as u64) as usize;
        fill(&mut inner.slots[slot]);
        inner.write_idx += 1;
        true
    }

    /// Release a writer currently blocked in [`write_element`](Self::write_element),
    /// making it return `false`.
    pub fn abort_write(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.write_abort = true;
        self.space_freed.notify_one();
    }

    /// Begin a read transaction on the oldest element, or `None` when empty.
    ///
    /// Never blocks. The element stays in the buffer until the guard is
    /// [`confirm`](ReadGuard::confirm)ed; dropping or
    /// [`abort`](ReadGuard::abort)ing the guard re-delivers it.
    pub fn get_next_read(&self) -> Option<ReadGuard<'_, T, DEPTH>> {
        let inner = self.inner.lock().expect("lock poisoned");
        if inner.is_empty() {
            return None;
        }
        Some(ReadGuard {
            buffer: self,
            inner,
        })
    }

    /// Whether the buffer currently holds no elements.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("lock poisoned").is_empty()
    }

    /// Whether the buffer currently holds `DEPTH` elements.
    pub fn is_full(&self) -> bool {
        self.inner.lock().expect("lock poisoned").is_full()
    }

    /// Turn on rate statistics.
    ///
    /// Rates are measured over windows of `update_interval_s` seconds and
    /// smoothed with factor `ewma_beta` (the first completed window seeds the
    /// average). Counters start from zero.
    pub fn enable_stats(&self, update_interval_s: f64, ewma_beta: f64) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.stats = Some(StatsState::new(update_interval_s, ewma_beta));
    }

    /// Current statistics snapshot; all-zero while stats are disabled.
    pub fn stats(&self) -> RingStats {
        let inner = self.inner.lock().expect("lock poisoned");
        inner.stats.as_ref().map(StatsState::snapshot).unwrap_or_default()
    }
}

/// An open read transaction. Dereferences to the element being read.
pub struct ReadGuard<'a, T, const DEPTH: usize> {
    buffer: &'a RingBuffer<T, DEPTH>,
    inner: MutexGuard<'a, Inner<T, DEPTH>>,
}

impl<T, const DEPTH: usize> Deref for ReadGuard<'_, T, DEPTH> {
    type Target = T;

    fn deref(&self) -> &T {
        let slot = (self.inner.read_idx % DEPTH as u64) as usize;
        &self.inner.slots[slot]
    }
}

impl<T, const DEPTH: usize> ReadGuard<'_, T, DEPTH> {
    /// Consume the element: advance the read pointer, record `bytes` against
    /// the rate statistics, and wake a writer blocked on a full buffer.
    pub fn confirm(self, bytes: Option<usize>) {
        let ReadGuard { buffer, mut inner } = self;
        inner.read_idx += 1;
        if let Some(stats) = &mut inner.stats {
            stats.record_read(bytes);
        }
        drop(inner);
        buffer.space_freed.notify_one();
    }

    /// Abandon the transaction; the next reader sees the same element.
    ///
    /// Equivalent to dropping the guard.
    pub fn abort(self) {}
}
