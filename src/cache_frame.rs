//! A single cached page. Wraps the cached bytes behind [`crate::gate::Gate`],
//! a latch-and-spin primitive (see `gate.rs`), generalized from a single
//! reader/writer gate per structure to one gate per frame so unrelated
//! pages never contend.

use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc, RwLock,
};

use crate::gate::Gate;

/// Acquisition mode a caller asks the cache for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Shared read lease; blocks a concurrent writer.
    ReadShared,
    /// Reserves the frame for an upcoming write without blocking other
    /// readers yet ("intent to write").
    Intent,
    /// Exclusive write lease.
    Write,
    /// Read whatever is cached even if a fresher on-disk version might
    /// exist; used by backfill/scan paths that tolerate staleness.
    ReadOutdatedOk,
    /// Read, but block until any in-flight writeback for this frame has
    /// completed, so the reader never observes a half-flushed patch.
    ReadSync,
}

pub(crate) const RECENCY_BIT: u8 = 0b001;
pub(crate) const DIRTY_BIT: u8 = 0b010;
pub(crate) const PATCHED_BIT: u8 = 0b100;

pub struct Frame {
    pub block_id: u64,
    pub data: RwLock<Arc<Vec<u8>>>,
    pub gate: Gate,
    pub bits: AtomicU8,
    pub last_access_us: AtomicU64,
}

impl Frame {
    pub fn new(block_id: u64, data: Vec<u8>, now_us: u64) -> Frame {
        Frame {
            block_id,
            data: RwLock::new(Arc::new(data)),
            gate: Gate::new(),
            bits: AtomicU8::new(RECENCY_BIT),
            last_access_us: AtomicU64::new(now_us),
        }
    }

    pub fn touch(&self, now_us: u64) {
        self.bits.fetch_or(RECENCY_BIT, Ordering::Relaxed);
        self.last_access_us.store(now_us, Ordering::Relaxed);
    }

    pub fn clear_recency(&self) -> bool {
        let prev = self.bits.fetch_and(!RECENCY_BIT, Ordering::Relaxed);
        prev & RECENCY_BIT != 0
    }

    pub fn is_dirty(&self) -> bool {
        self.bits.load(Ordering::Relaxed) & DIRTY_BIT != 0
    }

    pub fn mark_dirty(&self) {
        self.bits.fetch_or(DIRTY_BIT, Ordering::Relaxed);
    }

    pub fn clear_dirty(&self) {
        self.bits.fetch_and(!DIRTY_BIT, Ordering::Relaxed);
    }

    pub fn has_patches(&self) -> bool {
        self.bits.load(Ordering::Relaxed) & PATCHED_BIT != 0
    }

    pub fn mark_patched(&self) {
        self.bits.fetch_or(PATCHED_BIT, Ordering::Relaxed);
    }

    pub fn clear_patched(&self) {
        self.bits.fetch_and(!PATCHED_BIT, Ordering::Relaxed);
    }

    /// Eviction priority: clean, unpatched, cold frames go first. Higher
    /// is more evictable.
    pub fn eviction_priority(&self) -> u8 {
        let bits = self.bits.load(Ordering::Relaxed);
        let mut score = 0u8;
        if bits & RECENCY_BIT == 0 {
            score += 4;
        }
        if bits & DIRTY_BIT == 0 {
            score += 2;
        }
        if bits & PATCHED_BIT == 0 {
            score += 1;
        }
        score
    }
}
