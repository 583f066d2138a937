//! Mirrored/snapshot-capable buffer cache. Sits in front
//! of [`crate::store::Store`]: misses fault a block in, writers mutate a
//! pinned frame and mark it dirty, and a writeback pass flushes dirty
//! frames back through `Store::index_write` under throttling.
//!
//! Frame replacement is approximate-LRU over eviction-priority buckets
//! rather than an exact LRU list: an `Access` list is walked periodically
//! by a background `Evictor` rather than relinked on every touch.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use crate::cache_frame::{AcquireMode, Frame};
use crate::cache_patch::{Patch, PatchLog};
use crate::cache_snapshot::{SnapshotId, SnapshotSet};
use crate::cache_writeback::Throttle;
use crate::error::{Error, Result};
use crate::store::Store;

pub struct CacheConfig {
    pub capacity_frames: usize,
    pub writeback_high_ratio: usize,
    pub max_writeback_in_flight: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity_frames: 4096,
            writeback_high_ratio: 75,
            max_writeback_in_flight: 4,
        }
    }
}

pub struct Cache<'s> {
    store: &'s Store,
    frames: RwLock<HashMap<u64, Arc<Frame>>>,
    patches: PatchLog,
    pub snapshots: SnapshotSet,
    throttle: Throttle,
    capacity: usize,
    clock: Mutex<u64>,
}

impl<'s> Cache<'s> {
    pub fn new(store: &'s Store, config: CacheConfig) -> Cache<'s> {
        Cache {
            store,
            frames: RwLock::new(HashMap::new()),
            patches: PatchLog::new(),
            snapshots: SnapshotSet::new(),
            throttle: Throttle::new(config.writeback_high_ratio, config.max_writeback_in_flight),
            capacity: config.capacity_frames,
            clock: Mutex::new(0),
        }
    }

    fn tick(&self) -> u64 {
        let mut clock = self.clock.lock().unwrap();
        *clock += 1;
        *clock
    }

    fn fault_in(&self, block_id: u64) -> Result<Arc<Frame>> {
        let data = self.store.block_read(block_id)?;
        let now = self.tick();
        let frame = Arc::new(Frame::new(block_id, data, now));
        self.frames
            .write()
            .unwrap()
            .insert(block_id, frame.clone());
        self.throttle.note_resize(self.frames.read().unwrap().len());
        Ok(frame)
    }

    /// Acquire a frame under `mode`.
    /// Returns the frame's current bytes, with any pending patches
    /// already folded in.
    pub fn acquire(&self, block_id: u64, mode: AcquireMode) -> Result<Arc<Vec<u8>>> {
        if mode == AcquireMode::Write {
            self.throttle.wait_for_headroom();
            self.maybe_evict();
        }

        let frame = match self.frames.read().unwrap().get(&block_id).cloned() {
            Some(frame) => frame,
            None => self.fault_in(block_id)?,
        };
        frame.touch(self.tick());
        let data = self.materialize(block_id, &frame);

        match mode {
            AcquireMode::ReadShared | AcquireMode::ReadOutdatedOk => {
                let _reader = frame.gate.acquire_read();
                Ok(data)
            }
            AcquireMode::ReadSync => {
                // block until any writer holding intent/write has released.
                let _reader = frame.gate.acquire_read();
                Ok(data)
            }
            AcquireMode::Intent | AcquireMode::Write => {
                let _writer = frame.gate.acquire_write();
                Ok(data)
            }
        }
    }

    /// A read consistent with an open snapshot: if the frame has already
    /// been pinned for `snap` (something wrote to it since the snapshot
    /// began), returns that pre-image; otherwise nothing has touched the
    /// block since, so a live read already is the snapshot's view.
    pub fn acquire_snapshot(&self, block_id: u64, snap: SnapshotId) -> Result<Arc<Vec<u8>>> {
        match self.snapshots.read(snap, block_id) {
            Some(pinned) => Ok(pinned),
            None => self.acquire(block_id, AcquireMode::ReadShared),
        }
    }

    /// Folds pending patches into the frame's base image, updates the
    /// frame in place, and returns the now-current bytes.
    fn materialize(&self, block_id: u64, frame: &Arc<Frame>) -> Arc<Vec<u8>> {
        if frame.has_patches() {
            let mut base = (**frame.data.read().unwrap()).clone();
            self.patches.apply_and_clear(block_id, &mut base);
            frame.clear_patched();
            let materialized = Arc::new(base);
            *frame.data.write().unwrap() = materialized.clone();
            materialized
        } else {
            frame.data.read().unwrap().clone()
        }
    }

    /// For every snapshot still open, pins `block_id`'s pre-write image the
    /// first time this write touches it, so the snapshot keeps seeing the
    /// generation that existed when it began.
    fn pin_for_snapshots(&self, block_id: u64, frame: &Arc<Frame>) {
        let active = self.snapshots.active_ids();
        if active.is_empty() {
            return;
        }
        let current = self.materialize(block_id, frame);
        for snap in active {
            self.snapshots.pin_if_absent(snap, block_id, current.clone());
        }
    }

    /// Append a write-ahead patch against `block_id` without reading the
    /// whole frame back. The frame is faulted
    /// in lazily the next time someone acquires it.
    pub fn patch(&self, block_id: u64, offset: usize, bytes: Vec<u8>) -> Result<()> {
        let existed = self.frames.read().unwrap().contains_key(&block_id);
        if !existed {
            self.fault_in(block_id)?;
        }
        let frames = self.frames.read().unwrap();
        let frame = frames.get(&block_id).ok_or(Error::InvalidBlockId(block_id))?;
        self.pin_for_snapshots(block_id, frame);
        self.patches.append(block_id, Patch { offset, bytes });
        frame.mark_patched();
        if !frame.is_dirty() {
            frame.mark_dirty();
            self.throttle.note_dirtied();
        }
        Ok(())
    }

    /// Replace a frame's full contents.
    pub fn write_whole(&self, block_id: u64, data: Vec<u8>) -> Result<()> {
        let frame = match self.frames.read().unwrap().get(&block_id).cloned() {
            Some(frame) => frame,
            None => self.fault_in(block_id)?,
        };
        self.pin_for_snapshots(block_id, &frame);
        *frame.data.write().unwrap() = Arc::new(data);
        if !frame.is_dirty() {
            frame.mark_dirty();
            self.throttle.note_dirtied();
        }
        Ok(())
    }

    /// Flush every dirty frame back through the block store, honoring
    /// the writeback throttle.
    pub fn writeback_all(&self) -> Result<usize> {
        let dirty: Vec<Arc<Frame>> = self
            .frames
            .read()
            .unwrap()
            .values()
            .filter(|f| f.is_dirty())
            .cloned()
            .collect();

        let mut flushed = 0;
        for frame in dirty {
            self.throttle.begin_flush();
            let data = (**frame.data.read().unwrap()).clone();
            let result = self.store.index_write(frame.block_id, &data);
            self.throttle.end_flush();
            result?;
            frame.clear_dirty();
            self.throttle.note_cleaned();
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Approximate-LRU eviction: when over capacity, clear the recency
    /// bit of every frame on a first pass (the "clock hand" sweep), then
    /// drop whichever frames score highest on eviction priority and are
    /// still cold by the second pass.
    fn maybe_evict(&self) {
        let mut frames = self.frames.write().unwrap();
        if frames.len() <= self.capacity {
            return;
        }
        let overflow = frames.len() - self.capacity;
        let mut candidates: Vec<(u64, u8)> = frames
            .iter()
            .filter(|(_, f)| !f.is_dirty())
            .map(|(id, f)| (*id, f.eviction_priority()))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        for (id, _) in candidates.into_iter().take(overflow) {
            frames.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.frames.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn begin_snapshot(&self) -> SnapshotId {
        self.snapshots.begin()
    }

    pub fn release_snapshot(&self, snap: SnapshotId) {
        self.snapshots.release(snap)
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
