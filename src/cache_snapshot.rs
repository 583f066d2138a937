//! Copy-on-write snapshot retention. A snapshot pins the `Arc<Vec<u8>>`
//! generation of every frame that existed when it was taken; later
//! writers clone-on-write rather than mutate in place, so a live
//! snapshot's reads never observe a write that happened after it was
//! taken, without needing a reader-side lock.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(pub u64);

pub struct SnapshotSet {
    next_id: Mutex<u64>,
    /// snapshot_id -> (block_id -> pinned generation)
    pinned: Mutex<HashMap<u64, HashMap<u64, Arc<Vec<u8>>>>>,
}

impl SnapshotSet {
    pub fn new() -> SnapshotSet {
        SnapshotSet {
            next_id: Mutex::new(1),
            pinned: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin(&self) -> SnapshotId {
        let mut next = self.next_id.lock().unwrap();
        let id = *next;
        *next += 1;
        self.pinned.lock().unwrap().insert(id, HashMap::new());
        SnapshotId(id)
    }

    /// Called by the cache the first time a pinned-for-this-snapshot
    /// frame is about to be overwritten: records the pre-write generation
    /// so the snapshot keeps seeing it.
    pub fn pin_if_absent(&self, snap: SnapshotId, block_id: u64, current: Arc<Vec<u8>>) {
        let mut pinned = self.pinned.lock().unwrap();
        if let Some(map) = pinned.get_mut(&snap.0) {
            map.entry(block_id).or_insert(current);
        }
    }

    pub fn read(&self, snap: SnapshotId, block_id: u64) -> Option<Arc<Vec<u8>>> {
        self.pinned
            .lock()
            .unwrap()
            .get(&snap.0)
            .and_then(|m| m.get(&block_id).cloned())
    }

    pub fn release(&self, snap: SnapshotId) {
        self.pinned.lock().unwrap().remove(&snap.0);
    }

    pub fn active_count(&self) -> usize {
        self.pinned.lock().unwrap().len()
    }

    /// Every snapshot id currently open, for the cache to pin a pre-image
    /// against on a write.
    pub fn active_ids(&self) -> Vec<SnapshotId> {
        self.pinned.lock().unwrap().keys().map(|id| SnapshotId(*id)).collect()
    }
}

impl Default for SnapshotSet {
    fn default() -> Self {
        Self::new()
    }
}
