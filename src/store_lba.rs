//! Logical block address index: a durable mapping from logical block id
//! to physical file offset, sharded into lanes for concurrent access
//!. Each lane owns a
//! disjoint id range (`id % num_lanes == lane`) and its own lock, the same
//! "shard by hash, one lock per shard" shape [`crate::util::shard_of`]
//! gives the KV layer, applied here to block ids instead of keys.

use std::{collections::HashMap, sync::RwLock};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalAddr {
    pub extent: u32,
    pub offset: u32,
    pub len: u32,
}

struct Lane {
    map: RwLock<HashMap<u64, PhysicalAddr>>,
}

/// Append-only in that entries are never overwritten in place: a block
/// move (from GC) writes a new mapping and the old physical range is
/// returned to the extent manager as free.
pub struct LbaIndex {
    lanes: Vec<Lane>,
    next_id: std::sync::atomic::AtomicU64,
}

impl LbaIndex {
    pub fn new(num_lanes: usize) -> LbaIndex {
        LbaIndex {
            lanes: (0..num_lanes.max(1))
                .map(|_| Lane {
                    map: RwLock::new(HashMap::new()),
                })
                .collect(),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn lane_of(&self, id: u64) -> &Lane {
        &self.lanes[(id as usize) % self.lanes.len()]
    }

    pub fn alloc_id(&self) -> u64 {
        self.next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    pub fn insert(&self, id: u64, addr: PhysicalAddr) {
        self.lane_of(id).map.write().unwrap().insert(id, addr);
    }

    pub fn lookup(&self, id: u64) -> Result<PhysicalAddr> {
        self.lane_of(id)
            .map
            .read()
            .unwrap()
            .get(&id)
            .copied()
            .ok_or(Error::InvalidBlockId(id))
    }

    pub fn remove(&self, id: u64) -> Option<PhysicalAddr> {
        self.lane_of(id).map.write().unwrap().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(|l| l.map.read().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every live mapping, used both to serialize the index
    /// checkpoint and by GC to find which blocks live in a given extent.
    pub fn snapshot(&self) -> Vec<(u64, PhysicalAddr)> {
        let mut out = Vec::new();
        for lane in &self.lanes {
            out.extend(lane.map.read().unwrap().iter().map(|(k, v)| (*k, *v)));
        }
        out
    }

    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }
}
