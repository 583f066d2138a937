//! Extent and zone bookkeeping. An extent is a fixed-size contiguous run of
//! blocks; a zone is a group of extents that are allocated/recycled
//! together to keep writes sequential on the underlying device, the same
//! append-mostly layout a log file uses, generalized from "one open file"
//! to "many fixed-size extents within one file".

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Mutex,
};

#[derive(Debug, Clone, Copy)]
pub struct ExtentStats {
    pub live_bytes: u32,
    pub capacity_bytes: u32,
    pub sealed: bool,
}

impl ExtentStats {
    pub fn live_ratio(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        self.live_bytes as f64 / self.capacity_bytes as f64
    }
}

pub struct ExtentManager {
    extents: Mutex<Vec<ExtentStats>>,
    extent_capacity: u32,
    cursor: AtomicU32,
}

impl ExtentManager {
    pub fn new(extent_capacity: u32) -> ExtentManager {
        ExtentManager {
            extents: Mutex::new(Vec::new()),
            extent_capacity,
            cursor: AtomicU32::new(0),
        }
    }

    /// Current write extent: the last unsealed extent, or a freshly
    /// allocated one if none is open.
    pub fn current_write_extent(&self) -> u32 {
        let mut extents = self.extents.lock().unwrap();
        if let Some((idx, _)) = extents
            .iter()
            .enumerate()
            .find(|(_, e)| !e.sealed && e.live_bytes < e.capacity_bytes)
        {
            return idx as u32;
        }
        extents.push(ExtentStats {
            live_bytes: 0,
            capacity_bytes: self.extent_capacity,
            sealed: false,
        });
        (extents.len() - 1) as u32
    }

    pub fn record_write(&self, extent: u32, len: u32) {
        let mut extents = self.extents.lock().unwrap();
        let e = &mut extents[extent as usize];
        e.live_bytes += len;
        if e.live_bytes >= e.capacity_bytes {
            e.sealed = true;
        }
    }

    pub fn record_free(&self, extent: u32, len: u32) {
        let mut extents = self.extents.lock().unwrap();
        let e = &mut extents[extent as usize];
        e.live_bytes = e.live_bytes.saturating_sub(len);
    }

    pub fn stats(&self, extent: u32) -> ExtentStats {
        self.extents.lock().unwrap()[extent as usize]
    }

    pub fn num_extents(&self) -> usize {
        self.extents.lock().unwrap().len()
    }

    /// Extents whose live ratio has fallen below `high_ratio` (expressed
    /// as a 0-100 percentage): candidates for compaction.
    pub fn gc_candidates(&self, high_ratio: usize) -> Vec<u32> {
        let threshold = high_ratio as f64 / 100.0;
        self.extents
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.sealed && e.live_ratio() < threshold)
            .map(|(idx, _)| idx as u32)
            .collect()
    }

    pub fn reset_extent(&self, extent: u32) {
        let mut extents = self.extents.lock().unwrap();
        extents[extent as usize] = ExtentStats {
            live_bytes: 0,
            capacity_bytes: self.extent_capacity,
            sealed: false,
        };
    }
}
