//! Garbage collector: relocates live blocks out of low-occupancy extents
//! so they can be reclaimed. Runs as ordinary fiber work, not a dedicated
//! thread, rather than as an out-of-band daemon.

use crate::error::Result;
use crate::store_block::BlockIo;
use crate::store_extent::ExtentManager;
use crate::store_lba::{LbaIndex, PhysicalAddr};

pub struct Gc<'a> {
    pub lba: &'a LbaIndex,
    pub extents: &'a ExtentManager,
    pub blocks: &'a BlockIo,
    pub high_ratio: usize,
}

#[derive(Debug, Default)]
pub struct GcReport {
    pub extents_scanned: usize,
    pub extents_reclaimed: usize,
    pub blocks_relocated: usize,
}

impl<'a> Gc<'a> {
    /// One GC pass: find extents under `high_ratio` live occupancy,
    /// relocate every block the LBA index still points into them, then
    /// reset the extent to empty.
    pub fn run_once(&self) -> Result<GcReport> {
        let candidates = self.extents.gc_candidates(self.high_ratio);
        let mut report = GcReport {
            extents_scanned: candidates.len(),
            ..Default::default()
        };

        for extent in candidates {
            let live: Vec<(u64, PhysicalAddr)> = self
                .lba
                .snapshot()
                .into_iter()
                .filter(|(_, addr)| addr.extent == extent)
                .collect();

            for (id, addr) in live {
                let data = self.blocks.read(addr)?;
                let new_addr = self.blocks.write(self.extents, &data)?;
                self.lba.insert(id, new_addr);
                self.extents.record_free(extent, addr.len);
                report.blocks_relocated += 1;
            }

            self.extents.reset_extent(extent);
            report.extents_reclaimed += 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
#[path = "store_gc_test.rs"]
mod store_gc_test;
