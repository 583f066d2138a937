//! Patch log: write-ahead diffs applied against a cached frame before the
//! frame itself is flushed. Lets a hot page
//! absorb many small writes in memory and only pay one full-block
//! writeback, the same amortization idea a write-ahead log applies to an
//! on-disk journal, applied here to in-memory pages instead.

use std::{collections::HashMap, sync::Mutex};

/// One recorded mutation: overwrite `len` bytes starting at `offset`
/// within the frame's block.
#[derive(Debug, Clone)]
pub struct Patch {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

pub struct PatchLog {
    by_block: Mutex<HashMap<u64, Vec<Patch>>>,
}

impl PatchLog {
    pub fn new() -> PatchLog {
        PatchLog {
            by_block: Mutex::new(HashMap::new()),
        }
    }

    pub fn append(&self, block_id: u64, patch: Patch) {
        self.by_block
            .lock()
            .unwrap()
            .entry(block_id)
            .or_insert_with(Vec::new)
            .push(patch);
    }

    /// Apply and clear every pending patch for `block_id` onto `base`,
    /// in append order (later patches win on overlap).
    pub fn apply_and_clear(&self, block_id: u64, base: &mut Vec<u8>) {
        let mut by_block = self.by_block.lock().unwrap();
        if let Some(patches) = by_block.remove(&block_id) {
            for patch in patches {
                let end = patch.offset + patch.bytes.len();
                if end > base.len() {
                    base.resize(end, 0);
                }
                base[patch.offset..end].copy_from_slice(&patch.bytes);
            }
        }
    }

    pub fn pending_count(&self, block_id: u64) -> usize {
        self.by_block
            .lock()
            .unwrap()
            .get(&block_id)
            .map_or(0, |v| v.len())
    }
}

impl Default for PatchLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patches_apply_in_order() {
        let log = PatchLog::new();
        log.append(
            1,
            Patch {
                offset: 0,
                bytes: vec![1, 1, 1, 1],
            },
        );
        log.append(
            1,
            Patch {
                offset: 2,
                bytes: vec![9, 9],
            },
        );

        let mut base = vec![0; 4];
        log.apply_and_clear(1, &mut base);
        assert_eq!(base, vec![1, 1, 9, 9]);
        assert_eq!(log.pending_count(1), 0);
    }

    #[test]
    fn test_patch_extends_base() {
        let log = PatchLog::new();
        log.append(
            1,
            Patch {
                offset: 4,
                bytes: vec![7, 7],
            },
        );
        let mut base = vec![0; 2];
        log.apply_and_clear(1, &mut base);
        assert_eq!(base, vec![0, 0, 0, 0, 7, 7]);
    }
}
