//! Metablock ring: a small fixed-size array of superblock checkpoints
//! written round-robin. Recovery scans the whole ring and picks the
//! highest-epoch slot whose checksum verifies, the same "last valid wins"
//! rule a log file uses to recover its own journal headers.

use crate::error::{Error, Result};
use crate::traits::Serialize;
use crate::util::crc32;

#[derive(Debug, Clone, PartialEq)]
pub struct MetaBlock {
    pub epoch: u64,
    /// Block id of the current B-tree root.
    pub root_block: u64,
    /// Block id of the current LBA index snapshot.
    pub lba_index_block: u64,
    /// Low watermark below which GC may reclaim extents.
    pub gc_watermark: u64,
}

impl MetaBlock {
    pub const ENCODED_LEN: usize = 8 * 4 + 4;

    pub fn new(epoch: u64) -> MetaBlock {
        MetaBlock {
            epoch,
            root_block: 0,
            lba_index_block: 0,
            gc_watermark: 0,
        }
    }
}

impl Serialize for MetaBlock {
    fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        buf.extend_from_slice(&self.epoch.to_be_bytes());
        buf.extend_from_slice(&self.root_block.to_be_bytes());
        buf.extend_from_slice(&self.lba_index_block.to_be_bytes());
        buf.extend_from_slice(&self.gc_watermark.to_be_bytes());
        let crc = crc32(&buf[start..]);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf.len() - start
    }

    fn decode(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.len() < Self::ENCODED_LEN {
            return Err(Error::DecodeFail("metablock: short buffer".to_string()));
        }
        let body = &buf[..Self::ENCODED_LEN - 4];
        let want = u32::from_be_bytes(
            buf[Self::ENCODED_LEN - 4..Self::ENCODED_LEN]
                .try_into()
                .unwrap(),
        );
        if crc32(body) != want {
            return Err(Error::Corruption("metablock checksum mismatch".to_string()));
        }
        self.epoch = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        self.root_block = u64::from_be_bytes(buf[8..16].try_into().unwrap());
        self.lba_index_block = u64::from_be_bytes(buf[16..24].try_into().unwrap());
        self.gc_watermark = u64::from_be_bytes(buf[24..32].try_into().unwrap());
        Ok(Self::ENCODED_LEN)
    }
}

/// In-memory view of the ring: every slot's last known content, used by
/// `Store::checkpoint` to pick the next slot and by recovery to pick the
/// winner.
pub struct Ring {
    slots: Vec<Option<MetaBlock>>,
    next: usize,
}

impl Ring {
    pub fn new(len: usize) -> Ring {
        Ring {
            slots: vec![None; len],
            next: 0,
        }
    }

    /// Restore ring state from freshly-read slot bytes (one call per
    /// slot, in order); slots that fail to decode are treated as blank
    /// (torn write from a crash mid-checkpoint).
    pub fn restore(&mut self, raw_slots: &[Vec<u8>]) {
        self.slots = raw_slots
            .iter()
            .map(|raw| {
                let mut mb = MetaBlock::new(0);
                mb.decode(raw).ok().map(|_| mb)
            })
            .collect();
    }

    /// Highest-epoch valid slot, i.e. the current durable checkpoint.
    pub fn current(&self) -> Option<&MetaBlock> {
        self.slots
            .iter()
            .flatten()
            .max_by_key(|mb| mb.epoch)
    }

    /// Slot index and epoch to use for the next checkpoint write.
    pub fn advance(&mut self) -> (usize, u64) {
        let epoch = self.current().map_or(0, |mb| mb.epoch) + 1;
        let idx = self.next;
        self.next = (self.next + 1) % self.slots.len().max(1);
        (idx, epoch)
    }

    pub fn record(&mut self, idx: usize, mb: MetaBlock) {
        self.slots[idx] = Some(mb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metablock_roundtrip() {
        let mb = MetaBlock {
            epoch: 9,
            root_block: 100,
            lba_index_block: 200,
            gc_watermark: 300,
        };
        let mut buf = Vec::new();
        mb.encode(&mut buf);

        let mut out = MetaBlock::new(0);
        out.decode(&buf).unwrap();
        assert_eq!(out, mb);
    }

    #[test]
    fn test_ring_picks_highest_epoch() {
        let mut ring = Ring::new(4);
        ring.record(0, MetaBlock::new(3));
        ring.record(1, MetaBlock::new(7));
        ring.record(2, MetaBlock::new(5));
        assert_eq!(ring.current().unwrap().epoch, 7);
    }

    #[test]
    fn test_ring_advance_wraps() {
        let mut ring = Ring::new(2);
        let (idx0, epoch0) = ring.advance();
        ring.record(idx0, MetaBlock::new(epoch0));
        let (idx1, epoch1) = ring.advance();
        assert_ne!(idx0, idx1);
        assert_eq!(epoch1, epoch0 + 1);
    }
}
