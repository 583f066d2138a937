//! Static header occupying block 0 of a store file. Written once at
//! creation and never moved; every other structure (metablock ring, LBA
//! shards, extents) is located relative to fields recorded here, the same
//! fixed-size marker-block convention a read-only B-tree uses for its own
//! header.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::traits::Serialize;
use crate::util::crc32;

pub const MAGIC: u64 = 0x6B76_636F_7265_3031; // "kvcore01"

#[derive(Debug, Clone, PartialEq)]
pub struct StaticHeader {
    pub magic: u64,
    pub version: u32,
    pub block_size: u32,
    pub num_lanes: u32,
    pub metablock_ring_len: u32,
    pub created_at_us: u64,
    /// Identifies this store instance independent of its directory path,
    /// so a replication peer (or an admin tool comparing two directories)
    /// can tell whether two on-disk stores are the same lineage.
    pub store_id: Uuid,
}

impl StaticHeader {
    pub const ENCODED_LEN: usize = 8 + 4 + 4 + 4 + 4 + 8 + 16 + 4; // + crc

    pub fn new(block_size: u32, num_lanes: u32, created_at_us: u64) -> StaticHeader {
        StaticHeader {
            magic: MAGIC,
            version: 1,
            block_size,
            num_lanes,
            metablock_ring_len: 16,
            created_at_us,
            store_id: Uuid::new_v4(),
        }
    }
}

impl Serialize for StaticHeader {
    fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        buf.extend_from_slice(&self.magic.to_be_bytes());
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.block_size.to_be_bytes());
        buf.extend_from_slice(&self.num_lanes.to_be_bytes());
        buf.extend_from_slice(&self.metablock_ring_len.to_be_bytes());
        buf.extend_from_slice(&self.created_at_us.to_be_bytes());
        buf.extend_from_slice(self.store_id.as_bytes());
        let crc = crc32(&buf[start..]);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf.len() - start
    }

    fn decode(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.len() < Self::ENCODED_LEN {
            return Err(Error::DecodeFail("header: short buffer".to_string()));
        }
        let body = &buf[..Self::ENCODED_LEN - 4];
        let want = u32::from_be_bytes(buf[Self::ENCODED_LEN - 4..Self::ENCODED_LEN].try_into().unwrap());
        if crc32(body) != want {
            return Err(Error::Corruption("static header checksum mismatch".to_string()));
        }
        self.magic = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        self.version = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        self.block_size = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        self.num_lanes = u32::from_be_bytes(buf[16..20].try_into().unwrap());
        self.metablock_ring_len = u32::from_be_bytes(buf[20..24].try_into().unwrap());
        self.created_at_us = u64::from_be_bytes(buf[24..32].try_into().unwrap());
        self.store_id = Uuid::from_slice(&buf[32..48]).map_err(|e| Error::DecodeFail(e.to_string()))?;
        if self.magic != MAGIC {
            return Err(Error::InvalidFormat("bad store magic".to_string()));
        }
        Ok(Self::ENCODED_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let h = StaticHeader::new(4096, 8, 1_234_567);
        let mut buf = Vec::new();
        h.encode(&mut buf);

        let mut out = StaticHeader::new(0, 0, 0);
        out.decode(&buf).unwrap();
        assert_eq!(out, h);
    }

    #[test]
    fn test_header_rejects_corruption() {
        let h = StaticHeader::new(4096, 8, 1);
        let mut buf = Vec::new();
        h.encode(&mut buf);
        buf[0] ^= 0xFF;

        let mut out = StaticHeader::new(0, 0, 0);
        let err = out.decode(&buf).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_header_assigns_distinct_store_ids() {
        let a = StaticHeader::new(4096, 8, 1);
        let b = StaticHeader::new(4096, 8, 1);
        assert_ne!(a.store_id, b.store_id);
    }
}
