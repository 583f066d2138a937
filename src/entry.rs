//! Leaf-entry value representation shared by the B-tree and buffer-cache
//! layers.
//!
//! A tagged union over "inline" and "blob-referenced" values, the same
//! shape a value-log's native-vs-on-disk-reference split takes,
//! generalized to this engine's two value families. Per-key version
//! chains are dropped: this engine's leaves hold a single current value
//! plus a CAS/recency pair, not a full version history.

use crate::error::{Error, Result};
use crate::traits::{Footprint, Serialize};

/// A value as stored in a leaf node: either carried inline, or as a
/// reference into the blob tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Inline(Vec<u8>),
    Blob { root_block: u64, len: u64 },
}

impl Value {
    pub fn len(&self) -> u64 {
        match self {
            Value::Inline(v) => v.len() as u64,
            Value::Blob { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, Value::Blob { .. })
    }
}

impl Footprint for Value {
    fn footprint(&self) -> Result<isize> {
        let n = match self {
            Value::Inline(v) => v.len(),
            Value::Blob { .. } => 16,
        };
        Ok(n as isize)
    }
}

impl Serialize for Value {
    fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        match self {
            Value::Inline(v) => {
                buf.push(0);
                buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
                buf.extend_from_slice(v);
            }
            Value::Blob { root_block, len } => {
                buf.push(1);
                buf.extend_from_slice(&root_block.to_be_bytes());
                buf.extend_from_slice(&len.to_be_bytes());
            }
        }
        buf.len() - start
    }

    fn decode(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::DecodeFail("value: empty buffer".to_string()));
        }
        match buf[0] {
            0 => {
                if buf.len() < 5 {
                    return Err(Error::DecodeFail("value: short inline header".to_string()));
                }
                let n = u32::from_be_bytes(buf[1..5].try_into().unwrap()) as usize;
                if buf.len() < 5 + n {
                    return Err(Error::DecodeFail("value: short inline body".to_string()));
                }
                *self = Value::Inline(buf[5..5 + n].to_vec());
                Ok(5 + n)
            }
            1 => {
                if buf.len() < 17 {
                    return Err(Error::DecodeFail("value: short blob ref".to_string()));
                }
                let root_block = u64::from_be_bytes(buf[1..9].try_into().unwrap());
                let len = u64::from_be_bytes(buf[9..17].try_into().unwrap());
                *self = Value::Blob { root_block, len };
                Ok(17)
            }
            tag => Err(Error::DecodeFail(format!("value: bad tag {}", tag))),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Inline(Vec::new())
    }
}

/// Per-key causal-ordering and recency metadata carried by every leaf
/// entry. `cas` is the monotone
/// per-slice counter handed out by [`crate::kv_timestamper`]; `recency_us`
/// is wall-clock microseconds used by eviction/backfill cutoffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub cas: u64,
    pub recency_us: u64,
}

impl Timestamp {
    pub fn new(cas: u64, recency_us: u64) -> Timestamp {
        Timestamp { cas, recency_us }
    }
}

impl Serialize for Timestamp {
    fn encode(&self, buf: &mut Vec<u8>) -> usize {
        buf.extend_from_slice(&self.cas.to_be_bytes());
        buf.extend_from_slice(&self.recency_us.to_be_bytes());
        16
    }

    fn decode(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.len() < 16 {
            return Err(Error::DecodeFail("timestamp: short buffer".to_string()));
        }
        self.cas = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        self.recency_us = u64::from_be_bytes(buf[8..16].try_into().unwrap());
        Ok(16)
    }
}

/// A single leaf entry: key, current value (or tombstone), and timestamp.
/// `deleted` entries are retained until the delete-queue has propagated the tombstone to all replicas.
///
/// `exptime` is an absolute microsecond deadline past which `get` treats the
/// entry as not present; `0` means "never expires". It mirrors the
/// `exptime_t` memcached carries alongside each value.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<K> {
    pub key: K,
    pub value: Value,
    pub timestamp: Timestamp,
    pub deleted: bool,
    pub exptime: u64,
}

impl<K> Entry<K> {
    pub fn new(key: K, value: Value, timestamp: Timestamp) -> Entry<K> {
        Entry {
            key,
            value,
            timestamp,
            deleted: false,
            exptime: 0,
        }
    }

    pub fn with_exptime(key: K, value: Value, timestamp: Timestamp, exptime: u64) -> Entry<K> {
        Entry {
            key,
            value,
            timestamp,
            deleted: false,
            exptime,
        }
    }

    pub fn tombstone(key: K, timestamp: Timestamp) -> Entry<K> {
        Entry {
            key,
            value: Value::default(),
            timestamp,
            deleted: true,
            exptime: 0,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_expired(&self, now_us: u64) -> bool {
        self.exptime != 0 && self.exptime <= now_us
    }

    pub fn cas(&self) -> u64 {
        self.timestamp.cas
    }
}

impl<K: Footprint> Footprint for Entry<K> {
    fn footprint(&self) -> Result<isize> {
        Ok(self.key.footprint()? + self.value.footprint()? + 25)
    }
}

#[cfg(test)]
#[path = "entry_test.rs"]
mod entry_test;
