//! On-disk node encoding for the B-tree slice. Two node kinds share one
//! tagged encoding: a one-byte kind tag, a count, then fixed-format
//! entries back to back. Keys and values are length-prefixed rather than
//! offset-table indexed (the layout an immutable bulk-loaded tree would
//! use) since this tree is mutated in place.
//!
//! A leaf also carries `touched_us`, the time its physical page was last
//! rewritten (set, split, merge or level), and an internal node carries
//! `child_recency`, the same timestamp mirrored down from each child's
//! subtree. Backfill traversal prunes on these rather than loading every
//! leaf to check its entries.

use crate::entry::{Entry, Timestamp, Value};
use crate::error::{Error, Result};
use crate::traits::Serialize;

pub const LEAF_TAG: u8 = 1;
pub const INTERNAL_TAG: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf {
        entries: Vec<Entry<Vec<u8>>>,
        touched_us: u64,
    },
    /// `keys[i]` is the smallest key reachable through `children[i + 1]`;
    /// `children` always has one more element than `keys`.
    /// `child_recency[i]` is `children[i]`'s subtree's own recency mirror.
    Internal {
        keys: Vec<Vec<u8>>,
        children: Vec<u64>,
        child_recency: Vec<u64>,
    },
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries, .. } => entries.len(),
            Node::Internal { keys, .. } => keys.len(),
        }
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn decode_bytes(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    if buf.len() < *pos + 4 {
        return Err(Error::DecodeFail("node: short length prefix".to_string()));
    }
    let n = u32::from_be_bytes(buf[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    if buf.len() < *pos + n {
        return Err(Error::DecodeFail("node: short byte string".to_string()));
    }
    let out = buf[*pos..*pos + n].to_vec();
    *pos += n;
    Ok(out)
}

fn decode_u64(buf: &[u8], pos: &mut usize, what: &str) -> Result<u64> {
    if buf.len() < *pos + 8 {
        return Err(Error::DecodeFail(format!("node: short {}", what)));
    }
    let v = u64::from_be_bytes(buf[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    Ok(v)
}

impl Serialize for Node {
    fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        match self {
            Node::Leaf { entries, touched_us } => {
                buf.push(LEAF_TAG);
                buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
                buf.extend_from_slice(&touched_us.to_be_bytes());
                for entry in entries {
                    encode_bytes(buf, &entry.key);
                    buf.push(entry.deleted as u8);
                    let mut vbuf = Vec::new();
                    entry.value.encode(&mut vbuf);
                    encode_bytes(buf, &vbuf);
                    buf.extend_from_slice(&entry.timestamp.cas.to_be_bytes());
                    buf.extend_from_slice(&entry.timestamp.recency_us.to_be_bytes());
                    buf.extend_from_slice(&entry.exptime.to_be_bytes());
                }
            }
            Node::Internal { keys, children, child_recency } => {
                buf.push(INTERNAL_TAG);
                buf.extend_from_slice(&(keys.len() as u32).to_be_bytes());
                for key in keys {
                    encode_bytes(buf, key);
                }
                for child in children {
                    buf.extend_from_slice(&child.to_be_bytes());
                }
                for recency in child_recency {
                    buf.extend_from_slice(&recency.to_be_bytes());
                }
            }
        }
        buf.len() - start
    }

    fn decode(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::DecodeFail("node: empty buffer".to_string()));
        }
        let tag = buf[0];
        let mut pos = 1;
        if buf.len() < pos + 4 {
            return Err(Error::DecodeFail("node: short count".to_string()));
        }
        let count = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;

        match tag {
            LEAF_TAG => {
                let touched_us = decode_u64(buf, &mut pos, "leaf touched_us")?;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = decode_bytes(buf, &mut pos)?;
                    if buf.len() < pos + 1 {
                        return Err(Error::DecodeFail("node: short deleted flag".to_string()));
                    }
                    let deleted = buf[pos] != 0;
                    pos += 1;
                    let vbuf = decode_bytes(buf, &mut pos)?;
                    let mut value = Value::default();
                    value.decode(&vbuf)?;
                    let cas = decode_u64(buf, &mut pos, "timestamp cas")?;
                    let recency_us = decode_u64(buf, &mut pos, "timestamp recency")?;
                    let exptime = decode_u64(buf, &mut pos, "exptime")?;
                    entries.push(Entry {
                        key,
                        value,
                        timestamp: Timestamp::new(cas, recency_us),
                        deleted,
                        exptime,
                    });
                }
                *self = Node::Leaf { entries, touched_us };
                Ok(pos)
            }
            INTERNAL_TAG => {
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(decode_bytes(buf, &mut pos)?);
                }
                let mut children = Vec::with_capacity(count + 1);
                for _ in 0..count + 1 {
                    children.push(decode_u64(buf, &mut pos, "child pointer")?);
                }
                let mut child_recency = Vec::with_capacity(count + 1);
                for _ in 0..count + 1 {
                    child_recency.push(decode_u64(buf, &mut pos, "child recency")?);
                }
                *self = Node::Internal { keys, children, child_recency };
                Ok(pos)
            }
            tag => Err(Error::DecodeFail(format!("node: bad tag {}", tag))),
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::Leaf { entries: Vec::new(), touched_us: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_roundtrip() {
        let node = Node::Leaf {
            entries: vec![
                Entry::new(b"a".to_vec(), Value::Inline(b"1".to_vec()), Timestamp::new(1, 1)),
                Entry::tombstone(b"b".to_vec(), Timestamp::new(2, 2)),
            ],
            touched_us: 2,
        };
        let mut buf = Vec::new();
        node.encode(&mut buf);

        let mut out = Node::default();
        out.decode(&buf).unwrap();
        assert_eq!(out, node);
    }

    #[test]
    fn test_leaf_roundtrip_with_exptime() {
        let node = Node::Leaf {
            entries: vec![Entry::with_exptime(
                b"a".to_vec(),
                Value::Inline(b"1".to_vec()),
                Timestamp::new(1, 1),
                5_000,
            )],
            touched_us: 1,
        };
        let mut buf = Vec::new();
        node.encode(&mut buf);

        let mut out = Node::default();
        out.decode(&buf).unwrap();
        assert_eq!(out, node);
    }

    #[test]
    fn test_internal_roundtrip() {
        let node = Node::Internal {
            keys: vec![b"m".to_vec()],
            children: vec![1, 2],
            child_recency: vec![10, 20],
        };
        let mut buf = Vec::new();
        node.encode(&mut buf);

        let mut out = Node::default();
        out.decode(&buf).unwrap();
        assert_eq!(out, node);
    }
}
