//! One shard of the key-value store: a B-tree slice plus
//! the timestamper that stamps every write entering it. Order source/sink
//! enforcement lives one level up in [`crate::kv`], since a single
//! connection's causal ordering spans the slice boundary.

use std::ops::Bound;

use crate::btree::{BackfillEvent, Btree, BtreeConfig, Outcome};
use crate::entry::Value;
use crate::error::Result;
use crate::kv_timestamper::Timestamper;
use crate::store::Store;

pub struct Slice<'s> {
    pub btree: Btree<'s>,
    timestamper: Timestamper,
}

impl<'s> Slice<'s> {
    pub fn create(store: &'s Store, config: BtreeConfig) -> Slice<'s> {
        Slice {
            btree: Btree::create(store, config),
            timestamper: Timestamper::new(),
        }
    }

    pub fn open(store: &'s Store, config: BtreeConfig, root: u64) -> Slice<'s> {
        Slice {
            btree: Btree::open(store, config, root),
            timestamper: Timestamper::new(),
        }
    }

    pub fn root_block(&self) -> u64 {
        self.btree.root_block()
    }

    /// Reads never pass through the timestamper.
    pub fn get(&self, key: &[u8]) -> Result<Outcome> {
        self.btree.get(key)
    }

    pub fn get_value(&self, key: &[u8]) -> Result<Option<(Vec<u8>, crate::entry::Timestamp)>> {
        self.btree.get_value(key)
    }

    pub fn rget(
        &self,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        max: usize,
    ) -> Result<(Vec<(Vec<u8>, Value, crate::entry::Timestamp)>, bool)> {
        self.btree.rget(start, end, max)
    }

    pub fn set(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome> {
        self.btree.set(key, value, self.timestamper.next())
    }

    pub fn add(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome> {
        self.btree.add(key, value, self.timestamper.next())
    }

    pub fn replace(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome> {
        self.btree.replace(key, value, self.timestamper.next())
    }

    pub fn cas(&self, key: &[u8], value: Vec<u8>, expected_cas: u64) -> Result<Outcome> {
        self.btree.cas(key, value, expected_cas, self.timestamper.next())
    }

    pub fn delete(&self, key: &[u8]) -> Result<Outcome> {
        self.btree.delete(key, self.timestamper.next())
    }

    pub fn append(&self, key: &[u8], suffix: Vec<u8>) -> Result<Outcome> {
        self.btree.append(key, suffix, self.timestamper.next())
    }

    pub fn prepend(&self, key: &[u8], prefix: Vec<u8>) -> Result<Outcome> {
        self.btree.prepend(key, prefix, self.timestamper.next())
    }

    pub fn incr(&self, key: &[u8], delta: u64) -> Result<Outcome> {
        self.btree.incr(key, delta, self.timestamper.next())
    }

    pub fn decr(&self, key: &[u8], delta: u64) -> Result<Outcome> {
        self.btree.decr(key, delta, self.timestamper.next())
    }

    pub fn backfill(&self, since_us: u64) -> Result<Vec<BackfillEvent>> {
        self.btree.backfill(since_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;

    fn fresh_store(name: &str) -> Store {
        let dir = std::env::temp_dir().join(name);
        std::fs::remove_dir_all(&dir).ok();
        Store::create(StoreConfig {
            dir,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_slice_set_get_stamps_increasing_cas() {
        let store = fresh_store("kvcore.kv_slice.set_get");
        let slice = Slice::create(&store, BtreeConfig::default());

        slice.set(b"k1", b"v1".to_vec()).unwrap();
        slice.set(b"k2", b"v2".to_vec()).unwrap();
        let (_, ts1) = slice.get_value(b"k1").unwrap().unwrap();
        let (_, ts2) = slice.get_value(b"k2").unwrap().unwrap();
        assert!(ts2.cas > ts1.cas);
    }
}
