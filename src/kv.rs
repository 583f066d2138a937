//! Key-value store: wraps N B-tree slices plus a metadata slice.
//!
//! Each slice gets its own [`crate::store::Store`] (its own directory, own
//! header/metablock ring/LBA index) rather than sharing one globally: the
//! store's metablock ring is a single global commit point per `Store`
//!, and
//! giving every slice its own keeps that serialization scoped to the
//! slice instead of forcing every slice's checkpoint to clobber every
//! other slice's recorded root. A slice's own internal block multiplexing
//! (spreading one store's blocks across several backing files) is a
//! separate, unrelated concept from this slice→proxy routing.

use std::ops::Bound;
use std::path::{Path, PathBuf};

use crate::btree::{BtreeConfig, Outcome};
use crate::config::Config;
use crate::entry::{Timestamp, Value};
use crate::error::Result;
use crate::iface::{MemcacheOps, ENGINE_VERSION};
use crate::kv_order::OrderSink;
use crate::kv_slice::Slice;
use crate::store::{Store, StoreConfig};
use crate::util::shard_of;

/// The backing [`Store`] per slice, owned independently of [`KvStore`] so
/// the borrow in `KvStore<'s>` has somewhere stable to point.
pub struct SliceStores {
    pub metadata: Store,
    pub slices: Vec<Store>,
}

impl SliceStores {
    pub fn create(config: &Config) -> Result<SliceStores> {
        let metadata = Store::create(store_config_for(config, "metadata"))?;
        let slices = (0..config.num_slices.max(1))
            .map(|i| Store::create(store_config_for(config, &format!("slice-{}", i))))
            .collect::<Result<Vec<_>>>()?;
        Ok(SliceStores { metadata, slices })
    }

    pub fn open(config: &Config) -> Result<SliceStores> {
        let metadata = Store::open(store_config_for(config, "metadata"))?;
        let slices = (0..config.num_slices.max(1))
            .map(|i| Store::open(store_config_for(config, &format!("slice-{}", i))))
            .collect::<Result<Vec<_>>>()?;
        Ok(SliceStores { metadata, slices })
    }
}

/// Translates the on-disk/CLI-facing [`Config`] into the [`StoreConfig`]
/// for one slice's subdirectory. `extent_capacity`/`num_lanes`/`num_files`
/// have no `Config` counterpart (they're block-store internals the
/// engine-wide settings file doesn't expose) and keep `StoreConfig`'s own
/// defaults.
fn store_config_for(config: &Config, sub: &str) -> StoreConfig {
    StoreConfig {
        dir: child_dir(Path::new(&config.dir), sub),
        block_size: config.leaf_blocksize as u32,
        gc_high_ratio: config.gc_high_ratio,
        ..StoreConfig::default()
    }
}

/// Translates `Config` into the B-tree's own tuning knobs. `max_leaf_entries`
/// / `max_internal_entries` bound node fan-out by entry count rather than
/// by the byte sizes `Config` records, so they keep `BtreeConfig`'s own
/// defaults; everything `Config` does name a direct counterpart for is
/// carried across.
fn btree_config_for(config: &Config) -> BtreeConfig {
    BtreeConfig {
        max_inline_value: config.max_inline_value,
        blob_chunk_size: config.blob_blocksize,
        delete_queue_depth: config.delete_queue_depth,
        cache_capacity_frames: (config.cache_size / config.leaf_blocksize).max(1),
        ..BtreeConfig::default()
    }
}

fn child_dir(dir: &Path, sub: &str) -> PathBuf {
    dir.join(sub)
}

/// Top-level engine: one [`Slice`] per shard plus the metadata slice.
pub struct KvStore<'s> {
    metadata: Slice<'s>,
    slices: Vec<Slice<'s>>,
    order_sinks: Vec<OrderSink>,
    metadata_sink: OrderSink,
}

impl<'s> KvStore<'s> {
    pub fn create(stores: &'s SliceStores, config: &Config) -> KvStore<'s> {
        let btree_config = btree_config_for(config);
        let metadata = Slice::create(&stores.metadata, clone_btree_config(&btree_config));
        let slices = stores
            .slices
            .iter()
            .map(|store| Slice::create(store, clone_btree_config(&btree_config)))
            .collect::<Vec<_>>();
        let order_sinks = slices.iter().map(|_| OrderSink::new()).collect();
        KvStore {
            metadata,
            slices,
            order_sinks,
            metadata_sink: OrderSink::new(),
        }
    }

    /// Reattaches to the latest checkpointed root of every slice's store.
    pub fn open(stores: &'s SliceStores, config: &Config) -> KvStore<'s> {
        let btree_config = btree_config_for(config);
        let metadata = Slice::open(
            &stores.metadata,
            clone_btree_config(&btree_config),
            stores.metadata.current_root().unwrap_or(0),
        );
        let slices = stores
            .slices
            .iter()
            .map(|store| Slice::open(store, clone_btree_config(&btree_config), store.current_root().unwrap_or(0)))
            .collect::<Vec<_>>();
        let order_sinks = slices.iter().map(|_| OrderSink::new()).collect();
        KvStore {
            metadata,
            slices,
            order_sinks,
            metadata_sink: OrderSink::new(),
        }
    }

    pub fn num_slices(&self) -> usize {
        self.slices.len()
    }

    pub fn slice_index_for(&self, key: &[u8]) -> usize {
        shard_of(key, self.slices.len().max(1))
    }

    pub fn slice_for(&self, key: &[u8]) -> &Slice<'s> {
        &self.slices[self.slice_index_for(key)]
    }

    pub fn slice(&self, idx: usize) -> &Slice<'s> {
        &self.slices[idx]
    }

    pub fn metadata(&self) -> &Slice<'s> {
        &self.metadata
    }

    pub fn order_sink(&self, idx: usize) -> &OrderSink {
        &self.order_sinks[idx]
    }

    pub fn metadata_order_sink(&self) -> &OrderSink {
        &self.metadata_sink
    }

    /// Runs `f` once `token` is next in program order on `slice_idx`'s
    /// order sink, then checks it back out.
    pub fn execute_ordered<F, R>(&self, slice_idx: usize, token: u64, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let sink = &self.order_sinks[slice_idx];
        sink.wait_turn(token);
        let result = f();
        sink.check_out(token);
        result
    }

    pub fn get(&self, key: &[u8]) -> Result<Outcome> {
        self.slice_for(key).get(key)
    }

    pub fn get_value(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Timestamp)>> {
        self.slice_for(key).get_value(key)
    }

    pub fn set(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome> {
        self.slice_for(key).set(key, value)
    }

    pub fn add(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome> {
        self.slice_for(key).add(key, value)
    }

    pub fn replace(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome> {
        self.slice_for(key).replace(key, value)
    }

    pub fn cas(&self, key: &[u8], value: Vec<u8>, expected_cas: u64) -> Result<Outcome> {
        self.slice_for(key).cas(key, value, expected_cas)
    }

    pub fn delete(&self, key: &[u8]) -> Result<Outcome> {
        self.slice_for(key).delete(key)
    }

    pub fn append(&self, key: &[u8], suffix: Vec<u8>) -> Result<Outcome> {
        self.slice_for(key).append(key, suffix)
    }

    pub fn prepend(&self, key: &[u8], prefix: Vec<u8>) -> Result<Outcome> {
        self.slice_for(key).prepend(key, prefix)
    }

    pub fn incr(&self, key: &[u8], delta: u64) -> Result<Outcome> {
        self.slice_for(key).incr(key, delta)
    }

    pub fn decr(&self, key: &[u8], delta: u64) -> Result<Outcome> {
        self.slice_for(key).decr(key, delta)
    }

    /// Range scan spanning every slice: each slice already returns its
    /// entries key-ordered and capped at `max`/the per-slice chunk-size
    /// limit, so merging is collecting, re-sorting, and then re-applying
    /// `max` across the merged result (a slice hitting its own cap
    /// doesn't mean the whole scan should return fewer than `max` pairs
    /// if other slices still have room).
    pub fn rget_all(
        &self,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        max: usize,
    ) -> Result<(Vec<(Vec<u8>, Value, Timestamp)>, bool)> {
        let mut merged = Vec::new();
        let mut truncated = false;
        for slice in &self.slices {
            let (got, slice_truncated) = slice.rget(start.clone(), end.clone(), max)?;
            truncated |= slice_truncated;
            merged.extend(got);
        }
        merged.sort_by(|a, b| a.0.cmp(&b.0));
        if merged.len() > max {
            merged.truncate(max);
            truncated = true;
        }
        Ok((merged, truncated))
    }
}

/// Only instantiated for a `'static` engine, since a protocol front end
/// stores this behind `Arc<dyn MemcacheOps>`. A long-running
/// server binary gets a `'static` `SliceStores` by leaking it once at
/// startup (see `src/bin/kvcore/main.rs`), the usual pattern for a
/// process-lifetime singleton.
impl MemcacheOps for KvStore<'static> {
    fn mc_get(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Timestamp)>> {
        self.get_value(key)
    }

    fn mc_rget(
        &self,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        max: usize,
    ) -> Result<(Vec<(Vec<u8>, Value, Timestamp)>, bool)> {
        self.rget_all(start, end, max)
    }

    fn mc_set(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome> {
        self.set(key, value)
    }

    fn mc_add(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome> {
        self.add(key, value)
    }

    fn mc_replace(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome> {
        self.replace(key, value)
    }

    fn mc_append(&self, key: &[u8], suffix: Vec<u8>) -> Result<Outcome> {
        self.append(key, suffix)
    }

    fn mc_prepend(&self, key: &[u8], prefix: Vec<u8>) -> Result<Outcome> {
        self.prepend(key, prefix)
    }

    fn mc_cas(&self, key: &[u8], value: Vec<u8>, expected_cas: u64) -> Result<Outcome> {
        self.cas(key, value, expected_cas)
    }

    fn mc_incr(&self, key: &[u8], delta: u64) -> Result<Outcome> {
        self.incr(key, delta)
    }

    fn mc_decr(&self, key: &[u8], delta: u64) -> Result<Outcome> {
        self.decr(key, delta)
    }

    fn mc_delete(&self, key: &[u8]) -> Result<Outcome> {
        self.delete(key)
    }

    fn mc_stats(&self) -> Vec<(String, String)> {
        vec![
            ("version".to_string(), ENGINE_VERSION.to_string()),
            ("num_slices".to_string(), self.num_slices().to_string()),
        ]
    }

    fn mc_version(&self) -> &'static str {
        ENGINE_VERSION
    }
}

fn clone_btree_config(config: &BtreeConfig) -> BtreeConfig {
    BtreeConfig {
        max_leaf_entries: config.max_leaf_entries,
        max_internal_entries: config.max_internal_entries,
        max_inline_value: config.max_inline_value,
        blob_chunk_size: config.blob_chunk_size,
        delete_queue_depth: config.delete_queue_depth,
        cache_capacity_frames: config.cache_capacity_frames,
        rget_max_chunk_size: config.rget_max_chunk_size,
    }
}

#[cfg(test)]
#[path = "kv_test.rs"]
mod kv_test;
