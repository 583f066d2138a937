//! Engine-wide configuration: block sizes, cache budget, slice count and
//! fiber-pool sizing. Loaded from TOML, overridable from the CLI (see
//! `src/bin/kvcore/main.rs`), following the usual constants-plus-builder
//! shape (a `new` constructor plus `set_*` methods) generalized to cover
//! the whole engine rather than one B-tree.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize as SerdeSerialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, SerdeSerialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the block-store file(s).
    pub dir: String,
    /// Leaf node block size.
    pub leaf_blocksize: usize,
    /// Internal node block size.
    pub internal_blocksize: usize,
    /// Blob-tree block size for large values.
    pub blob_blocksize: usize,
    /// Number of B-tree slices keys are sharded across.
    pub num_slices: usize,
    /// Number of OS worker threads the fiber scheduler pins fibers to
    ///. Zero means "one per core".
    pub num_workers: usize,
    /// Buffer-cache budget in bytes.
    pub cache_size: usize,
    /// Fraction of `cache_size`, in percent, above which writeback starts
    /// throttling foreign acquisitions.
    pub writeback_high_ratio: usize,
    /// Fraction of live data, in percent, above which an extent becomes
    /// GC-eligible.
    pub gc_high_ratio: usize,
    /// Maximum inline value size before a value is routed to the blob
    /// tree.
    pub max_inline_value: usize,
    /// Depth of the bounded delete-queue ring buffer.
    pub delete_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            dir: ".".to_string(),
            leaf_blocksize: Self::LEAF_BLOCKSIZE,
            internal_blocksize: Self::INTERNAL_BLOCKSIZE,
            blob_blocksize: Self::BLOB_BLOCKSIZE,
            num_slices: Self::NUM_SLICES,
            num_workers: 0,
            cache_size: Self::CACHE_SIZE,
            writeback_high_ratio: 75,
            gc_high_ratio: 85,
            max_inline_value: Self::MAX_INLINE_VALUE,
            delete_queue_depth: Self::DELETE_QUEUE_DEPTH,
        }
    }
}

impl Config {
    pub const LEAF_BLOCKSIZE: usize = 4 * 1024;
    pub const INTERNAL_BLOCKSIZE: usize = 4 * 1024;
    pub const BLOB_BLOCKSIZE: usize = 64 * 1024;
    pub const NUM_SLICES: usize = 8;
    pub const CACHE_SIZE: usize = 128 * 1024 * 1024;
    pub const MAX_INLINE_VALUE: usize = 250;
    pub const DELETE_QUEUE_DEPTH: usize = 4096;

    pub fn new(dir: &str) -> Config {
        Config {
            dir: dir.to_string(),
            ..Default::default()
        }
    }

    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::InvalidFormat(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::EncodeFail(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn set_cache_size(mut self, n: usize) -> Self {
        self.cache_size = n;
        self
    }

    pub fn set_num_slices(mut self, n: usize) -> Self {
        self.num_slices = n.max(1);
        self
    }

    pub fn set_num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn resolved_num_workers(&self) -> usize {
        match self.num_workers {
            0 => num_cpus::get(),
            n => n,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_slices == 0 {
            return Err(Error::InvalidFormat("num_slices must be > 0".to_string()));
        }
        if self.max_inline_value >= self.leaf_blocksize {
            return Err(Error::InvalidFormat(
                "max_inline_value must be smaller than leaf_blocksize".to_string(),
            ));
        }
        if self.gc_high_ratio <= self.writeback_high_ratio {
            log::warn!(
                "gc_high_ratio ({}) <= writeback_high_ratio ({}), GC may starve writeback",
                self.gc_high_ratio,
                self.writeback_high_ratio
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
