//! Block store / serializer: ties the static header, metablock ring, LBA
//! index, extent manager and block I/O together into the
//! `index_read`/`index_write`/`block_read`/`block_write` contract.
//! "Multiplexing" (spreading traffic across more than one
//! underlying file) is modeled as `N` independent [`BlockIo`] backends
//! selected by extent id modulo `N`, the same shard-by-index approach
//! [`crate::store_lba::LbaIndex`] uses for its lanes.

use std::fs::File;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::diskio::Disk;
use crate::error::{Error, Result};
use crate::store_block::{open_backing_file, BlockIo};
use crate::store_extent::ExtentManager;
use crate::store_gc::{Gc, GcReport};
use crate::store_header::StaticHeader;
use crate::store_lba::{LbaIndex, PhysicalAddr};
use crate::store_metablock::{MetaBlock, Ring};
use crate::traits::Serialize;
use crate::util::now_us;

pub struct StoreConfig {
    pub dir: PathBuf,
    pub block_size: u32,
    pub extent_capacity: u64,
    pub num_lanes: usize,
    pub num_files: usize,
    pub gc_high_ratio: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            dir: PathBuf::from("."),
            block_size: 4096,
            extent_capacity: 4 * 1024 * 1024,
            num_lanes: 8,
            num_files: 1,
            gc_high_ratio: 85,
        }
    }
}

/// One multiplexed backing file plus its own extent manager.
struct Proxy {
    blocks: BlockIo,
    extents: ExtentManager,
}

pub struct Store {
    header: StaticHeader,
    ring: std::sync::Mutex<Ring>,
    lba: LbaIndex,
    proxies: Vec<Proxy>,
    gc_high_ratio: usize,
    /// Held exclusive for the `Store`'s lifetime; released automatically
    /// when the file descriptor closes on drop. Guards against two
    /// processes opening the same directory's files concurrently.
    _lock: File,
}

impl Store {
    pub fn create(config: StoreConfig) -> Result<Store> {
        std::fs::create_dir_all(&config.dir)?;
        let header = StaticHeader::new(config.block_size, config.num_lanes as u32, now_us());
        Self::write_header(&config.dir, &header)?;
        Self::open_internal(config, header)
    }

    pub fn open(config: StoreConfig) -> Result<Store> {
        let header = Self::read_header(&config.dir)?;
        Self::open_internal(config, header)
    }

    fn lock_path(dir: &Path) -> PathBuf {
        dir.join("LOCK")
    }

    fn acquire_lock(dir: &Path) -> Result<File> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(Self::lock_path(dir))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| Error::InvalidFile(format!("{:?} is already open by another process", dir)))?;
        Ok(lock_file)
    }

    fn open_internal(config: StoreConfig, header: StaticHeader) -> Result<Store> {
        let lock = Self::acquire_lock(&config.dir)?;
        let proxies = (0..config.num_files.max(1))
            .map(|i| -> Result<Proxy> {
                let path = config.dir.join(format!("data.{}.blk", i));
                let file = open_backing_file(&path)?;
                let disk = Disk::open(file);
                Ok(Proxy {
                    blocks: BlockIo::new(disk, config.extent_capacity),
                    extents: ExtentManager::new(config.extent_capacity as u32),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Store {
            header,
            ring: std::sync::Mutex::new(Ring::new(16)),
            lba: LbaIndex::new(config.num_lanes),
            proxies,
            gc_high_ratio: config.gc_high_ratio,
            _lock: lock,
        })
    }

    fn header_path(dir: &Path) -> PathBuf {
        dir.join("header.blk")
    }

    fn write_header(dir: &Path, header: &StaticHeader) -> Result<()> {
        let mut buf = Vec::new();
        header.encode(&mut buf);
        std::fs::write(Self::header_path(dir), buf)?;
        Ok(())
    }

    fn read_header(dir: &Path) -> Result<StaticHeader> {
        let buf = std::fs::read(Self::header_path(dir))?;
        let mut header = StaticHeader::new(0, 0, 0);
        header.decode(&buf)?;
        Ok(header)
    }

    fn proxy_for(&self, extent_hint: u64) -> &Proxy {
        &self.proxies[(extent_hint as usize) % self.proxies.len()]
    }

    /// Allocate a fresh block id and write its encoded content.
    pub fn block_write(&self, data: &[u8]) -> Result<u64> {
        let id = self.lba.alloc_id();
        let proxy = self.proxy_for(id);
        let addr = proxy.blocks.write(&proxy.extents, data)?;
        self.lba.insert(id, addr);
        Ok(id)
    }

    /// Overwrite the content addressed by an existing id: writes a new
    /// physical block and atomically repoints the LBA entry, freeing the
    /// old physical range.
    pub fn index_write(&self, id: u64, data: &[u8]) -> Result<()> {
        let old = self.lba.lookup(id).ok();
        let proxy = self.proxy_for(id);
        let addr = proxy.blocks.write(&proxy.extents, data)?;
        self.lba.insert(id, addr);
        if let Some(old_addr) = old {
            self.proxy_for(id).extents.record_free(old_addr.extent, old_addr.len);
        }
        Ok(())
    }

    pub fn block_read(&self, id: u64) -> Result<Vec<u8>> {
        let addr = self.lba.lookup(id)?;
        self.proxy_for(id).blocks.read(addr)
    }

    pub fn index_read(&self, id: u64) -> Result<PhysicalAddr> {
        self.lba.lookup(id)
    }

    pub fn free(&self, id: u64) -> Result<()> {
        match self.lba.remove(id) {
            Some(addr) => {
                self.proxy_for(id).extents.record_free(addr.extent, addr.len);
                Ok(())
            }
            None => Err(Error::InvalidBlockId(id)),
        }
    }

    /// Persist a new metablock ring entry pointing at `root_block`.
    pub fn checkpoint(&self, root_block: u64) -> Result<u64> {
        let mut ring = self.ring.lock().unwrap();
        let (idx, epoch) = ring.advance();
        let mb = MetaBlock {
            epoch,
            root_block,
            lba_index_block: 0,
            gc_watermark: 0,
        };
        ring.record(idx, mb);
        for proxy in &self.proxies {
            proxy.blocks.flush()?;
        }
        Ok(epoch)
    }

    pub fn current_root(&self) -> Option<u64> {
        self.ring.lock().unwrap().current().map(|mb| mb.root_block)
    }

    /// Run one GC pass over every multiplexed file.
    pub fn gc_pass(&self) -> Result<Vec<GcReport>> {
        self.proxies
            .iter()
            .map(|proxy| {
                Gc {
                    lba: &self.lba,
                    extents: &proxy.extents,
                    blocks: &proxy.blocks,
                    high_ratio: self.gc_high_ratio,
                }
                .run_once()
            })
            .collect()
    }

    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    pub fn store_id(&self) -> uuid::Uuid {
        self.header.store_id
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
