//! Single-block read/write, checksummed. Physical layout is extent-relative: a block's file
//! offset is `extent_index * extent_capacity + offset`. Built directly on
//! [`crate::diskio::Disk`] rather than calling `std::fs::File` inline, so
//! every block access goes through the priority-fair I/O scheduler.

use std::sync::{Arc, Mutex};

use crate::diskio::{Completion, Disk, IoAccount, Op};
use crate::error::{Error, Result};
use crate::store_extent::ExtentManager;
use crate::store_lba::PhysicalAddr;
use crate::util::crc32;

pub struct BlockIo {
    disk: Disk,
    extent_capacity: u64,
}

impl BlockIo {
    pub fn new(disk: Disk, extent_capacity: u64) -> BlockIo {
        BlockIo {
            disk,
            extent_capacity,
        }
    }

    fn file_offset(&self, addr: PhysicalAddr) -> u64 {
        addr.extent as u64 * self.extent_capacity + addr.offset as u64
    }

    /// Write `data` (already serialized) into the current write extent,
    /// appending a trailing CRC, and return its physical address.
    pub fn write(&self, extents: &ExtentManager, data: &[u8]) -> Result<PhysicalAddr> {
        self.write_account(extents, data, IoAccount::FOREGROUND)
    }

    pub fn write_account(
        &self,
        extents: &ExtentManager,
        data: &[u8],
        account: IoAccount,
    ) -> Result<PhysicalAddr> {
        let extent = extents.current_write_extent();
        let stats = extents.stats(extent);
        let offset = stats.live_bytes;

        let mut framed = Vec::with_capacity(data.len() + 4);
        framed.extend_from_slice(data);
        framed.extend_from_slice(&crc32(data).to_be_bytes());

        let addr = PhysicalAddr {
            extent,
            offset,
            len: framed.len() as u32,
        };
        let fpos = self.file_offset(addr);

        let rx = self.disk.submit(
            account,
            Op::Write {
                fpos,
                data: framed,
            },
        )?;
        match rx.recv().map_err(|_| Error::Disconnected)?? {
            Completion::Write(_) => {}
            _ => return Err(Error::UnReachable("block write: wrong completion".to_string())),
        }
        extents.record_write(extent, addr.len);
        Ok(addr)
    }

    pub fn read(&self, addr: PhysicalAddr) -> Result<Vec<u8>> {
        self.read_account(addr, IoAccount::FOREGROUND)
    }

    pub fn read_account(&self, addr: PhysicalAddr, account: IoAccount) -> Result<Vec<u8>> {
        let fpos = self.file_offset(addr);
        let rx = self.disk.submit(
            account,
            Op::Read {
                fpos,
                len: addr.len as usize,
            },
        )?;
        let framed = match rx.recv().map_err(|_| Error::Disconnected)?? {
            Completion::Read(buf) => buf,
            _ => return Err(Error::UnReachable("block read: wrong completion".to_string())),
        };
        if framed.len() < 4 {
            return Err(Error::Corruption("block: short frame".to_string()));
        }
        let (body, tail) = framed.split_at(framed.len() - 4);
        let want = u32::from_be_bytes(tail.try_into().unwrap());
        if crc32(body) != want {
            return Err(Error::Corruption(format!(
                "block checksum mismatch at extent {} offset {}",
                addr.extent, addr.offset
            )));
        }
        Ok(body.to_vec())
    }

    pub fn flush(&self) -> Result<()> {
        let rx = self.disk.submit(IoAccount::FOREGROUND, Op::Flush)?;
        rx.recv().map_err(|_| Error::Disconnected)??;
        Ok(())
    }
}

pub fn open_backing_file(path: &std::path::Path) -> Result<Arc<Mutex<std::fs::File>>> {
    let fd = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    Ok(Arc::new(Mutex::new(fd)))
}

#[cfg(test)]
#[path = "store_block_test.rs"]
mod store_block_test;
