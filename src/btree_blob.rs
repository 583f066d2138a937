//! Auxiliary blob tree for large values. A value too big to fit inline in a leaf entry is chunked into
//! `blob_blocksize` pieces and written as a singly-linked chain of blocks
//! through the block store directly, bypassing the buffer cache since
//! blobs are read/written once per access rather than hot-looped like
//! B-tree nodes.

use crate::error::{Error, Result};
use crate::store::Store;

struct ChunkHeader {
    next: u64,
    len: u32,
}

const HEADER_LEN: usize = 12;

fn encode_chunk(next: u64, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + data.len());
    buf.extend_from_slice(&next.to_be_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
    buf
}

fn decode_chunk(buf: &[u8]) -> Result<(ChunkHeader, &[u8])> {
    if buf.len() < HEADER_LEN {
        return Err(Error::DecodeFail("blob chunk: short header".to_string()));
    }
    let next = u64::from_be_bytes(buf[0..8].try_into().unwrap());
    let len = u32::from_be_bytes(buf[8..12].try_into().unwrap());
    let data = &buf[HEADER_LEN..];
    if data.len() != len as usize {
        return Err(Error::Corruption("blob chunk: length mismatch".to_string()));
    }
    Ok((ChunkHeader { next, len }, data))
}

/// Write `value` as a chunk chain, returning the root block id.
pub fn write_blob(store: &Store, value: &[u8], chunk_size: usize) -> Result<u64> {
    if value.is_empty() {
        return store.block_write(&encode_chunk(0, &[]));
    }
    let chunk_size = chunk_size.max(1);
    let mut next = 0u64;
    for chunk in value.chunks(chunk_size).rev() {
        let encoded = encode_chunk(next, chunk);
        next = store.block_write(&encoded)?;
    }
    Ok(next)
}

/// Read the full value back out of its chunk chain.
pub fn read_blob(store: &Store, root_block: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut block_id = root_block;
    loop {
        let raw = store.block_read(block_id)?;
        let (header, data) = decode_chunk(&raw)?;
        out.extend_from_slice(data);
        if header.next == 0 {
            break;
        }
        block_id = header.next;
    }
    Ok(out)
}

/// Free every block in the chain.
pub fn free_blob(store: &Store, root_block: u64) -> Result<()> {
    let mut block_id = root_block;
    loop {
        let raw = store.block_read(block_id)?;
        let (header, _) = decode_chunk(&raw)?;
        store.free(block_id)?;
        if header.next == 0 {
            break;
        }
        block_id = header.next;
    }
    Ok(())
}

#[cfg(test)]
#[path = "btree_blob_test.rs"]
mod btree_blob_test;
