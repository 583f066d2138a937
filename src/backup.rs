//! Import/export streaming. This crate has no separate memory tier, so
//! `export_slice`/`import_slice`
//! stream `(key, value, timestamp)` triples directly in/out of one
//! [`crate::kv_slice::Slice`], reusing the length-prefixed record shape
//! [`crate::btree_node`] already uses for on-disk entries rather than
//! inventing a new wire format.

use std::io::{Read, Write};

use log::info;

use crate::btree::BackfillEvent;
use crate::entry::Timestamp;
use crate::error::{Error, Result};
use crate::kv_slice::Slice;

fn write_bytes<W: Write>(out: &mut W, bytes: &[u8]) -> Result<()> {
    out.write_all(&(bytes.len() as u32).to_be_bytes())?;
    out.write_all(bytes)?;
    Ok(())
}

fn read_bytes<R: Read>(input: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match input.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::IoError(e)),
    }
    let n = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; n];
    input.read_exact(&mut buf)?;
    Ok(Some(buf))
}

/// Streams every live entry in `slice` out to `out` as
/// `key | value | cas:u64 | recency_us:u64`, returning the number of
/// entries written. Tombstoned entries are not exported; a fresh import
/// target starts from an empty tree so there is nothing to delete.
pub fn export_slice<W: Write>(slice: &Slice, out: &mut W) -> Result<u64> {
    let events = slice.backfill(0)?;
    let mut count = 0u64;
    for event in events {
        let (key, value, timestamp) = match event {
            BackfillEvent::Set(key, value, timestamp) => (key, value, timestamp),
            BackfillEvent::Delete(..) | BackfillEvent::DeleteRange(..) => continue,
        };
        let bytes = match value {
            crate::entry::Value::Inline(v) => v,
            crate::entry::Value::Blob { .. } => {
                match slice.get_value(&key)? {
                    Some((bytes, _)) => bytes,
                    None => continue,
                }
            }
        };
        write_bytes(out, &key)?;
        write_bytes(out, &bytes)?;
        out.write_all(&timestamp.cas.to_be_bytes())?;
        out.write_all(&timestamp.recency_us.to_be_bytes())?;
        count += 1;
    }
    info!("export_slice: wrote {} entries", count);
    Ok(count)
}

/// Reads entries written by [`export_slice`] back into `slice` via plain
/// `set` (picking up a fresh CAS from the target slice's own timestamper
/// rather than replaying the source's, since the two slices are
/// independent causal histories).
pub fn import_slice<R: Read>(slice: &Slice, input: &mut R) -> Result<u64> {
    let mut count = 0u64;
    loop {
        let key = match read_bytes(input)? {
            Some(k) => k,
            None => break,
        };
        let value = match read_bytes(input)? {
            Some(v) => v,
            None => return Err(Error::DecodeFail("backup: truncated record".to_string())),
        };
        let mut ts_buf = [0u8; 16];
        input.read_exact(&mut ts_buf)?;
        let _source_ts = Timestamp::new(
            u64::from_be_bytes(ts_buf[0..8].try_into().unwrap()),
            u64::from_be_bytes(ts_buf[8..16].try_into().unwrap()),
        );
        slice.set(&key, value)?;
        count += 1;
    }
    info!("import_slice: read {} entries", count);
    Ok(count)
}
