//! Per-slice timestamper: every write receives a CAS and a recency
//! timestamp at entry to the slice, the same role a write-ahead log's
//! monotone sequence number plays for its appended ops. Reads never pass
//! through here.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::entry::Timestamp;
use crate::util::now_us;

pub struct Timestamper {
    cas: AtomicU64,
}

impl Timestamper {
    pub fn new() -> Timestamper {
        Timestamper {
            cas: AtomicU64::new(0),
        }
    }

    /// Assigns the next CAS in this slice's total write order, paired with
    /// the current wall-clock recency.
    pub fn next(&self) -> Timestamp {
        let cas = self.cas.fetch_add(1, Ordering::AcqRel) + 1;
        Timestamp::new(cas, now_us())
    }
}

impl Default for Timestamper {
    fn default() -> Timestamper {
        Timestamper::new()
    }
}
