//! Bounded delete-queue ring buffer.
//! Every tombstone a delete op produces is also appended here so a lagging
//! replica's backfill can replay deletes it might otherwise miss once the
//! tombstoned leaf entry itself has been purged. Bounded depth means an
//! old-enough delete silently falls off the queue: a replica that falls
//! further behind than the queue depth needs a full backfill instead of a
//! replay.

use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct DeleteRecord {
    pub key: Vec<u8>,
    pub recency_us: u64,
}

pub struct DeleteQueue {
    depth: usize,
    entries: Mutex<VecDeque<DeleteRecord>>,
}

impl DeleteQueue {
    pub fn new(depth: usize) -> DeleteQueue {
        DeleteQueue {
            depth: depth.max(1),
            entries: Mutex::new(VecDeque::with_capacity(depth)),
        }
    }

    pub fn push(&self, record: DeleteRecord) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.depth {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Deletes recorded strictly after `since_us`, oldest first, for a
    /// backfill replay cursor. Returns `None` if `since_us` predates the
    /// oldest retained record (the caller must fall back to a full scan).
    pub fn replay_since(&self, since_us: u64) -> Option<Vec<DeleteRecord>> {
        let entries = self.entries.lock().unwrap();
        if let Some(oldest) = entries.front() {
            if oldest.recency_us > since_us && since_us != 0 {
                return None;
            }
        }
        Some(
            entries
                .iter()
                .filter(|r| r.recency_us > since_us)
                .cloned()
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_bounds_depth() {
        let q = DeleteQueue::new(2);
        q.push(DeleteRecord {
            key: b"a".to_vec(),
            recency_us: 1,
        });
        q.push(DeleteRecord {
            key: b"b".to_vec(),
            recency_us: 2,
        });
        q.push(DeleteRecord {
            key: b"c".to_vec(),
            recency_us: 3,
        });
        assert_eq!(q.len(), 2);
        let all = q.replay_since(0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, b"b");
    }

    #[test]
    fn test_replay_since_excludes_too_old_cursor() {
        let q = DeleteQueue::new(1);
        q.push(DeleteRecord {
            key: b"a".to_vec(),
            recency_us: 100,
        });
        assert!(q.replay_since(50).is_none());
        assert_eq!(q.replay_since(100).unwrap().len(), 0);
    }
}
