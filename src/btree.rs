//! Sharded B-tree slice. One `Btree` instance owns one
//! on-disk node chain inside a [`crate::store::Store`], mediated by a
//! [`crate::cache::Cache`] for node pages. Point ops descend root to leaf
//! tracking the path of internal node ids so an overflowing leaf/internal
//! node can be split and the new separator key propagated upward, the
//! same "split on the way back up" shape an in-memory red-black tree uses
//! for its rebalancing, adapted here to a disk-backed B+tree.
//!
//! Deletes run the same descent in reverse: an emptied leaf is unlinked
//! from its parent, and a leaf or internal node left below half-full is
//! merged with a sibling (or, when the combined size would overflow,
//! leveled across the shared separator instead). Of two candidate
//! siblings the key-smaller one always absorbs the key-larger one on a
//! merge, and the separator removed is always the one between them in
//! the parent, so the choice never depends on which side happened to be
//! scanned first.

use std::ops::Bound;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

use crate::btree_blob::{free_blob, read_blob, write_blob};
use crate::btree_delete_queue::{DeleteQueue, DeleteRecord};
use crate::btree_node::Node;
use crate::cache::{Cache, CacheConfig};
use crate::cache_frame::AcquireMode;
use crate::cache_snapshot::SnapshotId;
use crate::entry::{Entry, Timestamp, Value};
use crate::error::{Error, Result};
use crate::store::Store;
use crate::traits::Serialize;
use crate::util::now_us;

pub struct BtreeConfig {
    pub max_leaf_entries: usize,
    pub max_internal_entries: usize,
    pub max_inline_value: usize,
    pub blob_chunk_size: usize,
    pub delete_queue_depth: usize,
    pub cache_capacity_frames: usize,
    /// Hard cap, in value bytes, on a single `rget` response: a scan
    /// stops and reports `truncated` once it is hit even if `max` hasn't
    /// been reached yet.
    pub rget_max_chunk_size: usize,
}

impl Default for BtreeConfig {
    fn default() -> Self {
        BtreeConfig {
            max_leaf_entries: 64,
            max_internal_entries: 64,
            max_inline_value: 250,
            blob_chunk_size: 64 * 1024,
            delete_queue_depth: 4096,
            cache_capacity_frames: CacheConfig::default().capacity_frames,
            rget_max_chunk_size: 1024 * 1024,
        }
    }
}

/// Outcome of a mutating or point-read operation, matching the
/// memcached-derived operation contract
/// rather than a plain `Result`: "key already exists" is an expected
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Stored,
    NotStored,
    Exists,
    Deleted,
    NotFound,
    Found(Value, Timestamp),
}

enum LeafAction {
    Insert(Entry<Vec<u8>>),
    Remove,
    NoOp(Outcome),
}

/// One record of a backfill stream: either a live value, a single
/// tombstone, or a whole key range a receiver should delete because the
/// leaf that covered it hasn't been touched since it last synced.
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillEvent {
    Set(Vec<u8>, Value, Timestamp),
    Delete(Vec<u8>, u64),
    DeleteRange(Vec<u8>, Vec<u8>),
}

pub struct Btree<'s> {
    store: &'s Store,
    cache: Cache<'s>,
    root: AtomicU64,
    config: BtreeConfig,
    pub delete_queue: DeleteQueue,
    write_lock: Mutex<()>,
}

impl<'s> Btree<'s> {
    pub fn create(store: &'s Store, config: BtreeConfig) -> Btree<'s> {
        let delete_queue = DeleteQueue::new(config.delete_queue_depth);
        let cache = Cache::new(store, cache_config_for(&config));
        Btree {
            store,
            cache,
            root: AtomicU64::new(0),
            config,
            delete_queue,
            write_lock: Mutex::new(()),
        }
    }

    /// Attach to an already-checkpointed root.
    pub fn open(store: &'s Store, config: BtreeConfig, root: u64) -> Btree<'s> {
        let delete_queue = DeleteQueue::new(config.delete_queue_depth);
        let cache = Cache::new(store, cache_config_for(&config));
        Btree {
            store,
            cache,
            root: AtomicU64::new(root),
            config,
            delete_queue,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root_block(&self) -> u64 {
        self.root.load(Ordering::Acquire)
    }

    pub fn begin_snapshot(&self) -> SnapshotId {
        self.cache.begin_snapshot()
    }

    pub fn release_snapshot(&self, snap: SnapshotId) {
        self.cache.release_snapshot(snap)
    }

    /// Flush every dirty cached node back to the block store, then record
    /// a metablock pointing at `root`. Node mutations only ever touch the
    /// cache; a checkpoint is what makes them durable, so
    /// every call site that would otherwise call `Store::checkpoint`
    /// directly goes through here instead.
    fn checkpoint(&self, root: u64) -> Result<u64> {
        self.cache.writeback_all()?;
        self.store.checkpoint(root)
    }

    fn load_node(&self, id: u64) -> Result<Node> {
        self.load_node_for(id, None)
    }

    fn load_node_for(&self, id: u64, snap: Option<SnapshotId>) -> Result<Node> {
        let bytes = match snap {
            Some(s) => self.cache.acquire_snapshot(id, s)?,
            None => self.cache.acquire(id, AcquireMode::ReadShared)?,
        };
        let mut node = Node::default();
        node.decode(&bytes)?;
        Ok(node)
    }

    fn store_existing_node(&self, id: u64, node: &Node) -> Result<()> {
        let mut buf = Vec::new();
        node.encode(&mut buf);
        self.cache.write_whole(id, buf)
    }

    fn store_new_node(&self, node: &Node) -> Result<u64> {
        let mut buf = Vec::new();
        node.encode(&mut buf);
        self.store.block_write(&buf)
    }

    fn resolve_value(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Inline(v) => Ok(v.clone()),
            Value::Blob { root_block, .. } => read_blob(self.store, *root_block),
        }
    }

    fn make_value(&self, bytes: Vec<u8>) -> Result<Value> {
        if bytes.len() <= self.config.max_inline_value {
            Ok(Value::Inline(bytes))
        } else {
            let root = write_blob(self.store, &bytes, self.config.blob_chunk_size)?;
            Ok(Value::Blob {
                root_block: root,
                len: bytes.len() as u64,
            })
        }
    }

    /// Descend from root to the leaf that would contain `key`, returning
    /// the leaf id and the path of internal node ids above it (root
    /// first).
    fn descend(&self, key: &[u8]) -> Result<(u64, Vec<u64>)> {
        self.descend_for(key, None)
    }

    fn descend_for(&self, key: &[u8], snap: Option<SnapshotId>) -> Result<(u64, Vec<u64>)> {
        let mut path = Vec::new();
        let mut cur = self.root.load(Ordering::Acquire);
        loop {
            let node = self.load_node_for(cur, snap)?;
            match node {
                Node::Leaf { .. } => return Ok((cur, path)),
                Node::Internal { keys, children, .. } => {
                    let idx = keys.partition_point(|k| k.as_slice() <= key);
                    path.push(cur);
                    cur = children[idx];
                }
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Outcome> {
        self.get_at(key, None)
    }

    /// Point read as of an open snapshot: descends through
    /// [`Cache::acquire_snapshot`] rather than a live read, so it keeps
    /// seeing the generation of every block that existed when the
    /// snapshot was taken, even if a writer has since overwritten it.
    pub fn get_snapshot(&self, key: &[u8], snap: SnapshotId) -> Result<Outcome> {
        self.get_at(key, Some(snap))
    }

    fn get_at(&self, key: &[u8], snap: Option<SnapshotId>) -> Result<Outcome> {
        if self.root_block() == 0 {
            return Ok(Outcome::NotFound);
        }
        let (leaf_id, _) = self.descend_for(key, snap)?;
        let node = self.load_node_for(leaf_id, snap)?;
        let entries = match node {
            Node::Leaf { entries, .. } => entries,
            Node::Internal { .. } => return Err(Error::InvalidTree("descend returned internal node".to_string())),
        };
        match entries.iter().find(|e| e.key == key) {
            Some(e) if e.deleted => Ok(Outcome::NotFound),
            Some(e) if e.is_expired(now_us()) => {
                if snap.is_none() {
                    self.expire(key, now_us())?;
                }
                Ok(Outcome::NotFound)
            }
            Some(e) => Ok(Outcome::Found(e.value.clone(), e.timestamp)),
            None => Ok(Outcome::NotFound),
        }
    }

    /// Drops an expired entry via the ordinary delete path (delete-queue
    /// record included) rather than silently dropping it from the leaf:
    /// a replica that last synced before the expiry still needs to learn
    /// the key is gone.
    fn expire(&self, key: &[u8], now: u64) -> Result<()> {
        self.mutate(key, now, |existing| match existing {
            Some(e) if !e.deleted => Ok(LeafAction::Remove),
            _ => Ok(LeafAction::NoOp(Outcome::NotFound)),
        })
        .map(|_| ())
    }

    /// Full value bytes, resolving through the blob tree if needed.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Timestamp)>> {
        match self.get(key)? {
            Outcome::Found(value, ts) => Ok(Some((self.resolve_value(&value)?, ts))),
            _ => Ok(None),
        }
    }

    /// Range scan over `[start, end]` under arbitrary bound kinds,
    /// skipping tombstoned entries, stopping once `max` pairs have been
    /// collected or `rget_max_chunk_size` value bytes have been
    /// accumulated. Returns the collected pairs plus whether the scan
    /// stopped early.
    pub fn rget(
        &self,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        max: usize,
    ) -> Result<(Vec<(Vec<u8>, Value, Timestamp)>, bool)> {
        let mut out = Vec::new();
        let mut chunk_bytes = 0usize;
        let mut truncated = false;
        if self.root_block() != 0 {
            self.rget_node(self.root_block(), &start, &end, max, &mut out, &mut chunk_bytes, &mut truncated)?;
        }
        Ok((out, truncated))
    }

    fn rget_node(
        &self,
        id: u64,
        start: &Bound<Vec<u8>>,
        end: &Bound<Vec<u8>>,
        max: usize,
        out: &mut Vec<(Vec<u8>, Value, Timestamp)>,
        chunk_bytes: &mut usize,
        truncated: &mut bool,
    ) -> Result<()> {
        if *truncated {
            return Ok(());
        }
        match self.load_node(id)? {
            Node::Leaf { entries, .. } => {
                for e in entries {
                    if *truncated {
                        break;
                    }
                    if !in_lower_bound(start, &e.key) || !in_upper_bound(end, &e.key) {
                        continue;
                    }
                    if e.deleted {
                        continue;
                    }
                    let value_len = e.value.len() as usize;
                    if out.len() >= max || *chunk_bytes + value_len > self.config.rget_max_chunk_size {
                        *truncated = true;
                        break;
                    }
                    *chunk_bytes += value_len;
                    out.push((e.key, e.value, e.timestamp));
                }
                Ok(())
            }
            Node::Internal { keys, children, .. } => {
                let lo = match start {
                    Bound::Included(k) | Bound::Excluded(k) => keys.partition_point(|key| key.as_slice() <= k.as_slice()),
                    Bound::Unbounded => 0,
                };
                for child in &children[lo..] {
                    if *truncated {
                        break;
                    }
                    self.rget_node(*child, start, end, max, out, chunk_bytes, truncated)?;
                }
                Ok(())
            }
        }
    }

    fn mutate<F>(&self, key: &[u8], now_us: u64, f: F) -> Result<Outcome>
    where
        F: FnOnce(Option<&Entry<Vec<u8>>>) -> Result<LeafAction>,
    {
        let _guard = self.write_lock.lock().unwrap();

        if self.root_block() == 0 {
            let action = f(None)?;
            let entry = match action {
                LeafAction::Insert(entry) => entry,
                LeafAction::Remove => return Ok(Outcome::NotFound),
                LeafAction::NoOp(outcome) => return Ok(outcome),
            };
            let leaf = Node::Leaf {
                entries: vec![entry],
                touched_us: now_us,
            };
            let id = self.store_new_node(&leaf)?;
            self.root.store(id, Ordering::Release);
            self.checkpoint(id)?;
            return Ok(Outcome::Stored);
        }

        let (leaf_id, path) = self.descend(key)?;
        let mut entries = match self.load_node(leaf_id)? {
            Node::Leaf { entries, .. } => entries,
            Node::Internal { .. } => return Err(Error::InvalidTree("expected leaf".to_string())),
        };

        let idx = entries.iter().position(|e| e.key == key);
        let action = f(idx.map(|i| &entries[i]))?;

        let mut removed = false;
        let outcome = match action {
            LeafAction::Insert(entry) => {
                match idx {
                    Some(i) => entries[i] = entry,
                    None => {
                        let pos = entries.partition_point(|e| e.key.as_slice() < key);
                        entries.insert(pos, entry);
                    }
                }
                Outcome::Stored
            }
            LeafAction::Remove => {
                if let Some(i) = idx {
                    let removed_entry = entries.remove(i);
                    self.delete_queue.push(DeleteRecord {
                        key: removed_entry.key,
                        recency_us: now_us,
                    });
                    if let Value::Blob { root_block, .. } = removed_entry.value {
                        free_blob(self.store, root_block)?;
                    }
                    removed = true;
                    Outcome::Deleted
                } else {
                    return Ok(Outcome::NotFound);
                }
            }
            LeafAction::NoOp(outcome) => return Ok(outcome),
        };

        if entries.is_empty() && !path.is_empty() {
            self.store.free(leaf_id).ok();
            self.remove_child(&path, leaf_id)?;
            return Ok(outcome);
        }

        if entries.len() > self.config.max_leaf_entries {
            self.split_leaf(leaf_id, entries, path, now_us)?;
        } else if removed && !path.is_empty() && entries.len() < self.config.max_leaf_entries / 2 {
            self.rebalance_leaf(leaf_id, entries, path, now_us)?;
        } else {
            self.store_existing_node(leaf_id, &Node::Leaf { entries, touched_us: now_us })?;
            self.propagate_recency(&path, leaf_id, now_us)?;
            self.checkpoint(self.root_block())?;
        }

        Ok(outcome)
    }

    fn split_leaf(&self, leaf_id: u64, entries: Vec<Entry<Vec<u8>>>, path: Vec<u64>, touched_us: u64) -> Result<()> {
        let mid = entries.len() / 2;
        let right_entries = entries[mid..].to_vec();
        let left_entries = entries[..mid].to_vec();
        let separator = right_entries[0].key.clone();

        self.store_existing_node(leaf_id, &Node::Leaf { entries: left_entries, touched_us })?;
        let right_id = self.store_new_node(&Node::Leaf { entries: right_entries, touched_us })?;

        self.insert_into_parent(path, separator, leaf_id, touched_us, right_id, touched_us)
    }

    /// Insert `(separator, new_child)` into the last internal node on
    /// `path`, creating a new root if `path` is empty (the leaf/root
    /// just split). `left_touched`/`right_touched` are the post-split
    /// recency of the left (pre-existing) and right (new) child, used to
    /// keep the parent's `child_recency` mirror current.
    fn insert_into_parent(
        &self,
        mut path: Vec<u64>,
        separator: Vec<u8>,
        left_id: u64,
        left_touched: u64,
        new_child: u64,
        new_touched: u64,
    ) -> Result<()> {
        let parent_id = match path.pop() {
            Some(id) => id,
            None => {
                let old_root = self.root_block();
                let new_root = Node::Internal {
                    keys: vec![separator],
                    children: vec![old_root, new_child],
                    child_recency: vec![left_touched, new_touched],
                };
                let id = self.store_new_node(&new_root)?;
                self.root.store(id, Ordering::Release);
                self.checkpoint(id)?;
                return Ok(());
            }
        };

        let (mut keys, mut children, mut child_recency) = match self.load_node(parent_id)? {
            Node::Internal { keys, children, child_recency } => (keys, children, child_recency),
            Node::Leaf { .. } => return Err(Error::InvalidTree("expected internal node".to_string())),
        };

        if let Some(left_idx) = children.iter().position(|c| *c == left_id) {
            child_recency[left_idx] = left_touched;
        }

        let pos = keys.partition_point(|k| k.as_slice() < separator.as_slice());
        keys.insert(pos, separator);
        children.insert(pos + 1, new_child);
        child_recency.insert(pos + 1, new_touched);

        if keys.len() <= self.config.max_internal_entries {
            self.store_existing_node(parent_id, &Node::Internal { keys, children, child_recency: child_recency.clone() })?;
            if path.is_empty() {
                self.checkpoint(self.root_block())?;
            } else {
                let touched = *child_recency.iter().max().unwrap_or(&0);
                self.propagate_recency(&path, parent_id, touched)?;
                self.checkpoint(self.root_block())?;
            }
            return Ok(());
        }

        let mid = keys.len() / 2;
        let up_separator = keys[mid].clone();
        let right_keys = keys[mid + 1..].to_vec();
        let right_children = children[mid + 1..].to_vec();
        let right_recency = child_recency[mid + 1..].to_vec();
        let left_keys = keys[..mid].to_vec();
        let left_children = children[..mid + 1].to_vec();
        let left_recency = child_recency[..mid + 1].to_vec();

        let left_touched2 = *left_recency.iter().max().unwrap_or(&0);
        let right_touched2 = *right_recency.iter().max().unwrap_or(&0);

        self.store_existing_node(
            parent_id,
            &Node::Internal {
                keys: left_keys,
                children: left_children,
                child_recency: left_recency,
            },
        )?;
        let right_id = self.store_new_node(&Node::Internal {
            keys: right_keys,
            children: right_children,
            child_recency: right_recency,
        })?;

        self.insert_into_parent(path, up_separator, parent_id, left_touched2, right_id, right_touched2)
    }

    /// Pushes `touched_us` up through every ancestor's `child_recency`
    /// mirror for `child_id`, stopping as soon as an ancestor already
    /// records a recency at least as new (the mirror is monotonic, so
    /// nothing above that point needs rewriting).
    fn propagate_recency(&self, path: &[u64], child_id: u64, touched_us: u64) -> Result<()> {
        let mut current_child = child_id;
        let mut current_touched = touched_us;
        for &parent_id in path.iter().rev() {
            let (keys, children, mut child_recency) = match self.load_node(parent_id)? {
                Node::Internal { keys, children, child_recency } => (keys, children, child_recency),
                Node::Leaf { .. } => return Err(Error::InvalidTree("expected internal node".to_string())),
            };
            let idx = match children.iter().position(|c| *c == current_child) {
                Some(idx) => idx,
                None => return Err(Error::InvalidTree("child missing from parent".to_string())),
            };
            if child_recency[idx] >= current_touched {
                return Ok(());
            }
            child_recency[idx] = current_touched;
            let node_touched = *child_recency.iter().max().unwrap_or(&0);
            self.store_existing_node(parent_id, &Node::Internal { keys, children, child_recency })?;
            current_child = parent_id;
            current_touched = node_touched;
        }
        Ok(())
    }

    /// Remove `child` from the last internal node on `path` after it was
    /// emptied by a delete. May cascade into collapsing the parent away
    /// (it degenerated to a single child) or into merging/leveling it
    /// with a sibling if removing `child` left it underfull.
    fn remove_child(&self, path: &[u64], child: u64) -> Result<()> {
        let parent_id = *path.last().unwrap();
        let (mut keys, mut children, mut child_recency) = match self.load_node(parent_id)? {
            Node::Internal { keys, children, child_recency } => (keys, children, child_recency),
            Node::Leaf { .. } => return Err(Error::InvalidTree("expected internal node".to_string())),
        };
        if let Some(idx) = children.iter().position(|c| *c == child) {
            children.remove(idx);
            child_recency.remove(idx);
            if idx > 0 {
                keys.remove(idx - 1);
            } else if !keys.is_empty() {
                keys.remove(0);
            }
        }

        let ancestors = &path[..path.len() - 1];

        if children.len() == 1 && keys.is_empty() {
            if ancestors.is_empty() {
                self.root.store(children[0], Ordering::Release);
                self.checkpoint(children[0])?;
            } else {
                self.store.free(parent_id).ok();
                self.remove_child(ancestors, parent_id)?;
            }
            return Ok(());
        }

        if !ancestors.is_empty() && keys.len() < self.config.max_internal_entries / 2 {
            return self.rebalance_internal(parent_id, keys, children, child_recency, ancestors);
        }

        let touched = *child_recency.iter().max().unwrap_or(&0);
        self.store_existing_node(parent_id, &Node::Internal { keys, children, child_recency })?;
        if ancestors.is_empty() {
            self.checkpoint(self.root_block())?;
        } else {
            self.propagate_recency(ancestors, parent_id, touched)?;
            self.checkpoint(self.root_block())?;
        }
        Ok(())
    }

    /// Restores the half-full rule for `leaf_id` after a delete left it
    /// underfull: merges it with whichever leaf sibling is adjacent
    /// (preferring the right one) if the combined entries still fit one
    /// leaf, else redistributes entries across the shared separator.
    fn rebalance_leaf(&self, leaf_id: u64, entries: Vec<Entry<Vec<u8>>>, path: Vec<u64>, touched_us: u64) -> Result<()> {
        let parent_id = *path.last().unwrap();
        let (mut keys, mut children, mut child_recency) = match self.load_node(parent_id)? {
            Node::Internal { keys, children, child_recency } => (keys, children, child_recency),
            Node::Leaf { .. } => return Err(Error::InvalidTree("expected internal node".to_string())),
        };
        let idx = match children.iter().position(|c| *c == leaf_id) {
            Some(idx) => idx,
            None => return Err(Error::InvalidTree("leaf missing from parent".to_string())),
        };

        let sib_idx = if idx + 1 < children.len() {
            Some(idx + 1)
        } else if idx > 0 {
            Some(idx - 1)
        } else {
            None
        };

        let Some(sib_idx) = sib_idx else {
            // only child under this parent: nothing to merge or level with.
            self.store_existing_node(leaf_id, &Node::Leaf { entries, touched_us })?;
            self.propagate_recency(&path, leaf_id, touched_us)?;
            self.checkpoint(self.root_block())?;
            return Ok(());
        };

        let sib_id = children[sib_idx];
        let (sib_entries, sib_touched) = match self.load_node(sib_id)? {
            Node::Leaf { entries, touched_us } => (entries, touched_us),
            Node::Internal { .. } => return Err(Error::InvalidTree("expected leaf sibling".to_string())),
        };

        let sib_is_right = sib_idx > idx;
        let (left_id, mut left_entries, right_id, mut right_entries, separator_idx) = if sib_is_right {
            (leaf_id, entries, sib_id, sib_entries, idx)
        } else {
            (sib_id, sib_entries, leaf_id, entries, sib_idx)
        };

        let ancestors = &path[..path.len() - 1];

        if left_entries.len() + right_entries.len() <= self.config.max_leaf_entries {
            // merge: the key-smaller sibling absorbs the key-larger one,
            // and the separator between them in the parent is dropped.
            left_entries.append(&mut right_entries);
            let merged_touched = touched_us.max(sib_touched);
            self.store_existing_node(left_id, &Node::Leaf { entries: left_entries, touched_us: merged_touched })?;
            self.store.free(right_id).ok();

            keys.remove(separator_idx);
            children.remove(separator_idx + 1);
            child_recency.remove(separator_idx + 1);
            if let Some(left_parent_idx) = children.iter().position(|c| *c == left_id) {
                child_recency[left_parent_idx] = merged_touched;
            }

            if children.len() == 1 && keys.is_empty() {
                if ancestors.is_empty() {
                    self.root.store(children[0], Ordering::Release);
                    self.checkpoint(children[0])?;
                } else {
                    self.store.free(parent_id).ok();
                    self.remove_child(ancestors, parent_id)?;
                }
                return Ok(());
            }
            if !ancestors.is_empty() && keys.len() < self.config.max_internal_entries / 2 {
                return self.rebalance_internal(parent_id, keys, children, child_recency, ancestors);
            }
            self.store_existing_node(parent_id, &Node::Internal { keys, children, child_recency })?;
            if ancestors.is_empty() {
                self.checkpoint(self.root_block())?;
            } else {
                self.propagate_recency(ancestors, parent_id, merged_touched)?;
                self.checkpoint(self.root_block())?;
            }
            Ok(())
        } else {
            // level: move entries across the separator to restore
            // half-full without removing either sibling.
            let total = left_entries.len() + right_entries.len();
            let target_left = total / 2;
            while left_entries.len() > target_left {
                let moved = left_entries.pop().unwrap();
                right_entries.insert(0, moved);
            }
            while left_entries.len() < target_left {
                let moved = right_entries.remove(0);
                left_entries.push(moved);
            }
            let new_separator = right_entries[0].key.clone();
            let balanced_touched = touched_us.max(sib_touched);

            self.store_existing_node(left_id, &Node::Leaf { entries: left_entries, touched_us: balanced_touched })?;
            self.store_existing_node(right_id, &Node::Leaf { entries: right_entries, touched_us: balanced_touched })?;

            keys[separator_idx] = new_separator;
            if let Some(l) = children.iter().position(|c| *c == left_id) {
                child_recency[l] = balanced_touched;
            }
            if let Some(r) = children.iter().position(|c| *c == right_id) {
                child_recency[r] = balanced_touched;
            }

            self.store_existing_node(parent_id, &Node::Internal { keys, children, child_recency })?;
            if ancestors.is_empty() {
                self.checkpoint(self.root_block())?;
            } else {
                self.propagate_recency(ancestors, parent_id, balanced_touched)?;
                self.checkpoint(self.root_block())?;
            }
            Ok(())
        }
    }

    /// Same discipline as [`Self::rebalance_leaf`] one level up: restores
    /// the half-full rule for an internal node by merging it with a
    /// sibling (bringing the grandparent's separator down as a key in
    /// the merged node) or leveling a child across the separator.
    fn rebalance_internal(
        &self,
        node_id: u64,
        keys: Vec<Vec<u8>>,
        children: Vec<u64>,
        child_recency: Vec<u64>,
        path: &[u64],
    ) -> Result<()> {
        let parent_id = *path.last().unwrap();
        let (mut pkeys, mut pchildren, mut pchild_recency) = match self.load_node(parent_id)? {
            Node::Internal { keys, children, child_recency } => (keys, children, child_recency),
            Node::Leaf { .. } => return Err(Error::InvalidTree("expected internal node".to_string())),
        };
        let idx = match pchildren.iter().position(|c| *c == node_id) {
            Some(idx) => idx,
            None => return Err(Error::InvalidTree("node missing from parent".to_string())),
        };

        let sib_idx = if idx + 1 < pchildren.len() {
            Some(idx + 1)
        } else if idx > 0 {
            Some(idx - 1)
        } else {
            None
        };

        let grandparent = &path[..path.len() - 1];

        let Some(sib_idx) = sib_idx else {
            let touched = *child_recency.iter().max().unwrap_or(&0);
            self.store_existing_node(node_id, &Node::Internal { keys, children, child_recency })?;
            if grandparent.is_empty() {
                self.checkpoint(self.root_block())?;
            } else {
                self.propagate_recency(grandparent, node_id, touched)?;
                self.checkpoint(self.root_block())?;
            }
            return Ok(());
        };

        let sib_id = pchildren[sib_idx];
        let (sib_keys, sib_children, sib_child_recency) = match self.load_node(sib_id)? {
            Node::Internal { keys, children, child_recency } => (keys, children, child_recency),
            Node::Leaf { .. } => return Err(Error::InvalidTree("expected internal sibling".to_string())),
        };

        let sib_is_right = sib_idx > idx;
        let separator_idx = if sib_is_right { idx } else { sib_idx };
        let separator = pkeys[separator_idx].clone();

        let (
            left_id,
            mut left_keys,
            mut left_children,
            mut left_recency,
            right_id,
            mut right_keys,
            mut right_children,
            mut right_recency,
        ) = if sib_is_right {
            (node_id, keys, children, child_recency, sib_id, sib_keys, sib_children, sib_child_recency)
        } else {
            (sib_id, sib_keys, sib_children, sib_child_recency, node_id, keys, children, child_recency)
        };

        if left_children.len() + right_children.len() <= self.config.max_internal_entries + 1 {
            // merge: the grandparent's separator becomes a key in the
            // merged node, and is removed from the grandparent.
            left_keys.push(separator);
            left_keys.extend(right_keys);
            left_children.extend(right_children);
            left_recency.extend(right_recency);
            let merged_touched = *left_recency.iter().max().unwrap_or(&0);

            self.store_existing_node(
                left_id,
                &Node::Internal { keys: left_keys, children: left_children, child_recency: left_recency },
            )?;
            self.store.free(right_id).ok();

            pkeys.remove(separator_idx);
            pchildren.remove(separator_idx + 1);
            pchild_recency.remove(separator_idx + 1);
            if let Some(l) = pchildren.iter().position(|c| *c == left_id) {
                pchild_recency[l] = merged_touched;
            }

            if pchildren.len() == 1 && pkeys.is_empty() {
                if grandparent.is_empty() {
                    self.root.store(pchildren[0], Ordering::Release);
                    self.checkpoint(pchildren[0])?;
                } else {
                    self.store.free(parent_id).ok();
                    self.remove_child(grandparent, parent_id)?;
                }
                return Ok(());
            }
            if !grandparent.is_empty() && pkeys.len() < self.config.max_internal_entries / 2 {
                return self.rebalance_internal(parent_id, pkeys, pchildren, pchild_recency, grandparent);
            }
            self.store_existing_node(parent_id, &Node::Internal { keys: pkeys, children: pchildren, child_recency: pchild_recency })?;
            if grandparent.is_empty() {
                self.checkpoint(self.root_block())?;
            } else {
                self.propagate_recency(grandparent, parent_id, merged_touched)?;
                self.checkpoint(self.root_block())?;
            }
            Ok(())
        } else {
            // level: rotate one child (and the key bounding it) across
            // the separator to restore half-full without merging.
            if left_children.len() > right_children.len() {
                let moved_child = left_children.pop().unwrap();
                let moved_recency = left_recency.pop().unwrap();
                let moved_key = left_keys.pop().unwrap();
                right_children.insert(0, moved_child);
                right_recency.insert(0, moved_recency);
                right_keys.insert(0, separator);
                pkeys[separator_idx] = moved_key;
            } else {
                let moved_child = right_children.remove(0);
                let moved_recency = right_recency.remove(0);
                let moved_key = right_keys.remove(0);
                left_children.push(moved_child);
                left_recency.push(moved_recency);
                left_keys.push(separator);
                pkeys[separator_idx] = moved_key;
            }

            let left_touched = *left_recency.iter().max().unwrap_or(&0);
            let right_touched = *right_recency.iter().max().unwrap_or(&0);

            self.store_existing_node(left_id, &Node::Internal { keys: left_keys, children: left_children, child_recency: left_recency })?;
            self.store_existing_node(right_id, &Node::Internal { keys: right_keys, children: right_children, child_recency: right_recency })?;

            if let Some(l) = pchildren.iter().position(|c| *c == left_id) {
                pchild_recency[l] = left_touched;
            }
            if let Some(r) = pchildren.iter().position(|c| *c == right_id) {
                pchild_recency[r] = right_touched;
            }

            self.store_existing_node(parent_id, &Node::Internal { keys: pkeys, children: pchildren, child_recency: pchild_recency })?;
            if grandparent.is_empty() {
                self.checkpoint(self.root_block())?;
            } else {
                self.propagate_recency(grandparent, parent_id, left_touched.max(right_touched))?;
                self.checkpoint(self.root_block())?;
            }
            Ok(())
        }
    }

    pub fn set(&self, key: &[u8], bytes: Vec<u8>, timestamp: Timestamp) -> Result<Outcome> {
        self.set_with_exptime(key, bytes, timestamp, 0)
    }

    /// Like [`Self::set`] but attaches an absolute microsecond expiry;
    /// `0` means "never expires".
    pub fn set_with_exptime(&self, key: &[u8], bytes: Vec<u8>, timestamp: Timestamp, exptime: u64) -> Result<Outcome> {
        let value = self.make_value(bytes)?;
        self.mutate(key, timestamp.recency_us, |_existing| {
            Ok(LeafAction::Insert(Entry::with_exptime(key.to_vec(), value, timestamp, exptime)))
        })
    }

    pub fn add(&self, key: &[u8], bytes: Vec<u8>, timestamp: Timestamp) -> Result<Outcome> {
        let value = self.make_value(bytes)?;
        self.mutate(key, timestamp.recency_us, |existing| match existing {
            Some(e) if !e.deleted => Ok(LeafAction::NoOp(Outcome::NotStored)),
            _ => Ok(LeafAction::Insert(Entry::new(key.to_vec(), value, timestamp))),
        })
    }

    pub fn replace(&self, key: &[u8], bytes: Vec<u8>, timestamp: Timestamp) -> Result<Outcome> {
        let value = self.make_value(bytes)?;
        self.mutate(key, timestamp.recency_us, |existing| match existing {
            Some(e) if !e.deleted => Ok(LeafAction::Insert(Entry::new(key.to_vec(), value, timestamp))),
            _ => Ok(LeafAction::NoOp(Outcome::NotStored)),
        })
    }

    pub fn cas(&self, key: &[u8], bytes: Vec<u8>, expected_cas: u64, timestamp: Timestamp) -> Result<Outcome> {
        let value = self.make_value(bytes)?;
        self.mutate(key, timestamp.recency_us, |existing| match existing {
            Some(e) if e.deleted => Ok(LeafAction::NoOp(Outcome::NotFound)),
            Some(e) if e.cas() == expected_cas => {
                Ok(LeafAction::Insert(Entry::new(key.to_vec(), value, timestamp)))
            }
            Some(_) => Ok(LeafAction::NoOp(Outcome::Exists)),
            None => Ok(LeafAction::NoOp(Outcome::NotFound)),
        })
    }

    pub fn delete(&self, key: &[u8], timestamp: Timestamp) -> Result<Outcome> {
        self.mutate(key, timestamp.recency_us, |existing| match existing {
            Some(e) if !e.deleted => Ok(LeafAction::Remove),
            _ => Ok(LeafAction::NoOp(Outcome::NotFound)),
        })
    }

    pub fn append(&self, key: &[u8], suffix: Vec<u8>, timestamp: Timestamp) -> Result<Outcome> {
        self.concat(key, suffix, timestamp, false)
    }

    pub fn prepend(&self, key: &[u8], prefix: Vec<u8>, timestamp: Timestamp) -> Result<Outcome> {
        self.concat(key, prefix, timestamp, true)
    }

    fn concat(&self, key: &[u8], piece: Vec<u8>, timestamp: Timestamp, prepend: bool) -> Result<Outcome> {
        let current = match self.get_value(key)? {
            Some((bytes, _)) => bytes,
            None => return Ok(Outcome::NotStored),
        };
        let combined = if prepend {
            let mut v = piece;
            v.extend_from_slice(&current);
            v
        } else {
            let mut v = current;
            v.extend_from_slice(&piece);
            v
        };
        let value = self.make_value(combined)?;
        self.mutate(key, timestamp.recency_us, |existing| match existing {
            Some(e) if !e.deleted => Ok(LeafAction::Insert(Entry::new(key.to_vec(), value, timestamp))),
            _ => Ok(LeafAction::NoOp(Outcome::NotStored)),
        })
    }

    /// `incr`/`decr` operate on the ASCII decimal representation of the
    /// stored value, matching memcached's own convention.
    pub fn incr(&self, key: &[u8], delta: u64, timestamp: Timestamp) -> Result<Outcome> {
        self.arith(key, delta, timestamp, true)
    }

    pub fn decr(&self, key: &[u8], delta: u64, timestamp: Timestamp) -> Result<Outcome> {
        self.arith(key, delta, timestamp, false)
    }

    fn arith(&self, key: &[u8], delta: u64, timestamp: Timestamp, incr: bool) -> Result<Outcome> {
        let current = match self.get_value(key)? {
            Some((bytes, _)) => bytes,
            None => return Ok(Outcome::NotStored),
        };
        let n: u64 = std::str::from_utf8(&current)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| Error::InvalidFormat("value is not a decimal integer".to_string()))?;
        let updated = if incr {
            n.saturating_add(delta)
        } else {
            n.saturating_sub(delta)
        };
        let bytes = updated.to_string().into_bytes();
        let value = self.make_value(bytes)?;
        self.mutate(key, timestamp.recency_us, |existing| match existing {
            Some(e) if !e.deleted => Ok(LeafAction::Insert(Entry::new(key.to_vec(), value, timestamp))),
            _ => Ok(LeafAction::NoOp(Outcome::NotStored)),
        })
    }

    /// Timestamp-bounded backfill: traverses only subtrees whose
    /// `child_recency` mirror is newer than `since_us` (a subtree
    /// nothing has rewritten since then already matches what a receiver
    /// who last synced at `since_us` has), emitting for each visited
    /// leaf (a) every live entry newer than `since_us` as a `Set`, and
    /// (b) when the leaf's oldest tracked entry is at or before
    /// `since_us`, a `DeleteRange` spanning the leaf's key range so a
    /// receiver converges even on keys this leaf no longer holds.
    /// Tombstones still retained in the delete queue past that cutoff
    /// are appended as individual `Delete` events.
    pub fn backfill(&self, since_us: u64) -> Result<Vec<BackfillEvent>> {
        let mut out = Vec::new();
        if self.root_block() != 0 {
            self.backfill_node(self.root_block(), since_us, &mut out)?;
        }
        for record in self.delete_queue.replay_since(since_us).unwrap_or_default() {
            out.push(BackfillEvent::Delete(record.key, record.recency_us));
        }
        Ok(out)
    }

    fn backfill_node(&self, id: u64, since_us: u64, out: &mut Vec<BackfillEvent>) -> Result<()> {
        match self.load_node(id)? {
            Node::Leaf { entries, touched_us } => {
                if touched_us <= since_us {
                    return Ok(());
                }
                let oldest = entries.iter().map(|e| e.timestamp.recency_us).min();
                if matches!(oldest, Some(o) if o <= since_us) {
                    if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
                        out.push(BackfillEvent::DeleteRange(first.key.clone(), last.key.clone()));
                    }
                }
                for e in entries {
                    if !e.deleted && e.timestamp.recency_us > since_us {
                        out.push(BackfillEvent::Set(e.key, e.value, e.timestamp));
                    }
                }
                Ok(())
            }
            Node::Internal { children, child_recency, .. } => {
                for (child, recency) in children.iter().zip(child_recency.iter()) {
                    if *recency > since_us {
                        self.backfill_node(*child, since_us, out)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// `true` when `key` satisfies the lower bound (inclusive/exclusive/open).
fn in_lower_bound(bound: &Bound<Vec<u8>>, key: &[u8]) -> bool {
    match bound {
        Bound::Included(b) => key >= b.as_slice(),
        Bound::Excluded(b) => key > b.as_slice(),
        Bound::Unbounded => true,
    }
}

/// `true` when `key` satisfies the upper bound (inclusive/exclusive/open).
fn in_upper_bound(bound: &Bound<Vec<u8>>, key: &[u8]) -> bool {
    match bound {
        Bound::Included(b) => key <= b.as_slice(),
        Bound::Excluded(b) => key < b.as_slice(),
        Bound::Unbounded => true,
    }
}

fn cache_config_for(config: &BtreeConfig) -> CacheConfig {
    CacheConfig {
        capacity_frames: config.cache_capacity_frames,
        ..CacheConfig::default()
    }
}

#[cfg(test)]
#[path = "btree_test.rs"]
mod btree_test;
