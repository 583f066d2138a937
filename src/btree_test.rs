use super::*;
use crate::store::StoreConfig;
use std::ops::Bound;

fn fresh_store(name: &str) -> Store {
    let dir = std::env::temp_dir().join(name);
    std::fs::remove_dir_all(&dir).ok();
    Store::create(StoreConfig {
        dir,
        ..Default::default()
    })
    .unwrap()
}

fn ts(cas: u64) -> Timestamp {
    Timestamp::new(cas, cas)
}

#[test]
fn test_set_then_get() {
    let store = fresh_store("kvcore.btree.set_get");
    let tree = Btree::create(&store, BtreeConfig::default());

    assert_eq!(tree.set(b"k1", b"v1".to_vec(), ts(1)).unwrap(), Outcome::Stored);
    assert_eq!(
        tree.get_value(b"k1").unwrap(),
        Some((b"v1".to_vec(), ts(1)))
    );
    assert_eq!(tree.get(b"nope").unwrap(), Outcome::NotFound);
}

#[test]
fn test_add_respects_existing_key() {
    let store = fresh_store("kvcore.btree.add");
    let tree = Btree::create(&store, BtreeConfig::default());

    assert_eq!(tree.add(b"k", b"v1".to_vec(), ts(1)).unwrap(), Outcome::Stored);
    assert_eq!(
        tree.add(b"k", b"v2".to_vec(), ts(2)).unwrap(),
        Outcome::NotStored
    );
}

#[test]
fn test_replace_requires_existing_key() {
    let store = fresh_store("kvcore.btree.replace");
    let tree = Btree::create(&store, BtreeConfig::default());

    assert_eq!(
        tree.replace(b"k", b"v".to_vec(), ts(1)).unwrap(),
        Outcome::NotStored
    );
    tree.set(b"k", b"v1".to_vec(), ts(1)).unwrap();
    assert_eq!(
        tree.replace(b"k", b"v2".to_vec(), ts(2)).unwrap(),
        Outcome::Stored
    );
}

#[test]
fn test_cas_semantics() {
    let store = fresh_store("kvcore.btree.cas");
    let tree = Btree::create(&store, BtreeConfig::default());

    tree.set(b"k", b"v1".to_vec(), ts(5)).unwrap();
    assert_eq!(
        tree.cas(b"k", b"v2".to_vec(), 999, ts(6)).unwrap(),
        Outcome::Exists
    );
    assert_eq!(
        tree.cas(b"k", b"v2".to_vec(), 5, ts(6)).unwrap(),
        Outcome::Stored
    );
    assert_eq!(tree.get_value(b"k").unwrap().unwrap().0, b"v2".to_vec());
}

#[test]
fn test_delete_then_get_not_found() {
    let store = fresh_store("kvcore.btree.delete");
    let tree = Btree::create(&store, BtreeConfig::default());

    tree.set(b"k", b"v".to_vec(), ts(1)).unwrap();
    assert_eq!(tree.delete(b"k", ts(2)).unwrap(), Outcome::Deleted);
    assert_eq!(tree.get(b"k").unwrap(), Outcome::NotFound);
    assert_eq!(tree.delete(b"k", ts(3)).unwrap(), Outcome::NotFound);
}

#[test]
fn test_append_and_prepend() {
    let store = fresh_store("kvcore.btree.append_prepend");
    let tree = Btree::create(&store, BtreeConfig::default());

    tree.set(b"k", b"middle".to_vec(), ts(1)).unwrap();
    tree.append(b"k", b"-end".to_vec(), ts(2)).unwrap();
    tree.prepend(b"k", b"start-".to_vec(), ts(3)).unwrap();
    assert_eq!(
        tree.get_value(b"k").unwrap().unwrap().0,
        b"start-middle-end".to_vec()
    );
}

#[test]
fn test_incr_decr() {
    let store = fresh_store("kvcore.btree.incr_decr");
    let tree = Btree::create(&store, BtreeConfig::default());

    tree.set(b"counter", b"10".to_vec(), ts(1)).unwrap();
    tree.incr(b"counter", 5, ts(2)).unwrap();
    assert_eq!(tree.get_value(b"counter").unwrap().unwrap().0, b"15".to_vec());
    tree.decr(b"counter", 20, ts(3)).unwrap();
    // memcached semantics: decr saturates at zero rather than going negative.
    assert_eq!(tree.get_value(b"counter").unwrap().unwrap().0, b"0".to_vec());
}

#[test]
fn test_rget_half_open_range() {
    let store = fresh_store("kvcore.btree.rget");
    let tree = Btree::create(&store, BtreeConfig::default());
    for i in 0..20u8 {
        tree.set(&[b'k', i], vec![i], ts(i as u64)).unwrap();
    }
    let (got, truncated) = tree
        .rget(Bound::Included(vec![b'k', 5]), Bound::Excluded(vec![b'k', 10]), 1000)
        .unwrap();
    assert_eq!(got.len(), 5);
    assert_eq!(got[0].0, vec![b'k', 5]);
    assert!(!truncated);
}

#[test]
fn test_rget_closed_range_with_max() {
    let store = fresh_store("kvcore.btree.rget_closed");
    let tree = Btree::create(&store, BtreeConfig::default());
    for i in 0u32..300 {
        let key = format!("key{:04}", i).into_bytes();
        tree.set(&key, i.to_string().into_bytes(), ts(i as u64)).unwrap();
    }
    let (got, truncated) = tree
        .rget(
            Bound::Included(b"key0100".to_vec()),
            Bound::Included(b"key0199".to_vec()),
            1000,
        )
        .unwrap();
    assert_eq!(got.len(), 100);
    assert_eq!(got[0].0, b"key0100".to_vec());
    assert_eq!(got[got.len() - 1].0, b"key0199".to_vec());
    assert!(!truncated);
}

#[test]
fn test_rget_reports_truncated_at_max() {
    let store = fresh_store("kvcore.btree.rget_truncated");
    let tree = Btree::create(&store, BtreeConfig::default());
    for i in 0u32..50 {
        let key = format!("k{:03}", i).into_bytes();
        tree.set(&key, i.to_string().into_bytes(), ts(i as u64)).unwrap();
    }
    let (got, truncated) = tree.rget(Bound::Unbounded, Bound::Unbounded, 10).unwrap();
    assert_eq!(got.len(), 10);
    assert!(truncated);
}

#[test]
fn test_rget_reports_truncated_at_chunk_size() {
    let store = fresh_store("kvcore.btree.rget_chunk");
    let mut config = BtreeConfig::default();
    config.rget_max_chunk_size = 10;
    let tree = Btree::create(&store, config);
    for i in 0u32..5 {
        let key = format!("k{}", i).into_bytes();
        tree.set(&key, vec![0u8; 4], ts(i as u64)).unwrap();
    }
    let (got, truncated) = tree.rget(Bound::Unbounded, Bound::Unbounded, 1000).unwrap();
    assert!(got.len() < 5);
    assert!(truncated);
}

#[test]
fn test_split_on_overflow_keeps_all_keys_reachable() {
    let store = fresh_store("kvcore.btree.split");
    let mut config = BtreeConfig::default();
    config.max_leaf_entries = 4;
    config.max_internal_entries = 4;
    let tree = Btree::create(&store, config);

    for i in 0..100u32 {
        let key = i.to_be_bytes().to_vec();
        tree.set(&key, i.to_string().into_bytes(), ts(i as u64)).unwrap();
    }
    for i in 0..100u32 {
        let key = i.to_be_bytes().to_vec();
        let (v, _) = tree.get_value(&key).unwrap().unwrap();
        assert_eq!(v, i.to_string().into_bytes());
    }
}

#[test]
fn test_blob_value_roundtrip_through_btree() {
    let store = fresh_store("kvcore.btree.blob");
    let mut config = BtreeConfig::default();
    config.max_inline_value = 16;
    let tree = Btree::create(&store, config);

    let big = vec![0x42u8; 10_000];
    tree.set(b"big", big.clone(), ts(1)).unwrap();
    assert_eq!(tree.get_value(b"big").unwrap().unwrap().0, big);

    tree.delete(b"big", ts(2)).unwrap();
    assert_eq!(tree.get(b"big").unwrap(), Outcome::NotFound);
}

#[test]
fn test_random_keys_survive_interleaved_mutation() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let store = fresh_store("kvcore.btree.random");
    let mut config = BtreeConfig::default();
    config.max_leaf_entries = 8;
    config.max_internal_entries = 8;
    let tree = Btree::create(&store, config);

    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mut model = std::collections::BTreeMap::new();
    for i in 0..500u64 {
        let key = format!("k{}", rng.gen_range(0..100)).into_bytes();
        if rng.gen_bool(0.2) {
            tree.delete(&key, ts(i)).ok();
            model.remove(&key);
        } else {
            let value = format!("v{}-{}", i, rng.gen::<u16>()).into_bytes();
            tree.set(&key, value.clone(), ts(i)).unwrap();
            model.insert(key, value);
        }
    }

    for (key, value) in &model {
        let (got, _) = tree.get_value(key).unwrap().unwrap();
        assert_eq!(&got, value);
    }
}

#[test]
fn test_deletes_keep_non_root_nodes_half_full() {
    let store = fresh_store("kvcore.btree.rebalance");
    let mut config = BtreeConfig::default();
    config.max_leaf_entries = 8;
    config.max_internal_entries = 8;
    let tree = Btree::create(&store, config);

    for i in 0..200u32 {
        let key = i.to_be_bytes().to_vec();
        tree.set(&key, i.to_string().into_bytes(), ts(i as u64)).unwrap();
    }
    // delete all but a handful of keys: every surviving non-root leaf
    // must still meet the half-full rule rather than being left to rot
    // as a near-empty node.
    for i in 0..190u32 {
        let key = i.to_be_bytes().to_vec();
        tree.delete(&key, ts(1000 + i as u64)).unwrap();
    }

    fn check(tree: &Btree, id: u64, is_root: bool) -> usize {
        match tree.load_node(id).unwrap() {
            Node::Leaf { entries, .. } => {
                if !is_root {
                    assert!(
                        entries.len() * 2 >= tree.config.max_leaf_entries || entries.is_empty(),
                        "leaf {} underfull: {} entries",
                        id,
                        entries.len()
                    );
                }
                entries.len()
            }
            Node::Internal { keys, children, .. } => {
                if !is_root {
                    assert!(
                        keys.len() * 2 >= tree.config.max_internal_entries,
                        "internal {} underfull: {} keys",
                        id,
                        keys.len()
                    );
                }
                children.iter().map(|c| check(tree, *c, false)).sum()
            }
        }
    }
    if tree.root_block() != 0 {
        check(&tree, tree.root_block(), true);
    }

    for i in 190..200u32 {
        let key = i.to_be_bytes().to_vec();
        let (v, _) = tree.get_value(&key).unwrap().unwrap();
        assert_eq!(v, i.to_string().into_bytes());
    }
    for i in 0..190u32 {
        let key = i.to_be_bytes().to_vec();
        assert_eq!(tree.get(&key).unwrap(), Outcome::NotFound);
    }
}

#[test]
fn test_get_past_exptime_returns_not_found() {
    let store = fresh_store("kvcore.btree.exptime");
    let tree = Btree::create(&store, BtreeConfig::default());

    tree.set_with_exptime(b"k", b"v".to_vec(), ts(1), 1).unwrap();
    // exptime of 1us past the epoch is long past by the time this runs.
    assert_eq!(tree.get(b"k").unwrap(), Outcome::NotFound);
    assert_eq!(tree.get_value(b"k").unwrap(), None);
}

#[test]
fn test_set_with_exptime_zero_never_expires() {
    let store = fresh_store("kvcore.btree.no_exptime");
    let tree = Btree::create(&store, BtreeConfig::default());

    tree.set_with_exptime(b"k", b"v".to_vec(), ts(1), 0).unwrap();
    assert_eq!(tree.get_value(b"k").unwrap().unwrap().0, b"v".to_vec());
}

#[test]
fn test_snapshot_get_sees_pre_write_value() {
    let store = fresh_store("kvcore.btree.snapshot_get");
    let tree = Btree::create(&store, BtreeConfig::default());

    tree.set(b"k", b"v1".to_vec(), ts(1)).unwrap();
    let snap = tree.begin_snapshot();
    tree.set(b"k", b"v2".to_vec(), ts(2)).unwrap();

    assert_eq!(tree.get_snapshot(b"k", snap).unwrap(), Outcome::Found(Value::Inline(b"v1".to_vec()), ts(1)));
    assert_eq!(tree.get(b"k").unwrap(), Outcome::Found(Value::Inline(b"v2".to_vec()), ts(2)));
    tree.release_snapshot(snap);
}

#[test]
fn test_backfill_bounds_by_recency() {
    let store = fresh_store("kvcore.btree.backfill");
    let tree = Btree::create(&store, BtreeConfig::default());

    tree.set(b"old", b"1".to_vec(), ts(1)).unwrap();
    tree.set(b"new", b"2".to_vec(), ts(100)).unwrap();
    tree.delete(b"old", ts(150)).unwrap();

    let events = tree.backfill(50).unwrap();
    let sets: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BackfillEvent::Set(k, _, _) => Some(k.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(sets, vec![b"new".to_vec()]);

    let deletes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BackfillEvent::Delete(k, _) => Some(k.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deletes, vec![b"old".to_vec()]);
}

#[test]
fn test_backfill_emits_delete_range_for_untouched_leaf() {
    let store = fresh_store("kvcore.btree.backfill_range");
    let mut config = BtreeConfig::default();
    config.max_leaf_entries = 4;
    config.max_internal_entries = 4;
    let tree = Btree::create(&store, config);

    for i in 0u32..20 {
        let key = i.to_be_bytes().to_vec();
        tree.set(&key, i.to_string().into_bytes(), ts(i as u64)).unwrap();
    }

    let events = tree.backfill(1_000_000).unwrap();
    assert!(events.iter().any(|e| matches!(e, BackfillEvent::DeleteRange(_, _))));
    assert!(!events.iter().any(|e| matches!(e, BackfillEvent::Set(_, _, _))));
}

#[test]
fn test_backfill_skips_subtrees_untouched_since_cutoff() {
    let store = fresh_store("kvcore.btree.backfill_prune");
    let mut config = BtreeConfig::default();
    config.max_leaf_entries = 4;
    config.max_internal_entries = 4;
    let tree = Btree::create(&store, config);

    for i in 0u32..20 {
        let key = i.to_be_bytes().to_vec();
        tree.set(&key, i.to_string().into_bytes(), ts(i as u64)).unwrap();
    }

    // cutoff newer than every write: nothing has been touched since, so
    // the whole tree is pruned and there is nothing to report at all.
    let events = tree.backfill(u64::MAX - 1).unwrap();
    assert!(events.is_empty());
}
