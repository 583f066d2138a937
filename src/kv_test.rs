use super::*;

fn fresh_engine_config(name: &str) -> Config {
    let dir = std::env::temp_dir().join(name);
    std::fs::remove_dir_all(&dir).ok();
    Config {
        dir: dir.to_string_lossy().into_owned(),
        num_slices: 4,
        ..Default::default()
    }
}

#[test]
fn test_keys_distribute_across_slices() {
    let config = fresh_engine_config("kvcore.kv.distribute");
    let stores = SliceStores::create(&config).unwrap();
    let engine = KvStore::create(&stores, &config);

    let mut seen = std::collections::HashSet::new();
    for i in 0..50u32 {
        let key = format!("key-{}", i);
        seen.insert(engine.slice_index_for(key.as_bytes()));
    }
    assert!(seen.len() > 1);
}

#[test]
fn test_set_get_routes_to_same_slice() {
    let config = fresh_engine_config("kvcore.kv.set_get");
    let stores = SliceStores::create(&config).unwrap();
    let engine = KvStore::create(&stores, &config);

    for i in 0..20u32 {
        let key = format!("k{}", i);
        engine.set(key.as_bytes(), i.to_string().into_bytes()).unwrap();
    }
    for i in 0..20u32 {
        let key = format!("k{}", i);
        let (v, _) = engine.get_value(key.as_bytes()).unwrap().unwrap();
        assert_eq!(v, i.to_string().into_bytes());
    }
}

#[test]
fn test_rget_all_merges_across_slices_sorted() {
    let config = fresh_engine_config("kvcore.kv.rget_all");
    let stores = SliceStores::create(&config).unwrap();
    let engine = KvStore::create(&stores, &config);

    for i in 0..30u8 {
        engine.set(&[b'a', i], vec![i]).unwrap();
    }
    let (got, truncated) = engine
        .rget_all(std::ops::Bound::Included(vec![b'a', 0]), std::ops::Bound::Unbounded, 1000)
        .unwrap();
    assert_eq!(got.len(), 30);
    assert!(!truncated);
    for w in got.windows(2) {
        assert!(w[0].0 <= w[1].0);
    }
}

#[test]
fn test_metadata_slice_is_independent_of_shards() {
    let config = fresh_engine_config("kvcore.kv.metadata");
    let stores = SliceStores::create(&config).unwrap();
    let engine = KvStore::create(&stores, &config);

    engine.metadata().set(b"replication_clock", b"42".to_vec()).unwrap();
    assert_eq!(engine.get(b"replication_clock").unwrap(), Outcome::NotFound);
    assert_eq!(
        engine.metadata().get_value(b"replication_clock").unwrap().unwrap().0,
        b"42".to_vec()
    );
}

#[test]
fn test_execute_ordered_respects_token_order() {
    let config = fresh_engine_config("kvcore.kv.ordered");
    let stores = SliceStores::create(&config).unwrap();
    let engine = KvStore::create(&stores, &config);

    let log = std::sync::Mutex::new(Vec::new());
    engine.execute_ordered(0, 0, || log.lock().unwrap().push(0));
    engine.execute_ordered(0, 1, || log.lock().unwrap().push(1));
    assert_eq!(*log.lock().unwrap(), vec![0, 1]);
}

#[test]
fn test_reopen_recovers_slice_roots() {
    let config = fresh_engine_config("kvcore.kv.reopen");
    {
        let stores = SliceStores::create(&config).unwrap();
        let engine = KvStore::create(&stores, &config);
        for i in 0..10u32 {
            engine.set(format!("k{}", i).as_bytes(), i.to_string().into_bytes()).unwrap();
        }
    }
    let stores = SliceStores::open(&config).unwrap();
    let engine = KvStore::open(&stores, &config);
    for i in 0..10u32 {
        let (v, _) = engine.get_value(format!("k{}", i).as_bytes()).unwrap().unwrap();
        assert_eq!(v, i.to_string().into_bytes());
    }
}
