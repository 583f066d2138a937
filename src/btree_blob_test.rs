use super::*;
use crate::store::StoreConfig;

fn fresh_store(name: &str) -> Store {
    let dir = std::env::temp_dir().join(name);
    std::fs::remove_dir_all(&dir).ok();
    Store::create(StoreConfig {
        dir,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_blob_roundtrip_multi_chunk() {
    let store = fresh_store("kvcore.btree_blob.roundtrip");
    let value: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

    let root = write_blob(&store, &value, 64).unwrap();
    let got = read_blob(&store, root).unwrap();
    assert_eq!(got, value);
}

#[test]
fn test_free_blob_reclaims_chain() {
    let store = fresh_store("kvcore.btree_blob.free");
    let value = vec![7u8; 500];
    let root = write_blob(&store, &value, 64).unwrap();

    free_blob(&store, root).unwrap();
    assert!(store.block_read(root).is_err());
}
