use super::*;

fn fresh_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(name);
    std::fs::remove_dir_all(&dir).ok();
    dir
}

#[test]
fn test_create_write_read_checkpoint() {
    let dir = fresh_dir("kvcore.store.basic");
    let store = Store::create(StoreConfig {
        dir: dir.clone(),
        num_files: 2,
        ..Default::default()
    })
    .unwrap();

    let id = store.block_write(b"root contents").unwrap();
    assert_eq!(store.block_read(id).unwrap(), b"root contents");

    let epoch = store.checkpoint(id).unwrap();
    assert_eq!(epoch, 1);
    assert_eq!(store.current_root(), Some(id));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_index_write_frees_old_physical_block() {
    let dir = fresh_dir("kvcore.store.overwrite");
    let store = Store::create(StoreConfig {
        dir: dir.clone(),
        ..Default::default()
    })
    .unwrap();

    let id = store.block_write(b"v1").unwrap();
    store.index_write(id, b"v2-longer-payload").unwrap();
    assert_eq!(store.block_read(id).unwrap(), b"v2-longer-payload");

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_reopen_reads_persisted_header() {
    let dir = fresh_dir("kvcore.store.reopen");
    {
        let store = Store::create(StoreConfig {
            dir: dir.clone(),
            block_size: 8192,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(store.block_size(), 8192);
    }

    let reopened = Store::open(StoreConfig {
        dir: dir.clone(),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(reopened.block_size(), 8192);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_free_then_read_fails() {
    let dir = fresh_dir("kvcore.store.free");
    let store = Store::create(StoreConfig {
        dir: dir.clone(),
        ..Default::default()
    })
    .unwrap();

    let id = store.block_write(b"x").unwrap();
    store.free(id).unwrap();
    assert!(store.block_read(id).is_err());

    std::fs::remove_dir_all(&dir).ok();
}
