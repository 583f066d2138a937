use super::*;

#[test]
fn test_default_validates() {
    let config = Config::default();
    config.validate().unwrap();
}

#[test]
fn test_roundtrip_toml() {
    let dir = std::env::temp_dir();
    let path = dir.join("kvcore.config_test.toml");

    let config = Config::new("/tmp/kvcore-data")
        .set_cache_size(16 * 1024 * 1024)
        .set_num_slices(4);
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.dir, "/tmp/kvcore-data");
    assert_eq!(loaded.cache_size, 16 * 1024 * 1024);
    assert_eq!(loaded.num_slices, 4);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_rejects_zero_slices() {
    let config = Config::new(".").set_num_slices(0);
    assert_eq!(config.num_slices, 1);
}

#[test]
fn test_rejects_oversized_inline_value() {
    let mut config = Config::default();
    config.max_inline_value = config.leaf_blocksize;
    assert!(config.validate().is_err());
}
