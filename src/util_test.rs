use super::*;

#[test]
fn test_open_file_cw_fresh_then_reuse() {
    let dir = std::env::temp_dir().join("kvcore.util.open_file_cw");
    std::fs::remove_dir_all(&dir).ok();
    let file = dir.join("log");

    let mut fd = open_file_cw(&file, false).unwrap();
    fd.write_all(b"hello").unwrap();

    let mut fd = open_file_cw(&file, true).unwrap();
    fd.write_all(b"world").unwrap();

    let got = std::fs::read(&file).unwrap();
    assert_eq!(got, b"helloworld");
}

#[test]
fn test_open_file_cw_no_reuse_truncates() {
    let dir = std::env::temp_dir().join("kvcore.util.open_file_cw_truncate");
    std::fs::remove_dir_all(&dir).ok();
    let file = dir.join("log");

    open_file_cw(&file, false).unwrap().write_all(b"first").unwrap();
    open_file_cw(&file, false).unwrap().write_all(b"second").unwrap();

    let got = std::fs::read(&file).unwrap();
    assert_eq!(got, b"second");
}

#[test]
fn test_read_exact_at_and_write_at_roundtrip() {
    let dir = std::env::temp_dir().join("kvcore.util.read_write_at");
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("data");
    let mut fd = open_file_rw(&path).unwrap();

    write_at(&mut fd, 0, b"0123456789", "test").unwrap();
    let got = read_exact_at(&mut fd, 3, 4, "test").unwrap();
    assert_eq!(got, b"3456");
}

#[test]
fn test_read_exact_at_short_read_errors() {
    let dir = std::env::temp_dir().join("kvcore.util.short_read");
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("data");
    let mut fd = open_file_rw(&path).unwrap();
    write_at(&mut fd, 0, b"abc", "test").unwrap();

    let err = read_exact_at(&mut fd, 0, 10, "test").unwrap_err();
    assert!(matches!(err, Error::PartialIo(..)));
}

#[test]
fn test_try_convert_int_ok_and_overflow() {
    let ok: Result<u8> = try_convert_int(200_i64, "byte");
    assert_eq!(ok.unwrap(), 200u8);

    let err: Result<u8> = try_convert_int(9000_i64, "byte");
    assert!(err.is_err());
}

#[test]
fn test_align_up() {
    assert_eq!(align_up(0, 4096), 0);
    assert_eq!(align_up(1, 4096), 4096);
    assert_eq!(align_up(4096, 4096), 4096);
    assert_eq!(align_up(4097, 4096), 8192);
}

#[test]
fn test_rolling_hash_is_deterministic_and_sensitive_to_input() {
    assert_eq!(rolling_hash(b"abc"), rolling_hash(b"abc"));
    assert_ne!(rolling_hash(b"abc"), rolling_hash(b"abd"));
}

#[test]
fn test_shard_of_stays_in_range_and_is_stable() {
    for key in [&b"k1"[..], b"k2", b"longer-key-value", b""] {
        let shard = shard_of(key, 8);
        assert!(shard < 8);
        assert_eq!(shard, shard_of(key, 8));
    }
}

#[test]
fn test_crc32_matches_known_vector() {
    // "123456789" is the standard CRC-32/IEEE check vector (0xCBF43926).
    assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
}

#[test]
fn test_crc32_detects_corruption() {
    let a = crc32(b"hello world");
    let b = crc32(b"hello World");
    assert_ne!(a, b);
}
