use super::*;

#[test]
fn test_value_roundtrip_inline() {
    let mut buf = Vec::new();
    let v = Value::Inline(b"hello world".to_vec());
    let n = v.encode(&mut buf);
    assert_eq!(n, buf.len());

    let mut out = Value::default();
    let used = out.decode(&buf).unwrap();
    assert_eq!(used, n);
    assert_eq!(out, v);
}

#[test]
fn test_value_roundtrip_blob() {
    let mut buf = Vec::new();
    let v = Value::Blob {
        root_block: 42,
        len: 1_000_000,
    };
    v.encode(&mut buf);

    let mut out = Value::default();
    out.decode(&buf).unwrap();
    assert_eq!(out, v);
    assert!(out.is_blob());
}

#[test]
fn test_timestamp_roundtrip() {
    let mut buf = Vec::new();
    let ts = Timestamp::new(7, 123_456);
    ts.encode(&mut buf);

    let mut out = Timestamp::new(0, 0);
    out.decode(&buf).unwrap();
    assert_eq!(out, ts);
}

#[test]
fn test_entry_tombstone() {
    let ts = Timestamp::new(1, 1);
    let e: Entry<Vec<u8>> = Entry::tombstone(b"k".to_vec(), ts);
    assert!(e.is_deleted());
    assert_eq!(e.value.len(), 0);
    assert_eq!(e.cas(), 1);
}

#[test]
fn test_entry_expiry() {
    let ts = Timestamp::new(1, 1);
    let e = Entry::with_exptime(b"k".to_vec(), Value::Inline(b"v".to_vec()), ts, 1_000);
    assert!(!e.is_expired(999));
    assert!(e.is_expired(1_000));
    assert!(e.is_expired(1_001));

    let never = Entry::new(b"k".to_vec(), Value::Inline(b"v".to_vec()), ts);
    assert!(!never.is_expired(u64::MAX));
}

#[test]
fn test_decode_bad_tag() {
    let mut out = Value::default();
    let err = out.decode(&[9, 0, 0]).unwrap_err();
    assert!(matches!(err, Error::DecodeFail(_)));
}
