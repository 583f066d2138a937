#![feature(test)]
extern crate test;

use std::hash::Hasher;

use test::Bencher;

use kvcore::util::crc32;

#[bench]
fn bench_default_hasher(b: &mut Bencher) {
    use std::collections::hash_map::DefaultHasher;

    let mut n: u64 = 1;
    let mut sum = 0;
    b.iter(|| {
        let mut hasher = DefaultHasher::new();
        hasher.write(&n.to_be_bytes());
        sum += hasher.finish();
        n += 1
    });
}

#[bench]
fn bench_crc32(b: &mut Bencher) {
    let mut n: u64 = 1;
    let mut sum: u64 = 0;
    b.iter(|| {
        sum += crc32(&n.to_be_bytes()) as u64;
        n += 1;
    });
}
