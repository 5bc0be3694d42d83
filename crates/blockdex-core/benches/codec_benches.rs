//! Criterion benchmarks for the storage codec.
//!
//! Covers: VLQ packing, bigint packing, and tx index list encode/decode.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use num_bigint::BigUint;

use blockdex_core::codec::{
    pack_bigint, pack_tx_indexes, pack_varuint, unpack_bigint, unpack_tx_indexes, unpack_varuint, TxIndexes,
};

fn sample_indexes(n: usize) -> Vec<TxIndexes> {
    (0..n)
        .map(|i| TxIndexes {
            btxid: vec![i as u8; 32],
            indexes: vec![i as i32, !(i as i32)],
        })
        .collect()
}

fn bench_varuint(c: &mut Criterion) {
    c.bench_function("varuint_pack_unpack", |b| {
        let mut buf = Vec::with_capacity(16);
        b.iter(|| {
            buf.clear();
            pack_varuint(black_box(1_234_567_890_123), &mut buf);
            unpack_varuint(black_box(&buf)).unwrap()
        })
    });
}

fn bench_bigint(c: &mut Criterion) {
    let v = BigUint::from(21_000_000u64) * BigUint::from(100_000_000u64);
    c.bench_function("bigint_pack_unpack", |b| {
        let mut buf = Vec::with_capacity(16);
        b.iter(|| {
            buf.clear();
            pack_bigint(black_box(&v), &mut buf);
            unpack_bigint(black_box(&buf)).unwrap()
        })
    });
}

fn bench_tx_indexes(c: &mut Criterion) {
    let txs = sample_indexes(64);
    let packed = pack_tx_indexes(&txs);
    c.bench_function("tx_indexes_pack_64", |b| b.iter(|| pack_tx_indexes(black_box(&txs))));
    c.bench_function("tx_indexes_unpack_64", |b| {
        b.iter(|| unpack_tx_indexes(black_box(&packed), 32).unwrap())
    });
}

criterion_group!(benches, bench_varuint, bench_bigint, bench_tx_indexes);
criterion_main!(benches);
