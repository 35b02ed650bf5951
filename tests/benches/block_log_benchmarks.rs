//! # Block Log Benchmarks
//!
//! | Operation | Notes |
//! |-----------|-------|
//! | `Block::encode` / `decode` | Fixed 208-byte layout |
//! | `Block::hash` | SHA-256 over the encoded record |
//! | `BlockLog::store` | Read head, link, write one record |
//! | `BlockLog::make_new_block` | Head read plus wire framing |

use std::sync::Arc;
use std::time::Duration;

use bc_02_block_log::{Block, BlockLog};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use shared_bus::EventBus;

fn sample_block() -> Block {
    Block::genesis()
        .successor(b"bench@example.org", &[b'x'; 140], 1_700_000_000_000)
        .expect("valid entry")
}

fn bench_record_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("bc-02-record");
    let block = sample_block();
    let raw = block.encode();

    group.throughput(Throughput::Bytes(raw.len() as u64));
    group.bench_function("encode", |b| b.iter(|| black_box(&block).encode()));
    group.bench_function("decode", |b| b.iter(|| Block::decode(black_box(&raw))));
    group.bench_function("hash", |b| b.iter(|| black_box(&block).hash()));
    group.finish();
}

fn bench_block_log(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let dir = tempfile::tempdir().expect("tempdir");
    let log = BlockLog::new(Arc::new(EventBus::new()), dir.path().join("bench.blockchain"));
    runtime.block_on(log.open()).expect("open");

    let mut group = c.benchmark_group("bc-02-block-log");
    group.measurement_time(Duration::from_secs(5));
    group.bench_function("store", |b| {
        b.iter(|| {
            runtime
                .block_on(log.store("bench@example.org", "a benchmark message"))
                .expect("store")
        })
    });
    group.bench_function("make_new_block", |b| {
        b.iter(|| runtime.block_on(log.make_new_block(0)).expect("push"))
    });
    group.finish();
}

criterion_group!(benches, bench_record_codec, bench_block_log);
criterion_main!(benches);
