//! Throughput Benchmark for GridKV
//!
//! This benchmark measures the codec and the block database under various
//! workloads.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use gridkv::grid::{GridBounds, MemoryGrid, Position};
use gridkv::storage::{BlockDatabase, DatabaseOptions, GridExecutor, Palette, SymbolCodec};
use std::sync::Arc;
use std::time::Duration;

fn open_db(cache_size: usize) -> BlockDatabase {
    let grid = MemoryGrid::new(GridBounds::new(
        Position::new(0, 0, 0),
        Position::new(127, 63, 127),
    ));
    let options = DatabaseOptions {
        cache_size,
        log_operations: false,
        ..Default::default()
    };
    BlockDatabase::open(Box::new(grid), options).unwrap()
}

/// Benchmark encode/decode for both palettes
fn bench_codec(c: &mut Criterion) {
    let text = Bytes::from("the quick brown fox jumps over the lazy dog ".repeat(24));

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(text.len() as u64));

    for (name, palette, compression) in [
        ("nibble", Palette::Nibble, false),
        ("nibble_lz4", Palette::Nibble, true),
        ("byte", Palette::Byte, false),
        ("byte_lz4", Palette::Byte, true),
    ] {
        let codec = SymbolCodec::new(palette, compression);
        let symbols = codec.encode(&text);

        group.bench_function(format!("encode_{}", name), |b| {
            b.iter(|| black_box(codec.encode(&text)));
        });
        group.bench_function(format!("decode_{}", name), |b| {
            b.iter(|| black_box(codec.decode(&symbols).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark WRITE operations
fn bench_write(c: &mut Criterion) {
    let db = open_db(1000);

    let mut group = c.benchmark_group("write");
    group.throughput(Throughput::Elements(1));

    group.bench_function("write_small", |b| {
        let mut i = 0u64;
        let value = Bytes::from("small_value");
        b.iter(|| {
            db.write(&format!("key:{}", i % 1000), value.clone()).unwrap();
            i += 1;
        });
    });

    group.bench_function("write_1kb", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024));
        b.iter(|| {
            db.write(&format!("big:{}", i % 100), value.clone()).unwrap();
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark READ operations, from the cache and from the grid
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Elements(1));

    for (name, cache_size) in [("cached", 1000), ("uncached", 0)] {
        let db = open_db(cache_size);
        for i in 0..1000 {
            db.write(&format!("key:{}", i), Bytes::from(format!("value:{}", i)))
                .unwrap();
        }

        group.bench_function(format!("read_{}", name), |b| {
            let mut i = 0u64;
            b.iter(|| {
                black_box(db.read(&format!("key:{}", i % 1000)).unwrap());
                i += 1;
            });
        });
    }

    group.bench_function("read_missing", |b| {
        let db = open_db(1000);
        let mut i = 0u64;
        b.iter(|| {
            black_box(db.read(&format!("missing:{}", i)).is_err());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark operations queued through the grid executor
fn bench_executor(c: &mut Criterion) {
    let db = Arc::new(open_db(1000));
    let executor = GridExecutor::start(db, Duration::from_secs(5)).unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("executor");
    group.throughput(Throughput::Elements(1));

    group.bench_function("write_via_executor", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("exec:{}", i % 1000);
            runtime
                .block_on(executor.run(move |db| db.write(&key, Bytes::from_static(b"value"))))
                .unwrap();
            i += 1;
        });
    });

    group.finish();
    executor.shutdown();
}

criterion_group!(benches, bench_codec, bench_write, bench_read, bench_executor);

criterion_main!(benches);
