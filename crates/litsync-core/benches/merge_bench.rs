//! # Merge Benchmarks
//!
//! Throughput of merge, resolution and watermark queries.
//!
//! Run with: `cargo bench -p litsync-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use litsync_core::{
    MemoryStore, MergeEngine, RawRecord, RecordStore, RedbStore, ReferencePolicy,
    ReferenceResolver, resolve_watermark,
};
use std::hint::black_box;

/// A batch where record i cites the next three records, so a third of the
/// citations are forward references within the batch.
fn chained_batch(size: usize, offset: usize) -> Vec<RawRecord> {
    (offset..offset + size)
        .map(|i| {
            RawRecord::new(format!("{i}")).citing((1..=3).map(|d| format!("{}", i + d)))
        })
        .collect()
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_merge_fresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_fresh");

    for size in [100, 1000, 10000].iter() {
        let batch = chained_batch(*size, 0);
        for policy in [ReferencePolicy::FireAndForget, ReferencePolicy::ReverseIndex] {
            group.bench_with_input(
                BenchmarkId::new(policy.to_string(), size),
                &batch,
                |b, batch| {
                    b.iter(|| {
                        let mut store = MemoryStore::new();
                        let mut engine = MergeEngine::new(policy);
                        let stats = engine.merge(&mut store, 1, batch.clone()).expect("merge");
                        black_box(stats)
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_remerge_unchanged(c: &mut Criterion) {
    let mut group = c.benchmark_group("remerge_unchanged");

    for size in [100, 1000, 10000].iter() {
        let batch = chained_batch(*size, 0);
        let mut store = MemoryStore::new();
        MergeEngine::default()
            .merge(&mut store, 1, batch.clone())
            .expect("merge");

        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            b.iter(|| {
                let mut engine = MergeEngine::default();
                black_box(engine.merge(&mut store, 1, batch.clone()).expect("merge"))
            });
        });
    }

    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_references");

    for size in [100, 1000, 10000].iter() {
        let mut seeded = MemoryStore::new();
        MergeEngine::default()
            .merge(&mut seeded, 1, chained_batch(*size, 0))
            .expect("merge");

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut store = seeded.clone();
                black_box(ReferenceResolver::resolve_references(&mut store).expect("resolve"))
            });
        });
    }

    group.finish();
}

fn bench_redb_watermark(c: &mut Criterion) {
    let mut group = c.benchmark_group("redb_watermark");
    let dir = tempfile::tempdir().expect("temp dir");

    for size in [100, 1000].iter() {
        let mut store = RedbStore::open(dir.path().join(format!("bench-{size}.redb"))).expect("open");
        let mut engine = MergeEngine::default();
        for seq in 1..=10u64 {
            let offset = (seq as usize - 1) * size;
            engine
                .merge(&mut store, seq, chained_batch(*size / 10, offset))
                .expect("merge");
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(resolve_watermark(&store).expect("watermark")));
        });
        black_box(store.len().expect("len"));
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_merge_fresh,
    bench_remerge_unchanged,
    bench_resolve,
    bench_redb_watermark
);
criterion_main!(benches);
