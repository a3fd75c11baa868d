//! Criterion benchmarks backing the "no thread is ever blocked" claim with
//! numbers, the way every lock-free map in the pack ships at least one
//! throughput bench alongside its correctness tests.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nbhm::Map;
use std::sync::Arc;

fn single_threaded_put_get_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_threaded");
    for &size in &[1_000usize, 100_000] {
        group.bench_with_input(BenchmarkId::new("put", size), &size, |b, &size| {
            b.iter(|| {
                let map: Map<usize, usize> = Map::new();
                let guard = map.pin();
                for i in 0..size {
                    map.insert(i, i, &guard);
                }
            });
        });

        let map: Map<usize, usize> = Map::new();
        {
            let guard = map.pin();
            for i in 0..size {
                map.insert(i, i, &guard);
            }
        }
        group.bench_with_input(BenchmarkId::new("get", size), &size, |b, &size| {
            let guard = map.pin();
            b.iter(|| {
                for i in 0..size {
                    criterion::black_box(map.get(&i, &guard));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("remove", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let map: Map<usize, usize> = Map::new();
                    let guard = map.pin();
                    for i in 0..size {
                        map.insert(i, i, &guard);
                    }
                    map
                },
                |map| {
                    let guard = map.pin();
                    for i in 0..size {
                        map.remove(i, &guard);
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn contended_get_or_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_get_or_add");
    for &threads in &[2usize, 8, 16] {
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &threads| {
            b.iter(|| {
                let map: Arc<Map<usize, usize>> = Arc::new(Map::new());
                std::thread::scope(|s| {
                    for t in 0..threads {
                        let map = Arc::clone(&map);
                        s.spawn(move || {
                            let guard = map.pin();
                            for k in 0..64 {
                                map.get_or_insert_with(k, || t, &guard);
                            }
                        });
                    }
                });
            });
        });
    }
    group.finish();
}

fn resize_heavy_monotonic_insert(c: &mut Criterion) {
    c.bench_function("resize_heavy_monotonic_insert", |b| {
        b.iter(|| {
            let map: Map<u64, u64> = Map::with_capacity(8).unwrap();
            let guard = map.pin();
            for i in 0..50_000u64 {
                map.insert(i, i, &guard);
            }
        });
    });
}

criterion_group!(
    benches,
    single_threaded_put_get_remove,
    contended_get_or_add,
    resize_heavy_monotonic_insert
);
criterion_main!(benches);
