// Criterion benchmarks for rendr-pool connection selection
//
// Run benchmarks with:
//   cargo bench -p rendr-pool
//
// For detailed output with plots:
//   cargo bench -p rendr-pool -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rendr_pool::{ConnectionId, ConnectionLoad, LoadBalancer};

fn fleet(size: usize, busy: usize) -> Vec<ConnectionLoad> {
    (0..size)
        .map(|i| ConnectionLoad {
            id: ConnectionId(i as u64 + 1),
            ready: true,
            outstanding: if i < busy { 3 } else { 1 },
        })
        .collect()
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_balancer_select");

    for size in [1, 5, 16, 64] {
        let lb = LoadBalancer::new(size);
        let loads = fleet(size, size / 2);
        let total: usize = loads.iter().map(|l| l.outstanding).sum();

        group.bench_with_input(BenchmarkId::from_parameter(size), &loads, |b, loads| {
            b.iter(|| lb.select(black_box(loads), black_box(total)));
        });
    }

    group.finish();
}

fn bench_saturated(c: &mut Criterion) {
    // every connection above threshold: full scan, no winner
    let lb = LoadBalancer::new(16);
    let loads: Vec<ConnectionLoad> = fleet(4, 4);

    c.bench_function("load_balancer_saturated", |b| {
        b.iter(|| lb.select(black_box(&loads), black_box(12)));
    });
}

criterion_group!(benches, bench_select, bench_saturated);
criterion_main!(benches);
