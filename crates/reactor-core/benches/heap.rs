//! Priority-queue micro-benchmarks, following the pattern the workspace's
//! `[profile.bench]` section is tuned for.

use criterion::{criterion_group, criterion_main, Criterion};
use reactor_core::heap::Heap;

fn insert_and_drain(n: u64) {
    let mut heap: Heap<u64> = Heap::new();
    let handles: Vec<_> = (0..n).map(|i| heap.allocate(i).unwrap()).collect();
    for (i, &h) in handles.iter().enumerate() {
        heap.insert(h, (n - i as u64) as i64);
    }
    while let Some(root) = heap.pull_root() {
        heap.remove(root);
    }
}

fn bench_heap(c: &mut Criterion) {
    let mut group = c.benchmark_group("dary_heap");
    for &n in &[100u64, 1_000, 10_000] {
        group.bench_function(format!("insert_and_drain_{n}"), |b| {
            b.iter(|| insert_and_drain(n));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_heap);
criterion_main!(benches);
