//! Benchmark suite for the sparse integer map.
//!
//! Run with: `cargo bench -p probe-pidmap`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use probe_pidmap::SparseIntMap;

fn bench_put_fresh(c: &mut Criterion) {
    c.bench_function("put_fresh_1000", |b| {
        b.iter(|| {
            let mut m = SparseIntMap::new(1024);
            for i in 0..1000 {
                black_box(m.put(i, i));
            }
        })
    });
}

fn bench_get_hit(c: &mut Criterion) {
    let mut m = SparseIntMap::new(1024);
    for i in 0..1000 {
        m.put(i, i);
    }
    c.bench_function("get_hit", |b| {
        b.iter(|| black_box(m.get(500)))
    });
}

fn bench_remove_then_put_reuse(c: &mut Criterion) {
    let mut m = SparseIntMap::new(1024);
    for i in 0..1000 {
        m.put(i, i);
    }
    c.bench_function("remove_then_put_reuse", |b| {
        b.iter(|| {
            m.remove(500);
            black_box(m.put(500, 500));
        })
    });
}

criterion_group!(pidmap_benches, bench_put_fresh, bench_get_hit, bench_remove_then_put_reuse);
criterion_main!(pidmap_benches);
