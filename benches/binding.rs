//! Benchmarks the lock-free bind/get hot path.

use criterion::{Criterion, criterion_group, criterion_main};
use scoped_context::{ContextKey, bind_sync, get};

fn bind_get(c: &mut Criterion) {
    let key = ContextKey::<u64>::new("bench.bind_get");
    c.bench_function("bind_sync + get", |b| {
        b.iter(|| {
            bind_sync(&key, 42, || {
                std::hint::black_box(get(&key).unwrap());
            });
        });
    });
}

fn nested_bind_get(c: &mut Criterion) {
    let key = ContextKey::<u64>::new("bench.nested_bind_get");
    c.bench_function("nested bind_sync depth 8", |b| {
        b.iter(|| {
            fn recurse(key: &ContextKey<u64>, depth: u64) {
                if depth == 0 {
                    std::hint::black_box(get(key).unwrap());
                    return;
                }
                bind_sync(key, depth, || recurse(key, depth - 1));
            }
            recurse(&key, 8);
        });
    });
}

criterion_group!(benches, bind_get, nested_bind_get);
criterion_main!(benches);
