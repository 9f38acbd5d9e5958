//! Benchmarks `Carrier` capture and restore.

use criterion::{Criterion, criterion_group, criterion_main};
use scoped_context::{Carrier, ContextKey, bind_sync, get};

fn capture_empty(c: &mut Criterion) {
    c.bench_function("Carrier::capture (no bindings)", |b| {
        b.iter(|| {
            std::hint::black_box(Carrier::capture());
        });
    });
}

fn capture_and_restore(c: &mut Criterion) {
    let key = ContextKey::<u64>::new("bench.carrier.trace");
    c.bench_function("capture + restore_sync", |b| {
        b.iter(|| {
            let carrier = bind_sync(&key, 7, Carrier::capture);
            carrier.restore_sync(|| {
                std::hint::black_box(get(&key).unwrap());
            });
        });
    });
}

criterion_group!(benches, capture_empty, capture_and_restore);
criterion_main!(benches);
