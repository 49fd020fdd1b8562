// Reconnect path benchmarks
//
// Delay computation and error classification run once per failure; both
// should stay well under a microsecond.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use feedline_core::core::StatusCode;
use feedline_core::resilience::{classify, BackoffPolicy, FixedJitter, RandomJitter};
use std::time::Duration;

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff");
    group.measurement_time(Duration::from_secs(2));

    let policy = BackoffPolicy::default();

    group.bench_function("delay_fixed_jitter", |b| {
        let mut jitter = FixedJitter(Duration::from_millis(250));
        b.iter(|| policy.delay_for(black_box(5), &mut jitter))
    });

    group.bench_function("delay_random_jitter", |b| {
        let mut jitter = RandomJitter::seeded(42);
        b.iter(|| policy.delay_for(black_box(5), &mut jitter))
    });

    group.bench_function("delay_saturated", |b| {
        let mut jitter = FixedJitter(Duration::ZERO);
        b.iter(|| policy.delay_for(black_box(u32::MAX), &mut jitter))
    });

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    group.measurement_time(Duration::from_secs(2));

    group.bench_function("known_code", |b| {
        b.iter(|| classify(black_box(StatusCode::Unavailable), black_box("server draining")))
    });

    group.bench_function("marker_scan_hit", |b| {
        b.iter(|| {
            classify(
                black_box(StatusCode::Internal),
                black_box("h2 protocol error: stream no longer needed, RST_STREAM"),
            )
        })
    });

    group.bench_function("marker_scan_miss", |b| {
        b.iter(|| {
            classify(
                black_box(StatusCode::Unknown),
                black_box("unexpected field in subscription filter at index 17"),
            )
        })
    });

    group.finish();
}

criterion_group!(benches, bench_backoff, bench_classify);
criterion_main!(benches);
