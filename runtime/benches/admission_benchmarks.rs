//! Admission-control hot path benchmarks
//!
//! Every guarded request pays for a limiter check and a breaker admission, so
//! both should stay well under a microsecond.
//!
//! Run with: `cargo bench`

#![allow(missing_docs)]
#![allow(clippy::expect_used)]

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use turnstile_runtime::{
    CircuitBreaker, CircuitBreakerConfig, ProtectedSurface, RateLimiter, RateLimiterConfig,
    RateLimiters, RequestMeta,
};

fn benchmark_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");
    group.throughput(Throughput::Elements(1));

    group.bench_function("check_single_key", |b| {
        let limiter = RateLimiter::new(
            "bench",
            RateLimiterConfig::new(Duration::from_secs(60), u32::MAX - 1),
        );
        b.iter(|| limiter.check(black_box("user-1")));
    });

    group.bench_function("check_rejected_key", |b| {
        let limiter = RateLimiter::new("bench", RateLimiterConfig::new(Duration::from_secs(60), 1));
        let meta = RequestMeta::new().endpoint("/api/orders").ip("10.0.0.1");
        limiter.check("user-1");
        b.iter(|| limiter.check_with(black_box("user-1"), &meta));
    });

    group.bench_function("check_many_keys", |b| {
        let limiters = RateLimiters::with_defaults();
        let limiter = limiters.get(ProtectedSurface::TicketScan);
        let keys: Vec<String> = (0..10_000).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();
        let mut next = 0;
        b.iter(|| {
            next = (next + 1) % keys.len();
            limiter.check(black_box(&keys[next]))
        });
    });

    group.finish();
}

fn benchmark_circuit_breaker(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    group.bench_function("execute_closed", |b| {
        let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default());
        b.to_async(&runtime).iter(|| async {
            let _ = breaker
                .execute(|| async { Ok::<_, std::io::Error>(black_box(1)) })
                .await;
        });
    });

    group.bench_function("reject_open", |b| {
        let breaker = CircuitBreaker::new(
            "bench",
            CircuitBreakerConfig::builder()
                .reset_timeout(Duration::from_secs(3600))
                .build(),
        );
        breaker.force_open("benchmark");
        b.to_async(&runtime).iter(|| async {
            let _ = breaker
                .execute(|| async { Ok::<_, std::io::Error>(black_box(1)) })
                .await;
        });
    });

    group.finish();
}

fn benchmark_concurrent_checks(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");
    group.throughput(Throughput::Elements(100));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    group.bench_function("100_tasks_shared_limiter", |b| {
        let limiter = Arc::new(RateLimiter::new(
            "bench",
            RateLimiterConfig::new(Duration::from_secs(60), u32::MAX - 1),
        ));
        b.to_async(&runtime).iter(|| {
            let limiter = Arc::clone(&limiter);
            async move {
                let handles: Vec<_> = (0..100)
                    .map(|i| {
                        let limiter = Arc::clone(&limiter);
                        tokio::spawn(async move { limiter.check(&format!("user-{}", i % 8)).allowed })
                    })
                    .collect();

                for handle in handles {
                    handle.await.expect("Task failed");
                }
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_rate_limiter,
    benchmark_circuit_breaker,
    benchmark_concurrent_checks,
);
criterion_main!(benches);
