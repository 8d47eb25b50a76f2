//! Benchmarks for exact, closed-form and hybrid purchase resolution

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use segcurve_economics::*;

fn seeded_state(params: &CurveParameters) -> CurveState {
    SegmentResolver::new(params)
        .and_then(|resolver| resolver.resolve(&CurveState::genesis(params), 1_000_000))
        .map(|result| result.final_state)
        .unwrap_or_else(|_| CurveState::genesis(params))
}

fn bench_exact_resolution(c: &mut Criterion) {
    let params = CurveParameters::default();
    let resolver = SegmentResolver::new(&params).unwrap();
    let state = seeded_state(&params);

    c.bench_function("resolve_single_segment", |b| {
        b.iter(|| resolver.resolve(black_box(&state), black_box(1_100)))
    });
    c.bench_function("resolve_segment_cap", |b| {
        b.iter(|| resolver.resolve(black_box(&state), black_box(1_000_000)))
    });
}

fn bench_closed_form(c: &mut Criterion) {
    let params = CurveParameters::default();
    let estimator = ClosedFormEstimator::new(&params).unwrap();
    let state = seeded_state(&params);

    c.bench_function("estimate_from_state", |b| {
        b.iter(|| estimator.estimate_from_state(black_box(&state), black_box(1_000_000)))
    });
    c.bench_function("estimate_model", |b| {
        b.iter(|| {
            estimator.estimate(
                black_box(40),
                black_box(rust_decimal::Decimal::ZERO),
                black_box(1_000_000),
            )
        })
    });
}

fn bench_hybrid(c: &mut Criterion) {
    let params = CurveParameters {
        max_segments_per_call: 200,
        ..Default::default()
    };
    let selector = HybridSelector::new(&params).unwrap();
    let resolver = SegmentResolver::new(&params).unwrap();
    let state = seeded_state(&params);

    c.bench_function("hybrid_large_purchase", |b| {
        b.iter(|| selector.resolve_optimal(black_box(&state), black_box(150_000)))
    });
    c.bench_function("exact_large_purchase", |b| {
        b.iter(|| resolver.resolve(black_box(&state), black_box(150_000)))
    });
}

criterion_group!(
    benches,
    bench_exact_resolution,
    bench_closed_form,
    bench_hybrid
);
criterion_main!(benches);
