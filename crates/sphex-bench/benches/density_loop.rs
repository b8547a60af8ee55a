//! Criterion benchmarks for full density convergence loops.
//!
//! The same 4K-particle cube converged on one, two and four ranks, two
//! worker threads each.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sphex_bench::{density_profile, reference_config, run_density};

fn bench_density_loop_4k(c: &mut Criterion) {
    let config = reference_config(2);
    let mut group = c.benchmark_group("density_loop_4k");
    group.sample_size(10);
    for ranks in [1usize, 2, 4] {
        let profile = density_profile(4000, ranks, 42).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(ranks), &profile, |b, profile| {
            b.iter(|| run_density(profile, &config).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_density_loop_4k);
criterion_main!(benches);
