use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ermkit::factor::{AltProxGrad, AltProxGradOptions, FrobeniusLoss, NonNegReg, ZeroReg};
use ndarray::Array2;
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// An exact rank-`k` product of two random factors.
fn low_rank_matrix(n: usize, d: usize, k: usize) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(0xFAC7 + (n * d) as u64);
    let left: Array2<f64> = Array2::from_shape_fn((n, k), |_| rng.sample(Standard));
    let right: Array2<f64> = Array2::from_shape_fn((d, k), |_| rng.sample(Standard));
    left.dot(&right.t())
}

fn benchmark_factorization(c: &mut Criterion) {
    let shapes = [(40usize, 30usize), (100, 60), (200, 120)];
    let rank = 3;
    let options = AltProxGradOptions {
        max_iters: 200,
        ..AltProxGradOptions::default()
    };

    let mut group = c.benchmark_group("alt_prox_grad");
    for &(n, d) in &shapes {
        let matrix = low_rank_matrix(n, d, rank);
        group.throughput(Throughput::Elements((n * d) as u64));
        let label = format!("{n}x{d}");

        group.bench_with_input(BenchmarkId::new("unregularized", &label), &matrix, |b, input| {
            let solver = AltProxGrad::new(FrobeniusLoss, ZeroReg, options);
            b.iter(|| {
                let mut rng = StdRng::seed_from_u64(1);
                let outcome = solver.fit(black_box(input.view()), rank, None, &mut rng);
                black_box(outcome)
            });
        });

        group.bench_with_input(BenchmarkId::new("nonnegative", &label), &matrix, |b, input| {
            let solver = AltProxGrad::new(FrobeniusLoss, NonNegReg, options);
            b.iter(|| {
                let mut rng = StdRng::seed_from_u64(1);
                let outcome = solver.fit(black_box(input.view()), rank, None, &mut rng);
                black_box(outcome)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_factorization);
criterion_main!(benches);
