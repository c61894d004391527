// ========================================================================================
//
//                 Regularization path: warm versus cold starts
//
// ========================================================================================
//
// Measures a lasso regularization path fitted by proximal gradient, once with the
// path driver's warm starts and once with every grid point solved from zero. The
// gap between the two is the saving warm starts buy on a typical descending grid.
//
// ========================================================================================

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ermkit::config::ModelConfig;
use ermkit::fit::PathOptions;
use ermkit::losses::QuadLoss;
use ermkit::model::Model;
use ermkit::regularizers::OneReg;
use ermkit::solvers::{ProxGradSolver, Problem, Solver};
use ermkit::source::{Table, TableSource};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Number of input columns; only the first few carry signal.
const NUM_FEATURES: usize = 20;
const NUM_INFORMATIVE: usize = 4;

fn sparse_regression_table(n: usize) -> Table {
    let mut rng = StdRng::seed_from_u64(0xBEEF + n as u64);
    let mut columns: Vec<(String, Array1<f64>)> = (0..NUM_FEATURES)
        .map(|j| {
            let values: Array1<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
            (format!("f{j}"), values)
        })
        .collect();
    let mut target = Array1::from_shape_fn(n, |_| rng.gen_range(-0.1..0.1));
    for (j, (_, values)) in columns.iter().take(NUM_INFORMATIVE).enumerate() {
        target.scaled_add((j + 1) as f64, values);
    }
    columns.push(("y".to_string(), target));
    Table::new(columns).unwrap_or_else(|e| panic!("benchmark table: {e}"))
}

fn descending_grid() -> Vec<f64> {
    (0..12).map(|i| 10f64.powf(1.0 - 0.4 * i as f64)).collect()
}

fn benchmark_path(c: &mut Criterion) {
    let sizes = [200usize, 1000];
    let mut group = c.benchmark_group("lasso_path");
    group.sample_size(10);

    for &n in &sizes {
        let table = sparse_regression_table(n);

        group.bench_with_input(BenchmarkId::new("warm", n), &table, |b, table| {
            b.iter(|| {
                let source = TableSource::new(table.clone(), vec!["y".to_string()])
                    .unwrap_or_else(|e| panic!("benchmark source: {e}"));
                let config = ModelConfig {
                    seed: Some(3),
                    embed_all: true,
                    ..ModelConfig::default()
                };
                let mut model = Model::new(source, Box::new(QuadLoss), Box::new(OneReg), config)
                    .unwrap_or_else(|e| panic!("benchmark model: {e}"));
                let options = PathOptions {
                    lambdas: descending_grid(),
                    ..PathOptions::default()
                };
                let path = model.train_path(&options).map(|p| p.imin());
                black_box(path.ok());
            });
        });

        group.bench_with_input(BenchmarkId::new("cold", n), &table, |b, table| {
            let x = {
                let mut x = Array2::<f64>::ones((n, NUM_FEATURES + 1));
                for j in 0..NUM_FEATURES {
                    x.index_axis_mut(Axis(1), j + 1)
                        .assign(&table.column(&format!("f{j}")).unwrap_or_else(|e| panic!("{e}")));
                }
                x
            };
            let y = table
                .column("y")
                .unwrap_or_else(|e| panic!("{e}"))
                .to_owned()
                .insert_axis(Axis(1));
            let mut weights = Array1::<f64>::ones(NUM_FEATURES + 1);
            weights[0] = 0.0;
            let solver = ProxGradSolver::default();

            b.iter(|| {
                for lambda in descending_grid() {
                    let problem = Problem {
                        loss: &QuadLoss,
                        reg: &OneReg,
                        regweights: weights.view(),
                        x: x.view(),
                        y: y.view(),
                        lambda,
                    };
                    black_box(solver.solve(&problem, None).ok());
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_path);
criterion_main!(benches);
