use ermkit::config::ModelConfig;
use ermkit::fit::{PathOptions, TrainOptions};
use ermkit::losses::QuadLoss;
use ermkit::model::Model;
use ermkit::regularizers::QuadReg;
use ermkit::solvers::{Problem, RidgeSolver, Solver, SolverError};
use ermkit::source::{DataError, DataSource, EmbedHints, FeatureSpec};
use ermkit::split::TrainFrac;
use ndarray::{Array2, ArrayView2};
use std::cell::RefCell;
use std::rc::Rc;

/// A source over generated rows that counts how often it is read.
struct CountingSource {
    n: usize,
    u: Vec<FeatureSpec>,
    v: Vec<FeatureSpec>,
    reads: Rc<RefCell<usize>>,
}

impl CountingSource {
    fn new(n: usize) -> (Self, Rc<RefCell<usize>>) {
        let reads = Rc::new(RefCell::new(0));
        let source = Self {
            n,
            u: vec![FeatureSpec::intercept(), FeatureSpec::column("t")],
            v: vec![FeatureSpec::column("y")],
            reads: Rc::clone(&reads),
        };
        (source, reads)
    }
}

impl DataSource for CountingSource {
    fn get_xy(&mut self, _: &EmbedHints) -> Result<(Array2<f64>, Array2<f64>), DataError> {
        *self.reads.borrow_mut() += 1;
        let n = self.n;
        let x = Array2::from_shape_fn((n, self.u.len()), |(i, j)| match j {
            0 => 1.0,
            j => (i as f64).powi(j as i32) / n as f64,
        });
        let y = Array2::from_shape_fn((n, self.v.len()), |(i, _)| 2.0 + 0.5 * i as f64);
        Ok((x, y))
    }

    fn get_u(&self) -> &[FeatureSpec] {
        &self.u
    }

    fn get_v(&self) -> &[FeatureSpec] {
        &self.v
    }

    fn add_feature_u(&mut self, spec: FeatureSpec) -> Result<(), DataError> {
        self.u.push(spec);
        Ok(())
    }

    fn add_feature_v(&mut self, spec: FeatureSpec) -> Result<(), DataError> {
        self.v.push(spec);
        Ok(())
    }

    fn embed_all(&mut self) -> Result<(), DataError> {
        Ok(())
    }
}

/// Ridge, but remembers every initial guess it was handed.
#[derive(Debug)]
struct RecordingSolver {
    guesses: Rc<RefCell<Vec<Option<Array2<f64>>>>>,
    results: Rc<RefCell<Vec<Array2<f64>>>>,
}

impl Solver for RecordingSolver {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn solve(
        &self,
        problem: &Problem<'_>,
        theta_guess: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, SolverError> {
        self.guesses
            .borrow_mut()
            .push(theta_guess.map(|guess| guess.to_owned()));
        let theta = RidgeSolver.solve(problem, theta_guess)?;
        self.results.borrow_mut().push(theta.clone());
        Ok(theta)
    }
}

fn seeded() -> ModelConfig {
    ModelConfig {
        seed: Some(2024),
        ..ModelConfig::default()
    }
}

#[test]
fn repeated_split_requests_hit_the_cache() {
    let (source, reads) = CountingSource::new(20);
    let mut model = Model::new(source, Box::new(QuadLoss), Box::new(QuadReg), seeded()).unwrap();

    let first = model
        .split_train_test(TrainFrac::Fraction(0.75), false, false)
        .unwrap()
        .clone();
    let second = model
        .split_train_test(TrainFrac::Fraction(0.75), false, false)
        .unwrap()
        .clone();
    assert_eq!(first, second);
    assert_eq!(*reads.borrow(), 1);

    model
        .split_train_test(TrainFrac::Fraction(0.5), false, false)
        .unwrap();
    assert_eq!(*reads.borrow(), 2);

    model
        .split_train_test(TrainFrac::Rows(vec![0, 1, 2, 3]), false, false)
        .unwrap();
    assert_eq!(*reads.borrow(), 3);
    model
        .split_train_test(TrainFrac::Rows(vec![0, 1, 2, 3]), false, false)
        .unwrap();
    assert_eq!(*reads.borrow(), 3);
}

#[test]
fn training_twice_reads_the_source_once() {
    let (source, reads) = CountingSource::new(30);
    let mut model = Model::new(source, Box::new(QuadLoss), Box::new(QuadReg), seeded()).unwrap();
    model.train(&TrainOptions::default()).unwrap();
    model.train(&TrainOptions::default()).unwrap();
    assert_eq!(*reads.borrow(), 1);

    model
        .train(&TrainOptions {
            resplit: true,
            ..TrainOptions::default()
        })
        .unwrap();
    assert_eq!(*reads.borrow(), 2);

    model.add_feature_u(FeatureSpec::column("t2")).unwrap();
    let result = model.train(&TrainOptions::default()).unwrap();
    assert_eq!(result.theta().nrows(), 3);
    assert_eq!(*reads.borrow(), 3);
}

#[test]
fn path_fits_are_warm_started_from_the_previous_point() {
    let (source, _) = CountingSource::new(25);
    let guesses = Rc::new(RefCell::new(Vec::new()));
    let results = Rc::new(RefCell::new(Vec::new()));
    let mut model = Model::new(source, Box::new(QuadLoss), Box::new(QuadReg), seeded()).unwrap();
    model.set_solver(Some(Box::new(RecordingSolver {
        guesses: Rc::clone(&guesses),
        results: Rc::clone(&results),
    })));

    let lambdas = vec![1e-3, 1e-2, 1e-1, 1.0];
    let path = model
        .train_path(&PathOptions {
            lambdas: lambdas.clone(),
            ..PathOptions::default()
        })
        .unwrap();
    assert_eq!(path.lambdas(), lambdas);

    let guesses = guesses.borrow();
    let results = results.borrow();
    assert_eq!(guesses.len(), 4);
    assert!(guesses[0].is_none());
    for i in 1..guesses.len() {
        assert_eq!(guesses[i].as_ref(), Some(&results[i - 1]));
        assert_eq!(&results[i - 1], path.points()[i - 1].theta());
    }
}

#[test]
fn explicit_solver_survives_a_regularizer_change() {
    let (source, _) = CountingSource::new(10);
    let mut model = Model::new(source, Box::new(QuadLoss), Box::new(QuadReg), seeded()).unwrap();
    model.set_solver(Some(Box::new(RecordingSolver {
        guesses: Rc::default(),
        results: Rc::default(),
    })));
    model.set_reg(Box::new(ermkit::regularizers::ZeroReg));
    model.train(&TrainOptions::default()).unwrap();
    assert_eq!(model.solver().solver().map(|s| s.name()), Some("recording"));
}
