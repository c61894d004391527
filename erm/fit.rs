//! # Supervised Fit Drivers
//!
//! The three ways of fitting a [`Model`]:
//!
//! - [`Model::train`]: one fit on a train/test split at a single lambda.
//! - [`Model::train_folds`]: one fit per fold of a k-fold partition.
//! - [`Model::train_path`]: a sequence of fits over a lambda grid on one
//!   split, each warm-started from the previous solution.
//!
//! Each driver obtains its partition through the model's caching operations,
//! so repeated calls with unchanged inputs never re-read the data source.

use crate::model::{FitError, Model, Partition};
use crate::results::{FoldResults, PointResults, RegPathResults, SplitResults};
use crate::solvers::{Problem, Solver, SolverError};
use crate::source::DataSource;
use crate::split::TrainFrac;
use ndarray::{Array2, ArrayView2, Axis};

/// Options for [`Model::train`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    pub lambda: f64,
    /// `None` keeps the cached split's fraction, or the configured default if there is none.
    pub train_frac: Option<TrainFrac>,
    pub resplit: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            lambda: 1e-10,
            train_frac: None,
            resplit: false,
        }
    }
}

/// Options for [`Model::train_folds`].
#[derive(Debug, Clone, PartialEq)]
pub struct FoldOptions {
    pub lambda: f64,
    pub nfolds: usize,
    pub resplit: bool,
}

impl Default for FoldOptions {
    fn default() -> Self {
        Self {
            lambda: 1e-10,
            nfolds: 5,
            resplit: false,
        }
    }
}

/// Options for [`Model::train_path`].
#[derive(Debug, Clone, PartialEq)]
pub struct PathOptions {
    /// Fitted in the given order; warm starts follow this order.
    pub lambdas: Vec<f64>,
    pub train_frac: TrainFrac,
    pub resplit: bool,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            lambdas: default_lambda_grid(),
            train_frac: TrainFrac::Fraction(0.8),
            resplit: false,
        }
    }
}

/// Thirteen log-spaced values from `1e-4` to `1e2`, ascending.
pub fn default_lambda_grid() -> Vec<f64> {
    (0..13).map(|i| 10f64.powf(-4.0 + 0.5 * i as f64)).collect()
}

/// Row-selected training and held-out matrices for one fit.
struct FitData<'a> {
    xtrain: ArrayView2<'a, f64>,
    ytrain: ArrayView2<'a, f64>,
    xtest: ArrayView2<'a, f64>,
    ytest: ArrayView2<'a, f64>,
}

impl<S: DataSource> Model<S> {
    /// Fits once at `options.lambda` on the training rows and scores both row sets.
    pub fn train(&mut self, options: &TrainOptions) -> Result<&PointResults, FitError> {
        self.warn_if_featureless();
        let train_frac = match &options.train_frac {
            Some(frac) => frac.clone(),
            None => self
                .partition
                .as_split()
                .map(|split| split.train_frac.clone())
                .unwrap_or(TrainFrac::Fraction(self.config.default_train_frac)),
        };
        self.split_train_test(train_frac, options.resplit, false)?;
        self.assign_solver();

        let result = {
            let split = self
                .partition
                .as_split()
                .ok_or(FitError::CacheUnavailable("train/test split"))?;
            let data = FitData {
                xtrain: split.xtrain.view(),
                ytrain: split.ytrain.view(),
                xtest: split.xtest.view(),
                ytest: split.ytest.view(),
            };
            self.train_x(&data, options.lambda, None)?
        };

        if self.config.verbose {
            log::info!("{result}");
        }
        self.is_trained = true;
        match &mut self.partition {
            Partition::Split(split) => {
                split.results = SplitResults::Point(result);
                match &split.results {
                    SplitResults::Point(point) => Ok(point),
                    _ => Err(FitError::CacheUnavailable("point results")),
                }
            }
            _ => Err(FitError::CacheUnavailable("train/test split")),
        }
    }

    /// Fits once per fold on the kept rows and scores on the held-out rows.
    pub fn train_folds(&mut self, options: &FoldOptions) -> Result<&FoldResults, FitError> {
        self.warn_if_featureless();
        self.split_folds(options.nfolds, options.resplit, false)?;
        self.assign_solver();

        let results = {
            let data = self.current_data()?;
            let folded = self
                .partition
                .as_folded()
                .ok_or(FitError::CacheUnavailable("fold partition"))?;
            let mut fits = Vec::with_capacity(folded.folds.len());
            for (i, fold) in folded.folds.iter().enumerate() {
                let xtrain = data.x.select(Axis(0), &fold.kept);
                let ytrain = data.y.select(Axis(0), &fold.kept);
                let xtest = data.x.select(Axis(0), &fold.held_out);
                let ytest = data.y.select(Axis(0), &fold.held_out);
                let fit_data = FitData {
                    xtrain: xtrain.view(),
                    ytrain: ytrain.view(),
                    xtest: xtest.view(),
                    ytest: ytest.view(),
                };
                let fit = self.train_x(&fit_data, options.lambda, None)?;
                log::debug!("Fold {} of {}: {}", i + 1, folded.folds.len(), fit);
                fits.push(fit);
            }
            FoldResults::new(fits)
        };

        if self.config.verbose {
            log::info!("{results}");
        }
        self.is_trained = true;
        match &mut self.partition {
            Partition::Folded(folded) => Ok(folded.results.insert(results)),
            _ => Err(FitError::CacheUnavailable("fold partition")),
        }
    }

    /// Fits along `options.lambdas` in order, warm-starting each fit from the previous one.
    pub fn train_path(&mut self, options: &PathOptions) -> Result<&RegPathResults, FitError> {
        if options.lambdas.is_empty() {
            return Err(FitError::EmptyLambdaGrid);
        }
        self.warn_if_featureless();
        self.split_train_test(options.train_frac.clone(), options.resplit, false)?;
        self.assign_solver();

        let results = {
            let split = self
                .partition
                .as_split()
                .ok_or(FitError::CacheUnavailable("train/test split"))?;
            let data = FitData {
                xtrain: split.xtrain.view(),
                ytrain: split.ytrain.view(),
                xtest: split.xtest.view(),
                ytest: split.ytest.view(),
            };
            let mut points: Vec<PointResults> = Vec::with_capacity(options.lambdas.len());
            for &lambda in &options.lambdas {
                let guess = points.last().map(|previous| previous.theta().view());
                let point = self.train_x(&data, lambda, guess)?;
                log::debug!("Path point: {point}");
                points.push(point);
            }
            RegPathResults::new(points).ok_or(FitError::EmptyLambdaGrid)?
        };

        if self.config.verbose {
            log::info!("{results}");
        }
        self.is_trained = true;
        match &mut self.partition {
            Partition::Split(split) => {
                split.results = SplitResults::Path(results);
                match &split.results {
                    SplitResults::Path(path) => Ok(path),
                    _ => Err(FitError::CacheUnavailable("path results")),
                }
            }
            _ => Err(FitError::CacheUnavailable("train/test split")),
        }
    }

    /// One fit at `lambda`, scored on both row sets.
    fn train_x<'a>(
        &'a self,
        data: &FitData<'a>,
        lambda: f64,
        theta_guess: Option<ArrayView2<'_, f64>>,
    ) -> Result<PointResults, FitError> {
        if let Some(value) = self.loss.invalid_target(data.ytest) {
            return Err(SolverError::InvalidTarget {
                loss: self.loss.kind(),
                value,
            }
            .into());
        }
        let regweights = self
            .regweights()
            .ok_or(FitError::CacheUnavailable("regularization weights"))?;

        let resolved: Box<dyn Solver>;
        let solver: &dyn Solver = match self.solver.solver() {
            Some(solver) => solver,
            None => {
                resolved = self.registry.lookup(self.loss.kind(), self.reg.kind());
                resolved.as_ref()
            }
        };

        let problem = Problem {
            loss: self.loss.as_ref(),
            reg: self.reg.as_ref(),
            regweights,
            x: data.xtrain,
            y: data.ytrain,
            lambda,
        };
        let theta: Array2<f64> = solver.solve(&problem, theta_guess)?;

        let train_pred = self.loss.predict(data.xtrain, theta.view());
        let test_pred = self.loss.predict(data.xtest, theta.view());
        let train_loss = self.loss.value(train_pred.view(), data.ytrain);
        let test_loss = self.loss.value(test_pred.view(), data.ytest);
        Ok(PointResults::new(theta, lambda, train_loss, test_loss))
    }

    fn warn_if_featureless(&self) {
        for warning in self.featureless_warnings() {
            log::warn!("{warning}");
        }
    }

    /// Messages for each side of the embedding that has no features yet.
    pub(crate) fn featureless_warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if self.source.num_input_features() == 0 {
            warnings.push(
                "The data source has no input features. \
                 Add features or use the default embedding before training.",
            );
        }
        if self.source.num_target_features() == 0 {
            warnings.push(
                "The data source has no target features. Add a target feature before training.",
            );
        }
        warnings
    }
}
