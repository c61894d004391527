//! # Regularized Empirical Risk Model
//!
//! A [`Model`] binds a [`DataSource`] to a loss, a regularizer, and a solver,
//! and owns every cache derived from the source:
//!
//! - the embedded matrices `X` and `Y` with their regularization weights,
//! - the current row partition (a train/test split or a set of folds),
//! - the results of the last fit on that partition.
//!
//! ### Cache validity
//!
//! Every mutation of the source's feature set bumps `data_version`. The data
//! cache and each partition record the version they were built from, and
//! anything built from an older version is stale. Reading a stale cache never
//! happens: the split operations re-read the source whenever the cached
//! partition is stale, absent, built with different parameters, or a re-read
//! is requested.

use crate::config::ModelConfig;
use crate::losses::Loss;
use crate::regularizers::Regularizer;
use crate::results::{FitResults, FoldResults, SplitResults};
use crate::solvers::{Solver, SolverError, SolverRegistry, SolverSlot};
use crate::source::{DataError, DataSource, FeatureSpec};
use crate::split::{FoldRows, SplitError, TrainFrac, fold_rows, split_rows};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

/// Errors surfaced by model operations and the fit drivers.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("Failed to read data from the source: {0}")]
    Data(#[from] DataError),

    #[error("Failed to partition the data: {0}")]
    Split(#[from] SplitError),

    #[error("The solver failed: {0}")]
    Solver(#[from] SolverError),

    #[error("The data source returned {x_rows} input rows but {y_rows} target rows.")]
    RowMismatch { x_rows: usize, y_rows: usize },

    #[error("The model holds no current {0}. This is a bug; please report it.")]
    CacheUnavailable(&'static str),

    #[error("A regularization path needs at least one lambda value.")]
    EmptyLambdaGrid,
}

/// A cached artifact tagged with the data version it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub enum Cached<T> {
    Stale,
    Valid { version: u64, value: T },
}

impl<T> Cached<T> {
    /// The cached value if it was built from `version`.
    pub fn current(&self, version: u64) -> Option<&T> {
        match self {
            Cached::Valid { version: built, value } if *built == version => Some(value),
            _ => None,
        }
    }

    pub fn is_current(&self, version: u64) -> bool {
        self.current(version).is_some()
    }
}

/// Embedded matrices read from the source, plus their regularization weights.
#[derive(Debug, Clone, PartialEq)]
pub struct DataCache {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    /// One weight per column of `x`. `None` until [`Model::set_regweights`] runs.
    pub regweights: Option<Array1<f64>>,
}

/// A train/test split with its materialized sub-matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitData {
    pub train_frac: TrainFrac,
    pub train_rows: Vec<usize>,
    pub test_rows: Vec<usize>,
    pub xtrain: Array2<f64>,
    pub ytrain: Array2<f64>,
    pub xtest: Array2<f64>,
    pub ytest: Array2<f64>,
    pub results: SplitResults,
    data_version: u64,
}

/// A k-fold partition. Fold matrices are selected from the data cache when fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldedData {
    pub nfolds: usize,
    pub folds: Vec<FoldRows>,
    pub results: Option<FoldResults>,
    data_version: u64,
}

/// The model's current row partition.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Partition {
    #[default]
    Unsplit,
    Split(SplitData),
    Folded(FoldedData),
}

impl Partition {
    pub fn as_split(&self) -> Option<&SplitData> {
        match self {
            Partition::Split(split) => Some(split),
            _ => None,
        }
    }

    pub fn as_folded(&self) -> Option<&FoldedData> {
        match self {
            Partition::Folded(folded) => Some(folded),
            _ => None,
        }
    }

    fn data_version(&self) -> Option<u64> {
        match self {
            Partition::Unsplit => None,
            Partition::Split(split) => Some(split.data_version),
            Partition::Folded(folded) => Some(folded.data_version),
        }
    }
}

/// A regularized empirical risk minimization model over a data source.
pub struct Model<S: DataSource> {
    pub(crate) source: S,
    pub(crate) loss: Box<dyn Loss>,
    pub(crate) reg: Box<dyn Regularizer>,
    pub(crate) solver: SolverSlot,
    pub(crate) registry: SolverRegistry,
    pub(crate) config: ModelConfig,
    pub(crate) rng: StdRng,
    pub(crate) data_version: u64,
    pub(crate) data: Cached<DataCache>,
    pub(crate) partition: Partition,
    pub(crate) is_trained: bool,
    pub(crate) embed_all_warning: bool,
    pub(crate) data_reads: usize,
}

impl<S: DataSource> Model<S> {
    /// Builds an untrained model. No data is read until the first split or fit.
    pub fn new(
        mut source: S,
        loss: Box<dyn Loss>,
        reg: Box<dyn Regularizer>,
        config: ModelConfig,
    ) -> Result<Self, FitError> {
        if config.embed_all {
            source.embed_all()?;
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            source,
            loss,
            reg,
            solver: SolverSlot::Default,
            registry: SolverRegistry::default(),
            embed_all_warning: config.embed_all,
            config,
            rng,
            data_version: 0,
            data: Cached::Stale,
            partition: Partition::Unsplit,
            is_trained: false,
            data_reads: 0,
        })
    }

    /// Replaces the registry used to resolve default solvers.
    pub fn with_registry(mut self, registry: SolverRegistry) -> Self {
        self.registry = registry;
        if !self.solver.is_explicit() {
            self.solver = SolverSlot::Default;
        }
        self
    }

    /// Re-reads `X` and `Y` from the source and recomputes the regularization weights.
    ///
    /// The previous partition is left in place but no longer matches the data.
    pub fn set_data(&mut self) -> Result<(), FitError> {
        let hints = self.config.embed_hints();
        let (x, y) = self.source.get_xy(&hints)?;
        self.data_reads += 1;
        if x.nrows() != y.nrows() {
            return Err(FitError::RowMismatch {
                x_rows: x.nrows(),
                y_rows: y.nrows(),
            });
        }
        // A re-read counts as a new data version even when the features are unchanged.
        self.data_version += 1;
        self.data = Cached::Valid {
            version: self.data_version,
            value: DataCache {
                x,
                y,
                regweights: None,
            },
        };
        self.set_regweights();
        Ok(())
    }

    /// Derives one weight per input column: `0` for a constant, non-zero
    /// column (an offset the regularizer must not shrink) and `1` otherwise.
    ///
    /// Does nothing if the data cache is stale.
    pub fn set_regweights(&mut self) {
        let version = self.data_version;
        if let Cached::Valid { version: built, value } = &mut self.data {
            if *built == version {
                value.regweights = Some(offset_weights(value.x.view()));
            }
        }
    }

    /// Ensures the partition is a train/test split for `train_frac` and returns it.
    ///
    /// The source is re-read and a fresh split drawn when `resplit` or `force`
    /// is set, when there is no cached split, when the cached split was drawn
    /// with a different `train_frac`, or when the data has changed since.
    pub fn split_train_test(
        &mut self,
        train_frac: TrainFrac,
        resplit: bool,
        force: bool,
    ) -> Result<&SplitData, FitError> {
        let reusable = !resplit
            && !force
            && self.partition_is_current()
            && self
                .partition
                .as_split()
                .is_some_and(|split| split.train_frac == train_frac);

        if !reusable {
            self.set_data()?;
            let split = self.draw_split(train_frac)?;
            if self.config.verbose {
                log::info!(
                    "Split {} rows into {} training and {} test rows.",
                    split.train_rows.len() + split.test_rows.len(),
                    split.train_rows.len(),
                    split.test_rows.len()
                );
            }
            self.partition = Partition::Split(split);
        }

        self.partition
            .as_split()
            .ok_or(FitError::CacheUnavailable("train/test split"))
    }

    /// Ensures the partition is an `nfolds`-fold partition and returns it.
    ///
    /// Re-reads and re-partitions under the same conditions as [`Model::split_train_test`].
    pub fn split_folds(
        &mut self,
        nfolds: usize,
        resplit: bool,
        force: bool,
    ) -> Result<&FoldedData, FitError> {
        let reusable = !resplit
            && !force
            && self.partition_is_current()
            && self
                .partition
                .as_folded()
                .is_some_and(|folded| folded.nfolds == nfolds);

        if !reusable {
            self.set_data()?;
            let n = self.current_data()?.x.nrows();
            let folds = fold_rows(n, nfolds, &mut self.rng)?;
            if self.config.verbose {
                log::info!("Partitioned {n} rows into {nfolds} folds.");
            }
            self.partition = Partition::Folded(FoldedData {
                nfolds,
                folds,
                results: None,
                data_version: self.data_version,
            });
        }

        self.partition
            .as_folded()
            .ok_or(FitError::CacheUnavailable("fold partition"))
    }

    /// Adds an input feature to the source and marks all derived data stale.
    pub fn add_feature_u(&mut self, spec: FeatureSpec) -> Result<(), FitError> {
        self.warn_after_embed_all();
        self.source.add_feature_u(spec)?;
        self.invalidate_data();
        Ok(())
    }

    /// Adds a target feature to the source and marks all derived data stale.
    pub fn add_feature_v(&mut self, spec: FeatureSpec) -> Result<(), FitError> {
        self.warn_after_embed_all();
        self.source.add_feature_v(spec)?;
        self.invalidate_data();
        Ok(())
    }

    /// Swaps the loss; a registry-chosen solver is re-derived for the pair.
    pub fn set_loss(&mut self, loss: Box<dyn Loss>) {
        self.loss = loss;
        self.rederive_solver();
    }

    /// Swaps the regularizer; a registry-chosen solver is re-derived for the pair.
    pub fn set_reg(&mut self, reg: Box<dyn Regularizer>) {
        self.reg = reg;
        self.rederive_solver();
    }

    /// Pins a solver, or returns to registry resolution with `None`.
    pub fn set_solver(&mut self, solver: Option<Box<dyn Solver>>) {
        self.solver = match solver {
            Some(solver) => SolverSlot::Explicit(solver),
            None => SolverSlot::Default,
        };
    }

    /// Resolves the placeholder solver from the registry. A no-op once resolved.
    pub fn assign_solver(&mut self) {
        if matches!(self.solver, SolverSlot::Default) {
            self.solver =
                SolverSlot::Derived(self.registry.lookup(self.loss.kind(), self.reg.kind()));
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn loss(&self) -> &dyn Loss {
        self.loss.as_ref()
    }

    pub fn reg(&self) -> &dyn Regularizer {
        self.reg.as_ref()
    }

    pub fn solver(&self) -> &SolverSlot {
        &self.solver
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// `X` if the data cache is current.
    pub fn x(&self) -> Option<ArrayView2<'_, f64>> {
        self.data.current(self.data_version).map(|data| data.x.view())
    }

    /// `Y` if the data cache is current.
    pub fn y(&self) -> Option<ArrayView2<'_, f64>> {
        self.data.current(self.data_version).map(|data| data.y.view())
    }

    pub fn regweights(&self) -> Option<ArrayView1<'_, f64>> {
        self.data
            .current(self.data_version)
            .and_then(|data| data.regweights.as_ref())
            .map(Array1::view)
    }

    /// Whether any fit has completed on this model.
    pub fn is_trained(&self) -> bool {
        self.is_trained
    }

    /// Number of times the source has been read.
    pub fn data_reads(&self) -> usize {
        self.data_reads
    }

    /// Results of the most recent fit on the current partition, if any.
    pub fn fit_results(&self) -> Option<FitResults<'_>> {
        match &self.partition {
            Partition::Unsplit => None,
            Partition::Split(split) => match &split.results {
                SplitResults::None => None,
                SplitResults::Point(point) => Some(FitResults::Point(point)),
                SplitResults::Path(path) => Some(FitResults::Path(path)),
            },
            Partition::Folded(folded) => folded.results.as_ref().map(FitResults::Folds),
        }
    }

    /// Human-readable summary of the model and its latest results.
    pub fn status(&self) -> String {
        let solver = self.solver.solver().map_or("unresolved", |s| s.name());
        let mut out = format!(
            "Model: {} loss, {} regularizer, {} solver\nFeatures: {} input, {} target\n",
            self.loss.kind(),
            self.reg.kind(),
            solver,
            self.source.num_input_features(),
            self.source.num_target_features()
        );
        match self.fit_results() {
            Some(results) => out.push_str(&results.to_string()),
            None => out.push_str("Not trained on the current partition.\n"),
        }
        out
    }

    pub(crate) fn current_data(&self) -> Result<&DataCache, FitError> {
        self.data
            .current(self.data_version)
            .ok_or(FitError::CacheUnavailable("data"))
    }

    fn partition_is_current(&self) -> bool {
        self.data.is_current(self.data_version)
            && self.partition.data_version() == Some(self.data_version)
    }

    fn draw_split(&mut self, train_frac: TrainFrac) -> Result<SplitData, FitError> {
        let data = self
            .data
            .current(self.data_version)
            .ok_or(FitError::CacheUnavailable("data"))?;
        let rows = split_rows(
            data.x.nrows(),
            &train_frac,
            self.config.split_method,
            &mut self.rng,
        )?;
        Ok(SplitData {
            xtrain: data.x.select(Axis(0), &rows.train),
            ytrain: data.y.select(Axis(0), &rows.train),
            xtest: data.x.select(Axis(0), &rows.test),
            ytest: data.y.select(Axis(0), &rows.test),
            train_frac,
            train_rows: rows.train,
            test_rows: rows.test,
            results: SplitResults::None,
            data_version: self.data_version,
        })
    }

    fn invalidate_data(&mut self) {
        self.data_version += 1;
        self.data = Cached::Stale;
    }

    fn rederive_solver(&mut self) {
        if !self.solver.is_explicit() {
            self.solver =
                SolverSlot::Derived(self.registry.lookup(self.loss.kind(), self.reg.kind()));
        }
    }

    fn warn_after_embed_all(&mut self) {
        if self.embed_all_warning {
            log::warn!(
                "Adding a feature to a model built with the default embedding. \
                 The added feature is appended to the automatic features."
            );
            self.embed_all_warning = false;
        }
    }
}

/// Weight 0 for columns with zero variance and non-zero norm, 1 for all others.
///
/// Zero variance is tested as exact constancy so rounding in the mean cannot
/// make a constant column look variable.
fn offset_weights(x: ArrayView2<f64>) -> Array1<f64> {
    x.axis_iter(Axis(1))
        .map(|col| {
            let constant = col.iter().all(|&v| v == col[0]);
            let nonzero = col.iter().any(|&v| v != 0.0);
            if constant && nonzero { 0.0 } else { 1.0 }
        })
        .collect()
}
