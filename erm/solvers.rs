//! # Supervised Solvers
//!
//! A solver turns a regularized fitting problem
//!
//! ```text
//! minimize_θ  loss(predict(X, θ), Y) + λ · reg(θ; w)
//! ```
//!
//! into a parameter matrix `θ` of shape `d × p`. Solvers are strategy objects
//! behind the [`Solver`] trait. A model starts out holding the
//! [`SolverSlot::Default`] placeholder; the first fit resolves it through a
//! [`SolverRegistry`], a lookup table keyed by the `(loss kind, regularizer
//! kind)` pair that hands back the most specialized solver available.

use crate::losses::{Loss, LossKind};
use crate::regularizers::{RegKind, Regularizer};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip, s};
use ndarray_linalg::{QR, SVD};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised by a solver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("The design matrix has {x_rows} rows but the target matrix has {y_rows}.")]
    RowMismatch { x_rows: usize, y_rows: usize },

    #[error(
        "Regularization weights have length {found}, but the design matrix has {expected} columns."
    )]
    WeightLengthMismatch { found: usize, expected: usize },

    #[error("The initial parameter guess has shape {found:?}, expected {expected:?}.")]
    GuessShapeMismatch {
        found: (usize, usize),
        expected: (usize, usize),
    },

    #[error("Target value {value} is outside the domain of the {loss} loss.")]
    InvalidTarget { loss: LossKind, value: f64 },

    #[error("Regularization strength must be finite and non-negative, but was {0}.")]
    InvalidLambda(f64),

    #[error("The objective became non-finite at iteration {iteration}.")]
    NonFiniteObjective { iteration: usize },

    #[error("A linear system solve failed. The design may be singular. Error: {0}")]
    LinearSystemSolveFailed(String),

    #[error("No convergence in {iterations} iterations (last change {last_change:e}).")]
    MaxIterationsReached { iterations: usize, last_change: f64 },

    #[error("Solver '{solver}' cannot handle a {loss} loss with a {reg} regularizer.")]
    UnsupportedProblem {
        solver: &'static str,
        loss: LossKind,
        reg: RegKind,
    },
}

/// Everything a solver needs to know about one fit.
#[derive(Clone, Copy)]
pub struct Problem<'a> {
    pub loss: &'a dyn Loss,
    pub reg: &'a dyn Regularizer,
    pub regweights: ArrayView1<'a, f64>,
    pub x: ArrayView2<'a, f64>,
    pub y: ArrayView2<'a, f64>,
    pub lambda: f64,
}

impl Problem<'_> {
    /// Shape of the parameter matrix, `(features, targets)`.
    pub fn theta_shape(&self) -> (usize, usize) {
        (self.x.ncols(), self.y.ncols())
    }

    /// Objective value `loss + λ · reg` at `theta`.
    pub fn objective(&self, theta: ArrayView2<f64>) -> f64 {
        let pred = self.loss.predict(self.x, theta);
        self.loss.value(pred.view(), self.y) + self.lambda * self.reg.value(theta, self.regweights)
    }

    fn validate(&self, theta_guess: Option<ArrayView2<f64>>) -> Result<(), SolverError> {
        if self.x.nrows() != self.y.nrows() {
            return Err(SolverError::RowMismatch {
                x_rows: self.x.nrows(),
                y_rows: self.y.nrows(),
            });
        }
        if self.regweights.len() != self.x.ncols() {
            return Err(SolverError::WeightLengthMismatch {
                found: self.regweights.len(),
                expected: self.x.ncols(),
            });
        }
        if let Some(value) = self.loss.invalid_target(self.y) {
            return Err(SolverError::InvalidTarget {
                loss: self.loss.kind(),
                value,
            });
        }
        if !(self.lambda.is_finite() && self.lambda >= 0.0) {
            return Err(SolverError::InvalidLambda(self.lambda));
        }
        if let Some(guess) = theta_guess {
            let found = guess.dim();
            let expected = self.theta_shape();
            if found != expected {
                return Err(SolverError::GuessShapeMismatch { found, expected });
            }
        }
        Ok(())
    }

    fn starting_point(&self, theta_guess: Option<ArrayView2<f64>>) -> Array2<f64> {
        match theta_guess {
            Some(guess) => guess.to_owned(),
            None => Array2::zeros(self.theta_shape()),
        }
    }
}

/// The contract every supervised solver satisfies.
pub trait Solver: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Fits `θ`, optionally warm-started from `theta_guess`.
    fn solve(
        &self,
        problem: &Problem<'_>,
        theta_guess: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, SolverError>;
}

/// The solver a model currently uses.
#[derive(Debug)]
pub enum SolverSlot {
    /// Placeholder: resolve from the registry at the next fit.
    Default,
    /// Chosen by the registry for the current loss and regularizer.
    Derived(Box<dyn Solver>),
    /// Set explicitly by the caller; survives loss and regularizer changes.
    Explicit(Box<dyn Solver>),
}

impl SolverSlot {
    pub fn solver(&self) -> Option<&dyn Solver> {
        match self {
            SolverSlot::Default => None,
            SolverSlot::Derived(solver) | SolverSlot::Explicit(solver) => Some(solver.as_ref()),
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, SolverSlot::Explicit(_))
    }
}

pub type SolverFactory = fn() -> Box<dyn Solver>;

/// Capability table from `(loss kind, regularizer kind)` to a solver factory.
#[derive(Debug, Clone)]
pub struct SolverRegistry {
    entries: HashMap<(LossKind, RegKind), SolverFactory>,
    fallback: SolverFactory,
}

impl Default for SolverRegistry {
    fn default() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
            fallback: || Box::new(ProxGradSolver::default()),
        };
        registry.register(LossKind::Quad, RegKind::Quad, || {
            Box::new(RidgeSolver)
        });
        registry.register(LossKind::Quad, RegKind::Zero, || {
            Box::new(RidgeSolver)
        });
        registry
    }
}

impl SolverRegistry {
    pub fn register(&mut self, loss: LossKind, reg: RegKind, factory: SolverFactory) {
        self.entries.insert((loss, reg), factory);
    }

    /// The registered solver for the pair, or the general proximal-gradient solver.
    pub fn lookup(&self, loss: LossKind, reg: RegKind) -> Box<dyn Solver> {
        let factory = self.entries.get(&(loss, reg)).unwrap_or(&self.fallback);
        factory()
    }
}

/// Resolves a solver for a loss/regularizer pair from the default registry.
pub fn get_solver(loss: &dyn Loss, reg: &dyn Regularizer) -> Box<dyn Solver> {
    SolverRegistry::default().lookup(loss.kind(), reg.kind())
}

/// Exact ridge regression as one least-squares solve of the augmented system
/// `[X; √(λW)] θ ≈ [Y; 0]`.
///
/// Columns are scaled to unit norm, the stack is reduced with a thin QR and
/// the small triangular factor is inverted through its SVD. Singular values
/// below `ε · max(m, n) · s_max` are dropped, so rank-deficient designs give
/// the minimum-norm solution. Warm starts are validated but not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RidgeSolver;

impl Solver for RidgeSolver {
    fn name(&self) -> &'static str {
        "ridge"
    }

    fn solve(
        &self,
        problem: &Problem<'_>,
        theta_guess: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, SolverError> {
        problem.validate(theta_guess)?;
        let (loss, reg) = (problem.loss.kind(), problem.reg.kind());
        if loss != LossKind::Quad || !matches!(reg, RegKind::Quad | RegKind::Zero) {
            return Err(SolverError::UnsupportedProblem {
                solver: self.name(),
                loss,
                reg,
            });
        }

        let (n, d) = (problem.x.nrows(), problem.x.ncols());
        let penalized: Vec<(usize, f64)> = if reg == RegKind::Quad {
            problem
                .regweights
                .iter()
                .enumerate()
                .map(|(j, &w)| (j, problem.lambda * w))
                .filter(|&(_, strength)| strength > 0.0)
                .collect()
        } else {
            Vec::new()
        };

        let rows = n + penalized.len();
        let mut a = Array2::zeros((rows, d));
        a.slice_mut(s![..n, ..]).assign(&problem.x);
        for (row, &(j, strength)) in penalized.iter().enumerate() {
            a[[n + row, j]] = strength.sqrt();
        }
        let mut b = Array2::zeros((rows, problem.y.ncols()));
        b.slice_mut(s![..n, ..]).assign(&problem.y);

        let scale: Array1<f64> = a
            .axis_iter(Axis(1))
            .map(|col| {
                let norm = col.dot(&col).sqrt();
                if norm > 0.0 { norm } else { 1.0 }
            })
            .collect();
        a /= &scale;

        let (q, r) = a.qr().map_err(|e| SolverError::LinearSystemSolveFailed(e.to_string()))?;
        let (u, sigma, vt) = r
            .svd(true, true)
            .map_err(|e| SolverError::LinearSystemSolveFailed(e.to_string()))?;
        let (u, vt) = u.zip(vt).ok_or_else(|| {
            SolverError::LinearSystemSolveFailed("SVD returned no singular vectors".to_string())
        })?;

        let s_max = sigma.iter().copied().fold(0.0_f64, f64::max);
        let cutoff = f64::EPSILON * rows.max(d) as f64 * s_max;
        let rank = sigma.iter().take_while(|&&sv| sv > cutoff).count();
        if rank < d {
            log::debug!(
                "Ridge system has numerical rank {rank} of {d}; using the minimum-norm solution."
            );
        }

        let mut projected = u.slice(s![.., ..rank]).t().dot(&q.t().dot(&b));
        for (mut row, &sv) in projected.axis_iter_mut(Axis(0)).zip(sigma.iter()) {
            row /= sv;
        }
        let mut theta = vt.slice(s![..rank, ..]).t().dot(&projected);
        theta /= &scale.insert_axis(Axis(1));
        if theta.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NonFiniteObjective { iteration: 0 });
        }
        Ok(theta)
    }
}

/// Proximal gradient descent with Beck–Teboulle backtracking. Handles any
/// differentiable loss paired with any regularizer that has a proximal map.
#[derive(Debug, Clone, Copy)]
pub struct ProxGradSolver {
    pub max_iters: usize,
    pub tol: f64,
    pub t_init: f64,
    pub beta: f64,
}

impl Default for ProxGradSolver {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            tol: 1e-9,
            t_init: 1.0,
            beta: 0.5,
        }
    }
}

impl Solver for ProxGradSolver {
    fn name(&self) -> &'static str {
        "proximal gradient"
    }

    fn solve(
        &self,
        problem: &Problem<'_>,
        theta_guess: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, SolverError> {
        problem.validate(theta_guess)?;
        let Problem {
            loss,
            reg,
            regweights,
            x,
            y,
            lambda,
        } = *problem;

        let mut theta = problem.starting_point(theta_guess);
        let mut step = self.t_init;
        let mut last_change = f64::INFINITY;

        for iteration in 0..self.max_iters {
            let pred = loss.predict(x, theta.view());
            let smooth = loss.value(pred.view(), y);
            if !smooth.is_finite() {
                return Err(SolverError::NonFiniteObjective { iteration });
            }
            let grad = x.t().dot(&loss.grad(pred.view(), y));

            let (candidate, diff) = loop {
                let moved = &theta - &(&grad * step);
                let candidate = reg.prox(moved.view(), regweights, step * lambda);
                let diff = &candidate - &theta;
                let candidate_pred = loss.predict(x, candidate.view());
                let candidate_smooth = loss.value(candidate_pred.view(), y);
                let model = smooth
                    + Zip::from(&grad).and(&diff).fold(0.0, |acc, &g, &d| acc + g * d)
                    + diff.iter().map(|d| d * d).sum::<f64>() / (2.0 * step);
                if candidate_smooth <= model || step < f64::EPSILON {
                    break (candidate, diff);
                }
                step *= self.beta;
            };

            let change = diff.iter().map(|d| d * d).sum::<f64>().sqrt();
            theta = candidate;
            let scale = theta.iter().map(|v| v * v).sum::<f64>().sqrt().max(1.0);
            if change <= self.tol * scale {
                log::debug!("Proximal gradient converged after {} iterations.", iteration + 1);
                return Ok(theta);
            }
            last_change = change;
            step /= self.beta;
        }
        log::warn!(
            "Proximal gradient hit {} iterations without converging (last change {:.3e}).",
            self.max_iters,
            last_change
        );
        Err(SolverError::MaxIterationsReached {
            iterations: self.max_iters,
            last_change,
        })
    }
}
