//! # Alternating Proximal Gradient
//!
//! Block-coordinate descent on `loss(C, X, Y) + reg(X)`. Each iteration takes
//! one backtracking proximal-gradient step on `X` with `Y` held fixed, then
//! one backtracking gradient step on `Y` with the new `X` held fixed.
//!
//! ### Step sizes
//!
//! Each block keeps its own step size across iterations. A search starts from
//! the block's current step and halves (by `beta`) until the candidate strictly
//! lowers the loss. An accepted step doubles the block's step for the next
//! iteration, so a successful step size persists and keeps growing across
//! iterations instead of restarting from `t_init`. Only a search that falls
//! below `t_min` leaves the block unchanged and restarts it from `t_init` on
//! the next iteration.
//!
//! Because a candidate is only accepted on strict decrease, the recorded loss
//! trajectory is non-increasing.

use super::{Block, FactorError, LossUnsupervised, RegularizerUnsupervised};
use ndarray::{Array2, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Step-size and stopping parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AltProxGradOptions {
    /// Starting step size for both blocks.
    pub t_init: f64,
    /// Backtracking shrink factor in `(0, 1)`.
    pub beta: f64,
    /// A block whose search shrinks below this step makes no progress.
    pub t_min: f64,
    /// Convergence threshold on the last four loss changes.
    pub tol: f64,
    pub max_iters: usize,
    /// Keep every iterate, not just the final factors.
    pub record_iterates: bool,
}

impl Default for AltProxGradOptions {
    fn default() -> Self {
        Self {
            t_init: 1.0,
            beta: 0.5,
            t_min: 1e-10,
            tol: 1e-8,
            max_iters: 5000,
            record_iterates: false,
        }
    }
}

impl AltProxGradOptions {
    pub fn validate(&self) -> Result<(), FactorError> {
        if !(self.t_init.is_finite() && self.t_init > 0.0) {
            return Err(FactorError::InvalidOptions(format!(
                "t_init must be positive and finite, got {}",
                self.t_init
            )));
        }
        if !(self.beta > 0.0 && self.beta < 1.0) {
            return Err(FactorError::InvalidOptions(format!(
                "beta must lie in (0, 1), got {}",
                self.beta
            )));
        }
        if !(self.t_min > 0.0 && self.t_min < self.t_init) {
            return Err(FactorError::InvalidOptions(format!(
                "t_min must lie in (0, t_init), got {}",
                self.t_min
            )));
        }
        if !(self.tol >= 0.0) {
            return Err(FactorError::InvalidOptions(format!(
                "tol must be non-negative, got {}",
                self.tol
            )));
        }
        if self.max_iters == 0 {
            return Err(FactorError::InvalidOptions(
                "max_iters must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the optimizer produced, whatever the outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    /// Final `n × k` factor.
    pub x: Array2<f64>,
    /// Final `d × k` factor.
    pub y: Array2<f64>,
    /// Loss at the initial factors followed by the loss after each iteration.
    pub losses: Vec<f64>,
    /// Completed iterations.
    pub iterations: usize,
    /// Every `(X, Y)` starting with the initial pair, when requested.
    pub iterates: Option<Vec<(Array2<f64>, Array2<f64>)>>,
}

/// How the optimizer stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorOutcome {
    /// The last four loss changes all fell below `tol`.
    Converged(Trajectory),
    /// Neither block could lower the loss in the same iteration.
    StalledNoProgress(Trajectory),
    /// `max_iters` iterations ran without meeting the tolerance.
    MaxIterationsExceeded(Trajectory),
}

impl FactorOutcome {
    pub fn trajectory(&self) -> &Trajectory {
        match self {
            FactorOutcome::Converged(t)
            | FactorOutcome::StalledNoProgress(t)
            | FactorOutcome::MaxIterationsExceeded(t) => t,
        }
    }

    pub fn into_trajectory(self) -> Trajectory {
        match self {
            FactorOutcome::Converged(t)
            | FactorOutcome::StalledNoProgress(t)
            | FactorOutcome::MaxIterationsExceeded(t) => t,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, FactorOutcome::Converged(_))
    }

    pub fn final_loss(&self) -> f64 {
        self.trajectory().losses.last().copied().unwrap_or(f64::NAN)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FactorOutcome::Converged(_) => "converged",
            FactorOutcome::StalledNoProgress(_) => "stalled (no progress)",
            FactorOutcome::MaxIterationsExceeded(_) => "max iterations exceeded",
        }
    }
}

/// Result of one block's backtracking search.
enum StepOutcome {
    Accepted(f64),
    NoProgress,
}

/// Alternating proximal-gradient factorizer.
#[derive(Debug, Clone)]
pub struct AltProxGrad<L, R> {
    pub loss: L,
    pub reg: R,
    pub options: AltProxGradOptions,
}

impl<L: LossUnsupervised, R: RegularizerUnsupervised> AltProxGrad<L, R> {
    pub fn new(loss: L, reg: R, options: AltProxGradOptions) -> Self {
        Self { loss, reg, options }
    }

    /// Factorizes `c` at rank `k`.
    ///
    /// `init` supplies `(X, Y)` with shapes `n × k` and `d × k`; when absent both
    /// factors are filled with independent uniform draws on `[0, 1)` from `rng`.
    pub fn fit<G: Rng + ?Sized>(
        &self,
        c: ArrayView2<f64>,
        k: usize,
        init: Option<(Array2<f64>, Array2<f64>)>,
        rng: &mut G,
    ) -> Result<FactorOutcome, FactorError> {
        self.options.validate()?;
        self.loss.check(c)?;
        if k == 0 {
            return Err(FactorError::ZeroRank);
        }
        let (n, d) = c.dim();

        let (mut x, mut y) = match init {
            Some((x, y)) => {
                if x.dim() != (n, k) {
                    return Err(FactorError::InitialShapeMismatch {
                        factor: "X",
                        found: x.dim(),
                        expected: (n, k),
                    });
                }
                if y.dim() != (d, k) {
                    return Err(FactorError::InitialShapeMismatch {
                        factor: "Y",
                        found: y.dim(),
                        expected: (d, k),
                    });
                }
                (x, y)
            }
            None => (
                Array2::from_shape_fn((n, k), |_| rng.r#gen::<f64>()),
                Array2::from_shape_fn((d, k), |_| rng.r#gen::<f64>()),
            ),
        };

        let initial = self.loss.eval(c, x.view(), y.view());
        if !initial.is_finite() {
            return Err(FactorError::NonFiniteInitialLoss(initial));
        }

        let opts = self.options;
        let mut losses = vec![initial];
        let mut iterates = opts
            .record_iterates
            .then(|| vec![(x.clone(), y.clone())]);
        let mut t_x = opts.t_init;
        let mut t_y = opts.t_init;

        for iteration in 1..=opts.max_iters {
            let current = losses.last().copied().unwrap_or(initial);

            let x_step = self.step_block(c, &mut x, &y, Block::X, &mut t_x, current);
            let after_x = match x_step {
                StepOutcome::Accepted(loss) => loss,
                StepOutcome::NoProgress => current,
            };
            let y_step = self.step_block(c, &mut y, &x, Block::Y, &mut t_y, after_x);
            let after_y = match y_step {
                StepOutcome::Accepted(loss) => loss,
                StepOutcome::NoProgress => after_x,
            };

            losses.push(after_y);
            if let Some(history) = iterates.as_mut() {
                history.push((x.clone(), y.clone()));
            }
            log::debug!(
                "Iteration {iteration}: loss {after_y:.6e}, t_x {t_x:.3e}, t_y {t_y:.3e}"
            );

            let stalled = matches!(x_step, StepOutcome::NoProgress)
                && matches!(y_step, StepOutcome::NoProgress);
            if stalled {
                log::debug!("No block made progress at iteration {iteration}.");
                return Ok(FactorOutcome::StalledNoProgress(Trajectory {
                    x,
                    y,
                    losses,
                    iterations: iteration,
                    iterates,
                }));
            }

            if iteration > 4 && recent_change(&losses) < opts.tol {
                log::debug!("Converged after {iteration} iterations.");
                return Ok(FactorOutcome::Converged(Trajectory {
                    x,
                    y,
                    losses,
                    iterations: iteration,
                    iterates,
                }));
            }
        }

        log::debug!("Reached {} iterations without converging.", opts.max_iters);
        Ok(FactorOutcome::MaxIterationsExceeded(Trajectory {
            x,
            y,
            losses,
            iterations: opts.max_iters,
            iterates,
        }))
    }

    /// One backtracking step on `block` (either factor) with `other` held fixed.
    ///
    /// The regularizer's proximal map applies to `X` steps only.
    fn step_block(
        &self,
        c: ArrayView2<f64>,
        block: &mut Array2<f64>,
        other: &Array2<f64>,
        which: Block,
        step: &mut f64,
        current: f64,
    ) -> StepOutcome {
        let grad = match which {
            Block::X => self.loss.deriv(c, block.view(), other.view(), which),
            Block::Y => self.loss.deriv(c, other.view(), block.view(), which),
        };
        let mut t = *step;
        loop {
            let moved = &*block - &(&grad * t);
            let candidate = match which {
                Block::X => self.reg.prox(moved.view(), t),
                Block::Y => moved,
            };
            let loss = match which {
                Block::X => self.loss.eval(c, candidate.view(), other.view()),
                Block::Y => self.loss.eval(c, other.view(), candidate.view()),
            };
            if loss < current {
                *block = candidate;
                *step = 2.0 * t;
                return StepOutcome::Accepted(loss);
            }
            t *= self.options.beta;
            if t < self.options.t_min {
                *step = self.options.t_init;
                return StepOutcome::NoProgress;
            }
        }
    }
}

/// Largest absolute change among the last four recorded losses.
fn recent_change(losses: &[f64]) -> f64 {
    losses[losses.len().saturating_sub(5)..]
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::{FrobeniusLoss, NonNegReg, ZeroReg};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn solver() -> AltProxGrad<FrobeniusLoss, ZeroReg> {
        AltProxGrad::new(FrobeniusLoss, ZeroReg, AltProxGradOptions::default())
    }

    #[test]
    fn mismatched_initial_factors_are_rejected() {
        let c = Array2::<f64>::ones((4, 3));
        let mut rng = StdRng::seed_from_u64(0);
        let err = solver()
            .fit(c.view(), 2, Some((Array2::ones((4, 2)), Array2::ones((4, 2)))), &mut rng)
            .unwrap_err();
        assert_eq!(
            err,
            FactorError::InitialShapeMismatch {
                factor: "Y",
                found: (4, 2),
                expected: (3, 2)
            }
        );
        assert_eq!(
            solver().fit(c.view(), 0, None, &mut rng).unwrap_err(),
            FactorError::ZeroRank
        );
    }

    #[test]
    fn exact_start_stalls_immediately() {
        // At an exact factorization no candidate can strictly lower a zero loss.
        let c = Array2::<f64>::ones((4, 3));
        let init = (Array2::ones((4, 1)), Array2::ones((3, 1)));
        let mut rng = StdRng::seed_from_u64(0);
        let outcome = solver().fit(c.view(), 1, Some(init), &mut rng).unwrap();
        assert!(matches!(outcome, FactorOutcome::StalledNoProgress(_)));
        assert_eq!(outcome.trajectory().iterations, 1);
        assert_abs_diff_eq!(outcome.final_loss(), 0.0);
    }

    #[test]
    fn iteration_budget_is_reported() {
        let c = array![[3.0, 1.0, 0.5], [1.0, 2.0, 4.0], [0.0, 1.5, 1.0]];
        let options = AltProxGradOptions {
            max_iters: 2,
            ..AltProxGradOptions::default()
        };
        let mut rng = StdRng::seed_from_u64(4);
        let outcome = AltProxGrad::new(FrobeniusLoss, ZeroReg, options)
            .fit(c.view(), 1, None, &mut rng)
            .unwrap();
        assert!(matches!(outcome, FactorOutcome::MaxIterationsExceeded(_)));
        assert_eq!(outcome.trajectory().losses.len(), 3);
        assert!(!outcome.is_converged());
    }

    #[test]
    fn iterates_are_recorded_on_request() {
        let c = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let options = AltProxGradOptions {
            record_iterates: true,
            ..AltProxGradOptions::default()
        };
        let mut rng = StdRng::seed_from_u64(8);
        let outcome = AltProxGrad::new(FrobeniusLoss, NonNegReg, options)
            .fit(c.view(), 1, None, &mut rng)
            .unwrap();
        let trajectory = outcome.trajectory();
        let iterates = trajectory.iterates.as_ref().unwrap();
        assert_eq!(iterates.len(), trajectory.losses.len());
        assert!(trajectory.x.iter().all(|&v| v >= 0.0));
        assert!(trajectory.losses.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn accepted_steps_persist_and_failed_searches_reset() {
        let c = array![[4.0]];
        let mut x = array![[1.0]];
        let y = array![[1.0]];
        let solver = solver();
        let mut step = solver.options.t_init;

        let first = solver.step_block(c.view(), &mut x, &y, Block::X, &mut step, 4.5);
        assert!(matches!(first, StepOutcome::Accepted(loss) if loss == 0.0));
        assert_eq!(x, array![[4.0]]);
        assert_abs_diff_eq!(step, 2.0 * solver.options.t_init);

        // Already exact, so no step can strictly lower the loss.
        let second = solver.step_block(c.view(), &mut x, &y, Block::X, &mut step, 0.0);
        assert!(matches!(second, StepOutcome::NoProgress));
        assert_eq!(x, array![[4.0]]);
        assert_abs_diff_eq!(step, solver.options.t_init);
    }

    #[test]
    fn recent_change_looks_at_four_differences() {
        let losses = [10.0, 5.0, 4.0, 3.9, 3.89, 3.889];
        assert_abs_diff_eq!(recent_change(&losses), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(recent_change(&losses[1..]), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(recent_change(&losses[2..]), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let options = AltProxGradOptions {
            beta: 1.5,
            ..AltProxGradOptions::default()
        };
        let c = Array2::<f64>::ones((2, 2));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            AltProxGrad::new(FrobeniusLoss, ZeroReg, options).fit(c.view(), 1, None, &mut rng),
            Err(FactorError::InvalidOptions(_))
        ));
    }
}
