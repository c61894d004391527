//! # Unsupervised Factorization
//!
//! Approximates a data matrix `C` (`n × d`) by a product `X Yᵀ` of two
//! rank-`k` factors, `X` (`n × k`) and `Y` (`d × k`), by minimizing
//! `loss(C, X, Y) + reg(X)`. The loss is smooth and exposes a gradient with
//! respect to either factor block; the regularizer is only accessed through
//! its proximal map.
//!
//! The solver lives in [`optimizer`]; this module holds the contracts and the
//! stock losses and regularizers.

pub mod optimizer;

pub use optimizer::{AltProxGrad, AltProxGradOptions, FactorOutcome, Trajectory};

use ndarray::{Array2, ArrayView2, Zip};
use std::fmt;
use thiserror::Error;

/// Errors raised before or while setting up a factorization.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FactorError {
    #[error("The data matrix must have at least one row and one column, but has shape {0:?}.")]
    EmptyData((usize, usize)),

    #[error("The target rank must be at least 1.")]
    ZeroRank,

    #[error("Initial factor {factor} has shape {found:?}, but shape {expected:?} is required.")]
    InitialShapeMismatch {
        factor: &'static str,
        found: (usize, usize),
        expected: (usize, usize),
    },

    #[error("The observation mask has shape {found:?}, but the data matrix has shape {expected:?}.")]
    MaskShapeMismatch {
        found: (usize, usize),
        expected: (usize, usize),
    },

    #[error("The loss at the initial factors is not finite ({0}).")]
    NonFiniteInitialLoss(f64),

    #[error("Invalid optimizer option: {0}")]
    InvalidOptions(String),
}

/// Which factor a partial derivative is taken with respect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    X,
    Y,
}

/// A smooth loss over a data matrix and a pair of factors.
pub trait LossUnsupervised: fmt::Debug {
    fn eval(&self, c: ArrayView2<f64>, x: ArrayView2<f64>, y: ArrayView2<f64>) -> f64;

    /// Gradient with respect to `which`; it has the shape of that factor.
    fn deriv(
        &self,
        c: ArrayView2<f64>,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        which: Block,
    ) -> Array2<f64>;

    /// Rejects data the loss cannot be evaluated on.
    fn check(&self, c: ArrayView2<f64>) -> Result<(), FactorError> {
        let (n, d) = c.dim();
        if n == 0 || d == 0 {
            return Err(FactorError::EmptyData((n, d)));
        }
        Ok(())
    }
}

/// A regularizer on the `X` factor, used only through its proximal map.
pub trait RegularizerUnsupervised: fmt::Debug {
    /// Proximal map of `step * reg` at `m`.
    fn prox(&self, m: ArrayView2<f64>, step: f64) -> Array2<f64>;
}

impl<T: RegularizerUnsupervised + ?Sized> RegularizerUnsupervised for Box<T> {
    fn prox(&self, m: ArrayView2<f64>, step: f64) -> Array2<f64> {
        (**self).prox(m, step)
    }
}

impl<T: LossUnsupervised + ?Sized> LossUnsupervised for Box<T> {
    fn eval(&self, c: ArrayView2<f64>, x: ArrayView2<f64>, y: ArrayView2<f64>) -> f64 {
        (**self).eval(c, x, y)
    }

    fn deriv(
        &self,
        c: ArrayView2<f64>,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        which: Block,
    ) -> Array2<f64> {
        (**self).deriv(c, x, y, which)
    }

    fn check(&self, c: ArrayView2<f64>) -> Result<(), FactorError> {
        (**self).check(c)
    }
}

/// `½ ‖C − X Yᵀ‖²_F`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrobeniusLoss;

impl LossUnsupervised for FrobeniusLoss {
    fn eval(&self, c: ArrayView2<f64>, x: ArrayView2<f64>, y: ArrayView2<f64>) -> f64 {
        let approx = x.dot(&y.t());
        0.5 * Zip::from(&approx)
            .and(&c)
            .fold(0.0, |acc, &a, &t| acc + (a - t) * (a - t))
    }

    fn deriv(
        &self,
        c: ArrayView2<f64>,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        which: Block,
    ) -> Array2<f64> {
        let residual = x.dot(&y.t()) - c;
        match which {
            Block::X => residual.dot(&y),
            Block::Y => residual.t().dot(&x),
        }
    }
}

/// `½ Σ_{observed (i, j)} (C_ij − (X Yᵀ)_ij)²`, for matrix completion.
#[derive(Debug, Clone)]
pub struct MaskedFrobeniusLoss {
    observed: Array2<bool>,
}

impl MaskedFrobeniusLoss {
    /// `observed[[i, j]]` marks the entries of `C` that count toward the loss.
    pub fn new(observed: Array2<bool>) -> Self {
        Self { observed }
    }

    fn masked_residual(
        &self,
        c: ArrayView2<f64>,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
    ) -> Array2<f64> {
        let mut residual = x.dot(&y.t()) - c;
        Zip::from(&mut residual)
            .and(&self.observed)
            .for_each(|r, &seen| {
                if !seen {
                    *r = 0.0;
                }
            });
        residual
    }
}

impl LossUnsupervised for MaskedFrobeniusLoss {
    fn eval(&self, c: ArrayView2<f64>, x: ArrayView2<f64>, y: ArrayView2<f64>) -> f64 {
        let residual = self.masked_residual(c, x, y);
        0.5 * residual.iter().map(|r| r * r).sum::<f64>()
    }

    fn deriv(
        &self,
        c: ArrayView2<f64>,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        which: Block,
    ) -> Array2<f64> {
        let residual = self.masked_residual(c, x, y);
        match which {
            Block::X => residual.dot(&y),
            Block::Y => residual.t().dot(&x),
        }
    }

    fn check(&self, c: ArrayView2<f64>) -> Result<(), FactorError> {
        let (n, d) = c.dim();
        if n == 0 || d == 0 {
            return Err(FactorError::EmptyData((n, d)));
        }
        if self.observed.dim() != c.dim() {
            return Err(FactorError::MaskShapeMismatch {
                found: self.observed.dim(),
                expected: c.dim(),
            });
        }
        Ok(())
    }
}

/// No regularization; the proximal map is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroReg;

impl RegularizerUnsupervised for ZeroReg {
    fn prox(&self, m: ArrayView2<f64>, _: f64) -> Array2<f64> {
        m.to_owned()
    }
}

/// Indicator of the nonnegative orthant; the proximal map clips at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonNegReg;

impl RegularizerUnsupervised for NonNegReg {
    fn prox(&self, m: ArrayView2<f64>, _: f64) -> Array2<f64> {
        m.mapv(|v| v.max(0.0))
    }
}

/// `lambda ‖X‖₁`.
#[derive(Debug, Clone, Copy)]
pub struct OneReg {
    pub lambda: f64,
}

impl RegularizerUnsupervised for OneReg {
    fn prox(&self, m: ArrayView2<f64>, step: f64) -> Array2<f64> {
        let threshold = self.lambda * step;
        m.mapv(|v| v.signum() * (v.abs() - threshold).max(0.0))
    }
}

/// `lambda ‖X‖²_F`.
#[derive(Debug, Clone, Copy)]
pub struct QuadReg {
    pub lambda: f64,
}

impl RegularizerUnsupervised for QuadReg {
    fn prox(&self, m: ArrayView2<f64>, step: f64) -> Array2<f64> {
        let shrink = 1.0 / (1.0 + 2.0 * self.lambda * step);
        m.mapv(|v| v * shrink)
    }
}
