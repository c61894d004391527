//! Supervised regularizers.
//!
//! Parameters are `d × p` matrices (one row per feature, one column per
//! target). Each regularizer weighs row `j` by `weights[j]`, so a feature
//! with weight zero (typically the intercept) is never penalized.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a regularizer family for solver lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegKind {
    Zero,
    Quad,
    One,
}

impl fmt::Display for RegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegKind::Zero => "none",
            RegKind::Quad => "ridge",
            RegKind::One => "lasso",
        };
        f.write_str(name)
    }
}

/// The contract every supervised regularizer satisfies.
pub trait Regularizer: fmt::Debug {
    fn kind(&self) -> RegKind;

    /// Penalty value for `theta` under per-feature `weights`.
    fn value(&self, theta: ArrayView2<f64>, weights: ArrayView1<f64>) -> f64;

    /// Proximal map of `alpha * value(·, weights)` evaluated at `theta`.
    fn prox(&self, theta: ArrayView2<f64>, weights: ArrayView1<f64>, alpha: f64) -> Array2<f64>;
}

/// No penalty.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroReg;

impl Regularizer for ZeroReg {
    fn kind(&self) -> RegKind {
        RegKind::Zero
    }

    fn value(&self, _: ArrayView2<f64>, _: ArrayView1<f64>) -> f64 {
        0.0
    }

    fn prox(&self, theta: ArrayView2<f64>, _: ArrayView1<f64>, _: f64) -> Array2<f64> {
        theta.to_owned()
    }
}

/// Weighted ridge penalty, `Σ_j w_j ‖θ_j‖²`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadReg;

impl Regularizer for QuadReg {
    fn kind(&self) -> RegKind {
        RegKind::Quad
    }

    fn value(&self, theta: ArrayView2<f64>, weights: ArrayView1<f64>) -> f64 {
        theta
            .axis_iter(Axis(0))
            .zip(weights.iter())
            .map(|(row, &w)| w * row.dot(&row))
            .sum()
    }

    fn prox(&self, theta: ArrayView2<f64>, weights: ArrayView1<f64>, alpha: f64) -> Array2<f64> {
        let mut out = theta.to_owned();
        for (mut row, &w) in out.axis_iter_mut(Axis(0)).zip(weights.iter()) {
            let shrink = 1.0 / (1.0 + 2.0 * alpha * w);
            row.mapv_inplace(|v| v * shrink);
        }
        out
    }
}

/// Weighted lasso penalty, `Σ_j w_j ‖θ_j‖₁`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneReg;

impl Regularizer for OneReg {
    fn kind(&self) -> RegKind {
        RegKind::One
    }

    fn value(&self, theta: ArrayView2<f64>, weights: ArrayView1<f64>) -> f64 {
        theta
            .axis_iter(Axis(0))
            .zip(weights.iter())
            .map(|(row, &w)| w * row.iter().map(|v| v.abs()).sum::<f64>())
            .sum()
    }

    fn prox(&self, theta: ArrayView2<f64>, weights: ArrayView1<f64>, alpha: f64) -> Array2<f64> {
        let mut out = theta.to_owned();
        for (mut row, &w) in out.axis_iter_mut(Axis(0)).zip(weights.iter()) {
            let threshold = alpha * w;
            row.mapv_inplace(|v| v.signum() * (v.abs() - threshold).max(0.0));
        }
        out
    }
}
