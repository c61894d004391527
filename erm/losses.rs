//! Supervised loss functions.
//!
//! A loss scores a prediction matrix against a target matrix of the same
//! shape. Values are sums over all entries (not means), so a train loss and
//! a test loss are on the scale of their own row counts.

use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a loss family for solver lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    Quad,
    Logistic,
    Huber,
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LossKind::Quad => "quadratic",
            LossKind::Logistic => "logistic",
            LossKind::Huber => "huber",
        };
        f.write_str(name)
    }
}

/// The contract every supervised loss satisfies.
pub trait Loss: fmt::Debug {
    fn kind(&self) -> LossKind;

    /// Total loss of `pred` against `y`.
    fn value(&self, pred: ArrayView2<f64>, y: ArrayView2<f64>) -> f64;

    /// Derivative of [`Loss::value`] with respect to each prediction entry.
    fn grad(&self, pred: ArrayView2<f64>, y: ArrayView2<f64>) -> Array2<f64>;

    /// First target value outside the loss's domain, if any. Every loss
    /// needs finite targets.
    fn invalid_target(&self, y: ArrayView2<f64>) -> Option<f64> {
        y.iter().copied().find(|t| !t.is_finite())
    }

    /// Linear predictions `x · theta` for a `d × p` parameter matrix.
    fn predict(&self, x: ArrayView2<f64>, theta: ArrayView2<f64>) -> Array2<f64> {
        x.dot(&theta)
    }
}

/// Squared error, `Σ (p - y)²`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadLoss;

impl Loss for QuadLoss {
    fn kind(&self) -> LossKind {
        LossKind::Quad
    }

    fn value(&self, pred: ArrayView2<f64>, y: ArrayView2<f64>) -> f64 {
        Zip::from(&pred)
            .and(&y)
            .fold(0.0, |acc, &p, &t| acc + (p - t) * (p - t))
    }

    fn grad(&self, pred: ArrayView2<f64>, y: ArrayView2<f64>) -> Array2<f64> {
        Zip::from(&pred).and(&y).map_collect(|&p, &t| 2.0 * (p - t))
    }
}

/// Logistic loss for labels in `{-1, +1}`, `Σ log(1 + exp(-y p))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogisticLoss;

impl Loss for LogisticLoss {
    fn kind(&self) -> LossKind {
        LossKind::Logistic
    }

    fn value(&self, pred: ArrayView2<f64>, y: ArrayView2<f64>) -> f64 {
        Zip::from(&pred)
            .and(&y)
            .fold(0.0, |acc, &p, &t| acc + softplus(-t * p))
    }

    fn grad(&self, pred: ArrayView2<f64>, y: ArrayView2<f64>) -> Array2<f64> {
        Zip::from(&pred)
            .and(&y)
            .map_collect(|&p, &t| -t * sigmoid(-t * p))
    }

    fn invalid_target(&self, y: ArrayView2<f64>) -> Option<f64> {
        y.iter().copied().find(|&t| t != 1.0 && t != -1.0)
    }
}

/// Huber loss: quadratic within `delta` of the target, linear beyond it.
#[derive(Debug, Clone, Copy)]
pub struct HuberLoss {
    pub delta: f64,
}

impl Default for HuberLoss {
    fn default() -> Self {
        Self { delta: 1.0 }
    }
}

impl Loss for HuberLoss {
    fn kind(&self) -> LossKind {
        LossKind::Huber
    }

    fn value(&self, pred: ArrayView2<f64>, y: ArrayView2<f64>) -> f64 {
        let delta = self.delta;
        Zip::from(&pred).and(&y).fold(0.0, |acc, &p, &t| {
            let r = (p - t).abs();
            if r <= delta {
                acc + 0.5 * r * r
            } else {
                acc + delta * (r - 0.5 * delta)
            }
        })
    }

    fn grad(&self, pred: ArrayView2<f64>, y: ArrayView2<f64>) -> Array2<f64> {
        let delta = self.delta;
        Zip::from(&pred)
            .and(&y)
            .map_collect(|&p, &t| (p - t).clamp(-delta, delta))
    }
}

/// Numerically stable `log(1 + exp(z))`.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
