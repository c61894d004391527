//! # Fit Results
//!
//! Immutable records produced by the fit drivers. Losses are the unregularized
//! loss of the fitted parameters on the training rows and on the held-out rows.

use ndarray::Array2;
use serde::Serialize;
use std::fmt;

/// Scalar summary shared by every result record.
pub trait LossSummary {
    /// Training loss of the reported fit.
    fn train_loss(&self) -> f64;
    /// Held-out loss of the reported fit.
    fn test_loss(&self) -> f64;
    /// Regularization weight of the reported fit.
    fn lambda_opt(&self) -> f64;
}

/// Outcome of one fit at one regularization weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointResults {
    theta: Array2<f64>,
    lambda: f64,
    train_loss: f64,
    test_loss: f64,
}

impl PointResults {
    pub fn new(theta: Array2<f64>, lambda: f64, train_loss: f64, test_loss: f64) -> Self {
        Self {
            theta,
            lambda,
            train_loss,
            test_loss,
        }
    }

    /// Fitted `d × p` parameter matrix.
    pub fn theta(&self) -> &Array2<f64> {
        &self.theta
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}

impl LossSummary for PointResults {
    fn train_loss(&self) -> f64 {
        self.train_loss
    }

    fn test_loss(&self) -> f64 {
        self.test_loss
    }

    fn lambda_opt(&self) -> f64 {
        self.lambda
    }
}

impl fmt::Display for PointResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lambda = {:.3e}: train loss {:.6e}, test loss {:.6e}",
            self.lambda, self.train_loss, self.test_loss
        )
    }
}

/// One [`PointResults`] per fold of a cross-validation run, in fold order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldResults {
    folds: Vec<PointResults>,
}

impl FoldResults {
    pub fn new(folds: Vec<PointResults>) -> Self {
        Self { folds }
    }

    pub fn folds(&self) -> &[PointResults] {
        &self.folds
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    pub fn train_losses(&self) -> Vec<f64> {
        self.folds.iter().map(LossSummary::train_loss).collect()
    }

    pub fn test_losses(&self) -> Vec<f64> {
        self.folds.iter().map(LossSummary::test_loss).collect()
    }

    pub fn mean_train_loss(&self) -> f64 {
        mean(&self.train_losses())
    }

    pub fn mean_test_loss(&self) -> f64 {
        mean(&self.test_losses())
    }
}

impl LossSummary for FoldResults {
    fn train_loss(&self) -> f64 {
        self.mean_train_loss()
    }

    fn test_loss(&self) -> f64 {
        self.mean_test_loss()
    }

    fn lambda_opt(&self) -> f64 {
        self.folds.first().map_or(f64::NAN, PointResults::lambda)
    }
}

impl fmt::Display for FoldResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}-fold cross-validation: mean train loss {:.6e}, mean test loss {:.6e}",
            self.folds.len(),
            self.mean_train_loss(),
            self.mean_test_loss()
        )?;
        for (i, fold) in self.folds.iter().enumerate() {
            writeln!(f, "  fold {}: {}", i + 1, fold)?;
        }
        Ok(())
    }
}

/// A regularization path: one fit per lambda, in the order the lambdas were given.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegPathResults {
    points: Vec<PointResults>,
    imin: usize,
}

impl RegPathResults {
    /// Returns `None` for an empty path, which has no optimum.
    pub fn new(points: Vec<PointResults>) -> Option<Self> {
        let imin = points
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.test_loss.total_cmp(&b.test_loss))
            .map(|(i, _)| i)?;
        Some(Self { points, imin })
    }

    pub fn points(&self) -> &[PointResults] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn lambdas(&self) -> Vec<f64> {
        self.points.iter().map(PointResults::lambda).collect()
    }

    pub fn train_losses(&self) -> Vec<f64> {
        self.points.iter().map(LossSummary::train_loss).collect()
    }

    pub fn test_losses(&self) -> Vec<f64> {
        self.points.iter().map(LossSummary::test_loss).collect()
    }

    /// Index of the lowest test loss; the first one wins a tie.
    pub fn imin(&self) -> usize {
        self.imin
    }

    pub fn best(&self) -> &PointResults {
        &self.points[self.imin]
    }
}

impl LossSummary for RegPathResults {
    fn train_loss(&self) -> f64 {
        self.best().train_loss
    }

    fn test_loss(&self) -> f64 {
        self.best().test_loss
    }

    fn lambda_opt(&self) -> f64 {
        self.best().lambda
    }
}

impl fmt::Display for RegPathResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Regularization path over {} values: best lambda {:.3e} (index {}), test loss {:.6e}",
            self.points.len(),
            self.lambda_opt(),
            self.imin,
            self.test_loss()
        )?;
        for (i, point) in self.points.iter().enumerate() {
            let marker = if i == self.imin { '*' } else { ' ' };
            writeln!(f, " {marker} {point}")?;
        }
        Ok(())
    }
}

/// Whatever results a train/test split currently holds.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SplitResults {
    #[default]
    None,
    Point(PointResults),
    Path(RegPathResults),
}

/// Borrowed view of the model's most recent results, whichever kind they are.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitResults<'a> {
    Point(&'a PointResults),
    Folds(&'a FoldResults),
    Path(&'a RegPathResults),
}

impl FitResults<'_> {
    pub fn summary(&self) -> &dyn LossSummary {
        match *self {
            FitResults::Point(r) => r,
            FitResults::Folds(r) => r,
            FitResults::Path(r) => r,
        }
    }
}

impl fmt::Display for FitResults<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitResults::Point(r) => write!(f, "{r}"),
            FitResults::Folds(r) => write!(f, "{r}"),
            FitResults::Path(r) => write!(f, "{r}"),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
