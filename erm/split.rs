//! # Row Partitioning
//!
//! Randomized train/test splits and k-fold partitions over the row indices
//! `0..n` of a data set. The shape of every partition is deterministic (set
//! sizes follow from `n`, the fraction, and the fold count); only the
//! membership is random, and the random source is always supplied by the
//! caller so that a seeded generator reproduces a partition exactly.
//!
//! Every index set returned from this module is sorted ascending.

use itertools::Itertools;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while partitioning rows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplitError {
    #[error("Training fraction must lie in (0, 1], but was {0}.")]
    InvalidFraction(f64),

    #[error("Explicit training row {index} is out of range for a data set with {n} rows.")]
    RowOutOfRange { index: usize, n: usize },

    #[error("An explicit training row set must contain at least one row.")]
    EmptyRowSet,

    #[error(
        "Cannot partition {n} rows into {nfolds} folds. The fold count must satisfy 2 <= nfolds <= n."
    )]
    InvalidFoldCount { n: usize, nfolds: usize },

    #[error("Cannot split a data set with zero rows.")]
    NoRows,
}

/// How a fractional split assigns rows to the training set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMethod {
    /// Shuffle once and take exactly `round(frac * n)` rows for training.
    #[default]
    Permutation,
    /// Independent Bernoulli(frac) trial per row; the training set size is random.
    Bernoulli,
}

/// The requested training set: either a fraction of the rows or an explicit row set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainFrac {
    Fraction(f64),
    Rows(Vec<usize>),
}

impl From<f64> for TrainFrac {
    fn from(frac: f64) -> Self {
        TrainFrac::Fraction(frac)
    }
}

impl From<Vec<usize>> for TrainFrac {
    fn from(rows: Vec<usize>) -> Self {
        TrainFrac::Rows(rows)
    }
}

impl fmt::Display for TrainFrac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainFrac::Fraction(frac) => write!(f, "{frac}"),
            TrainFrac::Rows(rows) => write!(f, "{} explicit rows", rows.len()),
        }
    }
}

/// A disjoint, exhaustive train/test partition of `0..n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// One fold of a k-fold partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldRows {
    /// Rows evaluated in this fold.
    pub held_out: Vec<usize>,
    /// Rows the fold is trained on: the complement of `held_out`.
    pub kept: Vec<usize>,
}

/// Splits `0..n` into training and test rows.
///
/// An explicit row set is validated against `n`, deduplicated, and sorted; the
/// test set is its complement. A fraction must lie in `(0, 1]` and is applied
/// according to `method`.
pub fn split_rows<R: Rng + ?Sized>(
    n: usize,
    train_frac: &TrainFrac,
    method: SplitMethod,
    rng: &mut R,
) -> Result<RowSplit, SplitError> {
    match train_frac {
        TrainFrac::Rows(rows) => {
            if rows.is_empty() {
                return Err(SplitError::EmptyRowSet);
            }
            if let Some(&index) = rows.iter().find(|&&index| index >= n) {
                return Err(SplitError::RowOutOfRange { index, n });
            }
            let train: Vec<usize> = rows.iter().copied().sorted_unstable().dedup().collect();
            let test = complement(n, &train);
            Ok(RowSplit { train, test })
        }
        TrainFrac::Fraction(frac) => {
            let frac = *frac;
            if !(frac > 0.0 && frac <= 1.0) {
                return Err(SplitError::InvalidFraction(frac));
            }
            if n == 0 {
                return Err(SplitError::NoRows);
            }
            match method {
                SplitMethod::Permutation => {
                    let mut perm: Vec<usize> = (0..n).collect();
                    perm.shuffle(rng);
                    let ntrain = round_count(frac * n as f64).min(n);
                    let mut train = perm[..ntrain].to_vec();
                    let mut test = perm[ntrain..].to_vec();
                    train.sort_unstable();
                    test.sort_unstable();
                    Ok(RowSplit { train, test })
                }
                SplitMethod::Bernoulli => {
                    let (train, test): (Vec<usize>, Vec<usize>) =
                        (0..n).partition(|_| rng.gen_bool(frac));
                    Ok(RowSplit { train, test })
                }
            }
        }
    }
}

/// Partitions `0..n` into `nfolds` held-out groups drawn from one random permutation.
///
/// Group boundaries are `round(i * n / nfolds)`, so group sizes differ by at most
/// one. Because `nfolds <= n` is enforced, no group is ever empty.
pub fn fold_rows<R: Rng + ?Sized>(
    n: usize,
    nfolds: usize,
    rng: &mut R,
) -> Result<Vec<FoldRows>, SplitError> {
    if nfolds < 2 || nfolds > n {
        return Err(SplitError::InvalidFoldCount { n, nfolds });
    }

    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(rng);

    let bounds = fold_boundaries(n, nfolds);
    let folds = bounds
        .iter()
        .tuple_windows()
        .map(|(&start, &end)| {
            let mut held_out = perm[start..end].to_vec();
            held_out.sort_unstable();
            let kept = complement(n, &held_out);
            FoldRows { held_out, kept }
        })
        .collect();

    Ok(folds)
}

/// Fold boundaries `[0, round(n/k), round(2n/k), ..., n]`.
fn fold_boundaries(n: usize, nfolds: usize) -> Vec<usize> {
    (0..=nfolds)
        .map(|i| round_count((i * n) as f64 / nfolds as f64))
        .collect()
}

/// Round-half-to-even, matching the rounding used for every partition size.
fn round_count(value: f64) -> usize {
    value.round_ties_even().max(0.0) as usize
}

/// Sorted complement of a sorted index set within `0..n`.
fn complement(n: usize, sorted: &[usize]) -> Vec<usize> {
    let mut member = vec![false; n];
    for &index in sorted {
        member[index] = true;
    }
    (0..n).filter(|&index| !member[index]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn assert_partition(n: usize, a: &[usize], b: &[usize]) {
        let mut all: Vec<usize> = a.iter().chain(b.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn fraction_split_is_exhaustive_and_sized_by_rounding() {
        let mut rng = StdRng::seed_from_u64(11);
        for n in 1..60 {
            for &frac in &[0.1, 0.25, 0.5, 0.8, 0.95, 1.0] {
                let split =
                    split_rows(n, &TrainFrac::Fraction(frac), SplitMethod::Permutation, &mut rng)
                        .unwrap();
                assert_partition(n, &split.train, &split.test);
                assert_eq!(split.train.len(), round_count(frac * n as f64));
                assert!(split.train.windows(2).all(|w| w[0] < w[1]));
                assert!(split.test.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn half_split_rounds_ties_to_even() {
        let mut rng = StdRng::seed_from_u64(3);
        let split =
            split_rows(5, &TrainFrac::Fraction(0.5), SplitMethod::Permutation, &mut rng).unwrap();
        assert_eq!(split.train.len(), 2);
        assert_eq!(split.test.len(), 3);
    }

    #[test]
    fn bernoulli_split_is_exhaustive() {
        let mut rng = StdRng::seed_from_u64(5);
        let split =
            split_rows(200, &TrainFrac::Fraction(0.7), SplitMethod::Bernoulli, &mut rng).unwrap();
        assert_partition(200, &split.train, &split.test);
        // Random size, but nowhere near the extremes for n = 200.
        assert!(split.train.len() > 100 && split.train.len() < 180);
    }

    #[test]
    fn explicit_rows_are_sorted_and_complemented() {
        let mut rng = StdRng::seed_from_u64(0);
        let split = split_rows(
            6,
            &TrainFrac::Rows(vec![4, 0, 2, 2]),
            SplitMethod::Permutation,
            &mut rng,
        )
        .unwrap();
        assert_eq!(split.train, vec![0, 2, 4]);
        assert_eq!(split.test, vec![1, 3, 5]);
    }

    #[test]
    fn explicit_rows_out_of_range_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = split_rows(
            4,
            &TrainFrac::Rows(vec![0, 4]),
            SplitMethod::Permutation,
            &mut rng,
        )
        .unwrap_err();
        assert_eq!(err, SplitError::RowOutOfRange { index: 4, n: 4 });
    }

    #[test]
    fn invalid_fractions_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        for &frac in &[0.0, -0.5, 1.5, f64::NAN] {
            let result =
                split_rows(10, &TrainFrac::Fraction(frac), SplitMethod::Permutation, &mut rng);
            assert!(matches!(result, Err(SplitError::InvalidFraction(_))));
        }
    }

    #[test]
    fn folds_partition_every_row_exactly_once() {
        let mut rng = StdRng::seed_from_u64(17);
        for n in 2..40 {
            for nfolds in 2..=n.min(12) {
                let folds = fold_rows(n, nfolds, &mut rng).unwrap();
                assert_eq!(folds.len(), nfolds);

                let mut seen: Vec<usize> = folds
                    .iter()
                    .flat_map(|fold| fold.held_out.iter().copied())
                    .collect();
                seen.sort_unstable();
                assert_eq!(seen, (0..n).collect::<Vec<_>>());

                for fold in &folds {
                    assert!(!fold.held_out.is_empty());
                    assert_partition(n, &fold.held_out, &fold.kept);
                }
            }
        }
    }

    #[test]
    fn ten_rows_five_folds_gives_pairs() {
        let mut rng = StdRng::seed_from_u64(2);
        let folds = fold_rows(10, 5, &mut rng).unwrap();
        assert_eq!(folds.len(), 5);
        assert!(folds.iter().all(|fold| fold.held_out.len() == 2));
        assert!(folds.iter().all(|fold| fold.kept.len() == 8));
    }

    #[test]
    fn degenerate_fold_counts_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            fold_rows(3, 4, &mut rng).unwrap_err(),
            SplitError::InvalidFoldCount { n: 3, nfolds: 4 }
        );
        assert!(fold_rows(3, 1, &mut rng).is_err());
    }

    #[test]
    fn same_seed_reproduces_the_same_folds() {
        let first = fold_rows(23, 4, &mut StdRng::seed_from_u64(99)).unwrap();
        let second = fold_rows(23, 4, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(first, second);
    }
}
