use approx::assert_abs_diff_eq;
use ermkit::factor::{
    AltProxGrad, AltProxGradOptions, FactorOutcome, FrobeniusLoss, LossUnsupervised,
    MaskedFrobeniusLoss, NonNegReg, ZeroReg,
};
use ndarray::{Array2, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn options() -> AltProxGradOptions {
    AltProxGradOptions {
        max_iters: 5000,
        tol: 1e-8,
        ..AltProxGradOptions::default()
    }
}

fn assert_non_increasing(losses: &[f64]) {
    for w in losses.windows(2) {
        assert!(w[1] <= w[0], "loss increased from {} to {}", w[0], w[1]);
    }
}

#[test]
fn all_ones_matrix_is_recovered_at_rank_one() {
    let c = Array2::<f64>::ones((4, 3));
    let mut rng = StdRng::seed_from_u64(42);
    let outcome = AltProxGrad::new(FrobeniusLoss, ZeroReg, options())
        .fit(c.view(), 1, None, &mut rng)
        .unwrap();

    assert!(outcome.final_loss() < 1e-6, "final loss {}", outcome.final_loss());
    let trajectory = outcome.trajectory();
    assert_non_increasing(&trajectory.losses);
    assert_eq!(trajectory.losses.len(), trajectory.iterations + 1);

    let approx = trajectory.x.dot(&trajectory.y.t());
    for (a, t) in approx.iter().zip(c.iter()) {
        assert_abs_diff_eq!(*a, *t, epsilon = 1e-3);
    }
}

#[test]
fn exact_low_rank_matrix_converges_to_near_zero_loss() {
    let mut rng = StdRng::seed_from_u64(7);
    let left = Array2::from_shape_fn((6, 2), |_| rng.gen_range(-1.0..1.0));
    let right = Array2::from_shape_fn((5, 2), |_| rng.gen_range(-1.0..1.0));
    let c = left.dot(&right.t());

    let outcome = AltProxGrad::new(FrobeniusLoss, ZeroReg, options())
        .fit(c.view(), 2, None, &mut rng)
        .unwrap();
    assert!(!matches!(outcome, FactorOutcome::MaxIterationsExceeded(_)));
    assert!(outcome.final_loss() < 1e-5, "final loss {}", outcome.final_loss());
    assert_non_increasing(&outcome.trajectory().losses);
}

#[test]
fn supplied_factors_are_used_as_the_starting_point() {
    let c = array![[2.0, 4.0], [1.0, 2.0], [3.0, 6.0]];
    let x0 = array![[1.0], [0.4], [1.6]];
    let y0 = array![[1.8], [3.9]];
    let initial = FrobeniusLoss.eval(c.view(), x0.view(), y0.view());

    let mut rng = StdRng::seed_from_u64(0);
    let outcome = AltProxGrad::new(FrobeniusLoss, ZeroReg, options())
        .fit(c.view(), 1, Some((x0, y0)), &mut rng)
        .unwrap();
    assert_abs_diff_eq!(outcome.trajectory().losses[0], initial);
    assert!(outcome.final_loss() < initial);
}

#[test]
fn nonnegative_factors_stay_nonnegative() {
    let c = array![[1.0, 0.0, 2.0], [0.0, 3.0, 1.0], [2.0, 1.0, 0.0], [1.0, 1.0, 1.0]];
    let mut rng = StdRng::seed_from_u64(3);
    let outcome = AltProxGrad::new(FrobeniusLoss, NonNegReg, options())
        .fit(c.view(), 2, None, &mut rng)
        .unwrap();
    let trajectory = outcome.trajectory();
    assert!(trajectory.x.iter().all(|&v| v >= 0.0));
    assert_non_increasing(&trajectory.losses);
}

#[test]
fn masked_loss_fills_in_a_missing_entry() {
    // Rank one: row i is (i + 1) * [1, 2, 3]. Entry (2, 2) is hidden.
    let c = array![[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [3.0, 6.0, -100.0]];
    let mut observed = Array2::from_elem((3, 3), true);
    observed[[2, 2]] = false;

    let mut rng = StdRng::seed_from_u64(11);
    let outcome = AltProxGrad::new(MaskedFrobeniusLoss::new(observed), ZeroReg, options())
        .fit(c.view(), 1, None, &mut rng)
        .unwrap();
    assert!(outcome.final_loss() < 1e-6);
    let trajectory = outcome.trajectory();
    let filled = trajectory.x.row(2).dot(&trajectory.y.row(2));
    assert_abs_diff_eq!(filled, 9.0, epsilon = 1e-2);
}
