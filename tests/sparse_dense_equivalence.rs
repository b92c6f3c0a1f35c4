use approx::assert_abs_diff_eq;
use glmnet::{
    Coefficients, DesignMatrix, FitOptions, LikelihoodFamily, SparseDesignMatrix, fit_sparse,
};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use rand_distr::{Bernoulli, Distribution};

fn sparse_logistic_problem(seed: u64, n: usize, p: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Array2::<f64>::zeros((n, p));
    let mut y = Array1::<f64>::zeros(n);
    let present = Bernoulli::new(0.35).expect("valid density");
    for i in 0..n {
        x[[i, 0]] = 1.0;
        let mut eta = -0.3;
        for j in 1..p {
            if present.sample(&mut rng) {
                x[[i, j]] = 2.0 * rng.random::<f64>() - 1.0;
                eta += if j % 2 == 0 { 0.9 } else { -0.7 } * x[[i, j]];
            }
        }
        let prob = 1.0 / (1.0 + (-eta).exp());
        let dist = Bernoulli::new(prob).expect("probability must lie in [0, 1]");
        y[i] = if dist.sample(&mut rng) { 1.0 } else { 0.0 };
    }
    (x, y)
}

fn triplets_of(x: &Array2<f64>) -> Vec<(usize, usize, f64)> {
    let mut triplets = Vec::new();
    for ((i, j), &v) in x.indexed_iter() {
        if v != 0.0 {
            triplets.push((i, j, v));
        }
    }
    triplets
}

#[test]
fn logistic_fit_matches_between_dense_and_sparse_storage() {
    let (x, y) = sparse_logistic_problem(3, 120, 8);
    let dense = DesignMatrix::from(x.clone());
    let sparse = DesignMatrix::from(
        SparseDesignMatrix::from_triplets(x.nrows(), x.ncols(), &triplets_of(&x))
            .expect("valid triplets"),
    );
    assert!(sparse.is_sparse());

    let options = FitOptions::new(1e-16, 0.5)
        .with_l2_regularizer(0.05)
        .with_max_iterations(1000);
    let start = Coefficients::zeros(x.ncols());
    let family = LikelihoodFamily::BinomialLogit;
    let dense_fit = fit_sparse(&dense, y.view(), &family, &start, &options).expect("dense fit");
    let sparse_fit = fit_sparse(&sparse, y.view(), &family, &start, &options).expect("sparse fit");

    assert!(dense_fit.converged);
    assert!(sparse_fit.converged);
    for j in 0..x.ncols() {
        assert_abs_diff_eq!(dense_fit.beta[j], sparse_fit.beta[j], epsilon = 1e-6);
    }
}

#[test]
fn sparse_paths_agree_across_budgets() {
    // Identical budgets must give identical trajectories, converged or not.
    let (x, y) = sparse_logistic_problem(41, 80, 5);
    let dense = DesignMatrix::from(x.view());
    let sparse = DesignMatrix::from(SparseDesignMatrix::from_dense(x.view()).expect("sparse"));
    let family = LikelihoodFamily::BinomialLogit;
    let start = Coefficients::zeros(x.ncols());
    for max_iterations in [1usize, 2, 4] {
        let options = FitOptions::new(1e-30, 0.1)
            .with_max_iterations(max_iterations)
            .with_max_full_sweeps_per_iteration(2);
        let a = fit_sparse(&dense, y.view(), &family, &start, &options).expect("dense");
        let b = fit_sparse(&sparse, y.view(), &family, &start, &options).expect("sparse");
        assert_eq!(a.iterations, b.iterations);
        for j in 0..x.ncols() {
            assert_abs_diff_eq!(a.beta[j], b.beta[j], epsilon = 1e-9);
        }
    }
}

#[test]
fn all_zero_column_stays_at_zero() {
    let (mut x, y) = sparse_logistic_problem(5, 60, 4);
    x.column_mut(2).fill(0.0);
    let sparse = DesignMatrix::from(SparseDesignMatrix::from_dense(x.view()).expect("sparse"));
    let fit = fit_sparse(
        &sparse,
        y.view(),
        &LikelihoodFamily::BinomialLogit,
        &Coefficients::zeros(4),
        &FitOptions::new(1e-14, 0.01)
            .with_l2_regularizer(0.1)
            .with_max_iterations(500),
    )
    .expect("fit with an empty column");
    assert_eq!(fit.beta[2], 0.0);
    assert!(fit.beta.iter().all(|b| b.is_finite()));
}
