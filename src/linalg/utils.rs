use crate::faer_ndarray::{FaerCholesky, FaerCholeskyFactor, FaerLinalgError};
use faer::Side;
use ndarray::Array2;

const MAX_FACTORIZATION_ATTEMPTS: usize = 6;
const RIDGE_GROWTH: f64 = 100.0;

#[derive(Default, Clone, Copy)]
pub(crate) struct KahanSum {
    sum: f64,
    c: f64,
}

impl KahanSum {
    pub(crate) fn add(&mut self, value: f64) {
        let y = value - self.c;
        let t = self.sum + y;
        self.c = (t - self.sum) - y;
        self.sum = t;
    }

    pub(crate) fn sum(self) -> f64 {
        self.sum
    }
}

pub(crate) fn max_abs_diag(matrix: &Array2<f64>) -> f64 {
    matrix
        .diag()
        .iter()
        .copied()
        .map(f64::abs)
        .fold(0.0, f64::max)
        .max(1.0)
}

pub(crate) fn add_ridge(matrix: &Array2<f64>, ridge: f64) -> Array2<f64> {
    if ridge <= 0.0 {
        return matrix.clone();
    }
    let mut regularized = matrix.clone();
    let n = regularized.nrows();
    for i in 0..n {
        regularized[[i, i]] += ridge;
    }
    regularized
}

/// Cholesky factorization that retries with a growing diagonal ridge when the
/// matrix is only semi-definite.
///
/// Returns the factor together with the ridge that was applied (zero when the
/// plain factorization succeeded). After the last attempt the factorization
/// error of the most heavily ridged matrix is returned.
pub(crate) fn cholesky_with_ridge_fallback(
    matrix: &Array2<f64>,
    label: &str,
) -> Result<(FaerCholeskyFactor, f64), FaerLinalgError> {
    let mut last_err = match matrix.cholesky(Side::Lower) {
        Ok(factor) => return Ok((factor, 0.0)),
        Err(FaerLinalgError::NotSquare { rows, cols }) => {
            return Err(FaerLinalgError::NotSquare { rows, cols });
        }
        Err(err) => err,
    };

    let scale = max_abs_diag(matrix);
    let mut ridge = scale * 1e-10;
    for attempt in 1..=MAX_FACTORIZATION_ATTEMPTS {
        let regularized = add_ridge(matrix, ridge);
        match regularized.cholesky(Side::Lower) {
            Ok(factor) => {
                log::warn!(
                    "{} is not positive definite; factorized with ridge {:.3e} after {} attempt(s)",
                    label,
                    ridge,
                    attempt
                );
                return Ok((factor, ridge));
            }
            Err(err) => last_err = err,
        }
        ridge *= RIDGE_GROWTH;
    }
    log::warn!(
        "Failed to factorize {} after {} ridge attempts",
        label,
        MAX_FACTORIZATION_ATTEMPTS
    );
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn kahan_sum_recovers_small_terms() {
        let mut acc = KahanSum::default();
        acc.add(1.0);
        for _ in 0..10_000 {
            acc.add(1e-16);
        }
        assert_abs_diff_eq!(acc.sum(), 1.0 + 1e-12, epsilon = 1e-15);
    }

    #[test]
    fn positive_definite_matrix_needs_no_ridge() {
        let a = array![[2.0, 0.5], [0.5, 1.0]];
        let (_, ridge) = cholesky_with_ridge_fallback(&a, "test matrix").expect("SPD");
        assert_eq!(ridge, 0.0);
    }

    #[test]
    fn singular_matrix_is_factorized_with_small_ridge() {
        // Rank one: the second direction has zero curvature.
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let (factor, ridge) =
            cholesky_with_ridge_fallback(&a, "rank deficient").expect("ridge should rescue");
        assert!(ridge > 0.0 && ridge < 1e-3);
        let r = factor.upper_triangular();
        let rebuilt = r.t().dot(&r);
        assert_abs_diff_eq!(rebuilt[[0, 1]], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(rebuilt[[1, 1]], 1.0 + ridge, epsilon = 1e-8);
    }

    #[test]
    fn negative_definite_matrix_reports_cholesky_error() {
        let a = array![[-1.0, 0.0], [0.0, -2.0]];
        assert!(matches!(
            cholesky_with_ridge_fallback(&a, "negative"),
            Err(FaerLinalgError::Cholesky(_))
        ));
    }
}
