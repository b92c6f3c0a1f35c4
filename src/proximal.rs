//! Proximal operator of the L1 penalty.
//!
//! ```text
//!                           { x - γ,  x >  γ
//! SoftThreshold(x, γ)  =    { 0,      |x| <= γ
//!                           { x + γ,  x < -γ
//! ```
//!
//! which is `prox_{γ‖·‖₁}(x) = argmin_z γ‖z‖₁ + ½‖x − z‖²`. A minimizer of a
//! smooth convex `L` plus `γ‖·‖₁` is exactly a fixed point of
//! `x ↦ SoftThreshold(x − γ∇L(x), γ)`, which is what the coordinate-descent
//! sweep iterates one coordinate at a time.

use crate::estimate::EstimationError;
use ndarray::{Array1, ArrayView1};

/// Scalar soft-thresholding, `sign(x) · max(|x| − threshold, 0)`.
///
/// `threshold` must be non-negative; [`soft_threshold`] validates it for
/// callers that cannot guarantee that.
#[inline]
pub fn soft_threshold_scalar(x: f64, threshold: f64) -> f64 {
    debug_assert!(threshold >= 0.0, "soft threshold must be non-negative");
    if x > threshold {
        x - threshold
    } else if x < -threshold {
        x + threshold
    } else {
        0.0
    }
}

/// Elementwise soft-thresholding of a vector.
pub fn soft_threshold(
    x: ArrayView1<'_, f64>,
    threshold: f64,
) -> Result<Array1<f64>, EstimationError> {
    if threshold.is_nan() || threshold < 0.0 {
        return Err(EstimationError::InvalidInput(format!(
            "soft threshold must be a non-negative number, got {threshold}"
        )));
    }
    Ok(x.mapv(|v| soft_threshold_scalar(v, threshold)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn zero_threshold_is_identity() {
        let x = array![-3.5, -0.0, 0.0, 1e-300, 7.25];
        let y = soft_threshold(x.view(), 0.0).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn shrinks_magnitude_and_keeps_sign() {
        let x = array![-2.0, -0.5, -0.3, 0.0, 0.3, 0.5, 2.0];
        let t = 0.5;
        let y = soft_threshold(x.view(), t).unwrap();
        assert_eq!(y, array![-1.5, 0.0, 0.0, 0.0, 0.0, 0.0, 1.5]);
        for (&xi, &yi) in x.iter().zip(y.iter()) {
            assert!(yi == 0.0 || yi.signum() == xi.signum());
            assert_eq!(yi.abs(), (xi.abs() - t).max(0.0));
        }
    }

    #[test]
    fn scalar_matches_closed_form_on_a_grid() {
        for i in -40..=40 {
            let x = i as f64 * 0.125;
            for &t in &[0.0, 0.25, 1.0, 3.0] {
                let y = soft_threshold_scalar(x, t);
                assert_eq!(y, x.signum() * (x.abs() - t).max(0.0));
            }
        }
    }

    #[test]
    fn negative_or_nan_threshold_is_rejected() {
        let x = array![1.0, -1.0];
        assert!(matches!(
            soft_threshold(x.view(), -0.1),
            Err(EstimationError::InvalidInput(_))
        ));
        assert!(matches!(
            soft_threshold(x.view(), f64::NAN),
            Err(EstimationError::InvalidInput(_))
        ));
    }
}
