//! Gradient and Fisher information of the negative log-likelihood.
//!
//! For a family with sufficient statistic `T(y) = y` and linear predictor
//! `η = X·β`,
//!
//! ```text
//! ∇_β [-log p(y | β)] = -Xᵗ · ((y − μ) ⊙ dμ/dη / Var)
//! FIM(β)              =  Xᵗ · diag((dμ/dη)² / Var) · X
//! ```
//!
//! The Fisher information is returned only through its diagonal middle factor;
//! the outer factor is the design itself and is never copied.

use crate::estimate::EstimationError;
use crate::families::MeanMoments;
use crate::matrix::DesignOperator;
use ndarray::{Array1, ArrayView1, Zip};

/// Gradient of the negative log-likelihood together with the diagonal middle
/// factor of the Fisher information.
#[derive(Debug, Clone)]
pub struct FisherScoringTerms {
    pub gradient: Array1<f64>,
    pub fim_middle: Array1<f64>,
    /// Samples whose moments were unusable and were dropped from both terms.
    pub masked_samples: usize,
}

#[inline]
fn sample_is_valid(grad_mean: f64, variance: f64) -> bool {
    grad_mean.is_finite() && grad_mean != 0.0 && variance.is_finite() && variance > 0.0
}

/// Compute the gradient of `-log p(y | β)` and the diagonal Fisher weights.
///
/// A sample contributes nothing to either output when its `dμ/dη` is zero or
/// non-finite, or its variance is non-positive or non-finite. For such samples
/// the mean is never read, so an invalid sample with a non-finite mean is still
/// harmless.
pub fn grad_neg_log_likelihood_and_fim<X>(
    design: &X,
    moments: &MeanMoments,
    response: ArrayView1<'_, f64>,
) -> Result<FisherScoringTerms, EstimationError>
where
    X: DesignOperator + ?Sized,
{
    let n = design.nrows();
    for (context, found) in [
        ("response length vs design rows", response.len()),
        ("mean length vs design rows", moments.mean.len()),
        ("variance length vs design rows", moments.variance.len()),
        ("mean derivative length vs design rows", moments.grad_mean.len()),
    ] {
        if found != n {
            return Err(EstimationError::DimensionMismatch {
                context,
                expected: n,
                found,
            });
        }
    }

    let mut score_weights = Array1::<f64>::zeros(n);
    let mut fim_middle = Array1::<f64>::zeros(n);
    let mut masked_samples = 0usize;
    Zip::from(&mut score_weights)
        .and(&mut fim_middle)
        .and(&response)
        .and(&moments.mean)
        .and(&moments.variance)
        .and(&moments.grad_mean)
        .for_each(|v, m, &y, &mu, &var, &dmu| {
            if sample_is_valid(dmu, var) {
                *v = (y - mu) * dmu / var;
                *m = dmu * dmu / var;
            } else {
                masked_samples += 1;
            }
        });

    if masked_samples > 0 {
        log::debug!(
            "masked {} of {} samples with degenerate variance or mean derivative",
            masked_samples,
            n
        );
    }

    let mut gradient = design.transpose_matvec(score_weights.view());
    gradient.mapv_inplace(|g| -g);
    Ok(FisherScoringTerms {
        gradient,
        fim_middle,
        masked_samples,
    })
}
