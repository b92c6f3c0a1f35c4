use crate::estimate::EstimationError;
use crate::probability::{log_factorial, sigmoid, softplus};
use crate::types::LikelihoodFamily;
use ndarray::{Array1, ArrayView1, Zip};

const HALF_LN_TWO_PI: f64 = 0.918_938_533_204_672_8;

/// Conditional moments of the response at a linear predictor `η`.
#[derive(Debug, Clone)]
pub struct MeanMoments {
    pub mean: Array1<f64>,
    pub variance: Array1<f64>,
    /// `dμ/dη`.
    pub grad_mean: Array1<f64>,
}

/// Per-sample log-density and its first two derivatives in `η`.
#[derive(Debug, Clone)]
pub struct LogProbDerivatives {
    pub log_prob: Array1<f64>,
    pub d_eta: Array1<f64>,
    pub d2_eta: Array1<f64>,
}

/// Model capability for GLM fitting.
///
/// Implementations must have the response itself as sufficient statistic,
/// `T(y) = y`; the Fisher-scoring curvature relies on it. Values that are
/// numerically unusable (zero or non-finite variance, vanishing `dμ/dη`) are
/// allowed: the likelihood adapter masks those samples out instead of failing.
pub trait ExponentialFamily {
    fn moments(&self, eta: ArrayView1<'_, f64>) -> Result<MeanMoments, EstimationError>;

    /// Exact derivatives of `log p(y | η)`, used by the exact-Hessian mode.
    fn log_prob_derivatives(
        &self,
        _y: ArrayView1<'_, f64>,
        _eta: ArrayView1<'_, f64>,
    ) -> Result<LogProbDerivatives, EstimationError> {
        Err(EstimationError::UnsupportedOperation(
            "this family does not provide log-probability derivatives".to_string(),
        ))
    }
}

impl ExponentialFamily for LikelihoodFamily {
    fn moments(&self, eta: ArrayView1<'_, f64>) -> Result<MeanMoments, EstimationError> {
        let n = eta.len();
        let mut mean = Array1::<f64>::zeros(n);
        let mut variance = Array1::<f64>::zeros(n);
        let mut grad_mean = Array1::<f64>::zeros(n);
        match self {
            LikelihoodFamily::GaussianIdentity => {
                mean.assign(&eta);
                variance.fill(1.0);
                grad_mean.fill(1.0);
            }
            LikelihoodFamily::BinomialLogit => {
                Zip::from(&mut mean)
                    .and(&mut variance)
                    .and(&mut grad_mean)
                    .and(&eta)
                    .for_each(|mu, var, dmu, &e| {
                        let p = sigmoid(e);
                        *mu = p;
                        // Both vanish in the tails; the adapter masks those samples.
                        *var = p * (1.0 - p);
                        *dmu = *var;
                    });
            }
            LikelihoodFamily::PoissonLog => {
                Zip::from(&mut mean)
                    .and(&mut variance)
                    .and(&mut grad_mean)
                    .and(&eta)
                    .for_each(|mu, var, dmu, &e| {
                        let rate = e.exp();
                        *mu = rate;
                        *var = rate;
                        *dmu = rate;
                    });
            }
        }
        Ok(MeanMoments {
            mean,
            variance,
            grad_mean,
        })
    }

    fn log_prob_derivatives(
        &self,
        y: ArrayView1<'_, f64>,
        eta: ArrayView1<'_, f64>,
    ) -> Result<LogProbDerivatives, EstimationError> {
        if y.len() != eta.len() {
            return Err(EstimationError::DimensionMismatch {
                context: "response vs linear predictor",
                expected: eta.len(),
                found: y.len(),
            });
        }
        let n = eta.len();
        let mut log_prob = Array1::<f64>::zeros(n);
        let mut d_eta = Array1::<f64>::zeros(n);
        let mut d2_eta = Array1::<f64>::zeros(n);
        let mut failure: Option<EstimationError> = None;
        Zip::from(&mut log_prob)
            .and(&mut d_eta)
            .and(&mut d2_eta)
            .and(&y)
            .and(&eta)
            .for_each(|lp, d1, d2, &yi, &e| match self {
                LikelihoodFamily::GaussianIdentity => {
                    let r = yi - e;
                    *lp = -0.5 * r * r - HALF_LN_TWO_PI;
                    *d1 = r;
                    *d2 = -1.0;
                }
                LikelihoodFamily::BinomialLogit => {
                    if !(0.0..=1.0).contains(&yi) && failure.is_none() {
                        failure = Some(EstimationError::InvalidInput(format!(
                            "binomial response must lie in [0, 1], got {yi}"
                        )));
                    }
                    let p = sigmoid(e);
                    *lp = yi * e - softplus(e);
                    *d1 = yi - p;
                    *d2 = -p * (1.0 - p);
                }
                LikelihoodFamily::PoissonLog => {
                    if yi < 0.0 && failure.is_none() {
                        failure = Some(EstimationError::InvalidInput(format!(
                            "poisson response must be non-negative, got {yi}"
                        )));
                    }
                    let rate = e.exp();
                    *lp = yi * e - rate - log_factorial(yi);
                    *d1 = yi - rate;
                    *d2 = -rate;
                }
            });
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(LogProbDerivatives {
            log_prob,
            d_eta,
            d2_eta,
        })
    }
}
