use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Engine-level likelihood selector used by the fitting entry points.
///
/// Every variant is a canonical-link exponential family whose sufficient
/// statistic is the response itself, which is what the Fisher-scoring
/// curvature in [`crate::solver::fisher`] assumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikelihoodFamily {
    GaussianIdentity,
    BinomialLogit,
    PoissonLog,
}

#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct Coefficients(pub Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }

    /// Euclidean norm `‖β‖₂`.
    pub fn l2_norm(&self) -> f64 {
        self.0.dot(&self.0).sqrt()
    }

    /// `‖β‖₁`.
    pub fn l1_norm(&self) -> f64 {
        self.0.iter().map(|v| v.abs()).sum()
    }

    /// Number of coefficients that are not exactly zero.
    pub fn count_nonzero(&self) -> usize {
        self.0.iter().filter(|&&v| v != 0.0).count()
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Coefficients {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<Array1<f64>> for Coefficients {
    fn as_ref(&self) -> &Array1<f64> {
        &self.0
    }
}

impl From<Array1<f64>> for Coefficients {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<Vec<f64>> for Coefficients {
    fn from(values: Vec<f64>) -> Self {
        Self(Array1::from_vec(values))
    }
}

impl From<Coefficients> for Array1<f64> {
    fn from(values: Coefficients) -> Self {
        values.0
    }
}
