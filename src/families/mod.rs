//! GLM families: the model capability consumed by the fitting entry points.

pub mod exponential;

pub use exponential::{ExponentialFamily, LogProbDerivatives, MeanMoments};
