#![deny(dead_code)]
#![deny(unused_imports)]

//! L1/L2-regularized generalized linear models fitted with GLMNet's
//! proximal-Hessian coordinate descent.

pub mod estimate;
pub mod families;
pub mod linalg;
pub mod matrix;
pub mod probability;
pub mod proximal;
pub mod solver;
pub mod types;

pub use linalg::faer_ndarray;

pub use estimate::{
    CurvatureMode, EstimationError, FitOptions, FitResult, fit_sparse, fit_sparse_exact_hessian,
    fit_sparse_one_step,
};
pub use families::{ExponentialFamily, LogProbDerivatives, MeanMoments};
pub use matrix::{DesignMatrix, DesignOperator, SparseDesignMatrix};
pub use proximal::{soft_threshold, soft_threshold_scalar};
pub use solver::driver::{
    CurvatureOuter, ExactHessianWorkingModel, FisherWorkingModel, WorkingModel, WorkingState,
    minimize_sparse,
};
pub use solver::fisher::{FisherScoringTerms, grad_neg_log_likelihood_and_fim};
pub use solver::sweep::{
    CoordinateDescentSweep, CoordinateStep, SweepOptions, SweepResult, SweepWorkspace,
    minimize_sparse_one_step,
};
pub use types::{Coefficients, LikelihoodFamily};
