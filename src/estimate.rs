//! Public fitting entry points, options and the crate error type.
//!
//! The objective minimized by every entry point is
//!
//! ```text
//! -LogLikelihood(β) + l1 · ‖β‖₁ + l2 · ‖β‖₂²
//! ```
//!
//! using GLMNet's outer/inner scheme: each outer iteration refreshes the
//! gradient and a curvature factorization at the current `β`, and the inner
//! coordinate-descent sweep (see [`crate::solver::sweep`]) performs proximal
//! Newton updates against that local quadratic model.

use crate::faer_ndarray::FaerLinalgError;
use crate::families::ExponentialFamily;
use crate::matrix::{DesignMatrix, DesignOperator};
use crate::solver::driver::{ExactHessianWorkingModel, FisherWorkingModel, minimize_sparse};
use crate::solver::fisher::grad_neg_log_likelihood_and_fim;
use crate::solver::sweep::{SweepOptions, SweepResult, SweepWorkspace, minimize_sparse_one_step};
use crate::types::Coefficients;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A comprehensive error type for the fitting process.
#[derive(Error)]
pub enum EstimationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch in {context}: expected {expected}, found {found}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Non-finite value encountered in {0}.")]
    NonFiniteValue(&'static str),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("A linear system solve failed. The Hessian may not be positive definite. Error: {0}")]
    LinearSystemSolveFailed(#[from] FaerLinalgError),

    #[error("Sparse matrix construction failed: {0}")]
    SparseConstruction(String),
}

// Ensure Debug prints with actual line breaks by delegating to Display
impl core::fmt::Debug for EstimationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self)
    }
}

/// Source of the curvature used by the inner sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurvatureMode {
    /// Fisher information `Xᵗ·diag(w)·X` with `w = (dμ/dη)² / Var`.
    #[default]
    Fisher,
    /// Exact Hessian of the negative log-likelihood, passed to the sweep as its
    /// Cholesky factor.
    ExactHessian,
}

pub fn default_max_iterations() -> usize {
    100
}

pub fn default_max_full_sweeps_per_iteration() -> usize {
    1
}

/// Options for a complete fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    /// Convergence threshold; a sweep has converged once
    /// `‖Δβ_sweep‖₂ / (1 + ‖β_start‖₂) < sqrt(tolerance)`.
    pub tolerance: f64,
    pub l1_regularizer: f64,
    #[serde(default)]
    pub l2_regularizer: Option<f64>,
    /// Outer iterations (curvature refreshes).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_full_sweeps_per_iteration")]
    pub max_full_sweeps_per_iteration: usize,
    /// Multiplicative damping of every proximal Newton step; `None` means 1.
    #[serde(default)]
    pub learning_rate: Option<f64>,
    #[serde(default)]
    pub curvature: CurvatureMode,
}

impl FitOptions {
    pub fn new(tolerance: f64, l1_regularizer: f64) -> Self {
        Self {
            tolerance,
            l1_regularizer,
            l2_regularizer: None,
            max_iterations: default_max_iterations(),
            max_full_sweeps_per_iteration: default_max_full_sweeps_per_iteration(),
            learning_rate: None,
            curvature: CurvatureMode::Fisher,
        }
    }

    pub fn with_l2_regularizer(mut self, l2_regularizer: f64) -> Self {
        self.l2_regularizer = Some(l2_regularizer);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_full_sweeps_per_iteration(mut self, sweeps: usize) -> Self {
        self.max_full_sweeps_per_iteration = sweeps;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = Some(learning_rate);
        self
    }

    pub fn with_curvature(mut self, curvature: CurvatureMode) -> Self {
        self.curvature = curvature;
        self
    }

    /// Options handed to each inner sweep.
    pub fn sweep_options(&self) -> SweepOptions {
        SweepOptions {
            tolerance: self.tolerance,
            l1_regularizer: self.l1_regularizer,
            l2_regularizer: self.l2_regularizer,
            max_full_sweeps: self.max_full_sweeps_per_iteration,
            learning_rate: self.learning_rate,
        }
    }

    pub fn validate(&self) -> Result<(), EstimationError> {
        self.sweep_options().validate()
    }

    /// `l1 · ‖β‖₁ + l2 · ‖β‖₂²`.
    pub fn penalty(&self, beta: &Coefficients) -> f64 {
        let ridge = self
            .l2_regularizer
            .map(|l2| l2 * beta.dot(&**beta))
            .unwrap_or(0.0);
        self.l1_regularizer * beta.l1_norm() + ridge
    }
}

/// Outcome of a complete fit.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub beta: Coefficients,
    /// Whether the last inner sweep reported convergence.
    pub converged: bool,
    /// Outer iterations performed.
    pub iterations: usize,
    /// Completed sweeps used by each outer iteration.
    pub sweeps_per_iteration: Vec<usize>,
    /// Penalized negative log-likelihood at `beta`, when the family can
    /// evaluate log-probabilities.
    pub penalized_objective: Option<f64>,
}

fn validate_problem(
    design: &DesignMatrix,
    response: ArrayView1<'_, f64>,
    x_start: &Coefficients,
) -> Result<(), EstimationError> {
    if response.len() != design.nrows() {
        return Err(EstimationError::DimensionMismatch {
            context: "response length vs design rows",
            expected: design.nrows(),
            found: response.len(),
        });
    }
    if x_start.len() != design.ncols() {
        return Err(EstimationError::DimensionMismatch {
            context: "coefficient length vs design columns",
            expected: design.ncols(),
            found: x_start.len(),
        });
    }
    if response.iter().any(|v| !v.is_finite()) {
        return Err(EstimationError::NonFiniteValue("response"));
    }
    if x_start.iter().any(|v| !v.is_finite()) {
        return Err(EstimationError::NonFiniteValue("starting coefficients"));
    }
    Ok(())
}

/// Fit a regularized GLM with GLMNet's proximal-Hessian coordinate descent.
///
/// Dispatches on [`FitOptions::curvature`]; the default is Fisher scoring.
pub fn fit_sparse<F>(
    design: &DesignMatrix,
    response: ArrayView1<'_, f64>,
    family: &F,
    x_start: &Coefficients,
    options: &FitOptions,
) -> Result<FitResult, EstimationError>
where
    F: ExponentialFamily + ?Sized,
{
    options.validate()?;
    validate_problem(design, response, x_start)?;
    match options.curvature {
        CurvatureMode::Fisher => {
            let model = FisherWorkingModel::new(design, response.reborrow(), family);
            minimize_sparse(&model, x_start, options)
        }
        CurvatureMode::ExactHessian => {
            let model = ExactHessianWorkingModel::new(design, response.reborrow(), family);
            minimize_sparse(&model, x_start, options)
        }
    }
}

/// [`fit_sparse`] with the exact Hessian of the negative log-likelihood in
/// place of the Fisher information.
pub fn fit_sparse_exact_hessian<F>(
    design: &DesignMatrix,
    response: ArrayView1<'_, f64>,
    family: &F,
    x_start: &Coefficients,
    options: &FitOptions,
) -> Result<FitResult, EstimationError>
where
    F: ExponentialFamily + ?Sized,
{
    let options = options.clone().with_curvature(CurvatureMode::ExactHessian);
    fit_sparse(design, response, family, x_start, &options)
}

/// One outer iteration of GLMNet with Fisher-scoring curvature: evaluate the
/// model at `X·β`, build the gradient and Fisher weights, and run one inner
/// sweep sequence.
pub fn fit_sparse_one_step<F>(
    design: &DesignMatrix,
    response: ArrayView1<'_, f64>,
    family: &F,
    x_start: &Coefficients,
    options: &SweepOptions,
) -> Result<SweepResult, EstimationError>
where
    F: ExponentialFamily + ?Sized,
{
    options.validate()?;
    validate_problem(design, response, x_start)?;
    let eta = design.matvec(x_start.view());
    let moments = family.moments(eta.view())?;
    let terms = grad_neg_log_likelihood_and_fim(design, &moments, response)?;
    let mut workspace = SweepWorkspace::default();
    minimize_sparse_one_step(
        terms.gradient.view(),
        design,
        terms.fim_middle.view(),
        x_start,
        options,
        &mut workspace,
    )
}
