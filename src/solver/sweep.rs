//! One outer step of GLMNet: cyclic proximal-Newton coordinate descent on a
//! local quadratic model of the smooth loss.
//!
//! Given the gradient `g` of the unregularized loss at `x_start` and its
//! curvature `H = Houterᵗ · diag(hmid) · Houter`, the sweep minimizes
//!
//! ```text
//! gᵗ·u + ½ uᵗ·H·u + l2 · ‖x_start + u‖² + l1 · ‖x_start + u‖₁
//! ```
//!
//! over the update `u`, one coordinate at a time. Coordinate `j` is moved by
//!
//! ```text
//! newton = -lr · (g[j] + 2·l2·x_start[j] + (H·u)[j]) / (H[j,j] + 2·l2)
//! delta  = SoftThreshold(w_old + newton, lr · l1 / (H[j,j] + 2·l2)) - w_old
//! ```
//!
//! with `w_old = x_start[j] + u[j]`. The product `H·u` is maintained
//! incrementally from one Hessian column per accepted update, so the full
//! Hessian is never formed.
//!
//! Convergence is only judged at sweep boundaries, once every coordinate has
//! been visited: the sweep stops when the squared norm of the change made
//! during the last full pass is below `tolerance · (1 + ‖x_start‖₂)²`.

use crate::estimate::EstimationError;
use crate::matrix::DesignOperator;
use crate::proximal::soft_threshold_scalar;
use crate::types::Coefficients;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

pub fn default_max_full_sweeps() -> usize {
    1
}

/// Options for a single inner sweep sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepOptions {
    pub tolerance: f64,
    pub l1_regularizer: f64,
    /// Ridge strength; `None` disables the L2 term.
    #[serde(default)]
    pub l2_regularizer: Option<f64>,
    /// Full passes over all coordinates before giving up.
    #[serde(default = "default_max_full_sweeps")]
    pub max_full_sweeps: usize,
    #[serde(default)]
    pub learning_rate: Option<f64>,
}

impl SweepOptions {
    pub fn new(tolerance: f64, l1_regularizer: f64) -> Self {
        Self {
            tolerance,
            l1_regularizer,
            l2_regularizer: None,
            max_full_sweeps: default_max_full_sweeps(),
            learning_rate: None,
        }
    }

    pub fn with_l2_regularizer(mut self, l2_regularizer: f64) -> Self {
        self.l2_regularizer = Some(l2_regularizer);
        self
    }

    pub fn with_max_full_sweeps(mut self, max_full_sweeps: usize) -> Self {
        self.max_full_sweeps = max_full_sweeps;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = Some(learning_rate);
        self
    }

    pub fn validate(&self) -> Result<(), EstimationError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(EstimationError::InvalidInput(format!(
                "tolerance must be a positive finite number, got {}",
                self.tolerance
            )));
        }
        if !(self.l1_regularizer.is_finite() && self.l1_regularizer >= 0.0) {
            return Err(EstimationError::InvalidInput(format!(
                "l1_regularizer must be a non-negative finite number, got {}",
                self.l1_regularizer
            )));
        }
        if let Some(l2) = self.l2_regularizer
            && !(l2.is_finite() && l2 >= 0.0)
        {
            return Err(EstimationError::InvalidInput(format!(
                "l2_regularizer must be a non-negative finite number, got {l2}"
            )));
        }
        if let Some(lr) = self.learning_rate
            && !(lr.is_finite() && lr > 0.0)
        {
            return Err(EstimationError::InvalidInput(format!(
                "learning_rate must be a positive finite number, got {lr}"
            )));
        }
        Ok(())
    }
}

/// Scratch buffers for [`CoordinateDescentSweep`].
///
/// Owned by the caller so repeated outer iterations reuse the allocations.
/// Every sweep resizes and zeroes the buffers before touching them, so a
/// workspace never carries state from one sweep into the next. A workspace
/// must not be shared between concurrent fits.
#[derive(Debug, Clone, Default)]
pub struct SweepWorkspace {
    x_update: Array1<f64>,
    hess_matmul_x_update: Array1<f64>,
    hessian_diag: Array1<f64>,
    hessian_column: Array1<f64>,
    column_scratch: Array1<f64>,
}

fn reset_zeroed(buffer: &mut Array1<f64>, len: usize) {
    if buffer.len() == len {
        buffer.fill(0.0);
    } else {
        *buffer = Array1::zeros(len);
    }
}

impl SweepWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn prepare(&mut self, ncoefs: usize, nrows: usize) {
        reset_zeroed(&mut self.x_update, ncoefs);
        reset_zeroed(&mut self.hess_matmul_x_update, ncoefs);
        reset_zeroed(&mut self.hessian_diag, ncoefs);
        reset_zeroed(&mut self.hessian_column, ncoefs);
        reset_zeroed(&mut self.column_scratch, nrows);
    }
}

/// What a single coordinate step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoordinateStep {
    /// The thresholded Newton step left the coordinate where it was.
    Unchanged,
    /// The curvature on this coordinate was not positive and finite, so the
    /// step was skipped.
    Degenerate,
    Updated { delta: f64 },
}

#[derive(Debug, Clone)]
pub struct SweepResult {
    pub beta: Coefficients,
    /// Whether the final full pass changed the coefficients by less than the
    /// tolerance.
    pub converged: bool,
    /// Completed full passes, `coordinate_updates / n` rounded down.
    pub sweeps: usize,
    /// Coordinate steps taken, including those that left the coordinate
    /// unchanged.
    pub coordinate_updates: usize,
}

/// State machine over single-coordinate proximal Newton steps.
///
/// [`CoordinateDescentSweep::run`] drives it to termination; [`step`] and the
/// accessors exist so callers can observe the bookkeeping one coordinate at a
/// time.
///
/// [`step`]: CoordinateDescentSweep::step
pub struct CoordinateDescentSweep<'a, 'w, H: DesignOperator + ?Sized> {
    gradient: ArrayView1<'a, f64>,
    hessian_outer: &'a H,
    hessian_middle: ArrayView1<'a, f64>,
    x_start: ArrayView1<'a, f64>,
    l1_regularizer: f64,
    two_l2: f64,
    learning_rate: f64,
    max_coordinate_updates: usize,
    convergence_threshold: f64,
    iter: usize,
    x_update_diff_norm_sq: f64,
    workspace: &'w mut SweepWorkspace,
}

impl<'a, 'w, H: DesignOperator + ?Sized> CoordinateDescentSweep<'a, 'w, H> {
    /// Validate shapes and options, then reset `workspace` for a new sweep.
    pub fn new(
        gradient: ArrayView1<'a, f64>,
        hessian_outer: &'a H,
        hessian_middle: ArrayView1<'a, f64>,
        x_start: ArrayView1<'a, f64>,
        options: &SweepOptions,
        workspace: &'w mut SweepWorkspace,
    ) -> Result<Self, EstimationError> {
        options.validate()?;
        let n = x_start.len();
        if n == 0 {
            return Err(EstimationError::InvalidInput(
                "cannot run coordinate descent over zero coefficients".to_string(),
            ));
        }
        if gradient.len() != n {
            return Err(EstimationError::DimensionMismatch {
                context: "gradient length vs coefficients",
                expected: n,
                found: gradient.len(),
            });
        }
        if hessian_outer.ncols() != n {
            return Err(EstimationError::DimensionMismatch {
                context: "curvature outer columns vs coefficients",
                expected: n,
                found: hessian_outer.ncols(),
            });
        }
        if hessian_middle.len() != hessian_outer.nrows() {
            return Err(EstimationError::DimensionMismatch {
                context: "curvature middle length vs curvature outer rows",
                expected: hessian_outer.nrows(),
                found: hessian_middle.len(),
            });
        }
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(EstimationError::NonFiniteValue("gradient"));
        }
        if hessian_middle.iter().any(|h| !h.is_finite()) {
            return Err(EstimationError::NonFiniteValue("curvature middle"));
        }

        let two_l2 = 2.0 * options.l2_regularizer.unwrap_or(0.0);
        workspace.prepare(n, hessian_outer.nrows());
        for j in 0..n {
            workspace.hessian_diag[j] =
                hessian_outer.weighted_column_sum_of_squares(j, hessian_middle) + two_l2;
        }

        let x_start_norm = x_start.dot(&x_start).sqrt();
        let convergence_threshold = options.tolerance * (1.0 + x_start_norm).powi(2);

        Ok(Self {
            gradient,
            hessian_outer,
            hessian_middle,
            x_start,
            l1_regularizer: options.l1_regularizer,
            two_l2,
            learning_rate: options.learning_rate.unwrap_or(1.0),
            max_coordinate_updates: options.max_full_sweeps.saturating_mul(n),
            convergence_threshold,
            iter: 0,
            x_update_diff_norm_sq: 0.0,
            workspace,
        })
    }

    fn ncoefs(&self) -> usize {
        self.x_start.len()
    }

    /// Coordinate steps taken so far.
    pub fn iteration(&self) -> usize {
        self.iter
    }

    /// Squared norm of the change made since the current pass began.
    pub fn x_update_diff_norm_sq(&self) -> f64 {
        self.x_update_diff_norm_sq
    }

    pub fn x_update(&self) -> ArrayView1<'_, f64> {
        self.workspace.x_update.view()
    }

    /// `H · x_update`, including the ridge term.
    pub fn hess_matmul_x_update(&self) -> ArrayView1<'_, f64> {
        self.workspace.hess_matmul_x_update.view()
    }

    pub fn convergence_threshold(&self) -> f64 {
        self.convergence_threshold
    }

    fn at_sweep_boundary(&self) -> bool {
        self.iter > 0 && self.iter % self.ncoefs() == 0
    }

    fn small_update(&self) -> bool {
        self.x_update_diff_norm_sq < self.convergence_threshold
    }

    /// Whether another coordinate step is allowed.
    pub fn should_continue(&self) -> bool {
        if self.iter >= self.max_coordinate_updates {
            return false;
        }
        !(self.at_sweep_boundary() && self.small_update())
    }

    /// Take one proximal Newton step on coordinate `iter mod n`.
    pub fn step(&mut self) -> CoordinateStep {
        let coord = self.iter % self.ncoefs();
        self.iter += 1;
        if coord == 0 {
            self.x_update_diff_norm_sq = 0.0;
        }

        let second_deriv = self.workspace.hessian_diag[coord];
        if !(second_deriv.is_finite() && second_deriv > 0.0) {
            log::trace!(
                "skipping coordinate {} with non-positive curvature {:.3e}",
                coord,
                second_deriv
            );
            return CoordinateStep::Degenerate;
        }

        let x_update_j = self.workspace.x_update[coord];
        let w_old = self.x_start[coord] + x_update_j;
        let smooth_grad = self.gradient[coord]
            + self.two_l2 * self.x_start[coord]
            + self.workspace.hess_matmul_x_update[coord];
        let newton_step = -self.learning_rate * smooth_grad / second_deriv;
        let threshold = self.learning_rate * self.l1_regularizer / second_deriv;
        let delta = soft_threshold_scalar(w_old + newton_step, threshold) - w_old;

        // A difference of equal floats is exactly zero, so this catches every
        // step the threshold absorbed.
        if delta == 0.0 {
            return CoordinateStep::Unchanged;
        }

        let ws = &mut *self.workspace;
        self.hessian_outer.weighted_column_gram_into(
            coord,
            self.hessian_middle,
            &mut ws.column_scratch,
            &mut ws.hessian_column,
        );
        ws.hessian_column[coord] += self.two_l2;
        ws.x_update[coord] = x_update_j + delta;
        ws.hess_matmul_x_update.scaled_add(delta, &ws.hessian_column);
        self.x_update_diff_norm_sq += delta * delta;
        CoordinateStep::Updated { delta }
    }

    /// Step until the budget is spent or a full pass converges.
    pub fn run(mut self) -> SweepResult {
        while self.should_continue() {
            self.step();
            if self.at_sweep_boundary() {
                log::trace!(
                    "sweep {} done: |Δx|² = {:.3e}, threshold {:.3e}",
                    self.iter / self.ncoefs(),
                    self.x_update_diff_norm_sq,
                    self.convergence_threshold
                );
            }
        }
        self.finish()
    }

    /// Materialize the result at the current state.
    pub fn finish(self) -> SweepResult {
        let n = self.ncoefs();
        let beta = &self.x_start + &self.workspace.x_update;
        SweepResult {
            beta: Coefficients::new(beta),
            converged: self.small_update(),
            sweeps: self.iter / n,
            coordinate_updates: self.iter,
        }
    }
}

/// Run one inner sweep sequence from `x_start` and return the updated
/// coefficients.
///
/// `hessian_outer` and `hessian_middle` describe the curvature of the
/// unregularized loss as `Houterᵗ · diag(hmid) · Houter`; with Fisher scoring
/// the outer factor is the design matrix itself.
pub fn minimize_sparse_one_step<H>(
    gradient: ArrayView1<'_, f64>,
    hessian_outer: &H,
    hessian_middle: ArrayView1<'_, f64>,
    x_start: &Coefficients,
    options: &SweepOptions,
    workspace: &mut SweepWorkspace,
) -> Result<SweepResult, EstimationError>
where
    H: DesignOperator + ?Sized,
{
    let sweep = CoordinateDescentSweep::new(
        gradient.reborrow(),
        hessian_outer,
        hessian_middle.reborrow(),
        x_start.view(),
        options,
        workspace,
    )?;
    Ok(sweep.run())
}
