//! Outer GLMNet loop.
//!
//! Each outer iteration asks a [`WorkingModel`] for the gradient and curvature
//! of the unregularized loss at the current coefficients, then runs one inner
//! sweep sequence against that local quadratic model. The sweep's convergence
//! flag is adopted as the outer convergence signal.

use crate::estimate::{EstimationError, FitOptions, FitResult};
use crate::families::ExponentialFamily;
use crate::linalg::utils::cholesky_with_ridge_fallback;
use crate::matrix::{DesignMatrix, DesignOperator};
use crate::solver::fisher::grad_neg_log_likelihood_and_fim;
use crate::solver::sweep::{SweepWorkspace, minimize_sparse_one_step};
use crate::types::Coefficients;
use ndarray::{Array1, Array2, ArrayView1};

/// Outer factor of the curvature `Houterᵗ · diag(hmid) · Houter`.
pub enum CurvatureOuter<'a> {
    /// The design itself, as in Fisher scoring. Borrowed, never copied.
    Design(&'a DesignMatrix),
    /// A dense `n × n` factor, e.g. the upper Cholesky factor of an exact
    /// Hessian.
    Factor(Array2<f64>),
}

impl DesignOperator for CurvatureOuter<'_> {
    fn nrows(&self) -> usize {
        match self {
            CurvatureOuter::Design(design) => design.nrows(),
            CurvatureOuter::Factor(factor) => factor.dim().0,
        }
    }

    fn ncols(&self) -> usize {
        match self {
            CurvatureOuter::Design(design) => design.ncols(),
            CurvatureOuter::Factor(factor) => factor.dim().1,
        }
    }

    fn matvec(&self, vector: ArrayView1<'_, f64>) -> Array1<f64> {
        match self {
            CurvatureOuter::Design(design) => design.matvec(vector),
            CurvatureOuter::Factor(factor) => factor.matvec(vector),
        }
    }

    fn transpose_matvec(&self, vector: ArrayView1<'_, f64>) -> Array1<f64> {
        match self {
            CurvatureOuter::Design(design) => design.transpose_matvec(vector),
            CurvatureOuter::Factor(factor) => factor.transpose_matvec(vector),
        }
    }

    fn column_into(&self, col: usize, out: &mut Array1<f64>) {
        match self {
            CurvatureOuter::Design(design) => design.column_into(col, out),
            CurvatureOuter::Factor(factor) => factor.column_into(col, out),
        }
    }

    fn column_sum_of_squares(&self, col: usize) -> f64 {
        match self {
            CurvatureOuter::Design(design) => design.column_sum_of_squares(col),
            CurvatureOuter::Factor(factor) => factor.column_sum_of_squares(col),
        }
    }

    fn weighted_column_sum_of_squares(&self, col: usize, weights: ArrayView1<'_, f64>) -> f64 {
        match self {
            CurvatureOuter::Design(design) => design.weighted_column_sum_of_squares(col, weights),
            CurvatureOuter::Factor(factor) => factor.weighted_column_sum_of_squares(col, weights),
        }
    }

    fn weighted_column_gram_into(
        &self,
        col: usize,
        weights: ArrayView1<'_, f64>,
        scratch: &mut Array1<f64>,
        out: &mut Array1<f64>,
    ) {
        match self {
            CurvatureOuter::Design(design) => {
                design.weighted_column_gram_into(col, weights, scratch, out)
            }
            CurvatureOuter::Factor(factor) => {
                factor.weighted_column_gram_into(col, weights, scratch, out)
            }
        }
    }
}

/// Local quadratic model of the unregularized loss at some coefficients.
pub struct WorkingState<'a> {
    /// Gradient of the negative log-likelihood.
    pub gradient: Array1<f64>,
    pub hessian_outer: CurvatureOuter<'a>,
    /// Diagonal middle factor; its length equals `hessian_outer.nrows()`.
    pub hessian_middle: Array1<f64>,
}

/// Supplies gradient and curvature of the unregularized loss to the outer loop.
pub trait WorkingModel {
    fn num_coefficients(&self) -> usize;

    fn update(&self, beta: &Coefficients) -> Result<WorkingState<'_>, EstimationError>;

    /// Log-likelihood at `beta`, when the model can evaluate it.
    fn log_likelihood(&self, _beta: &Coefficients) -> Result<Option<f64>, EstimationError> {
        Ok(None)
    }
}

fn summed_log_likelihood<F>(
    family: &F,
    design: &DesignMatrix,
    response: ArrayView1<'_, f64>,
    beta: &Coefficients,
) -> Result<Option<f64>, EstimationError>
where
    F: ExponentialFamily + ?Sized,
{
    let eta = design.matvec(beta.view());
    match family.log_prob_derivatives(response, eta.view()) {
        Ok(derivs) => Ok(Some(derivs.log_prob.sum())),
        Err(EstimationError::UnsupportedOperation(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Fisher-scoring model: the design is the curvature outer factor and the
/// Fisher weights `(dμ/dη)² / Var` are the middle.
pub struct FisherWorkingModel<'a, F: ExponentialFamily + ?Sized> {
    design: &'a DesignMatrix,
    response: ArrayView1<'a, f64>,
    family: &'a F,
}

impl<'a, F: ExponentialFamily + ?Sized> FisherWorkingModel<'a, F> {
    pub fn new(design: &'a DesignMatrix, response: ArrayView1<'a, f64>, family: &'a F) -> Self {
        Self {
            design,
            response,
            family,
        }
    }
}

impl<F: ExponentialFamily + ?Sized> WorkingModel for FisherWorkingModel<'_, F> {
    fn num_coefficients(&self) -> usize {
        self.design.ncols()
    }

    fn update(&self, beta: &Coefficients) -> Result<WorkingState<'_>, EstimationError> {
        let eta = self.design.matvec(beta.view());
        let moments = self.family.moments(eta.view())?;
        let terms = grad_neg_log_likelihood_and_fim(self.design, &moments, self.response)?;
        Ok(WorkingState {
            gradient: terms.gradient,
            hessian_outer: CurvatureOuter::Design(self.design),
            hessian_middle: terms.fim_middle,
        })
    }

    fn log_likelihood(&self, beta: &Coefficients) -> Result<Option<f64>, EstimationError> {
        summed_log_likelihood(self.family, self.design, self.response, beta)
    }
}

/// Exact-Hessian model.
///
/// Forms `H = Xᵗ · diag(-∂²log p/∂η²) · X`, factors it as `H = Rᵗ·R` and hands
/// `R` to the sweep with a unit middle. When `H` is only semi-definite a small
/// ridge is added before factoring.
pub struct ExactHessianWorkingModel<'a, F: ExponentialFamily + ?Sized> {
    design: &'a DesignMatrix,
    response: ArrayView1<'a, f64>,
    family: &'a F,
}

impl<'a, F: ExponentialFamily + ?Sized> ExactHessianWorkingModel<'a, F> {
    pub fn new(design: &'a DesignMatrix, response: ArrayView1<'a, f64>, family: &'a F) -> Self {
        Self {
            design,
            response,
            family,
        }
    }

    fn hessian(&self, weights: ArrayView1<'_, f64>) -> Array2<f64> {
        let n = self.design.ncols();
        let mut hessian = Array2::<f64>::zeros((n, n));
        let mut scratch = Array1::<f64>::zeros(self.design.nrows());
        let mut column = Array1::<f64>::zeros(n);
        for j in 0..n {
            self.design
                .weighted_column_gram_into(j, weights, &mut scratch, &mut column);
            hessian.column_mut(j).assign(&column);
        }
        // Symmetrize away round-off from the column-wise products.
        let transposed = hessian.t().to_owned();
        hessian += &transposed;
        hessian *= 0.5;
        hessian
    }
}

impl<F: ExponentialFamily + ?Sized> WorkingModel for ExactHessianWorkingModel<'_, F> {
    fn num_coefficients(&self) -> usize {
        self.design.ncols()
    }

    fn update(&self, beta: &Coefficients) -> Result<WorkingState<'_>, EstimationError> {
        let eta = self.design.matvec(beta.view());
        let derivs = self.family.log_prob_derivatives(self.response, eta.view())?;
        if derivs.d_eta.iter().any(|v| !v.is_finite()) {
            return Err(EstimationError::NonFiniteValue("log-likelihood gradient"));
        }
        if derivs.d2_eta.iter().any(|v| !v.is_finite()) {
            return Err(EstimationError::NonFiniteValue("log-likelihood curvature"));
        }

        let mut gradient = self.design.transpose_matvec(derivs.d_eta.view());
        gradient.mapv_inplace(|g| -g);
        let weights = derivs.d2_eta.mapv(|d2| -d2);
        let hessian = self.hessian(weights.view());

        let (factor, ridge) = cholesky_with_ridge_fallback(&hessian, "exact Hessian")?;
        if ridge > 0.0 {
            log::debug!("exact Hessian factored with ridge {:.3e}", ridge);
        }
        let upper = factor.upper_triangular();
        let n = upper.dim().0;
        Ok(WorkingState {
            gradient,
            hessian_outer: CurvatureOuter::Factor(upper),
            hessian_middle: Array1::ones(n),
        })
    }

    fn log_likelihood(&self, beta: &Coefficients) -> Result<Option<f64>, EstimationError> {
        summed_log_likelihood(self.family, self.design, self.response, beta)
    }
}

/// Minimize `-LogLikelihood(β) + l1·‖β‖₁ + l2·‖β‖₂²` with GLMNet.
///
/// Runs up to `options.max_iterations` outer iterations, each refreshing the
/// model at the current coefficients and running up to
/// `options.max_full_sweeps_per_iteration` inner sweeps. Exhausting the budget
/// is not an error: the result carries `converged = false` and the last
/// coefficients.
pub fn minimize_sparse<M>(
    model: &M,
    x_start: &Coefficients,
    options: &FitOptions,
) -> Result<FitResult, EstimationError>
where
    M: WorkingModel + ?Sized,
{
    options.validate()?;
    let n = model.num_coefficients();
    if x_start.len() != n {
        return Err(EstimationError::DimensionMismatch {
            context: "starting coefficients vs model",
            expected: n,
            found: x_start.len(),
        });
    }

    let sweep_options = options.sweep_options();
    let mut workspace = SweepWorkspace::new();
    let mut beta = x_start.clone();
    let mut converged = false;
    let mut iterations = 0usize;
    let mut sweeps_per_iteration = Vec::with_capacity(options.max_iterations.min(1024));

    while iterations < options.max_iterations && !converged {
        let state = model.update(&beta)?;
        let step = minimize_sparse_one_step(
            state.gradient.view(),
            &state.hessian_outer,
            state.hessian_middle.view(),
            &beta,
            &sweep_options,
            &mut workspace,
        )?;
        beta = step.beta;
        converged = step.converged;
        iterations += 1;
        sweeps_per_iteration.push(step.sweeps);
        log::debug!(
            "GLMNet iteration {}: {} sweeps ({} coordinate steps), {} nonzero, |β|₂ = {:.4e}, converged = {}",
            iterations,
            step.sweeps,
            step.coordinate_updates,
            beta.count_nonzero(),
            beta.l2_norm(),
            converged
        );
    }

    if !converged {
        log::warn!(
            "GLMNet did not converge within {} iterations (tolerance {:.3e})",
            options.max_iterations,
            options.tolerance
        );
    }

    let penalized_objective = model
        .log_likelihood(&beta)?
        .map(|ll| -ll + options.penalty(&beta));
    if let Some(objective) = penalized_objective {
        log::debug!("penalized objective at solution: {:.6e}", objective);
    }

    Ok(FitResult {
        beta,
        converged,
        iterations,
        sweeps_per_iteration,
        penalized_objective,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faer_ndarray::FaerCholesky;
    use crate::types::LikelihoodFamily;
    use approx::assert_abs_diff_eq;
    use faer::Side;
    use ndarray::array;

    fn logistic_problem() -> (DesignMatrix, Array1<f64>) {
        let x = array![
            [1.0, 0.3, -1.2],
            [1.0, -0.8, 0.4],
            [1.0, 1.5, 0.9],
            [1.0, -0.2, -0.6],
            [1.0, 0.7, 1.1],
            [1.0, -1.3, 0.2],
            [1.0, 0.1, -0.3],
            [1.0, 0.9, -1.0]
        ];
        let y = array![0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        (DesignMatrix::from(x), y)
    }

    #[test]
    fn exact_factor_reproduces_hessian() {
        let (design, y) = logistic_problem();
        let family = LikelihoodFamily::BinomialLogit;
        let model = ExactHessianWorkingModel::new(&design, y.view(), &family);
        let beta = Coefficients::new(array![0.1, -0.4, 0.3]);
        let state = model.update(&beta).unwrap();
        let CurvatureOuter::Factor(upper) = &state.hessian_outer else {
            panic!("exact model must return a dense factor");
        };
        let reconstructed = upper.t().dot(upper);

        let eta = design.matvec(beta.view());
        let x = design.to_dense();
        let weights = eta.mapv(|e| {
            let p = 1.0 / (1.0 + (-e).exp());
            p * (1.0 - p)
        });
        let mut expected = Array2::<f64>::zeros((3, 3));
        for i in 0..x.nrows() {
            let row = x.row(i);
            for a in 0..3 {
                for b in 0..3 {
                    expected[[a, b]] += weights[i] * row[a] * row[b];
                }
            }
        }
        for a in 0..3 {
            for b in 0..3 {
                assert_abs_diff_eq!(reconstructed[[a, b]], expected[[a, b]], epsilon = 1e-12);
                if a > b {
                    assert_eq!(upper[[a, b]], 0.0);
                }
            }
        }
        assert_eq!(state.hessian_middle, Array1::ones(3));
        assert!(expected.cholesky(Side::Lower).is_ok());
    }

    #[test]
    fn fisher_state_borrows_design_as_outer_factor() {
        let (design, y) = logistic_problem();
        let family = LikelihoodFamily::BinomialLogit;
        let model = FisherWorkingModel::new(&design, y.view(), &family);
        let state = model.update(&Coefficients::zeros(3)).unwrap();
        assert!(matches!(
            state.hessian_outer,
            CurvatureOuter::Design(d) if std::ptr::eq(d, &design)
        ));
        for &w in state.hessian_middle.iter() {
            assert_abs_diff_eq!(w, 0.25, epsilon = 1e-15);
        }
    }

    #[test]
    fn custom_working_model_drives_the_loop() {
        // Quadratic loss ½‖β − c‖², curvature I expressed with an identity outer factor.
        struct Quadratic {
            center: Array1<f64>,
        }
        impl WorkingModel for Quadratic {
            fn num_coefficients(&self) -> usize {
                self.center.len()
            }
            fn update(&self, beta: &Coefficients) -> Result<WorkingState<'_>, EstimationError> {
                let n = self.center.len();
                Ok(WorkingState {
                    gradient: &**beta - &self.center,
                    hessian_outer: CurvatureOuter::Factor(Array2::eye(n)),
                    hessian_middle: Array1::ones(n),
                })
            }
        }
        let model = Quadratic {
            center: array![2.0, -0.3, 0.05],
        };
        let options = FitOptions::new(1e-12, 0.1).with_max_iterations(5);
        let fit = minimize_sparse(&model, &Coefficients::zeros(3), &options).unwrap();
        assert!(fit.converged);
        // Separable: each coordinate is soft-thresholded once.
        assert_abs_diff_eq!(fit.beta[0], 1.9, epsilon = 1e-14);
        assert_abs_diff_eq!(fit.beta[1], -0.2, epsilon = 1e-14);
        assert_eq!(fit.beta[2], 0.0);
        assert!(fit.penalized_objective.is_none());
    }

    #[test]
    fn zero_iteration_budget_returns_start_unconverged() {
        let (design, y) = logistic_problem();
        let family = LikelihoodFamily::BinomialLogit;
        let model = FisherWorkingModel::new(&design, y.view(), &family);
        let start = Coefficients::new(array![0.2, 0.0, -0.1]);
        let options = FitOptions::new(1e-8, 0.0).with_max_iterations(0);
        let fit = minimize_sparse(&model, &start, &options).unwrap();
        assert_eq!(fit.beta, start);
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 0);
        assert!(fit.sweeps_per_iteration.is_empty());
    }

    #[test]
    fn fisher_and_exact_hessian_agree_for_canonical_link() {
        let (design, y) = logistic_problem();
        let family = LikelihoodFamily::BinomialLogit;
        let options = FitOptions::new(1e-16, 0.05)
            .with_l2_regularizer(0.1)
            .with_max_iterations(500);
        let fisher = minimize_sparse(
            &FisherWorkingModel::new(&design, y.view(), &family),
            &Coefficients::zeros(3),
            &options,
        )
        .unwrap();
        let exact = minimize_sparse(
            &ExactHessianWorkingModel::new(&design, y.view(), &family),
            &Coefficients::zeros(3),
            &options,
        )
        .unwrap();
        assert!(fisher.converged && exact.converged);
        for j in 0..3 {
            assert_abs_diff_eq!(fisher.beta[j], exact.beta[j], epsilon = 1e-6);
        }
        let (a, b) = (
            fisher.penalized_objective.unwrap(),
            exact.penalized_objective.unwrap(),
        );
        assert_abs_diff_eq!(a, b, epsilon = 1e-8);
    }

    #[test]
    fn mismatched_start_is_rejected() {
        let (design, y) = logistic_problem();
        let family = LikelihoodFamily::BinomialLogit;
        let model = FisherWorkingModel::new(&design, y.view(), &family);
        let err = minimize_sparse(&model, &Coefficients::zeros(2), &FitOptions::new(1e-8, 0.0));
        assert!(matches!(
            err,
            Err(EstimationError::DimensionMismatch {
                expected: 3,
                found: 2,
                ..
            })
        ));
    }
}
