//! Levenberg–Marquardt nonlinear least squares.
//!
//! Minimizes `½ Σ r_i(p)²` for a residual vector `r(p)`.
//!
//! Implementation notes:
//! - Steps are solved in column-scaled coordinates (`D = diag(JᵀJ)`), so
//!   parameters of very different magnitude (Hz-scale frequencies next to
//!   radian offsets) are damped evenly.
//! - Damping follows Nielsen's update rule (gain ratio driven, no fixed factor).
//! - Iterations are capped; on exhaustion the best point found is returned with
//!   `converged = false`.
//! - The final Jacobian is kept so callers can form `(JᵀJ)⁻¹` for covariance.

use nalgebra::{DMatrix, DVector};

use crate::math::ols::solve_least_squares;

/// A least-squares problem: residuals and (optionally analytic) Jacobian.
pub trait LeastSquaresProblem {
    /// Residual vector at `params`.
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    /// Jacobian `∂r_i/∂p_j`; forward differences unless overridden.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        numerical_jacobian(|p| self.residuals(p), params, None)
    }
}

/// Wraps a residual closure (numerical Jacobian, optional typical scales).
pub struct FnProblem<F> {
    f: F,
    typical: Option<DVector<f64>>,
}

impl<F> FnProblem<F>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    pub fn new(f: F) -> Self {
        Self { f, typical: None }
    }

    /// Typical magnitude of each parameter, used as the finite-difference
    /// step floor when a parameter is near zero.
    pub fn with_typical(mut self, typical: DVector<f64>) -> Self {
        self.typical = Some(typical);
        self
    }
}

impl<F> LeastSquaresProblem for FnProblem<F>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        (self.f)(params)
    }

    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        numerical_jacobian(&self.f, params, self.typical.as_ref())
    }
}

/// Forward-difference Jacobian.
pub fn numerical_jacobian<F>(f: F, params: &DVector<f64>, typical: Option<&DVector<f64>>) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let r0 = f(params);
    let mut jac = DMatrix::zeros(r0.len(), params.len());
    let sqrt_eps = f64::EPSILON.sqrt();
    for j in 0..params.len() {
        let scale = match typical.and_then(|t| t.get(j).copied()) {
            Some(t) => params[j].abs().max(t.abs()),
            None if params[j] != 0.0 => params[j].abs(),
            None => 1.0,
        };
        let h = sqrt_eps * scale;
        let mut shifted = params.clone();
        shifted[j] += h;
        let step = shifted[j] - params[j];
        let r1 = f(&shifted);
        for i in 0..r0.len() {
            jac[(i, j)] = (r1[i] - r0[i]) / step;
        }
    }
    jac
}

/// Stopping thresholds for [`levenberg_marquardt`].
#[derive(Debug, Clone, Copy)]
pub struct LmOptions {
    /// Hard cap on outer iterations (accepted or rejected steps).
    pub max_iterations: usize,
    /// Relative cost reduction below which the fit is considered converged.
    pub ftol: f64,
    /// Relative per-parameter step below which the fit is considered converged.
    pub xtol: f64,
    /// Cosine between residual and Jacobian columns below which the fit is converged.
    pub gtol: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            ftol: 1e-14,
            xtol: 1e-13,
            gtol: 1e-12,
        }
    }
}

impl LmOptions {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    ZeroResidual,
    Gradient,
    StepSize,
    CostReduction,
    /// No step reduces the cost any further at maximal damping.
    Stalled,
    MaxIterations,
    /// Residuals were non-finite at the starting point.
    NonFinite,
}

/// Outcome of a least-squares fit.
#[derive(Debug, Clone)]
pub struct LmReport {
    pub params: DVector<f64>,
    pub residuals: DVector<f64>,
    /// Jacobian at `params`.
    pub jacobian: DMatrix<f64>,
    /// `Σ r_i²` at `params`.
    pub sum_sq: f64,
    pub iterations: usize,
    pub termination: TerminationReason,
}

impl LmReport {
    pub fn converged(&self) -> bool {
        !matches!(
            self.termination,
            TerminationReason::MaxIterations | TerminationReason::NonFinite
        )
    }

    /// `Σ r² / (m − n)`; `NaN` when there are no degrees of freedom.
    pub fn reduced_chi_square(&self) -> f64 {
        let dof = self.residuals.len() as f64 - self.params.len() as f64;
        if dof > 0.0 { self.sum_sq / dof } else { f64::NAN }
    }

    /// Unscaled covariance `(JᵀJ)⁻¹` (multiply by the residual variance).
    pub fn unscaled_covariance(&self) -> Option<DMatrix<f64>> {
        normal_matrix_inverse(&self.jacobian)
    }
}

/// `(JᵀJ)⁻¹`, computed in column-scaled form; `None` if singular.
pub fn normal_matrix_inverse(jac: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let jtj = jac.transpose() * jac;
    let n = jtj.nrows();
    let d: Vec<f64> = (0..n).map(|i| jtj[(i, i)].sqrt()).collect();
    if d.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
        return None;
    }
    let scaled = DMatrix::from_fn(n, n, |i, j| jtj[(i, j)] / (d[i] * d[j]));
    let inv = scaled.try_inverse()?;
    let out = DMatrix::from_fn(n, n, |i, j| inv[(i, j)] / (d[i] * d[j]));
    if out.iter().all(|v| v.is_finite()) { Some(out) } else { None }
}

/// Run Levenberg–Marquardt from `initial`.
pub fn levenberg_marquardt<P>(problem: &P, initial: DVector<f64>, options: &LmOptions) -> LmReport
where
    P: LeastSquaresProblem + ?Sized,
{
    let n = initial.len();
    let mut params = initial;
    let mut residuals = problem.residuals(&params);
    let mut sum_sq = residuals.norm_squared();

    if !sum_sq.is_finite() {
        let jacobian = DMatrix::zeros(residuals.len(), n);
        return LmReport {
            params,
            residuals,
            jacobian,
            sum_sq,
            iterations: 0,
            termination: TerminationReason::NonFinite,
        };
    }

    let mut jacobian = problem.jacobian(&params);
    let mut lambda: Option<f64> = None;
    let mut nu = 2.0;
    let mut termination = TerminationReason::MaxIterations;
    let mut iterations = 0;

    while iterations < options.max_iterations {
        iterations += 1;

        if sum_sq == 0.0 {
            termination = TerminationReason::ZeroResidual;
            break;
        }

        let jtj = jacobian.transpose() * &jacobian;
        let grad = jacobian.transpose() * &residuals;
        let col_norm: Vec<f64> = (0..n).map(|j| jtj[(j, j)].sqrt()).collect();
        let scale: Vec<f64> = col_norm.iter().map(|c| if *c > 0.0 && c.is_finite() { *c } else { 1.0 }).collect();

        // Gradient test: cosine between r and each column of J.
        let r_norm = sum_sq.sqrt();
        let max_cos = (0..n)
            .filter(|j| col_norm[*j] > 0.0)
            .map(|j| (grad[j] / (col_norm[j] * r_norm)).abs())
            .fold(0.0, f64::max);
        if max_cos <= options.gtol {
            termination = TerminationReason::Gradient;
            break;
        }

        let a_scaled = DMatrix::from_fn(n, n, |i, j| jtj[(i, j)] / (scale[i] * scale[j]));
        let g_scaled = DVector::from_fn(n, |i, _| grad[i] / scale[i]);
        let lam = *lambda.get_or_insert_with(|| {
            1e-3 * (0..n).map(|i| a_scaled[(i, i)]).fold(0.0, f64::max).max(1e-12)
        });
        if lam > 1e32 {
            termination = TerminationReason::Stalled;
            break;
        }

        let mut damped = a_scaled.clone();
        for i in 0..n {
            damped[(i, i)] += lam;
        }
        let rhs = -&g_scaled;
        let step_scaled = match damped.clone().cholesky() {
            Some(chol) => Some(chol.solve(&rhs)),
            None => solve_least_squares(&damped, &rhs),
        };
        let Some(step_scaled) = step_scaled else {
            lambda = Some(lam * nu);
            nu *= 2.0;
            continue;
        };
        let step = DVector::from_fn(n, |i, _| step_scaled[i] / scale[i]);

        let small_step = (0..n).all(|i| step[i].abs() <= options.xtol * (params[i].abs() + options.xtol));
        if small_step {
            termination = TerminationReason::StepSize;
            break;
        }

        let candidate = &params + &step;
        let cand_residuals = problem.residuals(&candidate);
        let cand_sum_sq = cand_residuals.norm_squared();

        // Predicted reduction of ½Σr² for the linearized model.
        let predicted = 0.5 * step_scaled.dot(&(step_scaled.scale(lam) - &g_scaled));
        let actual = 0.5 * (sum_sq - cand_sum_sq);

        if cand_sum_sq.is_finite() && actual > 0.0 && predicted > 0.0 {
            let rho = actual / predicted;
            let relative = actual / (0.5 * sum_sq);
            params = candidate;
            residuals = cand_residuals;
            sum_sq = cand_sum_sq;
            jacobian = problem.jacobian(&params);
            lambda = Some(lam * (1.0f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3)));
            nu = 2.0;
            if relative <= options.ftol {
                termination = TerminationReason::CostReduction;
                break;
            }
        } else {
            lambda = Some(lam * nu);
            nu *= 2.0;
        }
    }

    LmReport {
        params,
        residuals,
        jacobian,
        sum_sq,
        iterations,
        termination,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Exponential {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresProblem for Exponential {
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.t.len(),
                self.t.iter().zip(&self.y).map(|(t, y)| p[0] * (-p[1] * t).exp() - y),
            )
        }
    }

    #[test]
    fn fits_exponential_decay() {
        let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = t.iter().map(|t| 2.5 * (-1.3 * t).exp()).collect();
        let problem = Exponential { t, y };
        let report = levenberg_marquardt(&problem, DVector::from_vec(vec![1.0, 0.5]), &LmOptions::default());
        assert!(report.converged());
        assert_relative_eq!(report.params[0], 2.5, max_relative = 1e-8);
        assert_relative_eq!(report.params[1], 1.3, max_relative = 1e-8);
        assert!(report.sum_sq < 1e-20);
    }

    #[test]
    fn badly_scaled_parameters_converge() {
        // Lorentzian dip at 5 GHz with width 1 MHz: parameters span 9 decades.
        let f: Vec<f64> = (0..201).map(|i| 4.995e9 + i as f64 * 5e4).collect();
        let model = |p: &DVector<f64>, f: f64| 1.0 - p[2] / (1.0 + ((f - p[0]) / p[1]).powi(2));
        let truth = DVector::from_vec(vec![5.0e9, 1.0e6, 0.7]);
        let y: Vec<f64> = f.iter().map(|x| model(&truth, *x)).collect();
        let problem = FnProblem::new(|p: &DVector<f64>| {
            DVector::from_iterator(f.len(), f.iter().zip(&y).map(|(x, y)| model(p, *x) - y))
        });
        let report = levenberg_marquardt(
            &problem,
            DVector::from_vec(vec![5.0002e9, 1.5e6, 0.5]),
            &LmOptions::default(),
        );
        assert!(report.converged());
        assert_relative_eq!(report.params[0], 5.0e9, max_relative = 1e-10);
        assert_relative_eq!(report.params[1], 1.0e6, max_relative = 1e-8);
        assert_relative_eq!(report.params[2], 0.7, max_relative = 1e-8);
    }

    #[test]
    fn iteration_cap_is_respected() {
        let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = t.iter().map(|t| 2.5 * (-1.3 * t).exp()).collect();
        let problem = Exponential { t, y };
        let report = levenberg_marquardt(
            &problem,
            DVector::from_vec(vec![1.0, 0.5]),
            &LmOptions::default().with_max_iterations(2),
        );
        assert_eq!(report.iterations, 2);
        assert_eq!(report.termination, TerminationReason::MaxIterations);
        assert!(!report.converged());
    }

    #[test]
    fn covariance_of_linear_fit_matches_closed_form() {
        // r = p0 + p1·x - y  ⇒  (JᵀJ)⁻¹ is the OLS covariance.
        let x = [0.0, 1.0, 2.0, 3.0];
        let jac = DMatrix::from_fn(4, 2, |i, j| if j == 0 { 1.0 } else { x[i] });
        let inv = normal_matrix_inverse(&jac).unwrap();
        // JᵀJ = [[4, 6], [6, 14]], det = 20.
        assert_relative_eq!(inv[(0, 0)], 14.0 / 20.0, max_relative = 1e-12);
        assert_relative_eq!(inv[(1, 1)], 4.0 / 20.0, max_relative = 1e-12);
        assert_relative_eq!(inv[(0, 1)], -6.0 / 20.0, max_relative = 1e-12);
    }

    #[test]
    fn singular_normal_matrix_has_no_inverse() {
        let jac = DMatrix::from_fn(4, 2, |_, _| 1.0);
        assert!(normal_matrix_inverse(&jac).is_none());
    }
}
