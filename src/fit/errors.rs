//! Parameter covariance and error propagation.
//!
//! Two covariance strategies feed the same delta-method propagation:
//!
//! - **fast**: Jacobian of the per-point residual magnitude `|z − S(f)|` on the
//!   normalized data, using the analytic model derivatives.
//!   `cov = (JᵀJ)⁻¹ · Σ|u|² / (N − k)`.
//! - **full**: the canonical model seen through the environment is refitted to
//!   the *raw* data over `[canonical…, τ, a, α]` with stacked real/imaginary
//!   residuals. `cov = (JᵀJ)⁻¹ · Σ|u|² / (2N − k)`.
//!
//! Derived quantities (Qi in both conventions, diameter-corrected Qc) get
//! their errors from the gradient `g` and `σ² = gᵀ·C·g` including cross terms.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::domain::{CalibrationParams, FitErrors, PortType, ResonatorFit, SweepData};
use crate::math::lm::{FnProblem, LmOptions, levenberg_marquardt, normal_matrix_inverse, numerical_jacobian};
use crate::models::{NotchModel, ReflectionModel, environment, transmission_s21};

// Notch covariance layout.
const FR: usize = 0;
const QC: usize = 1;
const QR: usize = 2;
const PHI: usize = 3;

const FULL_MAX_ITER: usize = 200;

/// `sqrt(gᵀ·C·g)` for a sparse gradient `[(index, ∂f/∂p_index)]`.
pub fn propagate(gradient: &[(usize, f64)], cov: &DMatrix<f64>) -> f64 {
    let mut var = 0.0;
    for &(i, gi) in gradient {
        for &(j, gj) in gradient {
            var += gi * gj * cov[(i, j)];
        }
    }
    var.max(0.0).sqrt()
}

/// Error of `Qi = 1/(1/Qr − 1/Qc)` (no diameter correction).
pub fn qi_no_corr_error(qr: f64, qc: f64, cov: &DMatrix<f64>, qc_idx: usize, qr_idx: usize) -> f64 {
    let d = 1.0 / qr - 1.0 / qc;
    let d_qr = 1.0 / (d * d * qr * qr);
    let d_qc = -1.0 / (d * d * qc * qc);
    propagate(&[(qr_idx, d_qr), (qc_idx, d_qc)], cov)
}

/// Error of `Qi = 1/(1/Qr − cos φ₀/|Qc|)` for the notch layout.
pub fn qi_dia_corr_error(fit: &ResonatorFit, cov: &DMatrix<f64>) -> f64 {
    let (qr, qc, phi) = (fit.qr, fit.abs_qc, fit.phi0);
    let d = 1.0 / qr - phi.cos() / qc;
    let d2 = d * d;
    propagate(
        &[
            (QR, 1.0 / (d2 * qr * qr)),
            (QC, -phi.cos() / (d2 * qc * qc)),
            (PHI, -phi.sin() / (d2 * qc)),
        ],
        cov,
    )
}

/// Error of `Qc_dia_corr = |Qc| / cos φ₀` for the notch layout.
pub fn qc_dia_corr_error(fit: &ResonatorFit, cov: &DMatrix<f64>) -> f64 {
    let (qc, phi) = (fit.abs_qc, fit.phi0);
    let c = phi.cos();
    propagate(&[(QC, 1.0 / c), (PHI, qc * phi.sin() / (c * c))], cov)
}

fn sigma(cov: &DMatrix<f64>, i: usize) -> f64 {
    cov[(i, i)].max(0.0).sqrt()
}

/// Notch errors from a covariance over `[fr, |Qc|, Qr, φ₀]`.
pub fn notch_errors(fit: &ResonatorFit, cov: &DMatrix<f64>, chi_square: f64) -> FitErrors {
    FitErrors {
        fr: sigma(cov, FR),
        qr: sigma(cov, QR),
        abs_qc: sigma(cov, QC),
        phi0: sigma(cov, PHI),
        qc_dia_corr: qc_dia_corr_error(fit, cov),
        qi_no_corr: qi_no_corr_error(fit.qr, fit.abs_qc, cov, QC, QR),
        qi_dia_corr: qi_dia_corr_error(fit, cov),
        delay: None,
        a: None,
        alpha: None,
        chi_square,
    }
}

/// Reflection errors from a covariance over `[fr, Qc, Qr]`.
pub fn reflection_errors(fit: &ResonatorFit, cov: &DMatrix<f64>, chi_square: f64) -> FitErrors {
    let qi = qi_no_corr_error(fit.qr, fit.abs_qc, cov, 1, 2);
    FitErrors {
        fr: sigma(cov, 0),
        qr: sigma(cov, 2),
        abs_qc: sigma(cov, 1),
        phi0: f64::NAN,
        qc_dia_corr: sigma(cov, 1),
        qi_no_corr: qi,
        qi_dia_corr: qi,
        delay: None,
        a: None,
        alpha: None,
        chi_square,
    }
}

/// Transmission errors from a covariance over `[fr, Qr]`.
pub fn transmission_errors(cov: &DMatrix<f64>, chi_square: f64) -> FitErrors {
    FitErrors {
        fr: sigma(cov, 0),
        qr: sigma(cov, 1),
        abs_qc: f64::NAN,
        phi0: f64::NAN,
        qc_dia_corr: f64::NAN,
        qi_no_corr: f64::NAN,
        qi_dia_corr: f64::NAN,
        delay: None,
        a: None,
        alpha: None,
        chi_square,
    }
}

/// `(JᵀJ)⁻¹·Σ|u|²/(N − k)` where row `i` of `J` is `∂|u_i|/∂p`.
///
/// `derivatives(i)` returns `∂S/∂p` at point `i`. Points with `u_i = 0`
/// carry no direction and are skipped.
fn magnitude_covariance<D>(residuals: &[Complex64], params: usize, derivatives: D) -> Option<DMatrix<f64>>
where
    D: Fn(usize) -> Vec<Complex64>,
{
    let n = residuals.len();
    if n <= params {
        return None;
    }
    let mut jac = DMatrix::zeros(n, params);
    let mut sum_sq = 0.0;
    for (i, u) in residuals.iter().enumerate() {
        let chi = u.norm();
        sum_sq += chi * chi;
        if chi == 0.0 {
            continue;
        }
        let unit = u / chi;
        for (j, ds) in derivatives(i).into_iter().enumerate() {
            // ∂|z − S|/∂p = −Re(∂S/∂p · conj(û))
            jac[(i, j)] = -(ds * unit.conj()).re;
        }
    }
    let inv = normal_matrix_inverse(&jac)?;
    Some(inv * (sum_sq / (n - params) as f64))
}

/// Fast covariance of the notch fit over `[fr, |Qc|, Qr, φ₀]`.
pub fn notch_fast_covariance(freq: &[f64], data: &[Complex64], model: &NotchModel) -> Option<DMatrix<f64>> {
    let residuals: Vec<Complex64> = freq.iter().zip(data).map(|(f, z)| z - model.s21(*f)).collect();
    magnitude_covariance(&residuals, 4, |i| {
        let d = model.derivatives(freq[i]);
        vec![d.d_fr, d.d_abs_qc, d.d_qr, d.d_phi0]
    })
}

/// Fast covariance of the reflection fit over `[fr, Qc, Qr]`.
pub fn reflection_fast_covariance(freq: &[f64], data: &[Complex64], model: &ReflectionModel) -> Option<DMatrix<f64>> {
    let residuals: Vec<Complex64> = freq.iter().zip(data).map(|(f, z)| z - model.s11(*f)).collect();
    magnitude_covariance(&residuals, 3, |i| {
        let d = model.derivatives(freq[i]);
        vec![d.d_fr, d.d_qc, d.d_qr]
    })
}

fn stacked(residuals: impl ExactSizeIterator<Item = Complex64>) -> DVector<f64> {
    let n = residuals.len();
    let mut out = DVector::zeros(2 * n);
    for (i, u) in residuals.enumerate() {
        out[i] = u.re;
        out[n + i] = u.im;
    }
    out
}

/// Covariance of the transmission fit over `[fr, Qr]` (numerical Jacobian).
pub fn transmission_covariance(freq: &[f64], data: &[Complex64], fr: f64, qr: f64) -> Option<DMatrix<f64>> {
    let n = freq.len();
    if n <= 1 {
        return None;
    }
    let residual = |p: &DVector<f64>| stacked(freq.iter().zip(data).map(|(f, z)| transmission_s21(*f, p[0], p[1]) - z));
    let params = DVector::from_vec(vec![fr, qr]);
    let sum_sq = residual(&params).norm_squared();
    let jac = numerical_jacobian(residual, &params, None);
    let inv = normal_matrix_inverse(&jac)?;
    Some(inv * (sum_sq / (2 * n - 2) as f64))
}

/// Canonical parameter vector for a port in covariance layout.
pub fn canonical_params(port: PortType, fit: &ResonatorFit) -> Vec<f64> {
    match port {
        PortType::Notch => vec![fit.fr, fit.abs_qc, fit.qr, fit.phi0],
        PortType::Reflection => vec![fit.fr, fit.abs_qc, fit.qr],
        PortType::Transmission => vec![fit.fr, fit.qr],
    }
}

fn canonical(port: PortType, p: &[f64], f: f64) -> Complex64 {
    match port {
        PortType::Notch => NotchModel {
            fr: p[0],
            abs_qc: p[1],
            qr: p[2],
            phi0: p[3],
        }
        .s21(f),
        PortType::Reflection => ReflectionModel {
            fr: p[0],
            qc: p[1],
            qr: p[2],
        }
        .s11(f),
        PortType::Transmission => transmission_s21(f, p[0], p[1]),
    }
}

/// Outcome of the full-model refit on raw data.
#[derive(Debug, Clone)]
pub struct FullModelFit {
    /// `[canonical…, τ, a, α]` at the optimum.
    pub params: DVector<f64>,
    pub covariance: Option<DMatrix<f64>>,
    /// `Σ|u|² / (2N − k)`.
    pub residual_variance: f64,
    pub converged: bool,
}

/// Refit `a·e^{i(α − 2πτf)}·S(f) + A2·(f − frcal)` to the raw sweep.
///
/// `A2` and `frcal` stay fixed at their calibration values.
pub fn full_model_fit(raw: &SweepData, cal: &CalibrationParams, port: PortType, fit: &ResonatorFit) -> FullModelFit {
    let freq = raw.freq();
    let data = raw.data();
    let k = canonical_params(port, fit).len();

    let mut initial = canonical_params(port, fit);
    initial.extend([cal.delay, cal.a, cal.alpha]);
    let mut typical = match port {
        PortType::Notch => vec![fit.fr, fit.abs_qc, fit.qr, 1.0],
        PortType::Reflection => vec![fit.fr, fit.abs_qc, fit.qr],
        PortType::Transmission => vec![fit.fr, fit.qr],
    };
    typical.extend([1e-9, cal.a.abs(), 1.0]);

    let problem = FnProblem::new(|p: &DVector<f64>| {
        let (delay, a, alpha) = (p[k], p[k + 1], p[k + 2]);
        stacked(freq.iter().zip(data).map(|(f, z)| {
            environment(*f, a, alpha, delay) * canonical(port, &p.as_slice()[..k], *f) + cal.a2 * (f - cal.frcal) - z
        }))
    })
    .with_typical(DVector::from_vec(typical));
    let report = levenberg_marquardt(
        &problem,
        DVector::from_vec(initial),
        &LmOptions::default().with_max_iterations(FULL_MAX_ITER),
    );

    let dof = report.residuals.len() as f64 - report.params.len() as f64;
    let residual_variance = if dof > 0.0 { report.sum_sq / dof } else { f64::NAN };
    let covariance = report.unscaled_covariance().map(|c| c * residual_variance);
    tracing::debug!(termination = ?report.termination, residual_variance, "full model fit");

    FullModelFit {
        converged: report.converged(),
        params: report.params,
        covariance,
        residual_variance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn notch_fit(qr: f64, qc: f64, phi0: f64) -> ResonatorFit {
        let qc_dia = qc / phi0.cos();
        ResonatorFit {
            fr: 5e9,
            qr,
            abs_qc: qc,
            complex_qc: Complex64::from_polar(qc, -phi0),
            qc_dia_corr: qc_dia,
            qi_no_corr: 1.0 / (1.0 / qr - 1.0 / qc),
            qi_dia_corr: 1.0 / (1.0 / qr - 1.0 / qc_dia),
            phi0,
            theta0: 0.0,
            r0: qr / (2.0 * qc),
        }
    }

    fn qi_dia(p: &[f64]) -> f64 {
        1.0 / (1.0 / p[QR] - p[PHI].cos() / p[QC])
    }

    #[test]
    fn diagonal_covariance_matches_independent_terms() {
        let fit = notch_fit(1e4, 2e4, 0.0);
        let cov = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 100.0 * 100.0, 50.0 * 50.0, 0.0]));
        let err = qi_no_corr_error(fit.qr, fit.abs_qc, &cov, QC, QR);
        // Qi = 2e4; ∂Qi/∂Qr = Qi²/Qr² = 4, ∂Qi/∂Qc = −Qi²/Qc² = −1
        assert_relative_eq!(err, ((4.0f64 * 50.0).powi(2) + 100.0f64.powi(2)).sqrt(), max_relative = 1e-12);
    }

    #[test]
    fn cross_terms_change_qi_error() {
        let fit = notch_fit(1e4, 2e4, 0.0);
        let mut cov = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1e4, 2500.0, 0.0]));
        let independent = qi_no_corr_error(fit.qr, fit.abs_qc, &cov, QC, QR);
        // Positive correlation between Qr and Qc, opposite-sign gradients: variance shrinks.
        cov[(QC, QR)] = 0.9 * 100.0 * 50.0;
        cov[(QR, QC)] = cov[(QC, QR)];
        let correlated = qi_no_corr_error(fit.qr, fit.abs_qc, &cov, QC, QR);
        assert!(correlated < independent);
        let expected = (16.0 * 2500.0 + 1e4 - 2.0 * 4.0 * cov[(QC, QR)]).sqrt();
        assert_relative_eq!(correlated, expected, max_relative = 1e-12);
    }

    #[test]
    fn diameter_corrected_gradient_matches_finite_difference() {
        let fit = notch_fit(1.2e4, 3e4, 0.4);
        let p = [fit.fr, fit.abs_qc, fit.qr, fit.phi0];
        let steps = [1.0, 1.0, 1.0, 1e-6];
        let mut grad = [0.0; 4];
        for j in 1..4 {
            let mut hi = p;
            let mut lo = p;
            hi[j] += steps[j];
            lo[j] -= steps[j];
            grad[j] = (qi_dia(&hi) - qi_dia(&lo)) / (2.0 * steps[j]);
        }
        let mut cov = DMatrix::from_diagonal(&DVector::from_vec(vec![0.0, 40.0, 30.0, 0.01]));
        for (i, j, v) in [(QC, QR, 5.0), (QC, PHI, 0.1), (QR, PHI, -0.05)] {
            cov[(i, j)] = v;
            cov[(j, i)] = v;
        }
        let mut var = 0.0;
        for i in 1..4 {
            for j in 1..4 {
                var += grad[i] * grad[j] * cov[(i, j)];
            }
        }
        assert_relative_eq!(qi_dia_corr_error(&fit, &cov), var.sqrt(), max_relative = 1e-5);
    }

    #[test]
    fn qc_dia_corr_error_includes_phase_term() {
        let fit = notch_fit(1e4, 2e4, 0.3);
        let mut cov = DMatrix::zeros(4, 4);
        cov[(PHI, PHI)] = 1e-4;
        let c = 0.3f64.cos();
        let expected = 2e4 * 0.3f64.sin() / (c * c) * 1e-2;
        assert_relative_eq!(qc_dia_corr_error(&fit, &cov), expected, max_relative = 1e-12);
        cov[(QC, QC)] = 400.0;
        assert_relative_eq!(
            qc_dia_corr_error(&fit, &cov),
            (expected * expected + 400.0 / (c * c)).sqrt(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn exact_data_has_no_fast_covariance() {
        let model = NotchModel {
            fr: 5e9,
            qr: 1e4,
            abs_qc: 2e4,
            phi0: 0.1,
        };
        let freq: Vec<f64> = (0..50).map(|i| 4.999e9 + 4e4 * i as f64).collect();
        let data: Vec<Complex64> = freq.iter().map(|f| model.s21(*f)).collect();
        assert!(notch_fast_covariance(&freq, &data, &model).is_none());
    }
}
