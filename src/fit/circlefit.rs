//! Resonator parameter extraction from normalized data.
//!
//! After normalization the resonance is a circle in canonical position
//! (notch: off-resonant point at 1; reflection: at −1; transmission: at 0).
//! The circle's radius and tilt give the coupling, the phase fit around its
//! center gives `fr` and `Qr`.

use nalgebra::DMatrix;
use num_complex::Complex64;

use crate::domain::{
    CalibrationParams, ErrorMode, FitErrors, FitOptions, FitOutcome, FitWarning, MIN_RELIABLE_POINTS, PortType,
    ResonatorFit, SweepData,
};
use crate::error::FitError;
use crate::fit::calibration::{circle_for, resonance_warnings};
use crate::fit::errors::{
    full_model_fit, notch_errors, notch_fast_covariance, reflection_errors, reflection_fast_covariance,
    transmission_covariance, transmission_errors,
};
use crate::fit::phase::{phase_fit, phase_fit_no_offset};
use crate::math::phase::periodic_boundary;
use crate::models::{NotchModel, ReflectionModel, transmission_s21};

/// Loaded-Q seed used when none is given.
pub const DEFAULT_QR_SEED: f64 = 1e6;

/// How parameter errors are estimated.
#[derive(Debug, Clone, Copy)]
pub enum ErrorStrategy<'a> {
    None,
    Fast,
    /// Refit the environment-dressed model to the raw sweep.
    Full {
        raw: &'a SweepData,
        calibration: &'a CalibrationParams,
    },
}

impl ErrorStrategy<'_> {
    pub fn mode(&self) -> ErrorMode {
        match self {
            ErrorStrategy::None => ErrorMode::None,
            ErrorStrategy::Fast => ErrorMode::Fast,
            ErrorStrategy::Full { .. } => ErrorMode::Full,
        }
    }
}

fn dof_chi_square(sum_sq: f64, n: usize, params: usize) -> f64 {
    if n > params { sum_sq / (n - params) as f64 } else { f64::NAN }
}

/// `1/(1/Qr − 1/Qc)`, or `NaN` when `Qr ≥ Qc`.
fn internal_q(qr: f64, qc: f64) -> f64 {
    if qr < qc { 1.0 / (1.0 / qr - 1.0 / qc) } else { f64::NAN }
}

/// Extract resonator parameters from a normalized sweep.
pub fn circlefit(normalized: &SweepData, options: &FitOptions, errors: ErrorStrategy<'_>) -> Result<FitOutcome, FitError> {
    let params = match options.port {
        PortType::Notch => 4,
        PortType::Reflection => 3,
        PortType::Transmission => 2,
    };
    if normalized.len() <= params {
        return Err(FitError::TooFewPoints {
            found: normalized.len(),
            required: params + 1,
        });
    }

    let mut warnings = Vec::new();
    if normalized.len() < MIN_RELIABLE_POINTS {
        warnings.push(FitWarning::FewPoints { n: normalized.len() });
    }

    let fr_seed = options.fr_seed.unwrap_or_else(|| match options.port {
        PortType::Transmission => normalized.freq_at_max_amplitude(),
        _ => normalized.freq_at_min_amplitude(),
    });
    let qr_seed = options.qr_seed.unwrap_or(DEFAULT_QR_SEED);
    let circle = circle_for(normalized.data(), options.refine_results)?;
    let center = circle.center();
    let centered: Vec<Complex64> = normalized.data().iter().map(|z| z - center).collect();
    let freq = normalized.freq();

    let mut outcome = match options.port {
        PortType::Notch => {
            let phi0 = -(circle.yc / circle.r0).clamp(-1.0, 1.0).asin();
            let theta0 = periodic_boundary(phi0 + std::f64::consts::PI);
            let phase = phase_fit(freq, &centered, theta0, qr_seed, fr_seed);
            warnings.extend(phase.warnings());

            let abs_qc = phase.qr / (2.0 * circle.r0);
            let complex_qc = Complex64::from_polar(abs_qc, -phi0);
            let qc_dia_corr = 1.0 / (1.0 / complex_qc).re;
            let fit = ResonatorFit {
                fr: phase.fr,
                qr: phase.qr,
                abs_qc,
                complex_qc,
                qc_dia_corr,
                qi_no_corr: internal_q(phase.qr, abs_qc),
                qi_dia_corr: internal_q(phase.qr, qc_dia_corr),
                phi0,
                theta0: phase.theta0,
                r0: circle.r0,
            };
            let model = NotchModel {
                fr: fit.fr,
                qr: fit.qr,
                abs_qc: fit.abs_qc,
                phi0: fit.phi0,
            };
            let sum_sq: f64 = freq.iter().zip(normalized.data()).map(|(f, z)| (z - model.s21(*f)).norm_sqr()).sum();
            let chi_square = dof_chi_square(sum_sq, freq.len(), 4);
            let errors = match errors {
                ErrorStrategy::Fast => {
                    covariance_errors(notch_fast_covariance(freq, normalized.data(), &model), &mut warnings, |cov| {
                        notch_errors(&fit, cov, chi_square)
                    })
                }
                _ => None,
            };
            FitOutcome {
                port: PortType::Notch,
                fit,
                errors,
                chi_square,
                warnings: Vec::new(),
            }
        }
        PortType::Reflection => {
            let phi0 = -(circle.yc / circle.r0).clamp(-1.0, 1.0).asin();
            let phase = phase_fit(freq, &centered, phi0, qr_seed, fr_seed);
            warnings.extend(phase.warnings());

            let qc = phase.qr / circle.r0;
            let qi = if circle.r0 < 1.0 { phase.qr / (1.0 - circle.r0) } else { f64::NAN };
            let fit = ResonatorFit {
                fr: phase.fr,
                qr: phase.qr,
                abs_qc: qc,
                complex_qc: Complex64::new(qc, 0.0),
                qc_dia_corr: qc,
                qi_no_corr: qi,
                qi_dia_corr: qi,
                phi0,
                theta0: phase.theta0,
                r0: circle.r0,
            };
            let model = ReflectionModel {
                fr: fit.fr,
                qr: fit.qr,
                qc,
            };
            let sum_sq: f64 = freq.iter().zip(normalized.data()).map(|(f, z)| (z - model.s11(*f)).norm_sqr()).sum();
            let chi_square = dof_chi_square(sum_sq, freq.len(), 3);
            let errors = match errors {
                ErrorStrategy::Fast => {
                    covariance_errors(reflection_fast_covariance(freq, normalized.data(), &model), &mut warnings, |cov| {
                        reflection_errors(&fit, cov, chi_square)
                    })
                }
                _ => None,
            };
            FitOutcome {
                port: PortType::Reflection,
                fit,
                errors,
                chi_square,
                warnings: Vec::new(),
            }
        }
        PortType::Transmission => {
            let phase = phase_fit_no_offset(freq, &centered, qr_seed, fr_seed);
            warnings.extend(phase.warnings());
            let fit = ResonatorFit {
                fr: phase.fr,
                qr: phase.qr,
                abs_qc: f64::NAN,
                complex_qc: Complex64::new(f64::NAN, f64::NAN),
                qc_dia_corr: f64::NAN,
                qi_no_corr: f64::NAN,
                qi_dia_corr: f64::NAN,
                phi0: f64::NAN,
                theta0: phase.theta0,
                r0: circle.r0,
            };
            let sum_sq: f64 = freq
                .iter()
                .zip(normalized.data())
                .map(|(f, z)| (z - transmission_s21(*f, fit.fr, fit.qr)).norm_sqr())
                .sum();
            let chi_square = dof_chi_square(sum_sq, freq.len(), 2);
            let errors = match errors {
                ErrorStrategy::Fast => covariance_errors(
                    transmission_covariance(freq, normalized.data(), fit.fr, fit.qr),
                    &mut warnings,
                    |cov| transmission_errors(cov, chi_square),
                ),
                _ => None,
            };
            FitOutcome {
                port: PortType::Transmission,
                fit,
                errors,
                chi_square,
                warnings: Vec::new(),
            }
        }
    };

    if let ErrorStrategy::Full { raw, calibration } = errors {
        outcome.errors = full_errors(raw, calibration, &outcome, &mut warnings);
    }

    warnings.extend(resonance_warnings(freq, outcome.fit.fr, outcome.fit.qr, None));
    if options.port != PortType::Transmission && !outcome.fit.qi_is_physical() {
        tracing::warn!(qr = outcome.fit.qr, qc = outcome.fit.abs_qc, "Qr >= Qc, internal Q undefined");
        warnings.push(FitWarning::UnphysicalQi);
    }
    tracing::debug!(fr = outcome.fit.fr, qr = outcome.fit.qr, chi_square = outcome.chi_square, "circle fit");
    outcome.warnings = warnings;
    Ok(outcome)
}

fn covariance_errors<F>(cov: Option<DMatrix<f64>>, warnings: &mut Vec<FitWarning>, propagate: F) -> Option<FitErrors>
where
    F: FnOnce(&DMatrix<f64>) -> FitErrors,
{
    match cov {
        Some(cov) => Some(propagate(&cov)),
        None => {
            tracing::warn!("covariance matrix is singular, errors omitted");
            warnings.push(FitWarning::CovarianceUnavailable);
            None
        }
    }
}

fn full_errors(
    raw: &SweepData,
    calibration: &CalibrationParams,
    outcome: &FitOutcome,
    warnings: &mut Vec<FitWarning>,
) -> Option<FitErrors> {
    let full = full_model_fit(raw, calibration, outcome.port, &outcome.fit);
    if !full.converged {
        tracing::warn!("full model fit did not converge");
        warnings.push(FitWarning::FullModelNotConverged);
    }
    let chi_square = full.residual_variance;
    let errors = full_block_errors(full.covariance.as_ref(), outcome, chi_square, warnings)?;
    tracing::debug!(delay_err = ?errors.delay, "full model errors");
    Some(errors)
}

/// Errors from the full-model covariance `[canonical…, τ, a, α]`.
fn full_block_errors(
    cov: Option<&DMatrix<f64>>,
    outcome: &FitOutcome,
    chi_square: f64,
    warnings: &mut Vec<FitWarning>,
) -> Option<FitErrors> {
    let block = cov.map(|cov| {
        let k = cov.nrows() - 3;
        cov.view((0, 0), (k, k)).into_owned()
    });
    let mut errors = covariance_errors(block, warnings, |block| match outcome.port {
        PortType::Notch => notch_errors(&outcome.fit, block, chi_square),
        PortType::Reflection => reflection_errors(&outcome.fit, block, chi_square),
        PortType::Transmission => transmission_errors(block, chi_square),
    })?;
    let cov = cov?;
    let k = cov.nrows() - 3;
    let sigma = |i: usize| cov[(i, i)].max(0.0).sqrt();
    errors.delay = Some(sigma(k));
    errors.a = Some(sigma(k + 1));
    errors.alpha = Some(sigma(k + 2));
    Some(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{SweepSpec, synthetic_sweep};
    use crate::fit::calibration::{do_calibration, do_normalization};
    use approx::assert_relative_eq;

    fn canonical_spec(spec: SweepSpec) -> SweepSpec {
        SweepSpec {
            a: 1.0,
            alpha: 0.0,
            delay: 0.0,
            ..spec
        }
    }

    #[test]
    fn recovers_notch_parameters_from_clean_data() {
        let spec = canonical_spec(SweepSpec::default());
        let sweep = synthetic_sweep(&spec).unwrap();
        let out = circlefit(&sweep, &FitOptions::default(), ErrorStrategy::None).unwrap();
        let fit = out.fit;
        assert_relative_eq!(fit.fr, spec.fr, max_relative = 1e-3);
        assert_relative_eq!(fit.qr, spec.qr, max_relative = 1e-3);
        assert_relative_eq!(fit.abs_qc, spec.qc, max_relative = 1e-3);
        assert_relative_eq!(fit.phi0, spec.phi0, epsilon = 1e-3);
        assert!(out.chi_square < 1e-12);
        assert!(out.errors.is_none());

        let qc_dia = spec.qc / spec.phi0.cos();
        assert_relative_eq!(fit.qc_dia_corr, qc_dia, max_relative = 1e-3);
        assert_relative_eq!(fit.qi_dia_corr, 1.0 / (1.0 / spec.qr - 1.0 / qc_dia), max_relative = 1e-3);
        assert_relative_eq!(fit.qi_no_corr, 1.0 / (1.0 / spec.qr - 1.0 / spec.qc), max_relative = 1e-3);
    }

    #[test]
    fn overcoupled_fit_flags_unphysical_qi() {
        // Qr > |Qc| cannot come from a passive resonator.
        let spec = canonical_spec(SweepSpec {
            qr: 3e4,
            qc: 2e4,
            phi0: 0.0,
            ..SweepSpec::default()
        });
        let sweep = synthetic_sweep(&spec).unwrap();
        let out = circlefit(&sweep, &FitOptions::default(), ErrorStrategy::None).unwrap();
        assert!(out.fit.qi_no_corr.is_nan());
        assert!(out.fit.qi_dia_corr.is_nan());
        assert!(out.warnings.contains(&FitWarning::UnphysicalQi));
    }

    #[test]
    fn degenerate_input_is_an_error() {
        let freq: Vec<f64> = (0..20).map(|i| 1e9 + i as f64 * 1e3).collect();
        let data = vec![Complex64::new(1.0, 0.0); 20];
        let sweep = SweepData::new(freq, data).unwrap();
        assert!(matches!(
            circlefit(&sweep, &FitOptions::default(), ErrorStrategy::Fast),
            Err(FitError::DegenerateCircle { .. })
        ));
    }

    #[test]
    fn too_few_points_is_an_error() {
        let sweep = SweepData::new(vec![1.0, 2.0, 3.0], vec![Complex64::new(1.0, 0.0); 3]).unwrap();
        assert!(matches!(
            circlefit(&sweep, &FitOptions::default(), ErrorStrategy::None),
            Err(FitError::TooFewPoints { found: 3, required: 5 })
        ));
    }

    #[test]
    fn reflection_and_transmission_recover_q() {
        let refl = canonical_spec(SweepSpec {
            port: PortType::Reflection,
            qc: 1.5e4,
            ..SweepSpec::default()
        });
        let options = FitOptions {
            port: PortType::Reflection,
            ..FitOptions::default()
        };
        let out = circlefit(&synthetic_sweep(&refl).unwrap(), &options, ErrorStrategy::None).unwrap();
        assert_relative_eq!(out.fit.qr, refl.qr, max_relative = 1e-3);
        assert_relative_eq!(out.fit.abs_qc, refl.qc, max_relative = 1e-3);
        assert_relative_eq!(out.fit.qi_no_corr, 3e4, max_relative = 1e-3);

        let trans = canonical_spec(SweepSpec {
            port: PortType::Transmission,
            ..SweepSpec::default()
        });
        let options = FitOptions {
            port: PortType::Transmission,
            ..FitOptions::default()
        };
        let out = circlefit(&synthetic_sweep(&trans).unwrap(), &options, ErrorStrategy::None).unwrap();
        assert_relative_eq!(out.fit.fr, trans.fr, max_relative = 1e-6);
        assert_relative_eq!(out.fit.qr, trans.qr, max_relative = 1e-3);
        assert!(!out.warnings.contains(&FitWarning::UnphysicalQi));
    }

    #[test]
    fn fast_errors_track_monte_carlo_scatter() {
        let truth = SweepSpec::default();
        let noise = 2e-3;
        let trials = 40;
        let mut qr = Vec::with_capacity(trials);
        let mut reported = Vec::with_capacity(trials);
        let mut qi = Vec::with_capacity(trials);
        let mut reported_qi = Vec::with_capacity(trials);
        for seed in 0..trials as u64 {
            let raw = synthetic_sweep(&SweepSpec { noise, seed, ..truth }).unwrap();
            let options = FitOptions::default();
            let cal = do_calibration(&raw, &options).unwrap();
            let normalized = do_normalization(&raw, &cal.params).unwrap();
            let fit_options = FitOptions {
                fr_seed: Some(cal.params.fr),
                qr_seed: Some(cal.params.qr),
                ..options
            };
            let out = circlefit(&normalized, &fit_options, ErrorStrategy::Fast).unwrap();
            let errors = out.errors.unwrap();
            qr.push(out.fit.qr);
            reported.push(errors.qr);
            qi.push(out.fit.qi_dia_corr);
            reported_qi.push(errors.qi_dia_corr);
        }
        let mean_and_scatter = |v: &[f64]| {
            let mean = v.iter().sum::<f64>() / v.len() as f64;
            let var = v.iter().map(|q| (q - mean).powi(2)).sum::<f64>() / (v.len() - 1) as f64;
            (mean, var.sqrt())
        };

        let (mean, scatter) = mean_and_scatter(&qr);
        let typical = reported.iter().sum::<f64>() / trials as f64;
        let ratio = typical / scatter;
        assert!((0.33..3.0).contains(&ratio), "Qr reported {typical}, scatter {scatter}");
        assert_relative_eq!(mean, truth.qr, max_relative = 0.02);

        let (qi_mean, qi_scatter) = mean_and_scatter(&qi);
        let qi_typical = reported_qi.iter().sum::<f64>() / trials as f64;
        let qi_ratio = qi_typical / qi_scatter;
        assert!((0.5..2.0).contains(&qi_ratio), "Qi_dia_corr reported {qi_typical}, scatter {qi_scatter}");
        let qc_dia = truth.qc / truth.phi0.cos();
        assert_relative_eq!(qi_mean, 1.0 / (1.0 / truth.qr - 1.0 / qc_dia), max_relative = 0.03);
    }

    #[test]
    fn singular_full_covariance_is_flagged() {
        let sweep = synthetic_sweep(&canonical_spec(SweepSpec::default())).unwrap();
        let outcome = circlefit(&sweep, &FitOptions::default(), ErrorStrategy::None).unwrap();
        let mut warnings = Vec::new();
        assert!(full_block_errors(None, &outcome, 1.0, &mut warnings).is_none());
        assert_eq!(warnings, vec![FitWarning::CovarianceUnavailable]);

        let mut warnings = Vec::new();
        let cov = DMatrix::<f64>::identity(7, 7) * 1e-6;
        let errors = full_block_errors(Some(&cov), &outcome, 1.0, &mut warnings).unwrap();
        assert!(warnings.is_empty());
        assert_relative_eq!(errors.delay.unwrap(), 1e-3, max_relative = 1e-12);
    }

    #[test]
    fn full_mode_reports_environment_errors() {
        let raw = synthetic_sweep(&SweepSpec {
            noise: 1e-3,
            ..SweepSpec::default()
        })
        .unwrap();
        let options = FitOptions::default();
        let cal = do_calibration(&raw, &options).unwrap();
        let normalized = do_normalization(&raw, &cal.params).unwrap();
        let out = circlefit(
            &normalized,
            &options,
            ErrorStrategy::Full {
                raw: &raw,
                calibration: &cal.params,
            },
        )
        .unwrap();
        let errors = out.errors.unwrap();
        assert!(errors.delay.is_some_and(|d| d > 0.0 && d < 1e-9));
        assert!(errors.a.is_some_and(|a| a > 0.0 && a < 1e-2));
        assert!(errors.qr > 0.0 && errors.qr < 0.05 * out.fit.qr);
        assert!(errors.qi_dia_corr.is_finite());
        assert!(errors.chi_square > 0.0);
    }
}
