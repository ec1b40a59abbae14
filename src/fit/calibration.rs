//! Environment calibration and normalization.
//!
//! The raw trace is modelled as
//! `z(f) = a·e^{i(α − 2πτf)}·S(f) + A2·(f − frcal)`. Calibration finds
//! `(τ, a, α, A2, frcal)`; normalization divides them out again so the
//! canonical circle of `S` is left behind.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::domain::{CalibrationParams, CircleParams, FitOptions, FitWarning, PortType, SweepData};
use crate::error::FitError;
use crate::fit::delay::{get_delay, remove_delay};
use crate::fit::phase::phase_fit;
use crate::math::circle::{fit_circle, fit_circle_refined};
use crate::math::phase::periodic_boundary;

/// Calibration result with the intermediate circle and any quality flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub params: CalibrationParams,
    /// Circle of the slope- and delay-corrected raw data.
    pub circle: CircleParams,
    pub warnings: Vec<FitWarning>,
}

pub(crate) fn circle_for(points: &[Complex64], refine: bool) -> Result<CircleParams, FitError> {
    let circle = if refine { fit_circle_refined(points) } else { fit_circle(points) };
    if circle.is_degenerate() {
        return Err(FitError::DegenerateCircle { radius: circle.r0 });
    }
    Ok(circle)
}

/// Largest accepted ratio between the fitted Qr and an independent estimate.
const QR_MISMATCH_RATIO: f64 = 100.0;

/// Plausibility flags for a fitted resonance.
///
/// `fr` must lie inside the sweep; `qr` must be within `QR_MISMATCH_RATIO` of
/// `qr_estimate` when one is available.
pub(crate) fn resonance_warnings(freq: &[f64], fr: f64, qr: f64, qr_estimate: Option<f64>) -> Vec<FitWarning> {
    let mut warnings = Vec::new();
    let (Some(lo), Some(hi)) = (freq.first(), freq.last()) else {
        return warnings;
    };
    if !(fr >= *lo && fr <= *hi) {
        tracing::warn!(fr, lo, hi, "fitted resonance lies outside the sweep");
        warnings.push(FitWarning::ResonanceOutsideSweep { fr });
    }
    if let Some(estimate) = qr_estimate.filter(|q| q.is_finite() && *q > 0.0) {
        let ratio = qr / estimate;
        if !(ratio > 1.0 / QR_MISMATCH_RATIO && ratio < QR_MISMATCH_RATIO) {
            tracing::warn!(qr, estimate, "fitted Qr far from line-shape estimate");
            warnings.push(FitWarning::QrMismatch { qr, estimate });
        }
    }
    warnings
}

fn subtract_slope(freq: &[f64], data: &[Complex64], a2: f64, frcal: f64) -> Vec<Complex64> {
    freq.iter().zip(data).map(|(f, z)| z - a2 * (f - frcal)).collect()
}

/// Estimate the measurement environment of a raw sweep.
pub fn do_calibration(sweep: &SweepData, options: &FitOptions) -> Result<Calibration, FitError> {
    let freq = sweep.freq();

    // 1) Delay and amplitude seeds.
    let estimate = get_delay(sweep, options)?;
    let mut warnings = estimate.warnings.clone();

    // 2) Remove slope and delay.
    let flattened = subtract_slope(freq, sweep.data(), estimate.a2, estimate.frcal);
    let corrected = remove_delay(freq, &flattened, estimate.delay);

    // 3) Circle of the corrected data.
    let circle = circle_for(&corrected, options.refine_results)?;
    let center = circle.center();

    // 4) Phase fit of the centered data.
    let centered: Vec<Complex64> = corrected.iter().map(|z| z - center).collect();
    let skewed = estimate.skewed.params;
    let phase = phase_fit(freq, &centered, 0.0, skewed.qr.abs(), skewed.fr);
    warnings.extend(phase.warnings());
    warnings.extend(resonance_warnings(freq, phase.fr, phase.qr, Some(skewed.qr.abs())));

    // 5) Off-resonant point (resonant point for transmission).
    let beta = periodic_boundary(phase.theta0 + std::f64::consts::PI);
    let (a, alpha) = match options.port {
        PortType::Notch => {
            let p = center + Complex64::from_polar(circle.r0, beta);
            (p.norm(), p.arg())
        }
        PortType::Reflection => {
            let p = center + Complex64::from_polar(circle.r0, beta);
            (circle.r0 + center.norm(), periodic_boundary(p.arg() + std::f64::consts::PI))
        }
        PortType::Transmission => {
            let p = center + Complex64::from_polar(circle.r0, phase.theta0);
            (p.norm(), p.arg())
        }
    };

    let params = CalibrationParams {
        delay: estimate.delay,
        a,
        alpha,
        a2: estimate.a2,
        frcal: estimate.frcal,
        fr: phase.fr,
        qr: phase.qr,
    };
    tracing::debug!(?params, "calibration");
    Ok(Calibration {
        params,
        circle,
        warnings,
    })
}

/// Divide the environment out of a raw sweep.
///
/// `z_norm = (z − A2·(f − frcal)) / a · e^{i(2πτf − α)}`
pub fn do_normalization(sweep: &SweepData, cal: &CalibrationParams) -> Result<SweepData, FitError> {
    if !(cal.a.is_finite() && cal.a > 0.0) {
        return Err(FitError::InvalidOption(format!("calibration amplitude {} is not positive", cal.a)));
    }
    let freq = sweep.freq();
    let flattened = subtract_slope(freq, sweep.data(), cal.a2, cal.frcal);
    let data = freq
        .iter()
        .zip(flattened)
        .map(|(f, z)| z / cal.a * Complex64::from_polar(1.0, 2.0 * std::f64::consts::PI * cal.delay * f - cal.alpha))
        .collect();
    sweep.with_data(data)
}

/// Re-apply an environment to canonical data (inverse of [`do_normalization`]).
pub fn apply_environment(sweep: &SweepData, cal: &CalibrationParams) -> Result<SweepData, FitError> {
    let data = sweep
        .freq()
        .iter()
        .zip(sweep.data())
        .map(|(f, z)| crate::models::environment(*f, cal.a, cal.alpha, cal.delay) * z + cal.a2 * (f - cal.frcal))
        .collect();
    sweep.with_data(data)
}
