//! Electrical delay estimation.
//!
//! A cable delay `τ` rotates each sample by `e^{−2πiτf}` and bends the
//! resonance circle into a spiral. The delay is the `τ` for which the
//! de-rotated data lie best on a circle:
//!
//! `C(τ) = Σ (|z·e^{2πiτf} − zc(τ)| − r0(τ))²`, with the circle refitted at
//! every evaluation.
//!
//! Search:
//! 1. seed from the unwrapped phase slope of the off-resonant edges (or 0)
//! 2. deterministic grid over `seed ± 1/span`
//! 3. Brent inside the best grid cell
//! 4. Levenberg–Marquardt polish on the per-point residuals
//!
//! The grid step matters: at a delay error of about `1/span` the off-resonant
//! points wrap around the origin and sit on a circle of their own, which is a
//! local minimum a bare bracketed search can fall into.

use std::f64::consts::PI;

use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::domain::{FitOptions, FitWarning, SweepData};
use crate::error::FitError;
use crate::fit::amplitude::{SkewedLorentzianFit, fit_skewed_lorentzian};
use crate::math::circle::{circle_residuals, fit_circle};
use crate::math::lm::{FnProblem, LmOptions, levenberg_marquardt};
use crate::math::minimize::brent_bounded;
use crate::math::phase::{linear_regression, unwrap_phase};

const GRID_STEPS: usize = 41;
const BRENT_MAX_ITER: usize = 200;
const POLISH_MAX_ITER: usize = 200;
const EDGE_FRACTION: f64 = 0.1;
const MIN_EDGE_POINTS: usize = 5;

/// Delay estimate plus the amplitude fit it was seeded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayEstimate {
    /// Electrical delay (seconds).
    pub delay: f64,
    /// Skewed Lorentzian fit of the max-normalized `|z|²`.
    pub skewed: SkewedLorentzianFit,
    /// Background amplitude slope in raw units per Hz (0 when ignored).
    pub a2: f64,
    /// Reference frequency of the slope (the skewed Lorentzian `fr`).
    pub frcal: f64,
    pub warnings: Vec<FitWarning>,
}

/// `e^{2πiτf}`-corrected copy of `data`.
pub fn remove_delay(freq: &[f64], data: &[Complex64], delay: f64) -> Vec<Complex64> {
    freq.iter()
        .zip(data)
        .map(|(f, z)| z * Complex64::from_polar(1.0, 2.0 * PI * delay * f))
        .collect()
}

fn delay_residuals(freq: &[f64], data: &[Complex64], delay: f64) -> Vec<f64> {
    let corrected = remove_delay(freq, data, delay);
    let circle = fit_circle(&corrected);
    circle_residuals(&corrected, &circle)
}

fn delay_cost(freq: &[f64], data: &[Complex64], delay: f64) -> f64 {
    let cost: f64 = delay_residuals(freq, data, delay).iter().map(|r| r * r).sum();
    if cost.is_finite() { cost } else { f64::MAX }
}

/// Estimate the electrical delay of a raw sweep.
pub fn get_delay(sweep: &SweepData, options: &FitOptions) -> Result<DelayEstimate, FitError> {
    let freq = sweep.freq();
    let maxval = sweep.data().iter().map(|z| z.norm()).fold(0.0, f64::max);
    if !(maxval > 0.0) {
        return Err(FitError::DegenerateCircle { radius: 0.0 });
    }
    let normalized: Vec<Complex64> = sweep.data().iter().map(|z| z / maxval).collect();
    let power: Vec<f64> = normalized.iter().map(|z| z.norm_sqr()).collect();

    let skewed = fit_skewed_lorentzian(freq, &power)?;
    let frcal = skewed.params.fr;
    // d|z|/df ≈ ½·d|z|²/df for |z| ≈ 1.
    let slope = if options.ignore_slope { 0.0 } else { 0.5 * skewed.params.a2 };
    let flattened: Vec<Complex64> = freq
        .iter()
        .zip(&normalized)
        .map(|(f, z)| Complex64::from_polar(z.norm() - slope * (f - frcal), z.arg()))
        .collect();

    let mut warnings = Vec::new();
    let delay = match options.fixed_delay {
        Some(delay) => delay,
        None => {
            let (delay, converged) = search_delay(freq, &flattened, options.guess_delay, sweep.span());
            if !converged {
                tracing::warn!(delay, "delay search did not converge, using best point found");
                warnings.push(FitWarning::DelayNotConverged);
            }
            delay
        }
    };
    tracing::debug!(delay, frcal, qr = skewed.params.qr, "delay estimate");

    Ok(DelayEstimate {
        delay,
        skewed,
        a2: slope * maxval,
        frcal,
        warnings,
    })
}

/// Phase slope pooled over the outer `EDGE_FRACTION` of points on each side.
///
/// The resonance itself adds a winding of up to 2π (reflection circles enclose
/// the origin), so only the off-resonant segments are used. Short sweeps fall
/// back to a regression over all points.
fn edge_phase_slope(freq: &[f64], phase: &[f64]) -> Option<f64> {
    let n = freq.len().min(phase.len());
    let edge = (n as f64 * EDGE_FRACTION) as usize;
    if edge < MIN_EDGE_POINTS {
        return linear_regression(freq, phase).map(|(slope, _)| slope);
    }

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for range in [0..edge, n - edge..n] {
        let (x, y) = (&freq[range.clone()], &phase[range]);
        let mx = x.iter().sum::<f64>() / edge as f64;
        let my = y.iter().sum::<f64>() / edge as f64;
        for (xi, yi) in x.iter().zip(y) {
            sxx += (xi - mx) * (xi - mx);
            sxy += (xi - mx) * (yi - my);
        }
    }
    (sxx > 0.0).then(|| sxy / sxx)
}

fn search_delay(freq: &[f64], data: &[Complex64], guess: bool, span: f64) -> (f64, bool) {
    let seed = if guess {
        let phase = unwrap_phase(&data.iter().map(|z| z.arg()).collect::<Vec<_>>());
        edge_phase_slope(freq, &phase).map_or(0.0, |slope| -slope / (2.0 * PI))
    } else {
        0.0
    };
    let half_width = 1.0 / span;
    let step = 2.0 * half_width / (GRID_STEPS - 1) as f64;
    let grid: Vec<f64> = (0..GRID_STEPS)
        .map(|i| seed - half_width + step * i as f64)
        .collect();

    let mut best = 0;
    let mut best_cost = f64::INFINITY;
    for (i, tau) in grid.iter().enumerate() {
        let cost = delay_cost(freq, data, *tau);
        if cost < best_cost {
            best = i;
            best_cost = cost;
        }
    }
    let center = grid[best];
    tracing::debug!(seed, center, best_cost, "delay grid");

    let brent = brent_bounded(
        |tau| delay_cost(freq, data, tau),
        center - step,
        center + step,
        1e-6 * step,
        BRENT_MAX_ITER,
    );
    let (mut delay, mut cost) = if brent.fx <= best_cost {
        (brent.x, brent.fx)
    } else {
        (center, best_cost)
    };

    let polish = FnProblem::new(|p: &DVector<f64>| DVector::from_vec(delay_residuals(freq, data, p[0])))
        .with_typical(DVector::from_element(1, half_width));
    let report = levenberg_marquardt(
        &polish,
        DVector::from_element(1, delay),
        &LmOptions::default().with_max_iterations(POLISH_MAX_ITER),
    );
    if report.params[0].is_finite() && report.sum_sq <= cost {
        delay = report.params[0];
        cost = report.sum_sq;
    }
    tracing::debug!(delay, cost, brent_iterations = brent.iterations, lm = ?report.termination, "delay refined");

    (delay, brent.converged && report.converged())
}
