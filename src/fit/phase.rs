//! Phase-vs-frequency fit of circle-centered data.
//!
//! Model: `θ(f) = θ₀ + 2·atan(2Qr(1 − f/fr))`.
//!
//! The measured phase is unwrapped, and every residual is reduced to
//! (−π, π], so the cost is the squared *wrapped* distance and a 2πk shift of
//! the input does not move the optimum. Qr is fitted as `ln Qr`: the model is
//! close to linear in `1/Qr` far from resonance, and a linear Qr axis makes
//! the first damped steps from a distant seed (1e6 by default) overshoot
//! into negative values.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::domain::FitWarning;
use crate::math::lm::{LeastSquaresProblem, LmOptions, levenberg_marquardt};
use crate::math::phase::{unwrap_phase, wrap_to_pi};
use crate::models::{phase_model, phase_model_gradient};

const STAGE_MAX_ITER: usize = 200;
/// Roll-off below this fraction of a full turn flags a partial circle.
const ROLLOFF_FRACTION: f64 = 0.8;

/// Result of a phase fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseFit {
    /// Offset angle, wrapped to (−π, π].
    pub theta0: f64,
    pub qr: f64,
    pub fr: f64,
    /// Total phase excursion of the unwrapped data (radians).
    pub rolloff: f64,
    /// Sum of squared wrapped residuals.
    pub sum_sq: f64,
    /// Final stage terminated on a tolerance rather than the iteration cap.
    pub converged: bool,
}

impl PhaseFit {
    pub fn warnings(&self) -> Vec<FitWarning> {
        let mut out = Vec::new();
        if self.rolloff < ROLLOFF_FRACTION * 2.0 * PI {
            out.push(FitWarning::PartialCircle { rolloff: self.rolloff });
        }
        if !self.converged {
            out.push(FitWarning::PhaseFitNotConverged);
        }
        out
    }
}

/// Internal parameter vector: `[θ₀, ln Qr, fr]`.
struct PhaseProblem<'a> {
    freq: &'a [f64],
    phase: &'a [f64],
    base: [f64; 3],
    free: &'a [usize],
}

impl PhaseProblem<'_> {
    fn full(&self, p: &DVector<f64>) -> [f64; 3] {
        let mut full = self.base;
        for (k, &idx) in self.free.iter().enumerate() {
            full[idx] = p[k];
        }
        full
    }
}

impl LeastSquaresProblem for PhaseProblem<'_> {
    fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
        let [theta0, ln_qr, fr] = self.full(p);
        let qr = ln_qr.exp();
        DVector::from_iterator(
            self.freq.len(),
            self.freq
                .iter()
                .zip(self.phase)
                .map(|(f, y)| wrap_to_pi(y - phase_model(*f, theta0, qr, fr))),
        )
    }

    fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
        let [_, ln_qr, fr] = self.full(p);
        let qr = ln_qr.exp();
        let mut jac = DMatrix::zeros(self.freq.len(), self.free.len());
        for (i, f) in self.freq.iter().enumerate() {
            let [d_theta0, d_qr, d_fr] = phase_model_gradient(*f, qr, fr);
            let grad = [d_theta0, d_qr * qr, d_fr];
            for (k, &idx) in self.free.iter().enumerate() {
                jac[(i, k)] = -grad[idx];
            }
        }
        jac
    }
}

fn fit_stage(freq: &[f64], phase: &[f64], base: [f64; 3], free: &[usize]) -> ([f64; 3], bool, f64) {
    let problem = PhaseProblem { freq, phase, base, free };
    let initial = DVector::from_iterator(free.len(), free.iter().map(|&i| base[i]));
    let report = levenberg_marquardt(
        &problem,
        initial,
        &LmOptions::default().with_max_iterations(STAGE_MAX_ITER),
    );
    let params = problem.full(&report.params);
    if params.iter().all(|v| v.is_finite()) {
        (params, report.converged(), report.sum_sq)
    } else {
        tracing::debug!(?free, "phase sub-fit diverged, keeping previous stage");
        (base, false, f64::NAN)
    }
}

fn to_internal(theta0: f64, qr: f64, fr: f64) -> [f64; 3] {
    [theta0, qr.abs().max(1.0).ln(), fr]
}

fn rolloff(phase: &[f64]) -> f64 {
    match (phase.first(), phase.last()) {
        (Some(first), Some(last)) => (last - first).abs(),
        _ => 0.0,
    }
}

fn finish(params: [f64; 3], phase: &[f64], converged: bool, sum_sq: f64) -> PhaseFit {
    let fit = PhaseFit {
        theta0: wrap_to_pi(params[0]),
        qr: params[1].exp(),
        fr: params[2],
        rolloff: rolloff(phase),
        sum_sq,
        converged,
    };
    for warning in fit.warnings() {
        tracing::warn!(%warning, "phase fit");
    }
    fit
}

/// Fit `(θ₀, Qr, fr)` to a phase trace (radians, any branch).
///
/// Sub-fits run in sequence with the remaining parameters held:
/// `(θ₀, fr) → (Qr, fr) → fr → Qr → (θ₀, Qr, fr)`.
pub fn fit_phase_trace(freq: &[f64], phase: &[f64], theta0: f64, qr: f64, fr: f64) -> PhaseFit {
    let phase = unwrap_phase(phase);
    let mut params = to_internal(theta0, qr, fr);
    for free in [&[0, 2][..], &[1, 2], &[2], &[1]] {
        params = fit_stage(freq, &phase, params, free).0;
    }
    let (params, converged, sum_sq) = fit_stage(freq, &phase, params, &[0, 1, 2]);
    tracing::debug!(theta0 = params[0], qr = params[1].exp(), fr = params[2], "phase fit");
    finish(params, &phase, converged, sum_sq)
}

/// Phase fit of circle-centered complex data.
pub fn phase_fit(freq: &[f64], centered: &[Complex64], theta0: f64, qr: f64, fr: f64) -> PhaseFit {
    let phase: Vec<f64> = centered.iter().map(|z| z.arg()).collect();
    fit_phase_trace(freq, &phase, theta0, qr, fr)
}

/// Phase fit with `θ₀ ≡ 0` (transmission port): `fr`, then `(Qr, fr)`.
pub fn phase_fit_no_offset(freq: &[f64], centered: &[Complex64], qr: f64, fr: f64) -> PhaseFit {
    let phase: Vec<f64> = unwrap_phase(&centered.iter().map(|z| z.arg()).collect::<Vec<_>>());
    // Unwrapping may land the trace on any branch; pull it back so θ₀ = 0 fits.
    let mid = phase.len() / 2;
    let shift = phase.get(mid).map_or(0.0, |p| p - wrap_to_pi(*p));
    let phase: Vec<f64> = phase.iter().map(|p| p - shift).collect();

    let params = to_internal(0.0, qr, fr);
    let params = fit_stage(freq, &phase, params, &[2]).0;
    let (params, converged, sum_sq) = fit_stage(freq, &phase, params, &[1, 2]);
    finish(params, &phase, converged, sum_sq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(n: usize) -> Vec<f64> {
        (0..n).map(|i| 4.998e9 + 4e6 * i as f64 / (n - 1) as f64).collect()
    }

    fn synthetic(theta0: f64, qr: f64, fr: f64) -> (Vec<f64>, Vec<f64>) {
        let f = grid(401);
        let p = f.iter().map(|f| wrap_to_pi(phase_model(*f, theta0, qr, fr))).collect();
        (f, p)
    }

    #[test]
    fn recovers_parameters_from_distant_q_seed() {
        let (f, p) = synthetic(2.5, 1e4, 5.0003e9);
        let fit = fit_phase_trace(&f, &p, 2.4, 1e6, 5.00029e9);
        assert!(fit.converged);
        assert_relative_eq!(fit.theta0, 2.5, epsilon = 1e-8);
        assert_relative_eq!(fit.qr, 1e4, max_relative = 1e-7);
        assert_relative_eq!(fit.fr, 5.0003e9, max_relative = 1e-11);
        assert!(fit.warnings().is_empty());
    }

    #[test]
    fn branch_shift_does_not_change_fit() {
        let (f, p) = synthetic(-1.0, 2e4, 5.0e9);
        let reference = fit_phase_trace(&f, &p, -0.9, 1.5e4, 5.0e9);
        for k in [-3.0, 1.0, 7.0] {
            let shifted: Vec<f64> = p.iter().map(|v| v + 2.0 * PI * k).collect();
            let fit = fit_phase_trace(&f, &shifted, -0.9, 1.5e4, 5.0e9);
            assert_relative_eq!(fit.theta0, reference.theta0, epsilon = 1e-8);
            assert_relative_eq!(fit.qr, reference.qr, max_relative = 1e-8);
            assert_relative_eq!(fit.fr, reference.fr, max_relative = 1e-11);
        }
    }

    #[test]
    fn theta0_near_branch_cut_is_wrapped() {
        let (f, p) = synthetic(PI - 0.01, 1e4, 5.0e9);
        let fit = fit_phase_trace(&f, &p, -PI + 0.02, 1e4, 5.0e9);
        assert!(crate::math::phase::phase_dist(fit.theta0, PI - 0.01) < 1e-8);
        assert!(fit.theta0 > -PI && fit.theta0 <= PI);
    }

    #[test]
    fn narrow_window_flags_partial_circle() {
        let f: Vec<f64> = (0..101).map(|i| 5.0e9 + 1e5 + 1e3 * i as f64).collect();
        let p: Vec<f64> = f.iter().map(|f| phase_model(*f, 0.0, 1e4, 5.0e9)).collect();
        let fit = fit_phase_trace(&f, &p, 0.0, 1e4, 5.0e9);
        assert!(fit.rolloff < 0.8 * 2.0 * PI);
        assert!(
            fit.warnings()
                .iter()
                .any(|w| matches!(w, FitWarning::PartialCircle { .. }))
        );
    }

    #[test]
    fn no_offset_fit_on_centered_transmission() {
        let f = grid(401);
        let centered: Vec<Complex64> = f
            .iter()
            .map(|f| crate::models::transmission_s21(*f, 5.0001e9, 8e3) - 0.5)
            .collect();
        let fit = phase_fit_no_offset(&f, &centered, 1e4, 5.0e9);
        assert_eq!(fit.theta0, 0.0);
        assert_relative_eq!(fit.qr, 8e3, max_relative = 1e-7);
        assert_relative_eq!(fit.fr, 5.0001e9, max_relative = 1e-11);
    }
}
