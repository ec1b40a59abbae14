//! Amplitude-only line-shape fits on `|S|²`.
//!
//! These fits ignore the phase entirely. The skewed Lorentzian doubles as the
//! seed generator for delay estimation; the plain Lorentzian and the Fano
//! shape are standalone diagnostics selectable from the CLI.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::domain::SweepData;
use crate::error::FitError;
use crate::math::lm::{FnProblem, LmOptions, levenberg_marquardt};
use crate::models::{SkewedLorentzian, fano_reflection, lorentzian};

/// Skewed Lorentzian fit result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkewedLorentzianFit {
    pub params: SkewedLorentzian,
    /// Internal Q estimated from the +3 dB width above the dip (`NaN` if not found).
    pub qi_estimate: f64,
    pub chi_square: f64,
    pub converged: bool,
}

/// Lorentzian fit result; `kappa` is the full linewidth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LorentzianFit {
    pub f0: f64,
    pub kappa: f64,
    pub a: f64,
    pub offs: f64,
    pub ql: f64,
    pub chi_square: f64,
    pub converged: bool,
}

/// Fano fit result (reflection line shape).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FanoFit {
    pub q: f64,
    pub bw: f64,
    pub fr: f64,
    pub a: f64,
    pub ql: f64,
    /// Q from the 3 dB width of the fitted curve (`NaN` without two crossings).
    pub q0: f64,
    pub chi_square: f64,
    pub converged: bool,
}

fn require_points(freq: &[f64], params: usize) -> Result<(), FitError> {
    if freq.len() <= params {
        return Err(FitError::TooFewPoints {
            found: freq.len(),
            required: params + 1,
        });
    }
    Ok(())
}

fn residual_vector<M: Fn(f64) -> f64>(freq: &[f64], power: &[f64], model: M) -> DVector<f64> {
    DVector::from_iterator(freq.len(), freq.iter().zip(power).map(|(f, y)| model(*f) - y))
}

fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v < values[best] {
            best = i;
        }
    }
    best
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Two-stage skewed Lorentzian fit of `power` (= `|S|²`).
///
/// Stage one fits `(A2, A4, Qr)` with `A1`, `A3` and `fr` pinned to crude
/// estimates; stage two releases all six parameters. The `+3 dB` Qi estimate
/// only exists for a dip.
pub fn fit_skewed_lorentzian(freq: &[f64], power: &[f64]) -> Result<SkewedLorentzianFit, FitError> {
    require_points(freq, 6)?;
    let n = power.len();
    let a1 = power[0].min(power[n - 1]);
    let (lo, hi) = (argmin(power), argmax(power));
    // A transmission trace is a peak, everything else a dip.
    let (a3, fr) = if power[hi] - a1 > a1 - power[lo] {
        (power[hi] - a1, freq[hi])
    } else {
        (-power[hi], freq[lo])
    };
    let span = (freq[n - 1] - freq[0]).max(f64::MIN_POSITIVE);
    let slope_scale = a3.abs().max(f64::MIN_POSITIVE) / span;

    let stage1 = FnProblem::new(|p: &DVector<f64>| {
        let m = SkewedLorentzian {
            a1,
            a2: p[0],
            a3,
            a4: p[1],
            fr,
            qr: p[2],
        };
        residual_vector(freq, power, |f| m.eval(f))
    })
    .with_typical(DVector::from_vec(vec![slope_scale, slope_scale, 1e3]));
    let first = levenberg_marquardt(&stage1, DVector::from_vec(vec![0.0, 0.0, 1e3]), &LmOptions::default());

    let seed = SkewedLorentzian {
        a1,
        a2: first.params[0],
        a3,
        a4: first.params[1],
        fr,
        qr: first.params[2],
    };
    let stage2 = FnProblem::new(|p: &DVector<f64>| {
        let m = SkewedLorentzian::from_slice(p.as_slice());
        residual_vector(freq, power, |f| m.eval(f))
    })
    .with_typical(DVector::from_vec(vec![
        a1.abs().max(f64::MIN_POSITIVE),
        slope_scale,
        a3.abs().max(f64::MIN_POSITIVE),
        slope_scale,
        fr,
        seed.qr.abs().max(1.0),
    ]));
    let second = levenberg_marquardt(&stage2, DVector::from_vec(seed.to_vec()), &LmOptions::default());

    let mut params = SkewedLorentzian::from_slice(second.params.as_slice());
    params.qr = params.qr.abs();
    let converged = first.converged() && second.converged();
    if !converged {
        tracing::debug!(stage1 = ?first.termination, stage2 = ?second.termination, "skewed Lorentzian fit hit its iteration cap");
    }

    Ok(SkewedLorentzianFit {
        params,
        qi_estimate: skewed_qi_estimate(&params),
        chi_square: second.sum_sq / (n as f64 - 6.0),
        converged,
    })
}

/// +3 dB estimate: walk up from `fr` until the curve doubles its dip value.
fn skewed_qi_estimate(p: &SkewedLorentzian) -> f64 {
    if !(p.fr.is_finite() && p.qr > 0.0) {
        return f64::NAN;
    }
    let floor = p.eval(p.fr);
    let f_max = p.fr + p.fr / p.qr;
    let steps = 1000;
    for i in 0..steps {
        let f = p.fr + (f_max - p.fr) * i as f64 / (steps - 1) as f64;
        if p.eval(f) > 2.0 * floor {
            return p.fr / (2.0 * (f - p.fr));
        }
    }
    f64::NAN
}

/// Lorentzian fit of `|S|²` (peak or dip detected automatically).
pub fn fit_lorentzian(sweep: &SweepData) -> Result<LorentzianFit, FitError> {
    let freq = sweep.freq();
    let power = sweep.power();
    require_points(freq, 4)?;
    let n = power.len();

    // Offset from the outer 10% on each side.
    let edge = (n / 10).max(1);
    let offs = power[..edge].iter().chain(&power[n - edge..]).sum::<f64>() / (2 * edge) as f64;
    let mean = power.iter().sum::<f64>() / n as f64;
    let max = power[argmax(&power)];
    let min = power[argmin(&power)];
    let (a, f0) = if (max - mean).abs() > (min - mean).abs() {
        ((max - mean).abs(), freq[argmax(&power)])
    } else {
        (-(min - mean).abs(), freq[argmin(&power)])
    };

    let mid = offs + 0.5 * a;
    let crossings: Vec<usize> = (0..n - 1)
        .filter(|&i| (power[i] - mid).signum() != (power[i + 1] - mid).signum())
        .collect();
    let kappa = match (crossings.first(), crossings.last()) {
        (Some(&first), Some(&last)) if crossings.len() > 1 => freq[last] - freq[first],
        _ => 0.15 * (freq[n - 1] - freq[0]),
    };

    let problem = FnProblem::new(|p: &DVector<f64>| residual_vector(freq, &power, |f| lorentzian(f, p[0], p[1], p[2], p[3])))
        .with_typical(DVector::from_vec(vec![f0, kappa.abs(), a.abs().max(1e-12), offs.abs().max(1e-12)]));
    let report = levenberg_marquardt(&problem, DVector::from_vec(vec![f0, kappa, a, offs]), &LmOptions::default());
    let p = &report.params;
    let kappa = p[1].abs();

    Ok(LorentzianFit {
        f0: p[0],
        kappa,
        a: p[2],
        offs: p[3],
        ql: p[0] / kappa,
        chi_square: report.sum_sq / (n as f64 - 4.0),
        converged: report.converged(),
    })
}

/// Fano fit of `|S|²` in reflection.
pub fn fit_fano(sweep: &SweepData) -> Result<FanoFit, FitError> {
    let freq = sweep.freq();
    let power = sweep.power();
    require_points(freq, 4)?;
    let n = power.len();

    let fr = freq[argmin(&power)];
    let a = power[argmax(&power)];
    let initial = DVector::from_vec(vec![1.0, 1e6, fr, a]);
    let problem = FnProblem::new(|p: &DVector<f64>| {
        residual_vector(freq, &power, |f| fano_reflection(f, p[0], p[1], p[2], p[3]))
    })
    .with_typical(DVector::from_vec(vec![1.0, 1e6, fr, a.abs().max(1e-12)]));
    let report = levenberg_marquardt(&problem, initial, &LmOptions::default());
    let p = &report.params;
    let (q, bw, fr, a) = (p[0], p[1].abs(), p[2], p[3]);

    let generated: Vec<f64> = freq.iter().map(|f| fano_reflection(*f, q, bw, fr, a)).collect();

    Ok(FanoFit {
        q,
        bw,
        fr,
        a,
        ql: fr / bw,
        q0: three_db_q(freq, &generated, fr),
        chi_square: report.sum_sq / (n as f64 - 4.0),
        converged: report.converged(),
    })
}

/// `fr / Δf` between the first two crossings of the level 3 dB above the minimum.
fn three_db_q(freq: &[f64], curve: &[f64], fr: f64) -> f64 {
    let min = curve[argmin(curve)];
    if !(min > 0.0) {
        return f64::NAN;
    }
    let level = min * 10f64.powf(0.3);
    let crossings: Vec<f64> = (0..curve.len().saturating_sub(1))
        .filter(|&i| (curve[i] - level).signum() != (curve[i + 1] - level).signum())
        .map(|i| freq[i])
        .collect();
    if crossings.len() > 1 {
        fr / (crossings[1] - crossings[0])
    } else {
        f64::NAN
    }
}
