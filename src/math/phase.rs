//! Phase helpers: unwrapping, branch reduction and a plain linear regression.

use std::f64::consts::PI;

/// Unwrap a phase trace so consecutive samples never jump by more than π.
pub fn unwrap_phase(phases: &[f64]) -> Vec<f64> {
    if phases.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(phases.len());
    out.push(phases[0]);
    for i in 1..phases.len() {
        let d = wrap_to_pi(phases[i] - phases[i - 1]);
        out.push(out[i - 1] + d);
    }
    out
}

/// Reduce an angle to (−π, π].
pub fn wrap_to_pi(x: f64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    x - 2.0 * PI * ((x - PI) / (2.0 * PI)).ceil()
}

/// Periodic-boundary reduction used for circle angles.
///
/// Same branch as [`wrap_to_pi`]; kept as a named operation because the
/// calibration and circle fit both reduce `angle + π` through it.
pub fn periodic_boundary(x: f64) -> f64 {
    wrap_to_pi(x)
}

/// Angular distance in [0, π] between two angles.
pub fn phase_dist(a: f64, b: f64) -> f64 {
    wrap_to_pi(a - b).abs()
}

/// Ordinary least-squares line `y = slope·x + intercept`.
///
/// Returns `None` if fewer than two points or all `x` coincide.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mx = x[..n].iter().sum::<f64>() / nf;
    let my = y[..n].iter().sum::<f64>() / nf;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        sxx += dx * dx;
        sxy += dx * (y[i] - my);
    }
    if sxx <= 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some((slope, my - slope * mx))
}
