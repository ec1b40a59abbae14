//! Systematic Q range from Fano interference with a leaky background path.
//!
//! A background path of relative amplitude `b` can rotate and rescale the
//! resonance circle; any circle radius in `r0·cos φ ± r0·√(b² − sin²φ)` is
//! consistent with the data, which bounds Qc and Qi.

use serde::{Deserialize, Serialize};

use crate::domain::PortType;

/// Isolation of the interference path assumed when none is given (dB).
pub const DEFAULT_ISOLATION_DB: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FanoRange {
    pub qc_min: f64,
    pub qc_max: f64,
    pub qi_min: f64,
    /// `inf` when the largest radius reaches the unphysical limit.
    pub qi_max: f64,
    /// Relative background amplitude after the `b/(1 − b)` correction.
    pub b: f64,
}

fn diameter_factor(port: PortType) -> f64 {
    match port {
        PortType::Notch => 2.0,
        _ => 1.0,
    }
}

/// Qc / Qi range for a background suppressed by `isolation_db`.
///
/// All bounds are `NaN` when `sin φ₀ > b`, i.e. the measured tilt is too
/// large to come from the assumed leakage.
pub fn fano_range(port: PortType, r0: f64, phi0: f64, ql: f64, isolation_db: f64) -> FanoRange {
    let b = 10f64.powf(-isolation_db / 20.0);
    let b = b / (1.0 - b);
    let n = diameter_factor(port);

    if phi0.sin() > b {
        tracing::warn!(phi0, b, "circle tilt cannot be explained by the assumed Fano leakage");
        return FanoRange {
            qc_min: f64::NAN,
            qc_max: f64::NAN,
            qi_min: f64::NAN,
            qi_max: f64::NAN,
            b,
        };
    }

    let r_mid = r0 * phi0.cos();
    let r_err = r0 * (b * b - phi0.sin().powi(2)).sqrt();
    let r_min = r_mid - r_err;
    let r_max = r_mid + r_err;

    FanoRange {
        qc_min: ql / (n * r_max),
        qc_max: ql / (n * r_min),
        qi_min: ql / (1.0 - n * r_min),
        qi_max: if r_max >= 1.0 / n { f64::INFINITY } else { ql / (1.0 - n * r_max) },
        b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn range_brackets_the_untilted_values() {
        let (ql, qc) = (1e4, 2e4);
        let r0 = ql / (2.0 * qc);
        let range = fano_range(PortType::Notch, r0, 0.0, ql, DEFAULT_ISOLATION_DB);
        let qi = 1.0 / (1.0 / ql - 1.0 / qc);
        assert!(range.qc_min < qc && qc < range.qc_max);
        assert!(range.qi_min < qi && qi < range.qi_max);
        let b = 10f64.powf(-0.75);
        assert_relative_eq!(range.b, b / (1.0 - b), max_relative = 1e-12);
        assert_relative_eq!(range.qc_min, ql / (2.0 * r0 * (1.0 + range.b)), max_relative = 1e-12);
    }

    #[test]
    fn large_tilt_is_inconsistent() {
        let range = fano_range(PortType::Notch, 0.25, 0.6, 1e4, 30.0);
        assert!(range.qc_min.is_nan() && range.qi_max.is_nan());
    }

    #[test]
    fn qi_max_is_unbounded_near_critical_radius() {
        let range = fano_range(PortType::Reflection, 0.95, 0.0, 1e4, 10.0);
        assert!(range.qi_max.is_infinite());
        assert!(range.qi_min.is_finite());
    }
}
