//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between the numeric stages (calibration, circle fit, errors)
//! - exported to JSON/CSV
//! - appended line by line into a [`crate::store::ResultSession`]

use std::collections::BTreeMap;

use clap::ValueEnum;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Below this many points a fit is still attempted but flagged as unreliable.
pub const MIN_RELIABLE_POINTS: usize = 10;

/// Column layout of a sweep file: `f, y1, y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// `y1 = Re(z)`, `y2 = Im(z)`.
    #[value(name = "realimag")]
    RealImag,
    /// Linear magnitude, phase in radians.
    #[value(name = "linmagphaserad")]
    LinMagPhaseRad,
    /// Magnitude in dB, phase in radians.
    #[value(name = "dbmagphaserad")]
    DbMagPhaseRad,
    /// Linear magnitude, phase in degrees.
    #[value(name = "linmagphasedeg")]
    LinMagPhaseDeg,
    /// Magnitude in dB, phase in degrees.
    #[value(name = "dbmagphasedeg")]
    DbMagPhaseDeg,
}

impl DataFormat {
    /// Convert one `(y1, y2)` column pair into a complex sample.
    pub fn to_complex(self, y1: f64, y2: f64) -> Complex64 {
        match self {
            DataFormat::RealImag => Complex64::new(y1, y2),
            DataFormat::LinMagPhaseRad => Complex64::from_polar(y1, y2),
            DataFormat::DbMagPhaseRad => Complex64::from_polar(db_to_lin(y1), y2),
            DataFormat::LinMagPhaseDeg => Complex64::from_polar(y1, y2.to_radians()),
            DataFormat::DbMagPhaseDeg => Complex64::from_polar(db_to_lin(y1), y2.to_radians()),
        }
    }
}

fn db_to_lin(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Measurement topology of the resonator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    /// Side-coupled (hanger) resonator measured in S21.
    Notch,
    /// Directly coupled resonator measured in reflection (S11).
    Reflection,
    /// Two-port transmission through the resonator.
    Transmission,
}

/// Error estimation strategy for the circle fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Only the reduced chi-square is computed.
    None,
    /// Analytic Jacobian around the circle-fit result (cheap, default).
    Fast,
    /// Full nonlinear fit of the complete model against raw data (slow, for validation).
    Full,
}

/// Optional smoothing applied to the raw trace before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Prefilter {
    None,
    Median,
    Gaussian,
}

/// Fit configuration shared by calibration and parameter extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOptions {
    /// Geometric refinement of the algebraic circle fit.
    pub refine_results: bool,
    /// How (and whether) parameter errors are estimated.
    pub error_mode: ErrorMode,
    /// Ignore the off-resonant background slope during calibration.
    pub ignore_slope: bool,
    /// Seed the delay search from a linear fit of the unwrapped phase.
    pub guess_delay: bool,
    /// Use this delay (seconds) instead of estimating it.
    pub fixed_delay: Option<f64>,
    /// Resonance frequency seed (Hz) for the normalized-data fit.
    pub fr_seed: Option<f64>,
    /// Loaded Q seed for the normalized-data fit.
    pub qr_seed: Option<f64>,
    pub port: PortType,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            refine_results: false,
            error_mode: ErrorMode::Fast,
            ignore_slope: true,
            guess_delay: true,
            fixed_delay: None,
            fr_seed: None,
            qr_seed: None,
            port: PortType::Notch,
        }
    }
}

/// A frequency sweep: strictly increasing frequencies with co-indexed complex samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepData {
    freq: Vec<f64>,
    data: Vec<Complex64>,
}

impl SweepData {
    /// Validate and build a sweep.
    ///
    /// Fewer than [`MIN_RELIABLE_POINTS`] points are accepted (with a warning),
    /// an empty sweep is not.
    pub fn new(freq: Vec<f64>, data: Vec<Complex64>) -> Result<Self, FitError> {
        if freq.len() != data.len() {
            return Err(FitError::LengthMismatch {
                freq: freq.len(),
                data: data.len(),
            });
        }
        if freq.is_empty() {
            return Err(FitError::TooFewPoints {
                found: 0,
                required: 1,
            });
        }
        for (index, (f, z)) in freq.iter().zip(&data).enumerate() {
            if !(f.is_finite() && z.re.is_finite() && z.im.is_finite()) {
                return Err(FitError::NonFinite { index });
            }
        }
        if let Some(index) = freq.windows(2).position(|w| w[1] <= w[0]) {
            return Err(FitError::NonMonotonicFrequency { index: index + 1 });
        }
        if freq.len() < MIN_RELIABLE_POINTS {
            tracing::warn!(points = freq.len(), "sweep is shorter than {MIN_RELIABLE_POINTS} points, fit may be unreliable");
        }
        Ok(Self { freq, data })
    }

    pub fn freq(&self) -> &[f64] {
        &self.freq
    }

    pub fn data(&self) -> &[Complex64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.freq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freq.is_empty()
    }

    /// Same frequency axis, new samples (lengths must match).
    pub fn with_data(&self, data: Vec<Complex64>) -> Result<Self, FitError> {
        Self::new(self.freq.clone(), data)
    }

    /// Restrict the sweep to `f_min ≤ f ≤ f_max`.
    pub fn window(&self, f_min: Option<f64>, f_max: Option<f64>) -> Result<Self, FitError> {
        let lo = f_min.unwrap_or(f64::NEG_INFINITY);
        let hi = f_max.unwrap_or(f64::INFINITY);
        let (freq, data): (Vec<f64>, Vec<Complex64>) = self
            .freq
            .iter()
            .zip(&self.data)
            .filter(|(f, _)| **f >= lo && **f <= hi)
            .map(|(f, z)| (*f, *z))
            .unzip();
        Self::new(freq, data)
    }

    /// `|z|²` per point.
    pub fn power(&self) -> Vec<f64> {
        self.data.iter().map(|z| z.norm_sqr()).collect()
    }

    /// Frequency at the smallest `|z|`.
    pub fn freq_at_min_amplitude(&self) -> f64 {
        let mut best = 0;
        for (i, z) in self.data.iter().enumerate() {
            if z.norm() < self.data[best].norm() {
                best = i;
            }
        }
        self.freq[best]
    }

    /// Frequency at the largest `|z|`.
    pub fn freq_at_max_amplitude(&self) -> f64 {
        let mut best = 0;
        for (i, z) in self.data.iter().enumerate() {
            if z.norm() > self.data[best].norm() {
                best = i;
            }
        }
        self.freq[best]
    }

    /// Frequency span `f_last - f_first`.
    pub fn span(&self) -> f64 {
        self.freq[self.freq.len() - 1] - self.freq[0]
    }
}

/// One sweep of a scan, tagged with the swept coordinate (power, flux, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanLine {
    pub x: f64,
    pub sweep: SweepData,
}

/// Circle in the complex plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircleParams {
    pub xc: f64,
    pub yc: f64,
    pub r0: f64,
}

impl CircleParams {
    pub fn center(&self) -> Complex64 {
        Complex64::new(self.xc, self.yc)
    }

    /// Non-finite center/radius or a radius that is not strictly positive.
    pub fn is_degenerate(&self) -> bool {
        !(self.xc.is_finite() && self.yc.is_finite() && self.r0.is_finite() && self.r0 > 0.0)
    }
}

/// Environment parameters removed from raw data by normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Electrical delay (seconds).
    pub delay: f64,
    /// Off-resonant amplitude scale.
    pub a: f64,
    /// Off-resonant phase offset, wrapped to (−π, π].
    pub alpha: f64,
    /// Off-resonant linear background slope (raw amplitude units per Hz).
    pub a2: f64,
    /// Reference frequency of the slope term (Hz).
    pub frcal: f64,
    /// Resonance frequency found during calibration.
    pub fr: f64,
    /// Loaded Q found during calibration.
    pub qr: f64,
}

/// Resonator parameters extracted from normalized data.
///
/// Fields that do not apply to the port type are `NaN`. Qi values are `NaN`
/// when Qr ≥ Qc, i.e. when the fit is unphysical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResonatorFit {
    pub fr: f64,
    pub qr: f64,
    pub abs_qc: f64,
    pub complex_qc: Complex64,
    pub qc_dia_corr: f64,
    pub qi_no_corr: f64,
    pub qi_dia_corr: f64,
    pub phi0: f64,
    pub theta0: f64,
    /// Radius of the circle fitted to the normalized data.
    pub r0: f64,
}

impl ResonatorFit {
    /// Both internal Q conventions are finite and positive.
    pub fn qi_is_physical(&self) -> bool {
        let ok = |q: f64| q.is_finite() && q > 0.0;
        ok(self.qi_no_corr) && ok(self.qi_dia_corr)
    }
}

/// One-sigma parameter errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitErrors {
    pub fr: f64,
    pub qr: f64,
    pub abs_qc: f64,
    pub phi0: f64,
    pub qc_dia_corr: f64,
    pub qi_no_corr: f64,
    pub qi_dia_corr: f64,
    /// Only estimated by the full-model strategy.
    pub delay: Option<f64>,
    pub a: Option<f64>,
    pub alpha: Option<f64>,
    pub chi_square: f64,
}

/// Quality flags raised while fitting; none of them aborts the fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitWarning {
    /// The unwrapped phase covers less than 80% of a full turn.
    PartialCircle { rolloff: f64 },
    PhaseFitNotConverged,
    DelayNotConverged,
    CovarianceUnavailable,
    UnphysicalQi,
    FullModelNotConverged,
    FewPoints { n: usize },
    /// The fitted resonance frequency lies outside the measured band.
    ResonanceOutsideSweep { fr: f64 },
    /// The fitted Qr is orders of magnitude away from the line-shape estimate.
    QrMismatch { qr: f64, estimate: f64 },
}

impl std::fmt::Display for FitWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitWarning::PartialCircle { rolloff } => {
                write!(f, "phase roll-off {rolloff:.2} rad does not cover a full circle")
            }
            FitWarning::PhaseFitNotConverged => write!(f, "phase fit did not converge"),
            FitWarning::DelayNotConverged => write!(f, "delay refinement did not converge"),
            FitWarning::CovarianceUnavailable => write!(f, "covariance matrix is singular, no errors"),
            FitWarning::UnphysicalQi => write!(f, "Qr >= Qc, internal Q undefined"),
            FitWarning::FullModelNotConverged => write!(f, "full model fit did not converge"),
            FitWarning::FewPoints { n } => write!(f, "only {n} points in sweep"),
            FitWarning::ResonanceOutsideSweep { fr } => write!(f, "fitted fr {fr:.6e} Hz lies outside the sweep"),
            FitWarning::QrMismatch { qr, estimate } => {
                write!(f, "fitted Qr {qr:.3e} is far from the line-shape estimate {estimate:.3e}")
            }
        }
    }
}

/// Result of fitting one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    pub port: PortType,
    pub fit: ResonatorFit,
    pub errors: Option<FitErrors>,
    /// Reduced chi-square of the normalized-data model.
    pub chi_square: f64,
    pub warnings: Vec<FitWarning>,
}

impl FitOutcome {
    /// Names of the values produced for a given port/error configuration.
    ///
    /// This is the column layout a [`crate::store::ResultSession`] allocates.
    pub fn value_names(port: PortType, error_mode: ErrorMode) -> Vec<String> {
        let mut names: Vec<&str> = match port {
            PortType::Notch => vec![
                "fr",
                "Qr",
                "absQc",
                "complexQc_real",
                "complexQc_imag",
                "Qc_dia_corr",
                "Qi_no_corr",
                "Qi_dia_corr",
                "phi0",
                "theta0",
            ],
            PortType::Reflection => vec!["fr", "Qr", "Qc", "Qi", "phi0", "theta0"],
            PortType::Transmission => vec!["fr", "Qr"],
        };
        names.push("chi_square");
        if error_mode != ErrorMode::None {
            names.extend(match port {
                PortType::Notch => {
                    vec!["fr_err", "Qr_err", "absQc_err", "phi0_err", "Qc_dia_corr_err", "Qi_no_corr_err", "Qi_dia_corr_err"]
                }
                PortType::Reflection => vec!["fr_err", "Qr_err", "Qc_err", "Qi_err"],
                PortType::Transmission => vec!["fr_err", "Qr_err"],
            });
        }
        names.into_iter().map(str::to_string).collect()
    }

    /// Flat name → value mapping for the storage collaborator.
    pub fn values(&self) -> BTreeMap<String, f64> {
        let fit = &self.fit;
        let mut out = BTreeMap::new();
        let mut put = |k: &str, v: f64| {
            out.insert(k.to_string(), v);
        };
        put("fr", fit.fr);
        put("Qr", fit.qr);
        match self.port {
            PortType::Notch => {
                put("absQc", fit.abs_qc);
                put("complexQc_real", fit.complex_qc.re);
                put("complexQc_imag", fit.complex_qc.im);
                put("Qc_dia_corr", fit.qc_dia_corr);
                put("Qi_no_corr", fit.qi_no_corr);
                put("Qi_dia_corr", fit.qi_dia_corr);
                put("phi0", fit.phi0);
                put("theta0", fit.theta0);
            }
            PortType::Reflection => {
                put("Qc", fit.abs_qc);
                put("Qi", fit.qi_no_corr);
                put("phi0", fit.phi0);
                put("theta0", fit.theta0);
            }
            PortType::Transmission => {}
        }
        put("chi_square", self.chi_square);
        if let Some(err) = &self.errors {
            put("fr_err", err.fr);
            put("Qr_err", err.qr);
            match self.port {
                PortType::Notch => {
                    put("absQc_err", err.abs_qc);
                    put("phi0_err", err.phi0);
                    put("Qc_dia_corr_err", err.qc_dia_corr);
                    put("Qi_no_corr_err", err.qi_no_corr);
                    put("Qi_dia_corr_err", err.qi_dia_corr);
                }
                PortType::Reflection => {
                    put("Qc_err", err.abs_qc);
                    put("Qi_err", err.qi_no_corr);
                }
                PortType::Transmission => {}
            }
        }
        out
    }
}
