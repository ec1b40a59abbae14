//! Shared fit pipeline used by the `fit` and `scan` commands.
//!
//! ingest -> prefilter -> window -> calibration -> normalization -> circle fit
//! (+ optional amplitude fits, systematics and photon numbers)

use std::path::PathBuf;

use crate::domain::{ErrorMode, FitOptions, FitOutcome, FitWarning, PortType, Prefilter, SweepData};
use crate::error::{AppError, FitError};
use crate::fit::{
    Calibration, ErrorStrategy, FanoFit, FanoRange, LorentzianFit, SkewedLorentzianFit, circlefit, do_calibration,
    do_normalization, fano_range, fit_fano, fit_lorentzian, fit_skewed_lorentzian, photons_in_resonator,
    single_photon_limit_dbm,
};
use crate::io::ingest::{IngestOptions, IngestedSweep, load_sweep};
use crate::math::{gaussian_filter, median_filter};

const MEDIAN_WINDOW: usize = 5;
const GAUSSIAN_SIGMA: f64 = 1.5;

/// Which fits a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Methods {
    pub circle: bool,
    pub lorentzian: bool,
    pub skewed_lorentzian: bool,
    pub fano: bool,
}

impl Methods {
    pub fn all() -> Self {
        Self {
            circle: true,
            lorentzian: true,
            skewed_lorentzian: true,
            fano: true,
        }
    }
}

impl Default for Methods {
    fn default() -> Self {
        Self {
            circle: true,
            lorentzian: false,
            skewed_lorentzian: false,
            fano: false,
        }
    }
}

/// Resolved run configuration (CLI flags after defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub file: PathBuf,
    pub ingest: IngestOptions,
    pub f_min: Option<f64>,
    pub f_max: Option<f64>,
    pub prefilter: Prefilter,
    pub options: FitOptions,
    pub methods: Methods,
    pub isolation_db: f64,
    /// Drive power at the resonator (dBm) for the photon-number estimate.
    pub power_dbm: Option<f64>,
    pub export_json: Option<PathBuf>,
    pub export_csv: Option<PathBuf>,
}

/// Circle-fit branch of a run.
#[derive(Debug, Clone)]
pub struct CircleRun {
    pub calibration: Calibration,
    pub outcome: FitOutcome,
    pub fano_range: Option<FanoRange>,
    pub single_photon_limit_dbm: Option<f64>,
    pub photons: Option<f64>,
}

/// All computed outputs of a single `cfit fit` run.
#[derive(Debug, Clone)]
pub struct FitRun {
    pub ingest: IngestedSweep,
    /// Prefiltered and windowed raw sweep that was fitted.
    pub sweep: SweepData,
    pub circle: Option<CircleRun>,
    pub lorentzian: Option<LorentzianFit>,
    pub skewed_lorentzian: Option<SkewedLorentzianFit>,
    pub fano: Option<FanoFit>,
}

/// Apply the prefilter, then the frequency window.
pub fn prepare(sweep: &SweepData, config: &FitConfig) -> Result<SweepData, FitError> {
    let filtered = match config.prefilter {
        Prefilter::None => sweep.clone(),
        Prefilter::Median => sweep.with_data(median_filter(sweep.data(), MEDIAN_WINDOW))?,
        Prefilter::Gaussian => sweep.with_data(gaussian_filter(sweep.data(), GAUSSIAN_SIGMA))?,
    };
    filtered.window(config.f_min, config.f_max)
}

/// Calibrate, normalize and circle-fit one raw sweep.
pub fn fit_sweep(raw: &SweepData, options: &FitOptions) -> Result<(Calibration, FitOutcome), FitError> {
    let calibration = do_calibration(raw, options)?;
    let normalized = do_normalization(raw, &calibration.params)?;

    let seeded = FitOptions {
        fr_seed: options.fr_seed.or(Some(calibration.params.fr)),
        qr_seed: options.qr_seed.or(Some(calibration.params.qr)),
        ..options.clone()
    };
    let strategy = match options.error_mode {
        ErrorMode::None => ErrorStrategy::None,
        ErrorMode::Fast => ErrorStrategy::Fast,
        ErrorMode::Full => ErrorStrategy::Full {
            raw,
            calibration: &calibration.params,
        },
    };
    let mut outcome = circlefit(&normalized, &seeded, strategy)?;

    outcome.warnings = merge_warnings(&calibration.warnings, std::mem::take(&mut outcome.warnings));
    Ok((calibration, outcome))
}

/// Calibration warnings first; a later warning of an already present kind is dropped.
fn merge_warnings(first: &[FitWarning], later: Vec<FitWarning>) -> Vec<FitWarning> {
    let mut merged = first.to_vec();
    for w in later {
        if !merged.iter().any(|m| std::mem::discriminant(m) == std::mem::discriminant(&w)) {
            merged.push(w);
        }
    }
    merged
}

fn circle_run(raw: &SweepData, config: &FitConfig) -> Result<CircleRun, FitError> {
    let (calibration, outcome) = fit_sweep(raw, &config.options)?;
    let fit = &outcome.fit;

    let fano_range = match outcome.port {
        PortType::Transmission => None,
        port => Some(fano_range(port, fit.r0, fit.phi0, fit.qr, config.isolation_db)),
    };
    let has_photons = outcome.port != PortType::Transmission && fit.qi_is_physical();
    let single_photon = has_photons.then(|| single_photon_limit_dbm(fit));
    let photons = config
        .power_dbm
        .filter(|_| has_photons)
        .map(|p| photons_in_resonator(fit, p));

    Ok(CircleRun {
        calibration,
        outcome,
        fano_range,
        single_photon_limit_dbm: single_photon,
        photons,
    })
}

/// Execute the full single-sweep pipeline.
pub fn run_fit(config: &FitConfig) -> Result<FitRun, AppError> {
    // 1) Ingest.
    let ingest = load_sweep(&config.file, &config.ingest)?;
    for e in &ingest.row_errors {
        tracing::warn!(line = e.line, "{}", e.message);
    }

    // 2) Prefilter + window.
    let sweep = prepare(&ingest.sweep, config)?;
    tracing::debug!(points = sweep.len(), span = sweep.span(), "prepared sweep");

    // 3) Circle fit.
    let circle = if config.methods.circle {
        Some(circle_run(&sweep, config)?)
    } else {
        None
    };

    // 4) Amplitude-only fits. A failure here only drops that result.
    let methods = config.methods;
    let lorentzian = auxiliary("lorentzian", methods.lorentzian, || fit_lorentzian(&sweep));
    let skewed_lorentzian = auxiliary("skewed lorentzian", methods.skewed_lorentzian, || skewed_of(&sweep));
    let fano = auxiliary("fano", methods.fano, || fit_fano(&sweep));

    Ok(FitRun {
        ingest,
        sweep,
        circle,
        lorentzian,
        skewed_lorentzian,
        fano,
    })
}

fn auxiliary<T>(name: &str, enabled: bool, fit: impl FnOnce() -> Result<T, FitError>) -> Option<T> {
    if !enabled {
        return None;
    }
    match fit() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("{name} fit failed: {e}");
            None
        }
    }
}

/// Skewed Lorentzian of the max-normalized `|z|²`.
fn skewed_of(sweep: &SweepData) -> Result<SkewedLorentzianFit, FitError> {
    let power = sweep.power();
    let max = power.iter().copied().fold(0.0, f64::max);
    if !(max > 0.0) {
        return Err(FitError::DegenerateCircle { radius: 0.0 });
    }
    let scaled: Vec<f64> = power.iter().map(|p| p / max).collect();
    fit_skewed_lorentzian(sweep.freq(), &scaled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{SweepSpec, synthetic_sweep};
    use approx::assert_relative_eq;

    fn config() -> FitConfig {
        FitConfig {
            file: PathBuf::new(),
            ingest: IngestOptions::default(),
            f_min: None,
            f_max: None,
            prefilter: Prefilter::None,
            options: FitOptions::default(),
            methods: Methods::default(),
            isolation_db: crate::fit::DEFAULT_ISOLATION_DB,
            power_dbm: Some(-140.0),
            export_json: None,
            export_csv: None,
        }
    }

    #[test]
    fn raw_notch_sweep_recovers_parameters() {
        let spec = SweepSpec::default();
        let raw = synthetic_sweep(&spec).unwrap();
        let run = circle_run(&raw, &config()).unwrap();
        let fit = &run.outcome.fit;
        assert_relative_eq!(fit.fr, spec.fr, max_relative = 1e-6);
        assert_relative_eq!(fit.qr, spec.qr, max_relative = 1e-3);
        assert_relative_eq!(fit.abs_qc, spec.qc, max_relative = 1e-3);
        assert!(run.single_photon_limit_dbm.is_some());
        assert!(run.photons.is_some_and(|n| n > 0.0));
        assert!(run.fano_range.is_some());
    }

    #[test]
    fn merged_warnings_keep_one_per_kind() {
        let merged = merge_warnings(
            &[FitWarning::PartialCircle { rolloff: 4.8258847215205 }],
            vec![
                FitWarning::PartialCircle { rolloff: 4.8258847215204 },
                FitWarning::UnphysicalQi,
            ],
        );
        assert_eq!(
            merged,
            vec![FitWarning::PartialCircle { rolloff: 4.8258847215205 }, FitWarning::UnphysicalQi]
        );
    }

    #[test]
    fn noisy_reflection_sweeps_recover_q() {
        let options = FitOptions {
            port: PortType::Reflection,
            ..FitOptions::default()
        };
        for seed in 0..10 {
            let spec = SweepSpec {
                port: PortType::Reflection,
                qc: 1.5e4,
                noise: 2e-3,
                seed,
                ..SweepSpec::default()
            };
            let raw = synthetic_sweep(&spec).unwrap();
            let (_, outcome) = fit_sweep(&raw, &options).unwrap();
            assert_relative_eq!(outcome.fit.fr, spec.fr, max_relative = 1e-5);
            assert_relative_eq!(outcome.fit.qr, spec.qr, max_relative = 0.05);
            assert!(
                !outcome
                    .warnings
                    .iter()
                    .any(|w| matches!(w, FitWarning::ResonanceOutsideSweep { .. } | FitWarning::QrMismatch { .. })),
                "seed={seed} warnings={:?}",
                outcome.warnings
            );
        }
    }

    #[test]
    fn window_is_applied_after_prefilter() {
        let raw = synthetic_sweep(&SweepSpec::default()).unwrap();
        let cfg = FitConfig {
            f_min: Some(4.999e9),
            f_max: Some(5.001e9),
            prefilter: Prefilter::Median,
            ..config()
        };
        let prepared = prepare(&raw, &cfg).unwrap();
        assert!(prepared.len() < raw.len());
        assert!(prepared.freq().iter().all(|f| (4.999e9..=5.001e9).contains(f)));
    }

    #[test]
    fn transmission_has_no_fano_range() {
        let spec = SweepSpec {
            port: PortType::Transmission,
            ..SweepSpec::default()
        };
        let raw = synthetic_sweep(&spec).unwrap();
        let cfg = FitConfig {
            options: FitOptions {
                port: PortType::Transmission,
                ..FitOptions::default()
            },
            ..config()
        };
        let run = circle_run(&raw, &cfg).unwrap();
        assert!(run.fano_range.is_none());
        assert!(run.single_photon_limit_dbm.is_none());
        assert_relative_eq!(run.outcome.fit.qr, spec.qr, max_relative = 1e-3);
    }
}
