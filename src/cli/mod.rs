//! Command-line parsing for the resonator circle fitter.
//!
//! Argument parsing and command dispatch stay separate from the fitting code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{DataFormat, ErrorMode, PortType, Prefilter};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "cfit", version, about = "Microwave resonator circle fit")]
pub struct Cli {
    /// Enable debug logging (overrides RUST_LOG).
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a single sweep and print the extracted parameters.
    Fit(FitArgs),
    /// Fit every line of a scan file (`x, f, y1, y2`).
    Scan(ScanArgs),
    /// Write a synthetic sweep as `f,re,im` CSV.
    Simulate(SimulateArgs),
}

/// Input and fit options shared by `fit` and `scan`.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    /// Data file.
    #[arg(short = 'f', long)]
    pub file: PathBuf,

    /// Meaning of the two data columns.
    #[arg(long, value_enum, default_value_t = DataFormat::RealImag)]
    pub format: DataFormat,

    /// Multiplier applied to the frequency column (e.g. 1e9 for GHz).
    #[arg(long, default_value_t = 1.0)]
    pub freq_unit: f64,

    /// Lower frequency bound (Hz, after unit conversion).
    #[arg(long)]
    pub f_min: Option<f64>,

    /// Upper frequency bound (Hz, after unit conversion).
    #[arg(long)]
    pub f_max: Option<f64>,

    /// Resonator coupling geometry.
    #[arg(short = 'p', long, value_enum, default_value_t = PortType::Notch)]
    pub port: PortType,

    /// Smoothing applied before fitting.
    #[arg(long, value_enum, default_value_t = Prefilter::None)]
    pub prefilter: Prefilter,

    /// Geometric refinement of the circle fits.
    #[arg(long)]
    pub refine: bool,

    /// Error estimation strategy.
    #[arg(long, value_enum, default_value_t = ErrorMode::Fast)]
    pub errors: ErrorMode,

    /// Keep the off-resonant amplitude slope in the calibration.
    #[arg(long)]
    pub keep_slope: bool,

    /// Start the delay search at 0 instead of the phase-slope estimate.
    #[arg(long)]
    pub no_guess_delay: bool,

    /// Fixed electrical delay (s); skips the delay search.
    #[arg(long)]
    pub delay: Option<f64>,

    /// Resonance frequency seed (Hz).
    #[arg(long)]
    pub fr: Option<f64>,

    /// Loaded quality factor seed.
    #[arg(long)]
    pub qr: Option<f64>,

    /// Isolation of the background path used for the Fano range (dB).
    #[arg(long, default_value_t = crate::fit::DEFAULT_ISOLATION_DB)]
    pub isolation: f64,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Run the circle fit (default when no method is selected).
    #[arg(long)]
    pub circle: bool,

    /// Lorentzian fit of |S|^2.
    #[arg(long)]
    pub lorentzian: bool,

    /// Skewed Lorentzian fit of |S|^2.
    #[arg(long)]
    pub skewed_lorentzian: bool,

    /// Fano fit of |S|^2.
    #[arg(long)]
    pub fano: bool,

    /// Run every fit method.
    #[arg(long)]
    pub all: bool,

    /// Drive power at the resonator (dBm) for the photon-number estimate.
    #[arg(long, allow_hyphen_values = true)]
    pub power: Option<f64>,

    /// Write the result to JSON.
    #[arg(long)]
    pub export_json: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Write the scan table to CSV.
    #[arg(long)]
    pub export_csv: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Output CSV file.
    #[arg(short = 'o', long)]
    pub out: PathBuf,

    #[arg(short = 'p', long, value_enum, default_value_t = PortType::Notch)]
    pub port: PortType,

    /// Resonance frequency (Hz).
    #[arg(long, default_value_t = 5.0e9)]
    pub fr: f64,

    #[arg(long, default_value_t = 1.0e4)]
    pub qr: f64,

    /// |Qc| (notch) or Qc (reflection).
    #[arg(long, default_value_t = 2.0e4)]
    pub qc: f64,

    /// Impedance mismatch angle (rad).
    #[arg(long, default_value_t = 0.25, allow_hyphen_values = true)]
    pub phi0: f64,

    /// Environment amplitude.
    #[arg(long, default_value_t = 0.8)]
    pub a: f64,

    /// Environment phase (rad).
    #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
    pub alpha: f64,

    /// Electrical delay (s).
    #[arg(long, default_value_t = 5.0e-8, allow_hyphen_values = true)]
    pub delay: f64,

    /// Frequency span (Hz).
    #[arg(long, default_value_t = 4.0e6)]
    pub span: f64,

    #[arg(long, default_value_t = 401)]
    pub points: usize,

    /// Standard deviation of the complex noise per component.
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    #[arg(long, default_value_t = 7)]
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_command_parses_flags() {
        let cli = Cli::try_parse_from([
            "cfit", "fit", "--file", "s21.txt", "--port", "reflection", "--errors", "full", "--format",
            "dbmagphasedeg", "--power", "-120", "--all",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit command");
        };
        assert_eq!(args.input.port, PortType::Reflection);
        assert_eq!(args.input.errors, ErrorMode::Full);
        assert_eq!(args.input.format, DataFormat::DbMagPhaseDeg);
        assert_eq!(args.power, Some(-120.0));
        assert!(args.all);
    }

    #[test]
    fn debug_flag_is_global() {
        let cli = Cli::try_parse_from(["cfit", "scan", "--file", "scan.txt", "--debug"]).unwrap();
        assert!(cli.debug);
    }
}
