//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - input configuration enums (`DataFormat`, `PortType`, `ErrorMode`, `Prefilter`)
//! - validated measurement data (`SweepData`, `ScanLine`)
//! - fit outputs (`CalibrationParams`, `ResonatorFit`, `FitErrors`, `FitOutcome`)

pub mod types;

pub use types::*;
