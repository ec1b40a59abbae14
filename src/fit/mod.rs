//! Resonator fitting stages.
//!
//! Pipeline for one sweep:
//!
//! - estimate the cable delay and amplitude seeds (`delay`)
//! - calibrate and normalize the environment away (`calibration`)
//! - fit circle + phase on the normalized data (`circlefit`, `phase`)
//! - estimate and propagate parameter errors (`errors`)
//!
//! Side analyses: amplitude-only line shapes (`amplitude`), Fano systematics
//! (`systematics`) and photon-number helpers (`photons`).

pub mod amplitude;
pub mod calibration;
pub mod circlefit;
pub mod delay;
pub mod errors;
pub mod phase;
pub mod photons;
pub mod systematics;

pub use amplitude::*;
pub use calibration::*;
pub use circlefit::*;
pub use delay::*;
pub use errors::*;
pub use phase::*;
pub use photons::*;
pub use systematics::*;
