//! Synthetic resonator sweeps.
//!
//! Used by the `simulate` command and as ground truth in tests. The raw
//! trace is the canonical S-parameter seen through the environment plus an
//! optional real background slope:
//!
//! `z(f) = a·e^{i(α − 2πτf)}·S(f) + a2·(f − fr) + noise`

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::domain::{PortType, SweepData};
use crate::error::FitError;
use crate::models::{NotchModel, ReflectionModel, environment, transmission_s21};

/// Ground-truth parameters of a synthetic sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepSpec {
    pub port: PortType,
    pub fr: f64,
    pub qr: f64,
    /// `|Qc|` for notch, `Qc` for reflection; unused in transmission.
    pub qc: f64,
    pub phi0: f64,
    pub a: f64,
    pub alpha: f64,
    pub delay: f64,
    /// Real background slope (raw units per Hz).
    pub a2: f64,
    pub span: f64,
    pub points: usize,
    /// Standard deviation of the complex Gaussian noise per component.
    pub noise: f64,
    pub seed: u64,
}

impl Default for SweepSpec {
    fn default() -> Self {
        Self {
            port: PortType::Notch,
            fr: 5.0e9,
            qr: 1.0e4,
            qc: 2.0e4,
            phi0: 0.25,
            a: 0.8,
            alpha: 1.0,
            delay: 5.0e-8,
            a2: 0.0,
            span: 4.0e6,
            points: 401,
            noise: 0.0,
            seed: 7,
        }
    }
}

impl SweepSpec {
    /// Evenly spaced frequencies over `fr ± span/2`.
    pub fn frequencies(&self) -> Vec<f64> {
        let n = self.points.max(2);
        let start = self.fr - 0.5 * self.span;
        (0..n).map(|i| start + self.span * i as f64 / (n - 1) as f64).collect()
    }

    /// Canonical (environment-free) response at `f`.
    pub fn canonical(&self, f: f64) -> num_complex::Complex64 {
        match self.port {
            PortType::Notch => NotchModel {
                fr: self.fr,
                qr: self.qr,
                abs_qc: self.qc,
                phi0: self.phi0,
            }
            .s21(f),
            PortType::Reflection => ReflectionModel {
                fr: self.fr,
                qr: self.qr,
                qc: self.qc,
            }
            .s11(f),
            PortType::Transmission => transmission_s21(f, self.fr, self.qr),
        }
    }
}

/// Build the raw sweep described by `spec`.
pub fn synthetic_sweep(spec: &SweepSpec) -> Result<SweepData, FitError> {
    let freq = spec.frequencies();
    let mut data: Vec<_> = freq
        .iter()
        .map(|&f| environment(f, spec.a, spec.alpha, spec.delay) * spec.canonical(f) + spec.a2 * (f - spec.fr))
        .collect();

    if spec.noise > 0.0 {
        let normal = Normal::new(0.0, spec.noise)
            .map_err(|e| FitError::InvalidOption(format!("noise distribution: {e}")))?;
        let mut rng = StdRng::seed_from_u64(spec.seed);
        for z in data.iter_mut() {
            z.re += normal.sample(&mut rng);
            z.im += normal.sample(&mut rng);
        }
    }

    SweepData::new(freq, data)
}
