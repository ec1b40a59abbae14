//! Resonator model evaluation.
//!
//! The fitters rely on a few primitive operations:
//! - evaluate the canonical (environment-free) S-parameter of a resonator
//! - apply / remove the measurement environment (amplitude, phase, delay)
//! - evaluate amplitude-only line shapes on `|S|²`
//! - analytic derivatives for the covariance estimates
//!
//! All functions are small and pure so fitting code can stay generic.

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

const I: Complex64 = Complex64 { re: 0.0, im: 1.0 };

/// Parameters of the canonical notch (hanger) resonator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotchModel {
    pub fr: f64,
    pub qr: f64,
    pub abs_qc: f64,
    pub phi0: f64,
}

/// Partial derivatives of the notch S21 with respect to `[fr, absQc, Qr, φ₀]`.
#[derive(Debug, Clone, Copy)]
pub struct NotchDerivatives {
    pub d_fr: Complex64,
    pub d_abs_qc: Complex64,
    pub d_qr: Complex64,
    pub d_phi0: Complex64,
}

impl NotchModel {
    /// `S21 = 1 − (Qr/|Qc|)·e^{iφ₀} / (1 + 2iQr(f − fr)/fr)`.
    pub fn s21(&self, f: f64) -> Complex64 {
        let den = Complex64::new(1.0, 2.0 * self.qr * (f - self.fr) / self.fr);
        Complex64::new(1.0, 0.0) - Complex64::from_polar(self.qr / self.abs_qc, self.phi0) / den
    }

    pub fn derivatives(&self, f: f64) -> NotchDerivatives {
        let Self { fr, qr, abs_qc, phi0 } = *self;
        let e = Complex64::from_polar(1.0, phi0);
        // fr + 2iQr(f − fr)
        let den = Complex64::new(fr, 2.0 * qr * (f - fr));
        let den2 = den * den;
        NotchDerivatives {
            d_fr: -(2.0 * I * qr * qr * f * e) / (abs_qc * den2),
            d_abs_qc: (e * qr * fr) / (abs_qc * abs_qc * den),
            d_qr: -(e * fr * fr) / (abs_qc * den2),
            d_phi0: -(I * qr * fr * e) / (abs_qc * den),
        }
    }
}

/// Parameters of a directly coupled resonator measured in reflection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReflectionModel {
    pub fr: f64,
    pub qr: f64,
    pub qc: f64,
}

/// Partial derivatives of the reflection S11 with respect to `[fr, Qc, Qr]`.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionDerivatives {
    pub d_fr: Complex64,
    pub d_qc: Complex64,
    pub d_qr: Complex64,
}

impl ReflectionModel {
    /// `S11 = 2(Qr/Qc) / (1 + 2iQr(f − fr)/fr) − 1`.
    pub fn s11(&self, f: f64) -> Complex64 {
        let den = Complex64::new(1.0, 2.0 * self.qr * (f - self.fr) / self.fr);
        2.0 * self.qr / self.qc / den - 1.0
    }

    pub fn derivatives(&self, f: f64) -> ReflectionDerivatives {
        let Self { fr, qr, qc } = *self;
        let den = Complex64::new(fr, 2.0 * qr * (f - fr));
        let den2 = den * den;
        ReflectionDerivatives {
            d_fr: 4.0 * I * qr * qr * f / (qc * den2),
            d_qc: -Complex64::new(2.0 * qr * fr / (qc * qc), 0.0) / den,
            d_qr: 2.0 * fr * fr / (qc * den2),
        }
    }
}

/// Normalized transmission through a resonator: `1 / (1 + 2iQr(f − fr)/fr)`.
pub fn transmission_s21(f: f64, fr: f64, qr: f64) -> Complex64 {
    Complex64::new(1.0, 0.0) / Complex64::new(1.0, 2.0 * qr * (f - fr) / fr)
}

/// Multiplicative measurement environment `a·e^{iα}·e^{−2πi·τ·f}`.
pub fn environment(f: f64, a: f64, alpha: f64, delay: f64) -> Complex64 {
    Complex64::from_polar(a, alpha - 2.0 * PI * delay * f)
}

/// Phase of circle-centered data: `θ(f) = θ₀ + 2·atan(2Qr(1 − f/fr))`.
pub fn phase_model(f: f64, theta0: f64, qr: f64, fr: f64) -> f64 {
    theta0 + 2.0 * (2.0 * qr * (1.0 - f / fr)).atan()
}

/// `[∂θ/∂θ₀, ∂θ/∂Qr, ∂θ/∂fr]`.
pub fn phase_model_gradient(f: f64, qr: f64, fr: f64) -> [f64; 3] {
    let x = 1.0 - f / fr;
    let u = 2.0 * qr * x;
    let w = 1.0 / (1.0 + u * u);
    [1.0, 4.0 * x * w, 4.0 * qr * f / (fr * fr) * w]
}

/// Skewed Lorentzian on `|S|²`:
/// `A1 + A2(f − fr) + (A3 + A4(f − fr)) / (1 + 4Qr²((f − fr)/fr)²)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkewedLorentzian {
    pub a1: f64,
    pub a2: f64,
    pub a3: f64,
    pub a4: f64,
    pub fr: f64,
    pub qr: f64,
}

impl SkewedLorentzian {
    pub fn eval(&self, f: f64) -> f64 {
        let df = f - self.fr;
        let x = df / self.fr;
        self.a1 + self.a2 * df + (self.a3 + self.a4 * df) / (1.0 + 4.0 * self.qr * self.qr * x * x)
    }

    pub fn from_slice(p: &[f64]) -> Self {
        Self {
            a1: p[0],
            a2: p[1],
            a3: p[2],
            a4: p[3],
            fr: p[4],
            qr: p[5],
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        vec![self.a1, self.a2, self.a3, self.a4, self.fr, self.qr]
    }
}

/// `a / (1 + 4((f − f0)/κ)²) + offs`.
pub fn lorentzian(f: f64, f0: f64, kappa: f64, a: f64, offs: f64) -> f64 {
    let x = (f - f0) / kappa;
    a / (1.0 + 4.0 * x * x) + offs
}

/// Normalized Fano transmission `(F + q)² / ((1 + q²)(F² + 1))`, `F = 2(f − fr)/bw`.
pub fn fano_transmission(f: f64, q: f64, bw: f64, fr: f64) -> f64 {
    let ff = 2.0 * (f - fr) / bw;
    (ff + q).powi(2) / ((1.0 + q * q) * (ff * ff + 1.0))
}

/// Fano line shape seen in reflection: `a·(1 − T_fano)`.
pub fn fano_reflection(f: f64, q: f64, bw: f64, fr: f64, a: f64) -> f64 {
    a * (1.0 - fano_transmission(f, q, bw, fr))
}
