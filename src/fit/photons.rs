//! Photon number and drive-power helpers.

use std::f64::consts::PI;

use crate::domain::ResonatorFit;

/// Reduced Planck constant (J·s).
pub const HBAR: f64 = 1.054_571_817e-34;

pub fn watt_to_dbm(watt: f64) -> f64 {
    10.0 * (watt * 1000.0).log10()
}

pub fn dbm_to_watt(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0) / 1000.0
}

/// Mean photon number per watt of drive: `4κc / (2πħ·fr·(κc + κi)²)`,
/// with `κc = fr/|Qc|` and `κi = fr/Qi` (diameter corrected).
fn photons_per_watt(fit: &ResonatorFit) -> f64 {
    let kc = fit.fr / fit.abs_qc;
    let ki = fit.fr / fit.qi_dia_corr;
    4.0 * kc / (2.0 * PI * HBAR * fit.fr * (kc + ki).powi(2))
}

/// Drive power (W) that keeps one photon in the resonator on average.
pub fn single_photon_limit(fit: &ResonatorFit) -> f64 {
    1.0 / photons_per_watt(fit)
}

/// Single-photon drive power in dBm.
pub fn single_photon_limit_dbm(fit: &ResonatorFit) -> f64 {
    watt_to_dbm(single_photon_limit(fit))
}

/// Mean photon number at a drive power given in dBm.
pub fn photons_in_resonator(fit: &ResonatorFit, power_dbm: f64) -> f64 {
    photons_per_watt(fit) * dbm_to_watt(power_dbm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    fn fit() -> ResonatorFit {
        ResonatorFit {
            fr: 5e9,
            qr: 1e4,
            abs_qc: 2e4,
            complex_qc: Complex64::new(2e4, 0.0),
            qc_dia_corr: 2e4,
            qi_no_corr: 2e4,
            qi_dia_corr: 2e4,
            phi0: 0.0,
            theta0: 0.0,
            r0: 0.25,
        }
    }

    #[test]
    fn dbm_conversion_round_trips() {
        assert_relative_eq!(dbm_to_watt(0.0), 1e-3, max_relative = 1e-12);
        assert_relative_eq!(watt_to_dbm(dbm_to_watt(-87.5)), -87.5, max_relative = 1e-12);
    }

    #[test]
    fn one_photon_at_the_limit() {
        let f = fit();
        let limit = single_photon_limit_dbm(&f);
        assert_relative_eq!(photons_in_resonator(&f, limit), 1.0, max_relative = 1e-9);
        // κc = κi = 2.5e5 s⁻¹: P = 2πħ·fr·(2κ)² / (4κ) = 2πħ·fr·κ
        assert_relative_eq!(single_photon_limit(&f), 2.0 * PI * HBAR * 5e9 * 2.5e5, max_relative = 1e-12);
    }
}
