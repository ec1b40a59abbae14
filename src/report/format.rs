//! Formatted terminal output.
//!
//! Formatting lives here so the fitting code stays free of presentation and
//! output changes stay localized.

use crate::app::pipeline::{CircleRun, FitConfig, FitRun};
use crate::app::scan::ScanRun;
use crate::domain::{FitErrors, FitOutcome, PortType};
use crate::fit::FanoRange;

/// Format the full `fit` summary.
pub fn format_fit_report(run: &FitRun, config: &FitConfig) -> String {
    let mut out = String::new();

    out.push_str("=== cfit - resonator circle fit ===\n");
    out.push_str(&format!("File: {}\n", config.file.display()));
    out.push_str(&format!(
        "Points: n={} (rows read {}, bad rows {}) | f=[{}, {}]\n",
        run.sweep.len(),
        run.ingest.rows_read,
        run.ingest.row_errors.len(),
        fmt_hz(run.sweep.freq().first().copied().unwrap_or(f64::NAN)),
        fmt_hz(run.sweep.freq().last().copied().unwrap_or(f64::NAN)),
    ));
    out.push_str(&format!(
        "Port: {:?} | errors: {:?} | refine: {}\n",
        config.options.port, config.options.error_mode, config.options.refine_results
    ));

    if let Some(circle) = &run.circle {
        out.push_str(&format_circle(circle));
    }

    if let Some(l) = &run.lorentzian {
        out.push_str("\nLorentzian:\n");
        out.push_str(&format!(
            "- f0={} kappa={} Ql={:.1} chi2={:.3e}{}\n",
            fmt_hz(l.f0),
            fmt_hz(l.kappa),
            l.ql,
            l.chi_square,
            unconverged(l.converged)
        ));
    }
    if let Some(s) = &run.skewed_lorentzian {
        out.push_str("\nSkewed Lorentzian:\n");
        out.push_str(&format!(
            "- fr={} Qr={:.1} Qi~{:.1} chi2={:.3e}{}\n",
            fmt_hz(s.params.fr),
            s.params.qr,
            s.qi_estimate,
            s.chi_square,
            unconverged(s.converged)
        ));
    }
    if let Some(f) = &run.fano {
        out.push_str("\nFano:\n");
        out.push_str(&format!(
            "- fr={} q={:.4} Ql={:.1} Q0={:.1} chi2={:.3e}{}\n",
            fmt_hz(f.fr),
            f.q,
            f.ql,
            f.q0,
            f.chi_square,
            unconverged(f.converged)
        ));
    }

    out
}

fn format_circle(circle: &CircleRun) -> String {
    let mut out = String::new();
    let cal = &circle.calibration.params;

    out.push_str("\nCalibration:\n");
    out.push_str(&format!(
        "- delay={:.6e} s | a={:.6} | alpha={:.6} rad | a2={:.3e} /Hz\n",
        cal.delay, cal.a, cal.alpha, cal.a2
    ));

    out.push_str("\nCircle fit:\n");
    out.push_str(&format_outcome(&circle.outcome));

    if let Some(range) = &circle.fano_range {
        out.push_str(&format_fano_range(range));
    }
    if let Some(p) = circle.single_photon_limit_dbm {
        out.push_str(&format!("- single photon limit: {p:.2} dBm\n"));
    }
    if let Some(n) = circle.photons {
        out.push_str(&format!("- photons at drive power: {n:.4e}\n"));
    }
    out
}

/// Format one circle-fit outcome as a value table.
pub fn format_outcome(outcome: &FitOutcome) -> String {
    let mut out = String::new();
    let fit = &outcome.fit;
    let err = outcome.errors.as_ref();

    out.push_str(&row("fr (Hz)", fit.fr, err.map(|e| e.fr)));
    out.push_str(&row("Qr", fit.qr, err.map(|e| e.qr)));
    match outcome.port {
        PortType::Notch => {
            out.push_str(&row("|Qc|", fit.abs_qc, err.map(|e| e.abs_qc)));
            out.push_str(&row("Qc_dia_corr", fit.qc_dia_corr, err.map(|e| e.qc_dia_corr)));
            out.push_str(&row("Qi_no_corr", fit.qi_no_corr, err.map(|e| e.qi_no_corr)));
            out.push_str(&row("Qi_dia_corr", fit.qi_dia_corr, err.map(|e| e.qi_dia_corr)));
            out.push_str(&row("phi0 (rad)", fit.phi0, err.map(|e| e.phi0)));
        }
        PortType::Reflection => {
            out.push_str(&row("Qc", fit.abs_qc, err.map(|e| e.abs_qc)));
            out.push_str(&row("Qi", fit.qi_no_corr, err.map(|e| e.qi_no_corr)));
        }
        PortType::Transmission => {}
    }
    out.push_str(&row("theta0 (rad)", fit.theta0, None));
    out.push_str(&format!("{:<14} {:>16.4e}\n", "chi2", outcome.chi_square));
    if let Some(e) = err {
        out.push_str(&format_environment_errors(e));
    }

    for w in &outcome.warnings {
        out.push_str(&format!("  warning: {w}\n"));
    }
    out
}

fn format_environment_errors(e: &FitErrors) -> String {
    let mut out = String::new();
    if let Some(d) = e.delay {
        out.push_str(&format!("{:<14} {:>16} +/- {d:.3e}\n", "delay err", ""));
    }
    if let Some(a) = e.a {
        out.push_str(&format!("{:<14} {:>16} +/- {a:.3e}\n", "a err", ""));
    }
    if let Some(alpha) = e.alpha {
        out.push_str(&format!("{:<14} {:>16} +/- {alpha:.3e}\n", "alpha err", ""));
    }
    out
}

fn format_fano_range(range: &FanoRange) -> String {
    format!(
        "- Fano range (b={:.4}): Qc=[{:.1}, {:.1}] Qi=[{:.1}, {:.1}]\n",
        range.b, range.qc_min, range.qc_max, range.qi_min, range.qi_max
    )
}

/// Format a scan summary: one line per scan coordinate.
pub fn format_scan_summary(run: &ScanRun) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Scan: {} lines, {} failed\n",
        run.session.len(),
        run.failed()
    ));

    out.push_str(format!("{:>12} {:>16} {:>12} {:>12} {:>12}", "x", "fr", "Qr", "Qc", "Qi").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<12} {:-<16} {:-<12} {:-<12} {:-<12}", "", "", "", "", "").trim_end());
    out.push('\n');

    let col = |name: &str, i: usize| run.session.column(name).map_or(f64::NAN, |c| c[i]);
    let (qc_name, qi_name) = if run.session.column("absQc").is_some() {
        ("absQc", "Qi_dia_corr")
    } else {
        ("Qc", "Qi")
    };
    for (i, x) in run.session.x().iter().enumerate() {
        out.push_str(&format!(
            "{x:>12.4} {:>16.1} {:>12.1} {:>12.1} {:>12.1}\n",
            col("fr", i),
            col("Qr", i),
            col(qc_name, i),
            col(qi_name, i),
        ));
    }
    for f in run.session.failures() {
        out.push_str(&format!("  failed x={}: {}\n", f.x, f.reason));
    }
    out
}

fn row(label: &str, value: f64, err: Option<f64>) -> String {
    match err {
        Some(e) => format!("{label:<14} {value:>16.6e} +/- {e:.3e}\n"),
        None => format!("{label:<14} {value:>16.6e}\n"),
    }
}

fn fmt_hz(v: f64) -> String {
    let a = v.abs();
    if a >= 1e9 {
        format!("{:.6} GHz", v / 1e9)
    } else if a >= 1e6 {
        format!("{:.6} MHz", v / 1e6)
    } else if a >= 1e3 {
        format!("{:.3} kHz", v / 1e3)
    } else {
        format!("{v:.3} Hz")
    }
}

fn unconverged(converged: bool) -> &'static str {
    if converged { "" } else { " (not converged)" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{SweepSpec, synthetic_sweep};
    use crate::domain::FitOptions;
    use crate::fit::{ErrorStrategy, circlefit};

    #[test]
    fn fmt_hz_picks_unit() {
        assert_eq!(fmt_hz(5.0e9), "5.000000 GHz");
        assert_eq!(fmt_hz(2.5e6), "2.500000 MHz");
        assert_eq!(fmt_hz(12.0), "12.000 Hz");
    }

    #[test]
    fn notch_outcome_lists_diameter_corrected_values() {
        let spec = SweepSpec {
            a: 1.0,
            alpha: 0.0,
            delay: 0.0,
            ..SweepSpec::default()
        };
        let sweep = synthetic_sweep(&spec).unwrap();
        let outcome = circlefit(&sweep, &FitOptions::default(), ErrorStrategy::None).unwrap();
        let text = format_outcome(&outcome);
        assert!(text.contains("Qc_dia_corr"));
        assert!(text.contains("Qi_dia_corr"));
        assert!(!text.contains("+/-"));
    }
}
