//! Scan fits: every line of a multi-sweep file fitted independently.

use rayon::prelude::*;

use crate::app::pipeline::{FitConfig, fit_sweep, prepare};
use crate::domain::{FitOutcome, ScanLine};
use crate::error::FitError;
use crate::store::ResultSession;

/// Per-line results (in input order) plus the filled session.
#[derive(Debug, Clone)]
pub struct ScanRun {
    pub results: Vec<Result<FitOutcome, FitError>>,
    pub session: ResultSession,
}

impl ScanRun {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_err()).count()
    }
}

/// Fit all scan lines in parallel. A failing line is quarantined, never fatal.
pub fn fit_scan(lines: &[ScanLine], config: &FitConfig) -> ScanRun {
    // Evaluate each line independently (parallel, order-preserving collect).
    let results: Vec<Result<FitOutcome, FitError>> = lines
        .par_iter()
        .map(|line| {
            let sweep = prepare(&line.sweep, config)?;
            fit_sweep(&sweep, &config.options).map(|(_, outcome)| outcome)
        })
        .collect();

    let mut session = ResultSession::new(config.options.port, config.options.error_mode);
    for (line, result) in lines.iter().zip(&results) {
        match result {
            Ok(outcome) => {
                for w in &outcome.warnings {
                    tracing::debug!(x = line.x, "{w}");
                }
            }
            Err(e) => tracing::warn!(x = line.x, "scan line quarantined: {e}"),
        }
        session.append(line.x, result);
    }

    ScanRun { results, session }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipeline::Methods;
    use crate::data::sample::{SweepSpec, synthetic_sweep};
    use crate::domain::{FitOptions, Prefilter, SweepData};
    use crate::io::ingest::IngestOptions;
    use num_complex::Complex64;
    use std::path::PathBuf;

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
            power_dbm: None,
            export_json: None,
            export_csv: None,
        }
    }

    fn line(x: f64, qc: f64) -> ScanLine {
        let sweep = synthetic_sweep(&SweepSpec {
            qc,
            ..SweepSpec::default()
        })
        .unwrap();
        ScanLine { x, sweep }
    }

    #[test]
    fn bad_line_is_quarantined_and_scan_continues() {
        let short = SweepData::new(
            (0..5).map(|i| 5e9 + 1e4 * i as f64).collect(),
            vec![Complex64::new(0.5, 0.0); 5],
        )
        .unwrap();
        let lines = vec![
            line(-30.0, 2e4),
            ScanLine { x: -20.0, sweep: short },
            line(-10.0, 3e4),
        ];

        let run = fit_scan(&lines, &config());
        assert_eq!(run.results.len(), 3);
        assert_eq!(run.failed(), 1);
        assert!(matches!(run.results[1], Err(FitError::TooFewPoints { .. })));

        let qc = run.session.column("absQc").unwrap();
        assert_eq!(run.session.x(), &[-30.0, -20.0, -10.0]);
        assert!((qc[0] / 2e4 - 1.0).abs() < 1e-3);
        assert!(qc[1].is_nan());
        assert!((qc[2] / 3e4 - 1.0).abs() < 1e-3);
        assert_eq!(run.session.failures()[0].x, -20.0);
    }
}
