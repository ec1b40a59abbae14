//! Result exports.
//!
//! - single-sweep fits as pretty JSON (`write_fit_json`)
//! - scan tables as CSV, one row per scan line (`write_scan_csv`)
//! - synthetic sweeps as `f,re,im` CSV (`write_sweep_csv`)
//!
//! Non-finite values are written as `null` in JSON and `NaN` in CSV.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{CalibrationParams, FitOptions, FitOutcome, SweepData};
use crate::error::AppError;
use crate::fit::{FanoFit, FanoRange, LorentzianFit, SkewedLorentzianFit};
use crate::store::ResultSession;

/// Everything a `fit` run produced, as written to the JSON export.
#[derive(Debug, Clone, Serialize)]
pub struct ResultDocument {
    pub tool: String,
    pub version: String,
    pub created: DateTime<Utc>,
    pub source: PathBuf,
    pub points: usize,
    pub options: FitOptions,
    pub calibration: Option<CalibrationParams>,
    pub outcome: Option<FitOutcome>,
    /// Flat name → value view of `outcome`.
    pub values: BTreeMap<String, f64>,
    pub fano_range: Option<FanoRange>,
    pub single_photon_limit_dbm: Option<f64>,
    pub lorentzian: Option<LorentzianFit>,
    pub skewed_lorentzian: Option<SkewedLorentzianFit>,
    pub fano: Option<FanoFit>,
}

impl ResultDocument {
    pub fn new(source: &Path, points: usize, options: &FitOptions) -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: Utc::now(),
            source: source.to_path_buf(),
            points,
            options: options.clone(),
            calibration: None,
            outcome: None,
            values: BTreeMap::new(),
            fano_range: None,
            single_photon_limit_dbm: None,
            lorentzian: None,
            skewed_lorentzian: None,
            fano: None,
        }
    }
}

pub fn write_fit_json(path: &Path, doc: &ResultDocument) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create result JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, doc).map_err(|e| AppError::new(2, format!("Failed to write result JSON: {e}")))?;
    Ok(())
}

/// Write a scan session as CSV: `x`, the session columns, then `status`.
pub fn write_scan_csv(path: &Path, session: &ResultSession) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create scan CSV '{}': {e}", path.display())))?;

    let mut header = String::from("x");
    for name in session.names() {
        header.push(',');
        header.push_str(name);
    }
    header.push_str(",status");
    writeln!(file, "{header}").map_err(|e| AppError::new(2, format!("Failed to write scan CSV header: {e}")))?;

    let failed: BTreeMap<usize, &str> = session
        .failures()
        .iter()
        .map(|f| (f.index, f.reason.as_str()))
        .collect();
    for (i, x) in session.x().iter().enumerate() {
        let mut line = format!("{x}");
        for value in session.row(i).unwrap_or_default() {
            line.push_str(&format!(",{value:e}"));
        }
        match failed.get(&i) {
            Some(reason) => line.push_str(&format!(",\"failed: {}\"", reason.replace('"', "'"))),
            None => line.push_str(",ok"),
        }
        writeln!(file, "{line}").map_err(|e| AppError::new(2, format!("Failed to write scan CSV row: {e}")))?;
    }

    Ok(())
}

/// Write a sweep as `f,re,im`.
pub fn write_sweep_csv(path: &Path, sweep: &SweepData) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create sweep CSV '{}': {e}", path.display())))?;
    writeln!(file, "f,re,im").map_err(|e| AppError::new(2, format!("Failed to write sweep CSV header: {e}")))?;
    for (f, z) in sweep.freq().iter().zip(sweep.data()) {
        writeln!(file, "{f:.6},{:.12e},{:.12e}", z.re, z.im)
            .map_err(|e| AppError::new(2, format!("Failed to write sweep CSV row: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{SweepSpec, synthetic_sweep};
    use crate::io::ingest::{IngestOptions, load_sweep};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cfit-{}-{name}", std::process::id()))
    }

    #[test]
    fn sweep_csv_reloads() {
        let sweep = synthetic_sweep(&SweepSpec {
            points: 51,
            ..SweepSpec::default()
        })
        .unwrap();
        let path = temp_path("sweep.csv");
        write_sweep_csv(&path, &sweep).unwrap();
        let loaded = load_sweep(&path, &IngestOptions::default()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.sweep.len(), 51);
        for (z, w) in loaded.sweep.data().iter().zip(sweep.data()) {
            assert!((z - w).norm() < 1e-10);
        }
    }

    #[test]
    fn scan_csv_marks_failures() {
        let mut session = ResultSession::with_layout(vec!["fr".into()]);
        session.append_failure(-3.0, "sweep has 2 points, need at least 5");
        let path = temp_path("scan.csv");
        write_scan_csv(&path, &session).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("x,fr,status"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("-3,NaN,\"failed:"));
    }

    #[test]
    fn json_document_has_null_for_nan() {
        let mut doc = ResultDocument::new(Path::new("in.txt"), 3, &FitOptions::default());
        doc.values.insert("Qi_dia_corr".into(), f64::NAN);
        let path = temp_path("fit.json");
        write_fit_json(&path, &doc).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(value["values"]["Qi_dia_corr"].is_null());
        assert_eq!(value["points"], 3);
    }
}
