//! Sweep and scan file ingest.
//!
//! Accepted layout:
//! - comma, tab or whitespace delimited
//! - `#` and `!` comment lines, blank lines ignored
//! - non-numeric lines before the first data row are treated as headers
//! - sweep files: `f, y1, y2`; scan files: `x, f, y1, y2`
//!
//! `(y1, y2)` are interpreted through [`DataFormat`]. Bad rows are skipped and
//! reported, they never abort the load.

use std::fs;
use std::path::Path;

use num_complex::Complex64;

use crate::domain::{DataFormat, ScanLine, SweepData};
use crate::error::AppError;

/// How to interpret the numeric columns.
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub format: DataFormat,
    /// Multiplier applied to the frequency column (e.g. 1e9 for GHz files).
    pub freq_unit: f64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            format: DataFormat::RealImag,
            freq_unit: 1.0,
        }
    }
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct IngestedSweep {
    pub sweep: SweepData,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

#[derive(Debug, Clone)]
pub struct IngestedScan {
    pub lines: Vec<ScanLine>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Numeric rows with their 1-based line numbers.
struct Table {
    rows: Vec<(usize, Vec<f64>)>,
    row_errors: Vec<RowError>,
    rows_read: usize,
}

fn read_text(path: &Path) -> Result<String, AppError> {
    fs::read_to_string(path).map_err(|e| AppError::new(2, format!("Failed to open data file '{}': {e}", path.display())))
}

/// Rewrite whitespace-delimited lines as CSV so one reader handles all layouts.
fn to_csv(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim().trim_start_matches('\u{feff}');
        if trimmed.starts_with('#') || trimmed.starts_with('!') {
            // Keep line numbering intact.
            out.push('\n');
            continue;
        }
        if trimmed.contains(',') {
            out.push_str(trimmed);
        } else {
            out.push_str(&trimmed.split_whitespace().collect::<Vec<_>>().join(","));
        }
        out.push('\n');
    }
    out
}

fn parse_table(text: &str, columns: usize) -> Result<Table, AppError> {
    let csv_text = to_csv(text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let mut rows = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line() as usize);
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        let line = record.position().map_or(0, |p| p.line() as usize);
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        rows_read += 1;

        let values: Result<Vec<f64>, _> = record.iter().take(columns).map(str::parse::<f64>).collect();
        match values {
            Ok(values) if values.len() == columns => rows.push((line, values)),
            Ok(values) => row_errors.push(RowError {
                line,
                message: format!("expected {columns} columns, found {}", values.len()),
            }),
            // Header lines before the first data row.
            Err(_) if rows.is_empty() => {
                tracing::debug!(line, "skipping header line");
                rows_read -= 1;
            }
            Err(e) => row_errors.push(RowError {
                line,
                message: format!("non-numeric value: {e}"),
            }),
        }
    }

    if rows.is_empty() {
        return Err(AppError::new(3, "No numeric data rows found."));
    }
    Ok(Table {
        rows,
        row_errors,
        rows_read,
    })
}

fn build_sweep(mut points: Vec<(f64, Complex64)>) -> Result<SweepData, AppError> {
    if points.windows(2).any(|w| w[1].0 < w[0].0) {
        tracing::debug!("frequency column is not ascending, sorting");
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
    }
    let (freq, data) = points.into_iter().unzip();
    Ok(SweepData::new(freq, data)?)
}

fn sample(values: &[f64], opts: &IngestOptions) -> (f64, Complex64) {
    (values[0] * opts.freq_unit, opts.format.to_complex(values[1], values[2]))
}

/// Parse sweep text (`f, y1, y2`).
pub fn parse_sweep(text: &str, opts: &IngestOptions) -> Result<IngestedSweep, AppError> {
    let table = parse_table(text, 3)?;
    let points = table.rows.iter().map(|(_, v)| sample(v, opts)).collect();
    Ok(IngestedSweep {
        sweep: build_sweep(points)?,
        row_errors: table.row_errors,
        rows_read: table.rows_read,
    })
}

/// Parse scan text (`x, f, y1, y2`); consecutive rows with equal `x` form one line.
pub fn parse_scan(text: &str, opts: &IngestOptions) -> Result<IngestedScan, AppError> {
    let table = parse_table(text, 4)?;
    let mut groups: Vec<(f64, Vec<(f64, Complex64)>)> = Vec::new();
    for (_, values) in &table.rows {
        let x = values[0];
        let point = sample(&values[1..], opts);
        match groups.last_mut() {
            Some((last_x, points)) if *last_x == x => points.push(point),
            _ => groups.push((x, vec![point])),
        }
    }

    let mut row_errors = table.row_errors;
    let mut lines = Vec::with_capacity(groups.len());
    for (x, points) in groups {
        match build_sweep(points) {
            Ok(sweep) => lines.push(ScanLine { x, sweep }),
            Err(e) => row_errors.push(RowError {
                line: 0,
                message: format!("scan line x={x}: {e}"),
            }),
        }
    }
    if lines.is_empty() {
        return Err(AppError::new(3, "No valid scan lines found."));
    }
    Ok(IngestedScan {
        lines,
        row_errors,
        rows_read: table.rows_read,
    })
}

pub fn load_sweep(path: &Path, opts: &IngestOptions) -> Result<IngestedSweep, AppError> {
    parse_sweep(&read_text(path)?, opts)
}

pub fn load_scan(path: &Path, opts: &IngestOptions) -> Result<IngestedScan, AppError> {
    parse_scan(&read_text(path)?, opts)
}
