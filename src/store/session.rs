//! Column store for scan results.
//!
//! Each appended line contributes exactly one value per column, so all
//! columns stay co-indexed with `x`. Failed lines are kept as NaN rows and
//! listed in [`ResultSession::failures`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{ErrorMode, FitOutcome, PortType};
use crate::error::FitError;

/// A quarantined scan line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineFailure {
    pub index: usize,
    pub x: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSession {
    layout: Vec<String>,
    x: Vec<f64>,
    columns: BTreeMap<String, Vec<f64>>,
    failures: Vec<LineFailure>,
}

impl ResultSession {
    /// Session whose column layout matches `FitOutcome::value_names(port, mode)`.
    pub fn new(port: PortType, error_mode: ErrorMode) -> Self {
        Self::with_layout(FitOutcome::value_names(port, error_mode))
    }

    pub fn with_layout(layout: Vec<String>) -> Self {
        Self {
            layout,
            ..Self::default()
        }
    }

    /// Append one scan line.
    pub fn append(&mut self, x: f64, result: &Result<FitOutcome, FitError>) {
        match result {
            Ok(outcome) => self.append_outcome(x, outcome),
            Err(e) => self.append_failure(x, e.to_string()),
        }
    }

    pub fn append_outcome(&mut self, x: f64, outcome: &FitOutcome) {
        let values = outcome.values();
        self.push_row(x, |name| values.get(name).copied().unwrap_or(f64::NAN));
    }

    pub fn append_failure(&mut self, x: f64, reason: impl Into<String>) {
        self.failures.push(LineFailure {
            index: self.x.len(),
            x,
            reason: reason.into(),
        });
        self.push_row(x, |_| f64::NAN);
    }

    fn push_row(&mut self, x: f64, value: impl Fn(&str) -> f64) {
        if self.columns.is_empty() {
            for name in &self.layout {
                self.columns.insert(name.clone(), Vec::new());
            }
        }
        for name in &self.layout {
            if let Some(column) = self.columns.get_mut(name) {
                column.push(value(name));
            }
        }
        self.x.push(x);
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Column names in layout order.
    pub fn names(&self) -> &[String] {
        &self.layout
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn failures(&self) -> &[LineFailure] {
        &self.failures
    }

    /// Values of row `i` in layout order.
    pub fn row(&self, i: usize) -> Option<Vec<f64>> {
        if i >= self.len() {
            return None;
        }
        Some(
            self.layout
                .iter()
                .map(|name| self.columns.get(name).map_or(f64::NAN, |c| c[i]))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{SweepSpec, synthetic_sweep};
    use crate::fit::{ErrorStrategy, circlefit};
    use crate::domain::FitOptions;

    fn outcome() -> FitOutcome {
        let spec = SweepSpec {
            a: 1.0,
            alpha: 0.0,
            delay: 0.0,
            ..SweepSpec::default()
        };
        let sweep = synthetic_sweep(&spec).unwrap();
        circlefit(&sweep, &FitOptions::default(), ErrorStrategy::Fast).unwrap()
    }

    #[test]
    fn columns_are_allocated_on_first_append() {
        let mut session = ResultSession::new(PortType::Notch, ErrorMode::Fast);
        assert!(session.column("fr").is_none());
        session.append_outcome(-20.0, &outcome());
        assert_eq!(session.column("fr").map(<[f64]>::len), Some(1));
        assert_eq!(session.names().len(), 18);
    }

    #[test]
    fn failed_lines_become_nan_rows() {
        let mut session = ResultSession::new(PortType::Notch, ErrorMode::None);
        let good = outcome();
        session.append(0.0, &Ok(good.clone()));
        session.append(1.0, &Err(FitError::DegenerateCircle { radius: 0.0 }));
        session.append(2.0, &Ok(good));

        assert_eq!(session.len(), 3);
        assert_eq!(session.x(), &[0.0, 1.0, 2.0]);
        let fr = session.column("fr").unwrap();
        assert!(fr[0].is_finite());
        assert!(fr[1].is_nan());
        assert!(fr[2].is_finite());
        assert_eq!(session.failures().len(), 1);
        assert_eq!(session.failures()[0].index, 1);
    }

    #[test]
    fn missing_values_are_nan() {
        let mut session = ResultSession::with_layout(vec!["fr".into(), "not_a_value".into()]);
        session.append_outcome(0.0, &outcome());
        let row = session.row(0).unwrap();
        assert!(row[0].is_finite());
        assert!(row[1].is_nan());
        assert!(session.row(1).is_none());
    }
}
