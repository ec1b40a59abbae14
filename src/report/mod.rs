//! Reporting utilities: formatted terminal output for fits and scans.

pub mod format;

pub use format::*;
