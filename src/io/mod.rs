//! Input/output helpers.
//!
//! - delimited sweep/scan ingest (`ingest`)
//! - result and sweep exports (JSON/CSV) (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
