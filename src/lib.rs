//! `resonator-circlefit` library crate.
//!
//! The binary (`cfit`) is a thin wrapper around this library so that:
//!
//! - the fitting core is testable without spawning processes
//! - modules are reusable from other front-ends (scan drivers, notebooks)

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod store;
