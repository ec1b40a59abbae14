//! Result bookkeeping for multi-sweep runs.

pub mod session;

pub use session::*;
