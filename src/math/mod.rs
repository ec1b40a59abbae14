//! Numerical building blocks.
//!
//! - algebraic circle fit (`circle`)
//! - Levenberg–Marquardt least squares with covariance (`lm`)
//! - bounded scalar minimization (`minimize`)
//! - phase unwrapping and branch reduction (`phase`)
//! - smoothing prefilters (`filter`)
//! - SVD least-squares solve (`ols`)

pub mod circle;
pub mod filter;
pub mod lm;
pub mod minimize;
pub mod ols;
pub mod phase;

pub use circle::*;
pub use filter::*;
pub use lm::*;
pub use minimize::*;
pub use ols::*;
pub use phase::*;
