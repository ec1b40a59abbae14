//! SVD-based linear solve.
//!
//! Used as the fallback when a damped normal-equation system is not positive
//! definite enough for Cholesky.
//!
//! SVD handles tall and square systems alike (`QR::solve` in nalgebra is meant
//! for square systems only), and the progressively looser tolerances let
//! nearly rank-deficient systems still produce a minimum-norm answer.

use nalgebra::{DMatrix, DVector};

/// Solve `x·β ≈ y` in the least-squares sense.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().try_svd(true, true, f64::EPSILON, 1000)?;

    for &tol in &[1e-12, 1e-10, 1e-8, 1e-6] {
        let scaled_tol = tol * svd.singular_values.max();
        if let Ok(beta) = svd.solve(y, scaled_tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn rank_deficient_system_returns_minimum_norm() {
        let x = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let y = DVector::from_row_slice(&[2.0, 2.0]);
        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 1.0).abs() < 1e-10);
        assert!((beta[1] - 1.0).abs() < 1e-10);
    }
}
