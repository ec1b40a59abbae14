//! Algebraic circle fit in the complex plane.
//!
//! The fit follows the Pratt/Chernov–Lesort formulation: a circle is written
//! as `A0·(x²+y²) + A1·x + A2·y + A3 = 0` under the constraint
//! `A1² + A2² − 4·A0·A3 = 1`. With the moment matrix `M` and the constraint
//! matrix `B` the solution is the generalized eigenvector of `M·A = η·B·A`
//! for the smallest non-negative `η`, found by Newton iteration on the
//! quartic `det(M − η·B)` followed by an SVD of `M − η·B`.
//!
//! Numerical notes:
//! - Points are shifted to the midpoint of their extent and scaled by the
//!   largest modulus before building `M`, so moments stay O(N).
//! - Newton and SVD iterations are bounded; neither can hang on bad input.
//! - Ill-conditioned input (fewer than 4 distinct points, collinear points,
//!   non-finite values) yields a degenerate [`CircleParams`] instead of a panic.

use nalgebra::{DVector, Matrix4};
use num_complex::Complex64;

use crate::domain::CircleParams;
use crate::math::lm::{LeastSquaresProblem, LmOptions, levenberg_marquardt};

const NEWTON_MAX_ITER: usize = 100;
const SVD_MAX_ITER: usize = 1000;
/// `|A0|` below this (in normalized coordinates) means the points are collinear.
const LINE_EPS: f64 = 1e-10;

/// Algebraic best-fit circle through `points`.
pub fn fit_circle(points: &[Complex64]) -> CircleParams {
    if points.iter().any(|z| !(z.re.is_finite() && z.im.is_finite())) {
        return nan_circle();
    }
    if distinct_points(points, 4) < 4 {
        return collapsed_circle(points);
    }

    let (lo_re, hi_re, lo_im, hi_im) = points.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(a, b, c, d), z| (a.min(z.re), b.max(z.re), c.min(z.im), d.max(z.im)),
    );
    let offset = Complex64::new(0.5 * (lo_re + hi_re), 0.5 * (lo_im + hi_im));
    let scale = points.iter().map(|z| (z - offset).norm()).fold(0.0, f64::max);
    if !(scale.is_finite() && scale > 0.0) {
        return collapsed_circle(points);
    }

    let m = moment_matrix(points.iter().map(|z| (z - offset) / scale));
    let eta = smallest_root(&m);

    let mut adjusted = m;
    adjusted[(3, 0)] += 2.0 * eta;
    adjusted[(0, 3)] += 2.0 * eta;
    adjusted[(1, 1)] -= eta;
    adjusted[(2, 2)] -= eta;

    let Some(svd) = adjusted.try_svd(false, true, f64::EPSILON, SVD_MAX_ITER) else {
        return nan_circle();
    };
    let Some(v_t) = svd.v_t else {
        return nan_circle();
    };
    let mut best = 0;
    for i in 1..4 {
        if svd.singular_values[i] < svd.singular_values[best] {
            best = i;
        }
    }
    let a = v_t.row(best);

    if a[0].abs() < LINE_EPS {
        return CircleParams {
            xc: f64::NAN,
            yc: f64::NAN,
            r0: f64::INFINITY,
        };
    }

    let xc = -a[1] / (2.0 * a[0]);
    let yc = -a[2] / (2.0 * a[0]);
    let r0 = (a[1] * a[1] + a[2] * a[2] - 4.0 * a[0] * a[3]).sqrt() / (2.0 * a[0].abs());

    CircleParams {
        xc: xc * scale + offset.re,
        yc: yc * scale + offset.im,
        r0: r0 * scale,
    }
}

/// Algebraic fit followed by a geometric least-squares correction and a
/// radially weighted radius estimate (weight `1/|z − zc|`).
///
/// The center of a noisy circle is far less biased than its radius, so the
/// last step keeps the center and re-estimates only `r0`.
pub fn fit_circle_refined(points: &[Complex64]) -> CircleParams {
    let algebraic = fit_circle(points);
    if algebraic.is_degenerate() {
        return algebraic;
    }

    let problem = GeometricCircle { points };
    let report = levenberg_marquardt(
        &problem,
        DVector::from_vec(vec![algebraic.xc, algebraic.yc, algebraic.r0]),
        &LmOptions::default().with_max_iterations(200),
    );
    let p = &report.params;
    let geometric = if report.converged() && p.iter().all(|v| v.is_finite()) {
        CircleParams {
            xc: p[0],
            yc: p[1],
            r0: p[2].abs(),
        }
    } else {
        tracing::debug!(termination = ?report.termination, "geometric circle refinement failed, keeping algebraic fit");
        algebraic
    };

    let center = geometric.center();
    let (num, den) = points
        .iter()
        .map(|z| (z - center).norm())
        .filter(|d| *d > 0.0)
        .fold((0.0, 0.0), |(num, den), d| (num + 1.0 / d, den + 1.0 / (d * d)));
    if den > 0.0 {
        CircleParams {
            r0: num / den,
            ..geometric
        }
    } else {
        geometric
    }
}

/// Signed distance of each point from the circle: `|z − zc| − r0`.
pub fn circle_residuals(points: &[Complex64], circle: &CircleParams) -> Vec<f64> {
    let center = circle.center();
    points.iter().map(|z| (z - center).norm() - circle.r0).collect()
}

struct GeometricCircle<'a> {
    points: &'a [Complex64],
}

impl LeastSquaresProblem for GeometricCircle<'_> {
    fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
        let c = Complex64::new(p[0], p[1]);
        DVector::from_iterator(self.points.len(), self.points.iter().map(|z| (z - c).norm() - p[2]))
    }

    fn jacobian(&self, p: &DVector<f64>) -> nalgebra::DMatrix<f64> {
        let c = Complex64::new(p[0], p[1]);
        nalgebra::DMatrix::from_fn(self.points.len(), 3, |i, j| {
            let d = self.points[i] - c;
            let r = d.norm().max(f64::MIN_POSITIVE);
            match j {
                0 => -d.re / r,
                1 => -d.im / r,
                _ => -1.0,
            }
        })
    }
}

fn moment_matrix(points: impl Iterator<Item = Complex64>) -> Matrix4<f64> {
    let mut s = [0.0f64; 10];
    for z in points {
        let (x, y) = (z.re, z.im);
        let zz = x * x + y * y;
        s[0] += zz * zz;
        s[1] += x * zz;
        s[2] += y * zz;
        s[3] += zz;
        s[4] += x * x;
        s[5] += x * y;
        s[6] += x;
        s[7] += y * y;
        s[8] += y;
        s[9] += 1.0;
    }
    let [szz, sxz, syz, sz, sxx, sxy, sx, syy, sy, n] = s;
    Matrix4::new(
        szz, sxz, syz, sz, //
        sxz, sxx, sxy, sx, //
        syz, sxy, syy, sy, //
        sz, sx, sy, n,
    )
}

/// Smallest non-negative root of `det(M − η·B)` by Newton's method from 0.
///
/// The quartic has leading coefficient `det(B) = −4`; the remaining
/// coefficients come from exact determinant evaluations at η = 0, ±1, 2.
fn smallest_root(m: &Matrix4<f64>) -> f64 {
    let p = |eta: f64| {
        let mut shifted = *m;
        shifted[(3, 0)] += 2.0 * eta;
        shifted[(0, 3)] += 2.0 * eta;
        shifted[(1, 1)] -= eta;
        shifted[(2, 2)] -= eta;
        shifted.determinant()
    };
    let a4 = -4.0;
    let a0 = p(0.0);
    let s1 = p(1.0) - a0 - a4;
    let s2 = p(-1.0) - a0 - a4;
    let s3 = p(2.0) - a0 - 16.0 * a4;
    let a2 = 0.5 * (s1 + s2);
    let odd = 0.5 * (s1 - s2);
    let a3 = (0.5 * (s3 - 4.0 * a2) - odd) / 3.0;
    let a1 = odd - a3;

    let mut eta = 0.0f64;
    for _ in 0..NEWTON_MAX_ITER {
        let value = a0 + eta * (a1 + eta * (a2 + eta * (a3 + eta * a4)));
        let slope = a1 + eta * (2.0 * a2 + eta * (3.0 * a3 + eta * 4.0 * a4));
        if slope == 0.0 || !slope.is_finite() {
            break;
        }
        let step = value / slope;
        eta -= step;
        if step.abs() <= 1e-15 * eta.abs().max(1.0) {
            break;
        }
    }
    if eta.is_finite() { eta } else { 0.0 }
}

fn distinct_points(points: &[Complex64], limit: usize) -> usize {
    let mut seen: Vec<Complex64> = Vec::with_capacity(limit);
    for z in points {
        if !seen.contains(z) {
            seen.push(*z);
            if seen.len() >= limit {
                break;
            }
        }
    }
    seen.len()
}

fn nan_circle() -> CircleParams {
    CircleParams {
        xc: f64::NAN,
        yc: f64::NAN,
        r0: f64::NAN,
    }
}

/// Zero-radius circle at the centroid.
fn collapsed_circle(points: &[Complex64]) -> CircleParams {
    if points.is_empty() {
        return nan_circle();
    }
    let mean = points.iter().sum::<Complex64>() / points.len() as f64;
    CircleParams {
        xc: mean.re,
        yc: mean.im,
        r0: 0.0,
    }
}
