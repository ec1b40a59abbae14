//! Bounded scalar minimization (Brent's method).

/// Result of a bounded 1-D minimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarMinimum {
    pub x: f64,
    pub fx: f64,
    pub iterations: usize,
    pub converged: bool,
}

const GOLDEN: f64 = 0.381_966_011_250_105_1;

/// Minimize `f` on `[lo, hi]` with Brent's parabolic/golden-section method.
///
/// Stops after `max_iter` iterations and returns the best point seen.
pub fn brent_bounded<F>(mut f: F, lo: f64, hi: f64, xtol: f64, max_iter: usize) -> ScalarMinimum
where
    F: FnMut(f64) -> f64,
{
    let (mut a, mut b) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    let sqrt_eps = f64::EPSILON.sqrt();

    let mut x = a + GOLDEN * (b - a);
    let mut w = x;
    let mut v = x;
    let mut fx = f(x);
    let mut fw = fx;
    let mut fv = fx;
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    for iter in 0..max_iter {
        let m = 0.5 * (a + b);
        let tol = sqrt_eps * x.abs() + xtol / 3.0;
        let tol2 = 2.0 * tol;
        if (x - m).abs() <= tol2 - 0.5 * (b - a) {
            return ScalarMinimum {
                x,
                fx,
                iterations: iter,
                converged: true,
            };
        }

        let mut golden = true;
        if e.abs() > tol {
            // Parabolic fit through x, w, v.
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let e_prev = e;
            e = d;
            if p.abs() < (0.5 * q * e_prev).abs() && p > q * (a - x) && p < q * (b - x) {
                d = p / q;
                let u = x + d;
                if (u - a) < tol2 || (b - u) < tol2 {
                    d = if x < m { tol } else { -tol };
                }
                golden = false;
            }
        }
        if golden {
            e = if x < m { b - x } else { a - x };
            d = GOLDEN * e;
        }

        let u = if d.abs() >= tol { x + d } else if d > 0.0 { x + tol } else { x - tol };
        let fu = f(u);

        if fu <= fx {
            if u < x {
                b = x;
            } else {
                a = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }

    ScalarMinimum {
        x,
        fx,
        iterations: max_iter,
        converged: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn finds_parabola_minimum() {
        let m = brent_bounded(|x| (x - 1.3).powi(2) + 0.5, -5.0, 5.0, 1e-10, 200);
        assert!(m.converged);
        assert_abs_diff_eq!(m.x, 1.3, epsilon = 1e-6);
        assert_abs_diff_eq!(m.fx, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn respects_bounds() {
        let m = brent_bounded(|x| x, 2.0, 3.0, 1e-10, 200);
        assert!(m.x >= 2.0 && m.x < 2.0 + 1e-6);
    }

    #[test]
    fn iteration_cap_returns_best_point() {
        let m = brent_bounded(|x| (x - 0.1).powi(2), -1.0, 1.0, 0.0, 3);
        assert!(!m.converged);
        assert_eq!(m.iterations, 3);
        assert!(m.fx <= (GOLDEN * 2.0 - 1.0 - 0.1f64).powi(2));
    }
}
