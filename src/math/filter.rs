//! Smoothing prefilters applied to complex traces before fitting.
//!
//! Both filters act on real and imaginary parts independently and use
//! edge-replicating boundaries, so the output has the same length as the input.

use num_complex::Complex64;

/// Running median with an odd window (`window` is rounded up to odd).
pub fn median_filter(data: &[Complex64], window: usize) -> Vec<Complex64> {
    let half = window.max(1) / 2;
    let n = data.len();
    let mut re = Vec::with_capacity(2 * half + 1);
    let mut im = Vec::with_capacity(2 * half + 1);
    (0..n)
        .map(|i| {
            re.clear();
            im.clear();
            for k in 0..=2 * half {
                let j = clamp_index(i as isize + k as isize - half as isize, n);
                re.push(data[j].re);
                im.push(data[j].im);
            }
            Complex64::new(median(&mut re), median(&mut im))
        })
        .collect()
}

/// Gaussian smoothing with standard deviation `sigma` (in samples), truncated at 4σ.
pub fn gaussian_filter(data: &[Complex64], sigma: f64) -> Vec<Complex64> {
    if !(sigma > 0.0) || data.is_empty() {
        return data.to_vec();
    }
    let radius = (4.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();
    let n = data.len();
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| data[clamp_index(i as isize + k as isize - radius, n)] * *w)
                .sum::<Complex64>()
                / norm
        })
        .collect()
}

fn clamp_index(i: isize, n: usize) -> usize {
    i.clamp(0, n as isize - 1) as usize
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    values[values.len() / 2]
}
