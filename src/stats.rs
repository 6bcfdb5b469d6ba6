//! Descriptive statistics.
//!
//! Every function returns `None` on empty input or non-finite values so
//! callers can tell "not enough data" apart from a computed zero.
//!
//! # Algorithms
//!
//! - **Mean**: Kahan compensated summation.
//! - **Variance**: Welford's online algorithm. `variance` uses the sample
//!   (n − 1) denominator, `population_variance` uses n.
//! - **Percentile**: linear interpolation between closest ranks
//!   (Hyndman & Fan type 7, the default in R and NumPy).
//!
//! # Examples
//!
//! ```
//! use u_wqstats::stats::{mean, median, percentile};
//!
//! let v = [1.0, 2.0, 3.0, 4.0, 10.0];
//! assert!((mean(&v).unwrap() - 4.0).abs() < 1e-12);
//! assert!((median(&v).unwrap() - 3.0).abs() < 1e-12);
//! assert!((percentile(&v, 25.0).unwrap() - 2.0).abs() < 1e-12);
//! ```

use std::cmp::Ordering;

fn all_finite(data: &[f64]) -> bool {
    data.iter().all(|x| x.is_finite())
}

fn kahan_sum(data: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut c = 0.0;
    for &x in data {
        let y = x - c;
        let t = sum + y;
        c = (t - sum) - y;
        sum = t;
    }
    sum
}

// Returns (n, mean, M2) via Welford's recurrence.
fn welford(data: &[f64]) -> (usize, f64, f64) {
    let mut n = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for &x in data {
        n += 1;
        let delta = x - mean;
        mean += delta / n as f64;
        m2 += delta * (x - mean);
    }
    (n, mean, m2)
}

/// Arithmetic mean.
pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() || !all_finite(data) {
        return None;
    }
    Some(kahan_sum(data) / data.len() as f64)
}

/// Sample variance (denominator n − 1). `None` if fewer than 2 values.
pub fn variance(data: &[f64]) -> Option<f64> {
    if data.len() < 2 || !all_finite(data) {
        return None;
    }
    let (n, _, m2) = welford(data);
    Some(m2 / (n - 1) as f64)
}

/// Sample standard deviation (denominator n − 1).
pub fn std_dev(data: &[f64]) -> Option<f64> {
    variance(data).map(f64::sqrt)
}

/// Population variance (denominator n).
pub fn population_variance(data: &[f64]) -> Option<f64> {
    if data.is_empty() || !all_finite(data) {
        return None;
    }
    let (n, _, m2) = welford(data);
    Some(m2 / n as f64)
}

/// Population standard deviation (denominator n).
pub fn population_std_dev(data: &[f64]) -> Option<f64> {
    population_variance(data).map(f64::sqrt)
}

/// Sample covariance (denominator n − 1).
pub fn covariance(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n < 2 || n != y.len() || !all_finite(x) || !all_finite(y) {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let s: f64 = x.iter().zip(y).map(|(&a, &b)| (a - mx) * (b - my)).sum();
    Some(s / (n - 1) as f64)
}

/// Ascending copy of `data`.
pub fn sorted(data: &[f64]) -> Vec<f64> {
    let mut v = data.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

/// Percentile `p` in [0, 100] of already sorted data, by linear interpolation.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=100.0).contains(&p) {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * p / 100.0;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (h - lo as f64))
}

/// Percentile `p` in [0, 100], by linear interpolation.
pub fn percentile(data: &[f64], p: f64) -> Option<f64> {
    if !all_finite(data) {
        return None;
    }
    percentile_sorted(&sorted(data), p)
}

/// Median (50th percentile).
pub fn median(data: &[f64]) -> Option<f64> {
    percentile(data, 50.0)
}

pub fn min(data: &[f64]) -> Option<f64> {
    if data.is_empty() || !all_finite(data) {
        return None;
    }
    Some(data.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn max(data: &[f64]) -> Option<f64> {
    if data.is_empty() || !all_finite(data) {
        return None;
    }
    Some(data.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

/// Biased sample skewness g₁ = m₃ / m₂^{3/2}.
///
/// `None` if fewer than 3 values or zero variance.
pub fn skewness(data: &[f64]) -> Option<f64> {
    if data.len() < 3 || !all_finite(data) {
        return None;
    }
    let n = data.len() as f64;
    let m = mean(data)?;
    let m2 = data.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / n;
    if m2 < 1e-300 {
        return None;
    }
    let m3 = data.iter().map(|&x| (x - m).powi(3)).sum::<f64>() / n;
    Some(m3 / m2.powf(1.5))
}

/// Number of distinct values, compared bitwise after sorting.
pub fn count_unique(data: &[f64]) -> usize {
    let s = sorted(data);
    let mut count = 0;
    let mut prev: Option<f64> = None;
    for x in s {
        if prev != Some(x) {
            count += 1;
            prev = Some(x);
        }
    }
    count
}
