//! Line fitting.
//!
//! Ordinary least squares for the ROS probability-plot fit and the
//! Theil-Sen estimator for robust inflow/outflow regression.
//!
//! # Examples
//!
//! ```
//! use u_wqstats::regression::theil_slopes;
//!
//! let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let y = [2.1, 3.9, 6.2, 7.8, 30.0, 12.1]; // one outlier
//! let r = theil_slopes(&x, &y, 0.95).unwrap();
//! assert!((r.slope - 2.0).abs() < 0.2);
//! assert!(r.low_slope <= r.slope && r.slope <= r.high_slope);
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::special;
use crate::stats;

// ---------------------------------------------------------------------------
// Ordinary least squares
// ---------------------------------------------------------------------------

/// Least-squares line y = intercept + slope · x, returned as `(slope, intercept)`.
///
/// β₁ = Σ(x − x̄)(y − ȳ) / Σ(x − x̄)², β₀ = ȳ − β₁x̄.
///
/// # Returns
///
/// `None` if fewer than 2 points, lengths differ, non-finite input, or x
/// has zero spread.
pub fn least_squares_line(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len();
    if n < 2 || n != y.len() {
        return None;
    }
    let x_mean = stats::mean(x)?;
    let y_mean = stats::mean(y)?;
    let ss_x: f64 = x.iter().map(|&xi| (xi - x_mean).powi(2)).sum();
    if ss_x < 1e-300 {
        return None;
    }
    let s_xy: f64 = x
        .iter()
        .zip(y)
        .map(|(&xi, &yi)| (xi - x_mean) * (yi - y_mean))
        .sum();
    let slope = s_xy / ss_x;
    Some((slope, y_mean - slope * x_mean))
}

// ---------------------------------------------------------------------------
// Theil-Sen
// ---------------------------------------------------------------------------

/// Theil-Sen fit with a rank-based confidence interval on the slope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TheilSenResult {
    /// Median of pairwise slopes.
    pub slope: f64,
    /// median(y) − slope · median(x).
    pub intercept: f64,
    /// Lower confidence bound on the slope.
    pub low_slope: f64,
    /// Upper confidence bound on the slope.
    pub high_slope: f64,
}

/// Theil-Sen robust slope estimator.
///
/// # Algorithm
///
/// 1. Slopes (yⱼ − yᵢ)/(xⱼ − xᵢ) over all pairs with xⱼ > xᵢ; the estimate
///    is their median.
/// 2. Intercept = median(y) − slope · median(x).
/// 3. Confidence bounds (Sen 1968): with z = Φ⁻¹((1 − confidence)/2) and
///    σ² = [n(n−1)(2n+5) − Σₓ t(t−1)(2t+5) − Σᵧ u(u−1)(2u+5)] / 18,
///    the bounds are the sorted slopes at ranks
///    max(round((N + zσ)/2) − 1, 0) and min(round((N − zσ)/2), N − 1),
///    where N is the number of slopes. Rounding is half-to-even.
///
/// # Returns
///
/// `None` if fewer than 2 points, lengths differ, non-finite input, or all
/// x values are equal.
///
/// # References
///
/// - Theil (1950). "A rank-invariant method of linear and polynomial
///   regression analysis". Indagationes Mathematicae, 12, 85–91.
/// - Sen (1968). "Estimates of the regression coefficient based on
///   Kendall's tau". JASA, 63(324), 1379–1389.
pub fn theil_slopes(x: &[f64], y: &[f64], confidence: f64) -> Option<TheilSenResult> {
    let n = x.len();
    if n < 2 || n != y.len() {
        return None;
    }
    if x.iter().any(|v| !v.is_finite()) || y.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let mut slopes = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in 0..n {
            let dx = x[j] - x[i];
            if dx > 0.0 {
                slopes.push((y[j] - y[i]) / dx);
            }
        }
    }
    if slopes.is_empty() {
        return None;
    }
    slopes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let slope = stats::percentile_sorted(&slopes, 50.0)?;
    let intercept = stats::median(y)? - slope * stats::median(x)?;

    let alpha = if confidence > 0.5 {
        1.0 - confidence
    } else {
        confidence
    };
    let z = special::inverse_normal_cdf(alpha / 2.0);
    let nf = n as f64;
    let sigsq = (nf * (nf - 1.0) * (2.0 * nf + 5.0) - tie_term(x) - tie_term(y)) / 18.0;
    let sigma = sigsq.max(0.0).sqrt();
    let nt = slopes.len() as f64;
    let last = slopes.len() - 1;

    let ru = ((nt - z * sigma) / 2.0).round_ties_even();
    let rl = ((nt + z * sigma) / 2.0).round_ties_even() - 1.0;
    let ru = if ru.is_finite() && ru >= 0.0 {
        (ru as usize).min(last)
    } else {
        last
    };
    let rl = if rl.is_finite() && rl >= 0.0 {
        (rl as usize).min(last)
    } else {
        0
    };

    Some(TheilSenResult {
        slope,
        intercept,
        low_slope: slopes[rl],
        high_slope: slopes[ru],
    })
}

// Σ t(t−1)(2t+5) over groups of exactly repeated values.
fn tie_term(data: &[f64]) -> f64 {
    let sorted = stats::sorted(data);
    let mut total = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i + 1;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        let t = (j - i) as f64;
        if t > 1.0 {
            total += t * (t - 1.0) * (2.0 * t + 5.0);
        }
        i = j;
    }
    total
}
