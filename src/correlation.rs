//! Rank correlation between paired series.
//!
//! Spearman's rho and Kendall's tau-b, each with a two-tailed p-value.
//!
//! # Examples
//!
//! ```
//! use u_wqstats::correlation::{kendall_tau_b, spearman};
//!
//! let inflow = [1.0, 2.0, 3.0, 4.0, 5.0];
//! let outflow = [2.0, 4.0, 5.0, 4.0, 5.0];
//!
//! let s = spearman(&inflow, &outflow).unwrap();
//! assert!(s.r > 0.7);
//!
//! let k = kendall_tau_b(&inflow, &outflow).unwrap();
//! assert!(k.r > 0.5);
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::special;
use crate::stats;

/// Result of a correlation computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// Correlation coefficient in [-1, 1].
    pub r: f64,
    /// Two-tailed p-value for H₀: no association.
    pub p_value: f64,
    /// Number of paired observations.
    pub n: usize,
}

fn check_pairs(x: &[f64], y: &[f64]) -> bool {
    x.len() >= 3
        && x.len() == y.len()
        && x.iter().chain(y).all(|v| v.is_finite())
}

/// Spearman's rank correlation: Pearson correlation of mid-ranks.
///
/// The p-value uses t = r·√(n−2)/√(1−r²) on n − 2 degrees of freedom.
///
/// # Returns
///
/// `None` if fewer than 3 observations, slices differ in length, non-finite
/// input, or either series is constant.
///
/// # References
///
/// Spearman (1904). "The proof and measurement of association between two
/// things". The American Journal of Psychology, 15(1), 72–101.
pub fn spearman(x: &[f64], y: &[f64]) -> Option<CorrelationResult> {
    if !check_pairs(x, y) {
        return None;
    }
    let n = x.len();
    let rx = rank_data(x);
    let ry = rank_data(y);

    let cov = stats::covariance(&rx, &ry)?;
    let srx = stats::std_dev(&rx)?;
    let sry = stats::std_dev(&ry)?;
    if srx < 1e-300 || sry < 1e-300 {
        return None;
    }

    let r = (cov / (srx * sry)).clamp(-1.0, 1.0);
    Some(CorrelationResult {
        r,
        p_value: correlation_p_value(r, n),
        n,
    })
}

/// Kendall's tau-b with tie correction.
///
/// # Algorithm
///
/// τ_b = (C − D) / √[(n₀ − n₁)(n₀ − n₂)] where C and D count concordant and
/// discordant pairs, n₀ = n(n−1)/2 and n₁, n₂ count pairs tied in x and y.
///
/// The p-value is the normal approximation on S = C − D with the
/// tie-corrected variance
///
/// ```text
/// var(S) = [v₀ − vₜ − vᵤ]/18
///        + Σt(t−1)·Σu(u−1) / (2n(n−1))
///        + Σt(t−1)(t−2)·Σu(u−1)(u−2) / (9n(n−1)(n−2))
/// ```
///
/// # Returns
///
/// `None` if fewer than 3 observations, slices differ in length, non-finite
/// input, or either series is constant.
///
/// # References
///
/// - Kendall (1938). "A new measure of rank correlation".
///   Biometrika, 30(1/2), 81–93.
/// - Kendall (1945). "The treatment of ties in ranking problems".
///   Biometrika, 33(3), 239–251.
pub fn kendall_tau_b(x: &[f64], y: &[f64]) -> Option<CorrelationResult> {
    if !check_pairs(x, y) {
        return None;
    }
    let n = x.len();

    let mut concordant: i64 = 0;
    let mut discordant: i64 = 0;
    let mut ties_x: i64 = 0;
    let mut ties_y: i64 = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];
            if dx == 0.0 {
                ties_x += 1;
            }
            if dy == 0.0 {
                ties_y += 1;
            }
            if dx != 0.0 && dy != 0.0 {
                if dx * dy > 0.0 {
                    concordant += 1;
                } else {
                    discordant += 1;
                }
            }
        }
    }

    let n0 = (n as i64) * (n as i64 - 1) / 2;
    let denom_sq = (n0 - ties_x) as f64 * (n0 - ties_y) as f64;
    if denom_sq <= 0.0 {
        return None;
    }

    let s = (concordant - discordant) as f64;
    let tau = (s / denom_sq.sqrt()).clamp(-1.0, 1.0);

    let nf = n as f64;
    let tx = tie_groups(x);
    let ty = tie_groups(y);
    let sum = |groups: &[f64], f: fn(f64) -> f64| groups.iter().map(|&t| f(t)).sum::<f64>();
    let v0 = nf * (nf - 1.0) * (2.0 * nf + 5.0);
    let vt = sum(&tx, |t| t * (t - 1.0) * (2.0 * t + 5.0));
    let vu = sum(&ty, |t| t * (t - 1.0) * (2.0 * t + 5.0));
    let v1 = sum(&tx, |t| t * (t - 1.0)) * sum(&ty, |t| t * (t - 1.0)) / (2.0 * nf * (nf - 1.0));
    let v2 = sum(&tx, |t| t * (t - 1.0) * (t - 2.0)) * sum(&ty, |t| t * (t - 1.0) * (t - 2.0))
        / (9.0 * nf * (nf - 1.0) * (nf - 2.0));
    let var_s = (v0 - vt - vu) / 18.0 + v1 + v2;

    let p_value = if var_s > 0.0 {
        let z = s / var_s.sqrt();
        (2.0 * special::standard_normal_sf(z.abs())).min(1.0)
    } else {
        1.0
    };

    Some(CorrelationResult {
        r: tau,
        p_value,
        n,
    })
}

/// Two-tailed p-value for a correlation coefficient via the t distribution.
fn correlation_p_value(r: f64, n: usize) -> f64 {
    let df = (n - 2) as f64;
    let r2 = r * r;
    if r2 >= 1.0 - 1e-15 {
        return 0.0;
    }
    let t = r * (df / (1.0 - r2)).sqrt();
    (2.0 * (1.0 - special::t_distribution_cdf(t.abs(), df))).clamp(0.0, 1.0)
}

/// Mid-ranks (1-based); tied values share the average rank.
fn rank_data(data: &[f64]) -> Vec<f64> {
    let n = data.len();
    let mut indexed: Vec<(usize, f64)> = data.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && indexed[j].1 == indexed[i].1 {
            j += 1;
        }
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        for item in &indexed[i..j] {
            ranks[item.0] = avg_rank;
        }
        i = j;
    }
    ranks
}

/// Sizes of the groups of repeated values (only groups larger than one).
fn tie_groups(data: &[f64]) -> Vec<f64> {
    let sorted = stats::sorted(data);
    let mut groups = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i + 1;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        if j - i > 1 {
            groups.push((j - i) as f64);
        }
        i = j;
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;

    #[test]
    fn shifted_copies_are_perfectly_correlated() {
        let (values, _) = testdata::reference_values();
        let x: Vec<f64> = values.iter().map(|v| v + 3.0).collect();
        let y: Vec<f64> = values.iter().map(|v| v - 1.5).collect();

        let s = spearman(&x, &y).expect("should compute");
        assert!((s.r - 1.0).abs() < 1e-12, "rho = {}", s.r);
        assert_eq!(s.p_value, 0.0);
        assert_eq!(s.n, 35);

        let k = kendall_tau_b(&x, &y).expect("should compute");
        assert!((k.r - 1.0).abs() < 1e-12, "tau = {}", k.r);
        assert!(k.p_value < 1e-10, "p = {}", k.p_value);
    }

    #[test]
    fn reversed_order_is_negative() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = [6.0, 5.0, 4.0, 3.0, 2.0, 1.0];
        assert!((spearman(&x, &y).expect("should compute").r + 1.0).abs() < 1e-12);
        assert!((kendall_tau_b(&x, &y).expect("should compute").r + 1.0).abs() < 1e-12);
    }

    #[test]
    fn kendall_with_ties() {
        // C = 7, D = 1, ties_x = 1, ties_y = 1, n0 = 10
        let x = [1.0, 2.0, 2.0, 3.0, 4.0];
        let y = [1.0, 3.0, 2.0, 2.0, 5.0];
        let k = kendall_tau_b(&x, &y).expect("should compute");
        assert!((k.r - 6.0 / 9.0).abs() < 1e-12, "tau = {}", k.r);
        assert!((0.0..=1.0).contains(&k.p_value));
    }

    #[test]
    fn spearman_mid_ranks() {
        assert_eq!(rank_data(&[3.0, 1.0, 3.0, 2.0]), vec![3.5, 1.0, 3.5, 2.0]);
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [5.0, 6.0, 7.0, 8.0, 7.0];
        let s = spearman(&x, &y).expect("should compute");
        // ranks of y: 1, 2, 3.5, 5, 3.5
        assert!((s.r - 0.8207826816681233).abs() < 1e-9, "rho = {}", s.r);
    }

    #[test]
    fn constant_series_is_undefined() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0; 4];
        assert!(spearman(&x, &y).is_none());
        assert!(kendall_tau_b(&x, &y).is_none());
        assert!(spearman(&x[..2], &y[..2]).is_none());
        assert!(kendall_tau_b(&x, &[1.0, 2.0, f64::NAN, 4.0]).is_none());
    }

    #[test]
    fn tie_group_sizes() {
        assert_eq!(tie_groups(&[1.0, 1.0, 2.0, 3.0, 3.0, 3.0]), vec![2.0, 3.0]);
        assert!(tie_groups(&[1.0, 2.0]).is_empty());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn coefficients_bounded(
            pts in proptest::collection::vec((-1e3_f64..1e3, -1e3_f64..1e3), 3..=30)
        ) {
            let x: Vec<f64> = pts.iter().map(|p| p.0).collect();
            let y: Vec<f64> = pts.iter().map(|p| p.1).collect();
            for r in [spearman(&x, &y), kendall_tau_b(&x, &y)].into_iter().flatten() {
                prop_assert!((-1.0..=1.0).contains(&r.r), "r = {}", r.r);
                prop_assert!((0.0..=1.0).contains(&r.p_value), "p = {}", r.p_value);
            }
        }

        #[test]
        fn monotone_transform_invariant(
            x in proptest::collection::vec(0.1_f64..1e3, 3..=30)
        ) {
            let y: Vec<f64> = x.iter().map(|v| v.ln()).collect();
            if let Some(k) = kendall_tau_b(&x, &y) {
                prop_assert!((k.r - 1.0).abs() < 1e-9, "tau = {}", k.r);
            }
        }
    }
}
