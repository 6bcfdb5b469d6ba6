//! Non-detect imputation.
//!
//! [`CensoredValueEstimator`] is the seam through which observation sets
//! replace censored results with plausible values. The provided
//! implementation is Regression on Order Statistics (ROS) with
//! Hirsch-Stedinger plotting positions, the usual choice for
//! multiply-censored water-quality data.
//!
//! # Examples
//!
//! ```
//! use u_wqstats::imputation::{CensoredValueEstimator, RegressionOnOrderStatistics};
//!
//! let values = [1.0, 2.0, 2.0, 3.5, 4.1, 5.0, 6.3, 8.0];
//! let censored = [false, true, true, false, false, false, false, false];
//! let ros = RegressionOnOrderStatistics::default();
//! let out = ros.estimate(&values, &censored).unwrap();
//! assert_eq!(out.len(), values.len());
//! assert!(out[1] < 2.0 && out[2] < 2.0);
//! ```

use std::cmp::Ordering;

use log::debug;

use crate::error::{Result, WqError};
use crate::regression::least_squares_line;
use crate::special;

/// Maps `(values, censored)` to imputed values of the same length and order.
///
/// Censored entries hold their detection limit on input. Implementations
/// fail with [`WqError::ImputationUnavailable`] when the sample cannot
/// support a fit; callers then fall back to the raw values.
pub trait CensoredValueEstimator {
    fn estimate(&self, values: &[f64], censored: &[bool]) -> Result<Vec<f64>>;
}

/// Regression on Order Statistics.
///
/// # Algorithm
///
/// 1. Detection limits: the distinct censored values, preceded by the
///    sample minimum when a detect lies below the lowest limit.
/// 2. For each limit j with upper neighbour j+1:
///    Aⱼ = detects in [DLⱼ, DLⱼ₊₁), Bⱼ = detects below DLⱼ plus non-detects
///    at or below DLⱼ, Cⱼ = non-detects equal to DLⱼ.
/// 3. Exceedance probabilities from the top: PE_m = 0,
///    PEⱼ = PEⱼ₊₁ + (1 − PEⱼ₊₁) · Aⱼ / (Aⱼ + Bⱼ).
/// 4. Plotting positions within each band, ranked in sorted order:
///    non-detects (1 − PEⱼ) · r / (Cⱼ + 1),
///    detects (1 − PEⱼ) + (PEⱼ − PEⱼ₊₁) · r / (Aⱼ + 1).
/// 5. The non-detect positions are sorted across all bands and handed
///    back to the non-detects in ascending order of value, so a higher
///    limit never sits below a lower one.
/// 6. Least-squares fit of ln(detect) on Φ⁻¹(plotting position); each
///    non-detect becomes exp(intercept + slope · Φ⁻¹(pp)).
///
/// Non-detects above the largest detect carry no information for the fit
/// and are set to half their detection limit.
///
/// # References
///
/// - Helsel & Cohn (1988). "Estimation of descriptive statistics for
///   multiply censored water quality data". Water Resources Research,
///   24(12), 1997–2004.
/// - Hirsch & Stedinger (1987). "Plotting positions for historical floods
///   and their precision". Water Resources Research, 23(4), 715–727.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionOnOrderStatistics {
    /// Largest censored fraction accepted. Default: 0.8.
    pub max_fraction_censored: f64,
    /// Fewest detects accepted. Default: 2.
    pub min_uncensored: usize,
}

impl Default for RegressionOnOrderStatistics {
    fn default() -> Self {
        Self {
            max_fraction_censored: 0.8,
            min_uncensored: 2,
        }
    }
}

fn unavailable(reason: impl Into<String>) -> WqError {
    WqError::ImputationUnavailable {
        reason: reason.into(),
    }
}

impl CensoredValueEstimator for RegressionOnOrderStatistics {
    fn estimate(&self, values: &[f64], censored: &[bool]) -> Result<Vec<f64>> {
        let n = values.len();
        if n != censored.len() {
            return Err(unavailable(format!(
                "{} values but {} censoring flags",
                n,
                censored.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(unavailable("non-finite value"));
        }
        let n_censored = censored.iter().filter(|&&c| c).count();
        if n_censored == 0 {
            return Ok(values.to_vec());
        }
        let n_detect = n - n_censored;
        if n_detect < self.min_uncensored {
            return Err(unavailable(format!(
                "{n_detect} detects, need at least {}",
                self.min_uncensored
            )));
        }
        let fraction = n_censored as f64 / n as f64;
        if fraction > self.max_fraction_censored {
            return Err(unavailable(format!(
                "censored fraction {fraction:.3} exceeds {}",
                self.max_fraction_censored
            )));
        }
        if values.iter().zip(censored).any(|(&v, &c)| !c && v <= 0.0) {
            return Err(unavailable("non-positive detect"));
        }

        let max_detect = values
            .iter()
            .zip(censored)
            .filter(|&(_, &c)| !c)
            .map(|(&v, _)| v)
            .fold(f64::NEG_INFINITY, f64::max);

        let mut out = values.to_vec();
        // Rows taking part in the fit; non-detects above every detect are set aside.
        let mut rows: Vec<usize> = Vec::with_capacity(n);
        for i in 0..n {
            if censored[i] && values[i] > max_detect {
                out[i] = 0.5 * values[i];
            } else {
                rows.push(i);
            }
        }

        let positions = plotting_positions(values, censored, &rows);

        let (xs, ys): (Vec<f64>, Vec<f64>) = rows
            .iter()
            .zip(&positions)
            .filter(|&(&i, _)| !censored[i])
            .map(|(&i, &pp)| (special::inverse_normal_cdf(pp), values[i].ln()))
            .unzip();
        if xs.iter().any(|z| !z.is_finite()) {
            return Err(unavailable("degenerate plotting position"));
        }
        let (slope, intercept) =
            least_squares_line(&xs, &ys).ok_or_else(|| unavailable("singular regression"))?;

        for (&i, &pp) in rows.iter().zip(&positions) {
            if censored[i] {
                out[i] = (intercept + slope * special::inverse_normal_cdf(pp)).exp();
            }
        }
        debug!("ros: imputed {n_censored} of {n} values (slope {slope:.4}, intercept {intercept:.4})");
        Ok(out)
    }
}

// Plotting position for each entry of `rows` (same order as `rows`).
fn plotting_positions(values: &[f64], censored: &[bool], rows: &[usize]) -> Vec<f64> {
    let cmp = |a: &usize, b: &usize| {
        values[*a]
            .partial_cmp(&values[*b])
            .unwrap_or(Ordering::Equal)
    };
    let mut nd_rows: Vec<usize> = rows.iter().copied().filter(|&i| censored[i]).collect();
    let mut det_rows: Vec<usize> = rows.iter().copied().filter(|&i| !censored[i]).collect();
    nd_rows.sort_by(cmp);
    det_rows.sort_by(cmp);

    let mut limits: Vec<f64> = nd_rows.iter().map(|&i| values[i]).collect();
    limits.dedup();
    let data_min = rows
        .iter()
        .map(|&i| values[i])
        .fold(f64::INFINITY, f64::min);
    if limits.first().is_some_and(|&lowest| data_min < lowest) {
        limits.insert(0, data_min);
    }
    let m = limits.len();

    let mut a = vec![0usize; m];
    let mut b = vec![0usize; m];
    let mut c = vec![0usize; m];
    for j in 0..m {
        let lo = limits[j];
        let hi = limits.get(j + 1).copied().unwrap_or(f64::INFINITY);
        for &i in rows {
            let v = values[i];
            if censored[i] {
                if v <= lo {
                    b[j] += 1;
                }
                if v == lo {
                    c[j] += 1;
                }
            } else if v < lo {
                b[j] += 1;
            } else if v < hi {
                a[j] += 1;
            }
        }
    }

    let mut pe = vec![0.0; m + 1];
    for j in (0..m).rev() {
        let denom = (a[j] + b[j]) as f64;
        pe[j] = if denom > 0.0 {
            pe[j + 1] + (1.0 - pe[j + 1]) * a[j] as f64 / denom
        } else {
            pe[j + 1]
        };
    }

    let band = |v: f64| limits.iter().rposition(|&l| l <= v).unwrap_or(0);

    let mut pp_by_row = vec![f64::NAN; values.len()];
    let mut nd_rank = vec![0usize; m];
    let mut nd_pp: Vec<f64> = Vec::with_capacity(nd_rows.len());
    for &i in &nd_rows {
        let k = band(values[i]);
        nd_rank[k] += 1;
        nd_pp.push((1.0 - pe[k]) * nd_rank[k] as f64 / (c[k] + 1) as f64);
    }
    // Non-detect positions are reassigned in ascending order of value.
    nd_pp.sort_by(|x, y| x.partial_cmp(y).unwrap_or(Ordering::Equal));
    for (&i, &pp) in nd_rows.iter().zip(&nd_pp) {
        pp_by_row[i] = pp;
    }

    let mut det_rank = vec![0usize; m];
    for &i in &det_rows {
        let k = band(values[i]);
        det_rank[k] += 1;
        pp_by_row[i] =
            (1.0 - pe[k]) + (pe[k] - pe[k + 1]) * det_rank[k] as f64 / (a[k] + 1) as f64;
    }

    rows.iter().map(|&i| pp_by_row[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats;
    use crate::testdata;

    #[test]
    fn reference_dataset() {
        let (values, censored) = testdata::reference_values();
        let out = RegressionOnOrderStatistics::default()
            .estimate(&values, &censored)
            .expect("should compute");
        assert_eq!(out.len(), 35);
        for (i, (&v, &c)) in values.iter().zip(&censored).enumerate() {
            if c {
                assert!(out[i] > 0.0 && out[i] <= v, "row {i}: {} vs DL {v}", out[i]);
            } else {
                assert_eq!(out[i], v, "detects are unchanged");
            }
        }
        let logs: Vec<f64> = out.iter().map(|v| v.ln()).collect();
        let geomean = stats::mean(&logs).expect("should compute").exp();
        assert!((geomean - 8.0817).abs() / 8.0817 < 0.05, "geomean = {geomean}");
        let mean = stats::mean(&out).expect("should compute");
        assert!((mean - 9.5937).abs() / 9.5937 < 0.01, "mean = {mean}");
    }

    #[test]
    fn no_censored_values_is_identity() {
        let v = [3.0, 1.0, 2.0];
        let out = RegressionOnOrderStatistics::default()
            .estimate(&v, &[false; 3])
            .expect("should compute");
        assert_eq!(out, v.to_vec());
    }

    #[test]
    fn too_few_detects() {
        let v = [1.0, 1.0, 1.0, 4.0];
        let c = [true, true, true, false];
        let err = RegressionOnOrderStatistics::default().estimate(&v, &c);
        assert!(matches!(err, Err(WqError::ImputationUnavailable { .. })));
    }

    #[test]
    fn too_much_censoring() {
        let v = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 3.0, 4.0];
        let c = [true, true, true, true, true, true, true, true, true, false, false];
        let est = RegressionOnOrderStatistics::default();
        assert!(est.estimate(&v, &c).is_err());
        let lenient = RegressionOnOrderStatistics {
            max_fraction_censored: 0.9,
            ..est
        };
        assert!(lenient.estimate(&v, &c).is_ok());
    }

    #[test]
    fn censored_above_max_detect_is_halved() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0, 10.0, 2.5];
        let c = [false, false, false, false, false, true, true];
        let out = RegressionOnOrderStatistics::default()
            .estimate(&v, &c)
            .expect("should compute");
        assert_eq!(out[5], 5.0);
        assert!(out[6] < 2.5);
    }

    #[test]
    fn length_mismatch() {
        assert!(RegressionOnOrderStatistics::default()
            .estimate(&[1.0, 2.0], &[false])
            .is_err());
    }

    #[test]
    fn lower_limits_impute_lower_values() {
        let v = [0.5, 1.0, 1.2, 2.0, 2.3, 3.1, 4.0, 5.5, 1.0, 3.0];
        let c = [false, false, false, false, false, false, false, false, true, true];
        let out = RegressionOnOrderStatistics::default()
            .estimate(&v, &c)
            .expect("should compute");
        assert!(out[8] < out[9], "{} !< {}", out[8], out[9]);
    }

    #[test]
    fn non_detect_positions_ascend_across_limits() {
        // Within-band positions: 1/9, 2/9, 3/9 at DL 1 and 2/9 at DL 3.
        let v = [5.0, 6.0, 7.0, 8.0, 9.0, 1.0, 1.0, 1.0, 3.0];
        let c = [false, false, false, false, false, true, true, true, true];
        let rows: Vec<usize> = (0..v.len()).collect();
        let pp = plotting_positions(&v, &c, &rows);
        for (got, want) in pp[5..].iter().zip([1.0 / 9.0, 2.0 / 9.0, 2.0 / 9.0, 3.0 / 9.0]) {
            assert!((got - want).abs() < 1e-12, "{got} != {want}");
        }
        assert!(pp[..5].windows(2).all(|w| w[0] < w[1]));
    }
}
