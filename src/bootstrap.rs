//! Bias-corrected and accelerated (BCA) bootstrap confidence intervals.
//!
//! # Algorithm
//!
//! 1. θ̂ = statistic(sample).
//! 2. Draw B resamples of size n with replacement; θ*ᵦ = statistic(resample).
//!    Resamples whose statistic is not finite are discarded.
//! 3. Bias correction z₀ = Φ⁻¹(#{θ*ᵦ < θ̂} / B).
//! 4. Acceleration from the jackknife replicates θ₍ᵢ₎:
//!    a = Σ(θ̄ − θ₍ᵢ₎)³ / (6 · (Σ(θ̄ − θ₍ᵢ₎)²)^{3/2}), and a = 0 when the
//!    denominator vanishes.
//! 5. For z = Φ⁻¹(α/2) and Φ⁻¹(1 − α/2) the adjusted percentile is
//!    Φ(z₀ + (z₀ + z) / (1 − a(z₀ + z))); the bounds are read from the sorted
//!    replicates by linear interpolation.
//!
//! If the adjusted percentiles are not finite the plain percentile interval
//! is used instead.
//!
//! # References
//!
//! Efron (1987). "Better bootstrap confidence intervals". JASA, 82(397),
//! 171–185.
//!
//! # Examples
//!
//! ```
//! use u_wqstats::bootstrap::BootstrapEngine;
//! use u_wqstats::stats;
//!
//! let data = [2.0, 4.2, 4.6, 5.6, 5.7, 5.9, 6.7, 6.8, 7.5, 8.6, 9.9, 11.3];
//! let engine = BootstrapEngine::with_seed(2000, 0.95, 42);
//! let r = engine.estimate(&data, |x| stats::mean(x).unwrap_or(f64::NAN));
//! assert!(r.lower < r.estimate && r.estimate < r.upper);
//! ```

use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::config::BootstrapConfig;
use crate::special;
use crate::stats;

/// Minimum share of resamples with a finite statistic.
const MIN_VALID_FRACTION: f64 = 0.5;

/// A point estimate with its confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapResult {
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
}

impl BootstrapResult {
    pub fn new(estimate: f64, lower: f64, upper: f64) -> Self {
        Self {
            estimate,
            lower,
            upper,
        }
    }

    /// Estimate with an undefined interval.
    pub fn undefined_interval(estimate: f64) -> Self {
        Self::new(estimate, f64::NAN, f64::NAN)
    }

    pub fn interval(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    /// Applies a monotone increasing transform to all three values.
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self::new(f(self.estimate), f(self.lower), f(self.upper))
    }
}

/// SplitMix64 hash of a base seed and a counter.
///
/// Gives every statistic its own reproducible stream from one base seed.
pub fn counter_rng_seed(base_seed: u64, counter: u64) -> u64 {
    let mut z = base_seed.wrapping_add(counter.wrapping_mul(0x9e37_79b9_7f4a_7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// BCA bootstrap runner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapEngine {
    n_iterations: usize,
    confidence: f64,
    seed: u64,
}

impl BootstrapEngine {
    /// Builds an engine from configuration. Without a configured seed a
    /// fresh one is drawn, so intervals differ from run to run.
    pub fn new(config: &BootstrapConfig) -> Self {
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        Self::with_seed(config.n_iterations, config.confidence, seed)
    }

    pub fn with_seed(n_iterations: usize, confidence: f64, seed: u64) -> Self {
        Self {
            n_iterations,
            confidence,
            seed,
        }
    }

    pub fn n_iterations(&self) -> usize {
        self.n_iterations
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Same settings, independent random stream keyed by `counter`.
    pub fn stream(&self, counter: u64) -> Self {
        Self {
            seed: counter_rng_seed(self.seed, counter),
            ..*self
        }
    }

    /// Runs the BCA bootstrap of `statistic` over `sample`.
    ///
    /// Never panics on degenerate input: an empty sample, a non-finite
    /// point estimate or too few finite resample statistics give
    /// `(θ̂, (NaN, NaN))`.
    pub fn estimate<F>(&self, sample: &[f64], statistic: F) -> BootstrapResult
    where
        F: Fn(&[f64]) -> f64,
    {
        let n = sample.len();
        let theta_hat = if n == 0 { f64::NAN } else { statistic(sample) };
        if n == 0 || !theta_hat.is_finite() || self.n_iterations == 0 {
            return BootstrapResult::undefined_interval(theta_hat);
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return BootstrapResult::undefined_interval(theta_hat);
        }

        let replicates = self.resample_statistics(sample, &statistic);
        let min_valid = ((self.n_iterations as f64 * MIN_VALID_FRACTION).ceil() as usize).max(2);
        if replicates.len() < min_valid {
            debug!(
                "bootstrap: {} of {} resamples valid, interval undefined",
                replicates.len(),
                self.n_iterations
            );
            return BootstrapResult::undefined_interval(theta_hat);
        }

        let sorted = stats::sorted(&replicates);
        let below = sorted.iter().filter(|&&t| t < theta_hat).count();
        let z0 = special::inverse_normal_cdf(below as f64 / sorted.len() as f64);
        let a = jackknife_acceleration(sample, &statistic);

        let alpha = 1.0 - self.confidence;
        let z_lo = special::inverse_normal_cdf(alpha / 2.0);
        let z_hi = special::inverse_normal_cdf(1.0 - alpha / 2.0);
        let adjust = |z: f64| special::standard_normal_cdf(z0 + (z0 + z) / (1.0 - a * (z0 + z)));
        let mut p_lo = adjust(z_lo);
        let mut p_hi = adjust(z_hi);

        if !p_lo.is_finite() || !p_hi.is_finite() {
            warn!(
                "bootstrap: BCA percentiles undefined (z0 = {z0}, a = {a}), using percentile interval"
            );
            p_lo = alpha / 2.0;
            p_hi = 1.0 - alpha / 2.0;
        }

        let lower = stats::percentile_sorted(&sorted, p_lo * 100.0).unwrap_or(f64::NAN);
        let upper = stats::percentile_sorted(&sorted, p_hi * 100.0).unwrap_or(f64::NAN);
        BootstrapResult::new(theta_hat, lower, upper)
    }

    // Finite resample statistics, in draw order.
    fn resample_statistics<F>(&self, sample: &[f64], statistic: &F) -> Vec<f64>
    where
        F: Fn(&[f64]) -> f64,
    {
        let n = sample.len();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        let mut buffer = vec![0.0; n];
        let mut out = Vec::with_capacity(self.n_iterations);
        for _ in 0..self.n_iterations {
            for slot in buffer.iter_mut() {
                *slot = sample[rng.random_range(0..n)];
            }
            let t = statistic(&buffer);
            if t.is_finite() {
                out.push(t);
            }
        }
        out
    }
}

/// Jackknife acceleration constant.
///
/// Returns 0 when fewer than two finite leave-one-out replicates exist or
/// when all replicates are equal.
pub fn jackknife_acceleration<F>(sample: &[f64], statistic: &F) -> f64
where
    F: Fn(&[f64]) -> f64,
{
    let n = sample.len();
    if n < 2 {
        return 0.0;
    }
    let mut buffer = Vec::with_capacity(n - 1);
    let thetas: Vec<f64> = (0..n)
        .map(|i| {
            buffer.clear();
            buffer.extend_from_slice(&sample[..i]);
            buffer.extend_from_slice(&sample[i + 1..]);
            statistic(&buffer)
        })
        .filter(|t| t.is_finite())
        .collect();
    if thetas.len() < 2 {
        return 0.0;
    }

    let mean = thetas.iter().sum::<f64>() / thetas.len() as f64;
    let num: f64 = thetas.iter().map(|&t| (mean - t).powi(3)).sum();
    let ss: f64 = thetas.iter().map(|&t| (mean - t).powi(2)).sum();
    let denom = 6.0 * ss.powf(1.5);
    if denom <= 0.0 || !denom.is_finite() {
        return 0.0;
    }
    num / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_stat(x: &[f64]) -> f64 {
        stats::mean(x).unwrap_or(f64::NAN)
    }

    #[test]
    fn mean_interval_brackets_estimate() {
        let data: Vec<f64> = (1..=40).map(|i| (i as f64).sqrt() * 3.0).collect();
        let engine = BootstrapEngine::with_seed(2000, 0.95, 11);
        let r = engine.estimate(&data, mean_stat);
        let m = mean_stat(&data);
        assert!((r.estimate - m).abs() < 1e-12);
        assert!(r.lower < m && m < r.upper, "{r:?}");
    }

    #[test]
    fn reproducible_with_seed() {
        let data = [1.0, 4.0, 2.0, 8.0, 5.0, 7.0, 3.0, 9.0];
        let engine = BootstrapEngine::with_seed(500, 0.95, 99);
        let a = engine.estimate(&data, mean_stat);
        let b = engine.estimate(&data, mean_stat);
        assert_eq!(a.lower.to_bits(), b.lower.to_bits());
        assert_eq!(a.upper.to_bits(), b.upper.to_bits());
    }

    #[test]
    fn streams_differ() {
        let engine = BootstrapEngine::with_seed(10, 0.95, 5);
        assert_ne!(engine.stream(1).seed(), engine.stream(2).seed());
        assert_eq!(engine.stream(1).seed(), engine.stream(1).seed());
    }

    #[test]
    fn zero_jackknife_variance_gives_zero_acceleration() {
        let data = [4.0; 12];
        assert_eq!(jackknife_acceleration(&data, &mean_stat), 0.0);
    }

    #[test]
    fn constant_data_collapses_interval() {
        let data = [4.0; 12];
        let engine = BootstrapEngine::with_seed(300, 0.95, 1);
        let r = engine.estimate(&data, mean_stat);
        assert_eq!(r.estimate, 4.0);
        assert_eq!(r.lower, 4.0);
        assert_eq!(r.upper, 4.0);
    }

    #[test]
    fn skewed_statistic_has_nonzero_acceleration() {
        let data = [1.0, 1.1, 1.2, 1.3, 1.5, 2.0, 3.0, 8.0, 20.0];
        let a = jackknife_acceleration(&data, &mean_stat);
        assert!(a.abs() > 1e-6, "a = {a}");
    }

    #[test]
    fn undefined_statistic_gives_nan_interval() {
        let data = [1.0, 2.0, 3.0];
        let engine = BootstrapEngine::with_seed(100, 0.95, 3);
        // defined on the full sample only
        let r = engine.estimate(&data, |x| if x == &data[..] { 2.0 } else { f64::NAN });
        assert_eq!(r.estimate, 2.0);
        assert!(r.lower.is_nan() && r.upper.is_nan());
    }

    #[test]
    fn empty_sample() {
        let engine = BootstrapEngine::with_seed(100, 0.95, 3);
        let r = engine.estimate(&[], mean_stat);
        assert!(r.estimate.is_nan() && r.lower.is_nan() && r.upper.is_nan());
    }

    #[test]
    fn degenerate_resamples_are_skipped() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let engine = BootstrapEngine::with_seed(400, 0.95, 8);
        let r = engine.estimate(&data, |x| stats::std_dev(x).unwrap_or(f64::NAN));
        assert!(r.lower.is_finite() && r.upper.is_finite());
        assert!(r.lower <= r.upper);
    }

    #[test]
    fn map_applies_to_all_values() {
        let r = BootstrapResult::new(0.0, -1.0, 1.0).map(f64::exp);
        assert!((r.estimate - 1.0).abs() < 1e-12);
        assert!((r.lower - (-1.0_f64).exp()).abs() < 1e-12);
        assert_eq!(r.interval(), (r.lower, r.upper));
    }
}
