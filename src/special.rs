//! Distribution functions used by the tests and the bootstrap.
//!
//! Thin wrappers over `statrs` that never panic: arguments outside the
//! domain of a distribution yield `NaN` instead.

use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal, StudentsT};

/// Φ(z), the standard normal CDF.
pub fn standard_normal_cdf(z: f64) -> f64 {
    if z.is_nan() {
        return f64::NAN;
    }
    Normal::standard().cdf(z)
}

/// 1 − Φ(z), computed without cancellation in the upper tail.
pub fn standard_normal_sf(z: f64) -> f64 {
    if z.is_nan() {
        return f64::NAN;
    }
    Normal::standard().sf(z)
}

/// Φ⁻¹(p). Returns ±∞ at the endpoints and `NaN` outside [0, 1].
pub fn inverse_normal_cdf(p: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    Normal::standard().inverse_cdf(p)
}

/// CDF of Student's t with `df` degrees of freedom.
pub fn t_distribution_cdf(t: f64, df: f64) -> f64 {
    if t.is_nan() {
        return f64::NAN;
    }
    StudentsT::new(0.0, 1.0, df)
        .map(|d| d.cdf(t))
        .unwrap_or(f64::NAN)
}

/// CDF of the F distribution with (`d1`, `d2`) degrees of freedom.
pub fn f_distribution_cdf(f: f64, d1: f64, d2: f64) -> f64 {
    if f.is_nan() {
        return f64::NAN;
    }
    FisherSnedecor::new(d1, d2)
        .map(|d| d.cdf(f))
        .unwrap_or(f64::NAN)
}

/// CDF of the chi-squared distribution with `df` degrees of freedom.
pub fn chi_squared_cdf(x: f64, df: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    ChiSquared::new(df).map(|d| d.cdf(x)).unwrap_or(f64::NAN)
}
