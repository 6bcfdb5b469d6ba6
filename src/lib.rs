//! # u-wqstats
//!
//! Statistics for censored water-quality monitoring data: non-detect
//! imputation, BCA bootstrap confidence intervals, paired inflow/outflow
//! comparisons, and grouped analysis over whole studies.
//!
//! Results reported below a detection limit are kept as (limit, censored)
//! pairs. Summary statistics run on imputed values by default and fall back
//! to raw values when imputation is not possible.
//!
//! ## Modules
//!
//! - [`observation`]: One site's sample with lazily cached statistics
//! - [`comparison`]: Paired inflow/outflow comparison, Theil-Sen slopes
//! - [`collection`]: Grouping, wide statistic tables, site-to-site tests
//! - [`imputation`]: Regression on order statistics (ROS)
//! - [`bootstrap`]: Bias-corrected and accelerated (BCA) bootstrap
//! - [`testing`]: Rank, parametric and normality tests
//! - [`correlation`]: Spearman and Kendall rank correlation
//! - [`regression`]: Least squares and Theil-Sen lines
//! - [`stats`], [`special`]: Descriptive statistics and distribution functions
//! - [`cache`], [`config`], [`error`]: Supporting types
//!
//! ## Design Philosophy
//!
//! - **Lazy**: every statistic is computed on first access and memoized
//!   until the underlying data change
//! - **Reproducible**: a fixed seed gives identical bootstrap intervals
//! - **Research-backed**: algorithms cite their literature

pub mod bootstrap;
pub mod cache;
pub mod collection;
pub mod comparison;
pub mod config;
pub mod correlation;
pub mod error;
pub mod imputation;
pub mod observation;
pub mod regression;
pub mod special;
pub mod stats;
pub mod testing;

#[cfg(test)]
pub(crate) mod testdata;

pub use error::{Result, WqError};
