//! One site's measurements for one parameter.
//!
//! An [`ObservationSet`] owns the raw rows of a (site, parameter) group and
//! exposes descriptive statistics, bootstrap confidence intervals and
//! normality tests over its working sample. Every statistic is computed on
//! first read and memoized until a mutator changes the working sample.
//!
//! The working sample is the imputed sample when imputation is enabled and
//! the estimator succeeds; otherwise the raw values, with non-detects at
//! their detection limit.
//!
//! # Examples
//!
//! ```
//! use u_wqstats::config::{BootstrapConfig, ObservationConfig};
//! use u_wqstats::observation::{ObservationSet, RawObservation};
//!
//! let rows = vec![
//!     RawObservation::new("0", 2.0, "ND"),
//!     RawObservation::new("1", 4.5, "="),
//!     RawObservation::new("2", 6.1, "="),
//!     RawObservation::new("3", 3.3, "="),
//!     RawObservation::new("4", 8.0, "="),
//! ];
//! let cfg = ObservationConfig::default()
//!     .with_bootstrap(BootstrapConfig::default().with_iterations(500).with_seed(1));
//! let set = ObservationSet::new(rows, cfg);
//! assert_eq!(set.n(), 5);
//! assert_eq!(set.nd(), 1);
//! assert!((set.fraction_nd() - 0.2).abs() < 1e-12);
//! assert!(set.median().is_some());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::bootstrap::{BootstrapEngine, BootstrapResult};
use crate::cache::StatCache;
use crate::config::ObservationConfig;
use crate::imputation::{CensoredValueEstimator, RegressionOnOrderStatistics};
use crate::stats;
use crate::testing::{self, NormalityResult};

/// A single measurement. For a non-detect, `value` is the detection limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    /// Key shared with the matching row of another site.
    pub index: String,
    pub value: f64,
    pub qualifier: String,
}

impl RawObservation {
    pub fn new(index: impl Into<String>, value: f64, qualifier: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            value,
            qualifier: qualifier.into(),
        }
    }
}

/// Raw rows of one observation set.
pub type Sample = Vec<RawObservation>;

/// Role of a monitoring site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    #[default]
    Inflow,
    Outflow,
    Reference,
}

impl SiteType {
    /// Display category.
    pub fn label(&self) -> &'static str {
        match self {
            SiteType::Inflow => "Influent",
            SiteType::Outflow => "Effluent",
            SiteType::Reference => "Reference Flow",
        }
    }

    /// Recognises `"inflow"`, `"outflow"` and `"reference"` in any case.
    pub fn from_site_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "inflow" | "influent" => Some(SiteType::Inflow),
            "outflow" | "effluent" => Some(SiteType::Outflow),
            "reference" => Some(SiteType::Reference),
            _ => None,
        }
    }
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A measured quantity and its units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub units: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, units: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
        }
    }

    /// `"name (units)"`, or `"name, units"` with `use_comma`.
    pub fn paramunit(&self, use_comma: bool) -> String {
        if use_comma {
            format!("{}, {}", self.name, self.units)
        } else {
            format!("{} ({})", self.name, self.units)
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Space in which the sample looks closer to normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSpace {
    Normal,
    Lognormal,
}

impl AnalysisSpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisSpace::Normal => "normal",
            AnalysisSpace::Lognormal => "lognormal",
        }
    }
}

impl fmt::Display for AnalysisSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Stream counters, one per bootstrapped statistic.
const MEDIAN_STREAM: u64 = 1;
const MEAN_STREAM: u64 = 2;
const STD_STREAM: u64 = 3;
const LOGMEAN_STREAM: u64 = 4;
const LOGSTD_STREAM: u64 = 5;

fn mean_or_nan(x: &[f64]) -> f64 {
    stats::mean(x).unwrap_or(f64::NAN)
}

fn median_or_nan(x: &[f64]) -> f64 {
    stats::median(x).unwrap_or(f64::NAN)
}

fn population_std_or_nan(x: &[f64]) -> f64 {
    stats::population_std_dev(x).unwrap_or(f64::NAN)
}

/// Measurements of one parameter at one site.
pub struct ObservationSet {
    name: String,
    definition: BTreeMap<String, String>,
    config: ObservationConfig,
    rows: Sample,
    estimator: Rc<dyn CensoredValueEstimator>,
    engine: BootstrapEngine,
    generation: u64,
    cache: StatCache,
}

impl ObservationSet {
    /// Builds a set over `rows`, imputing with ROS when enabled.
    ///
    /// The bootstrap seed is fixed here: without a configured seed one is
    /// drawn once, so repeated reads of the same set stay reproducible.
    pub fn new(rows: Sample, config: ObservationConfig) -> Self {
        Self {
            name: config.site_type.label().to_string(),
            definition: BTreeMap::new(),
            engine: BootstrapEngine::new(&config.bootstrap),
            config,
            rows,
            estimator: Rc::new(RegressionOnOrderStatistics::default()),
            generation: 0,
            cache: StatCache::new(),
        }
    }

    /// Replaces the censored-value estimator.
    pub fn with_estimator(mut self, estimator: Rc<dyn CensoredValueEstimator>) -> Self {
        self.estimator = estimator;
        self.touch();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_definition(mut self, definition: BTreeMap<String, String>) -> Self {
        self.definition = definition;
        self
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Key/value labels distinguishing this set inside a collection.
    pub fn definition(&self) -> &BTreeMap<String, String> {
        &self.definition
    }

    pub fn set_definition(&mut self, definition: BTreeMap<String, String>) {
        self.definition = definition;
    }

    pub fn site_type(&self) -> SiteType {
        self.config.site_type
    }

    pub fn config(&self) -> &ObservationConfig {
        &self.config
    }

    pub fn include(&self) -> bool {
        self.config.include
    }

    pub fn exclude(&self) -> bool {
        !self.config.include
    }

    pub fn use_imputation(&self) -> bool {
        self.config.use_imputation
    }

    /// Bumped by every mutation of the working sample.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // -----------------------------------------------------------------------
    // Mutators
    // -----------------------------------------------------------------------

    fn touch(&mut self) {
        self.cache.invalidate();
        self.generation += 1;
    }

    /// Switches between the imputed and the raw working sample.
    pub fn set_use_imputation(&mut self, use_imputation: bool) {
        self.config.use_imputation = use_imputation;
        self.touch();
    }

    pub fn set_include(&mut self, include: bool) {
        self.config.include = include;
        self.touch();
    }

    /// Replaces the raw rows.
    pub fn replace_data(&mut self, rows: Sample) {
        self.rows = rows;
        self.touch();
    }

    /// Applies `filter` to the raw rows and adopts its result.
    ///
    /// `filter` returns the new rows and the new inclusion flag. The rows
    /// may drop, reorder or rewrite the input (a unit rescale, clipping).
    pub fn apply_filter<F>(&mut self, filter: F)
    where
        F: FnOnce(&[RawObservation]) -> (Sample, bool),
    {
        let (subset, include) = filter(&self.rows);
        debug!(
            "{}: filter kept {} of {} rows, include = {include}",
            self.name,
            subset.len(),
            self.rows.len()
        );
        self.rows = subset;
        self.config.include = include;
        self.touch();
    }

    // -----------------------------------------------------------------------
    // Samples
    // -----------------------------------------------------------------------

    /// The raw rows.
    pub fn raw_data(&self) -> &[RawObservation] {
        &self.rows
    }

    /// Non-detect flag per raw row.
    pub fn censored(&self) -> Vec<bool> {
        self.rows
            .iter()
            .map(|r| self.config.is_non_detect(&r.qualifier))
            .collect()
    }

    /// The working sample, in raw row order.
    pub fn data(&self) -> Rc<[f64]> {
        self.cache
            .get_or_insert_with("data", || self.working_sample().into())
    }

    fn working_sample(&self) -> Vec<f64> {
        let values: Vec<f64> = self.rows.iter().map(|r| r.value).collect();
        if !self.config.use_imputation || values.is_empty() {
            return values;
        }
        let censored = self.censored();
        if !censored.contains(&true) {
            return values;
        }
        debug!(
            "{}: imputing {} non-detects",
            self.name,
            censored.iter().filter(|&&c| c).count()
        );
        match self.estimator.estimate(&values, &censored) {
            Ok(imputed) => imputed,
            Err(e) => {
                warn!("{}: {e}; falling back to raw values", self.name);
                values
            }
        }
    }

    /// Natural logs of the working sample, when all values are positive.
    pub fn log_data(&self) -> Option<Rc<[f64]>> {
        self.cache.get_or_insert_with("log_data", || {
            if !self.all_positive() {
                return None;
            }
            Some(self.data().iter().map(|v| v.ln()).collect())
        })
    }

    // -----------------------------------------------------------------------
    // Counts
    // -----------------------------------------------------------------------

    pub fn n(&self) -> usize {
        self.rows.len()
    }

    /// Number of non-detects.
    pub fn nd(&self) -> usize {
        self.cache
            .get_or_insert_with("ND", || self.censored().iter().filter(|&&c| c).count())
    }

    /// `nd / n`; NaN for an empty set.
    pub fn fraction_nd(&self) -> f64 {
        self.cache.get_or_insert_with("fractionND", || {
            if self.rows.is_empty() {
                f64::NAN
            } else {
                self.nd() as f64 / self.n() as f64
            }
        })
    }

    /// Distinct raw values.
    pub fn n_unique(&self) -> usize {
        self.cache.get_or_insert_with("NUnique", || {
            let values: Vec<f64> = self.rows.iter().map(|r| r.value).collect();
            stats::count_unique(&values)
        })
    }

    pub fn has_data(&self) -> bool {
        !self.rows.is_empty()
    }

    /// True when the smallest working value is positive.
    pub fn all_positive(&self) -> bool {
        self.cache
            .get_or_insert_with("all_positive", || self.min().is_some_and(|m| m > 0.0))
    }

    // -----------------------------------------------------------------------
    // Descriptive statistics
    // -----------------------------------------------------------------------

    pub fn min(&self) -> Option<f64> {
        self.cache
            .get_or_insert_with("min", || stats::min(&self.data()))
    }

    pub fn max(&self) -> Option<f64> {
        self.cache
            .get_or_insert_with("max", || stats::max(&self.data()))
    }

    /// Smallest raw detected value.
    pub fn min_detect(&self) -> Option<f64> {
        self.cache
            .get_or_insert_with("min_detect", || self.raw_min(false))
    }

    /// Smallest detection limit.
    pub fn min_dl(&self) -> Option<f64> {
        self.cache
            .get_or_insert_with("min_DL", || self.raw_min(true))
    }

    fn raw_min(&self, censored: bool) -> Option<f64> {
        let values: Vec<f64> = self
            .rows
            .iter()
            .filter(|r| self.config.is_non_detect(&r.qualifier) == censored)
            .map(|r| r.value)
            .collect();
        stats::min(&values)
    }

    pub fn pctl10(&self) -> Option<f64> {
        self.cache
            .get_or_insert_with("pctl10", || stats::percentile(&self.data(), 10.0))
    }

    pub fn pctl25(&self) -> Option<f64> {
        self.cache
            .get_or_insert_with("pctl25", || stats::percentile(&self.data(), 25.0))
    }

    pub fn pctl75(&self) -> Option<f64> {
        self.cache
            .get_or_insert_with("pctl75", || stats::percentile(&self.data(), 75.0))
    }

    pub fn pctl90(&self) -> Option<f64> {
        self.cache
            .get_or_insert_with("pctl90", || stats::percentile(&self.data(), 90.0))
    }

    /// Biased sample skewness.
    pub fn skew(&self) -> Option<f64> {
        self.cache
            .get_or_insert_with("skew", || stats::skewness(&self.data()))
    }

    /// Population standard deviation over the mean.
    pub fn cov(&self) -> Option<f64> {
        self.cache.get_or_insert_with("cov", || {
            let data = self.data();
            Some(stats::population_std_dev(&data)? / stats::mean(&data)?)
        })
    }

    // -----------------------------------------------------------------------
    // Bootstrapped statistics
    // -----------------------------------------------------------------------

    fn bootstrap(&self, stream: u64, sample: &[f64], statistic: fn(&[f64]) -> f64) -> BootstrapResult {
        debug!(
            "{}: bootstrapping stream {stream} over {} values ({} iterations)",
            self.name,
            sample.len(),
            self.engine.n_iterations()
        );
        self.engine.stream(stream).estimate(sample, statistic)
    }

    pub fn median(&self) -> Option<BootstrapResult> {
        self.cache.get_or_insert_with("median", || {
            self.has_data()
                .then(|| self.bootstrap(MEDIAN_STREAM, &self.data(), median_or_nan))
        })
    }

    pub fn mean(&self) -> Option<BootstrapResult> {
        self.cache.get_or_insert_with("mean", || {
            self.has_data()
                .then(|| self.bootstrap(MEAN_STREAM, &self.data(), mean_or_nan))
        })
    }

    /// Population standard deviation with its interval.
    pub fn std(&self) -> Option<BootstrapResult> {
        self.cache.get_or_insert_with("std", || {
            self.has_data()
                .then(|| self.bootstrap(STD_STREAM, &self.data(), population_std_or_nan))
        })
    }

    /// Mean of the log sample.
    pub fn logmean(&self) -> Option<BootstrapResult> {
        self.cache.get_or_insert_with("logmean", || {
            let logs = self.log_data()?;
            Some(self.bootstrap(LOGMEAN_STREAM, &logs, mean_or_nan))
        })
    }

    /// Population standard deviation of the log sample.
    pub fn logstd(&self) -> Option<BootstrapResult> {
        self.cache.get_or_insert_with("logstd", || {
            let logs = self.log_data()?;
            Some(self.bootstrap(LOGSTD_STREAM, &logs, population_std_or_nan))
        })
    }

    pub fn geomean(&self) -> Option<BootstrapResult> {
        self.logmean().map(|r| r.map(f64::exp))
    }

    pub fn geostd(&self) -> Option<BootstrapResult> {
        self.logstd().map(|r| r.map(f64::exp))
    }

    // -----------------------------------------------------------------------
    // Normality
    // -----------------------------------------------------------------------

    pub fn shapiro(&self) -> Option<NormalityResult> {
        self.cache
            .get_or_insert_with("shapiro", || testing::shapiro_wilk_test(&self.data()))
    }

    pub fn shapiro_log(&self) -> Option<NormalityResult> {
        self.cache.get_or_insert_with("shapiro_log", || {
            testing::shapiro_wilk_test(&self.log_data()?)
        })
    }

    pub fn lilliefors(&self) -> Option<NormalityResult> {
        self.cache
            .get_or_insert_with("lilliefors", || testing::lilliefors_test(&self.data()))
    }

    pub fn lilliefors_log(&self) -> Option<NormalityResult> {
        self.cache.get_or_insert_with("lilliefors_log", || {
            testing::lilliefors_test(&self.log_data()?)
        })
    }

    pub fn anderson(&self) -> Option<NormalityResult> {
        self.cache
            .get_or_insert_with("anderson", || testing::anderson_darling_test(&self.data()))
    }

    pub fn anderson_log(&self) -> Option<NormalityResult> {
        self.cache.get_or_insert_with("anderson_log", || {
            testing::anderson_darling_test(&self.log_data()?)
        })
    }

    /// Shapiro-Wilk p-value of the working sample.
    pub fn pnorm(&self) -> Option<f64> {
        self.shapiro().map(|r| r.p_value)
    }

    /// Shapiro-Wilk p-value of the log sample.
    pub fn plognorm(&self) -> Option<f64> {
        self.shapiro_log().map(|r| r.p_value)
    }

    /// Lognormal when the log-space p-value is at least the linear one and
    /// above 0.1.
    pub fn analysis_space(&self) -> AnalysisSpace {
        match (self.pnorm(), self.plognorm()) {
            (Some(pn), Some(pl)) if pl >= pn && pl > 0.1 => AnalysisSpace::Lognormal,
            (None, Some(pl)) if pl > 0.1 => AnalysisSpace::Lognormal,
            _ => AnalysisSpace::Normal,
        }
    }
}

impl fmt::Debug for ObservationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationSet")
            .field("name", &self.name)
            .field("definition", &self.definition)
            .field("site_type", &self.config.site_type)
            .field("n", &self.rows.len())
            .field("use_imputation", &self.config.use_imputation)
            .field("include", &self.config.include)
            .field("generation", &self.generation)
            .field("cache", &self.cache)
            .finish()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::config::BootstrapConfig;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn count_invariants_hold(
            rows in proptest::collection::vec((0.1_f64..100.0, proptest::bool::ANY), 1..=30)
        ) {
            let sample: Sample = rows
                .iter()
                .enumerate()
                .map(|(i, &(v, nd))| RawObservation::new(i.to_string(), v, if nd { "ND" } else { "=" }))
                .collect();
            let cfg = ObservationConfig::default()
                .with_bootstrap(BootstrapConfig::default().with_iterations(50).with_seed(3));
            let set = ObservationSet::new(sample, cfg);
            prop_assert!(set.nd() <= set.n());
            prop_assert_eq!(set.fraction_nd(), set.nd() as f64 / set.n() as f64);
            prop_assert!(set.n_unique() <= set.n());
            prop_assert_eq!(set.data().len(), set.n());
        }
    }
}
