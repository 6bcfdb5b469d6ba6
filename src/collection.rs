//! Grouped analysis over a whole monitoring table.
//!
//! A [`Collection`] holds every record of a study and groups them by site,
//! parameter and any extra grouping labels. From those groups it builds
//! [`ObservationSet`]s, [`PairedComparison`]s between two named sites, wide
//! tables of per-group statistics, and records of two-way and all-way
//! hypothesis tests between sites.
//!
//! Groups are tidied once: filtered by the group predicate, flagged for
//! non-detects, keyed for pairing and, when enabled, imputed. The tidy
//! groups, the locations, the datasets of each site pair and the summary
//! tables are memoized until the predicate is replaced.
//!
//! # Examples
//!
//! ```
//! use u_wqstats::collection::{Collection, Record};
//! use u_wqstats::config::{BootstrapConfig, CollectionConfig};
//!
//! let mut records = Vec::new();
//! for (i, v) in [3.1, 4.7, 2.2, 5.9, 4.1, 3.8].iter().enumerate() {
//!     for (site, scale) in [("inflow", 1.0), ("outflow", 0.4)] {
//!         records.push(
//!             Record::new(v * scale + i as f64 * 0.01, "=")
//!                 .with_label("station", site)
//!                 .with_label("parameter", "TSS"),
//!         );
//!     }
//! }
//! let cfg = CollectionConfig::default()
//!     .with_bootstrap(BootstrapConfig::default().with_iterations(200).with_seed(1));
//! let collection = Collection::new(records, cfg).unwrap();
//!
//! assert_eq!(collection.locations().len(), 2);
//! let counts = collection.count();
//! assert_eq!(counts.get(&["TSS"], "inflow"), Some(&6));
//! let mw = collection.mann_whitney();
//! assert_eq!(mw.len(), 1);
//! assert!(mw[0].p_value.unwrap() < 0.05);
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::bootstrap::{counter_rng_seed, BootstrapEngine, BootstrapResult};
use crate::cache::StatCache;
use crate::comparison::{PairedComparison, SharedObservationSet};
use crate::config::CollectionConfig;
use crate::correlation;
use crate::error::{Result, WqError};
use crate::imputation::{CensoredValueEstimator, RegressionOnOrderStatistics};
use crate::observation::{ObservationSet, RawObservation, Sample, SiteType};
use crate::stats;
use crate::testing::{self, NormalityResult};

/// One row of the monitoring table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Grouping labels keyed by column name.
    pub labels: BTreeMap<String, String>,
    /// Result; the detection limit for a non-detect.
    pub value: f64,
    pub qualifier: String,
}

impl Record {
    pub fn new(value: f64, qualifier: impl Into<String>) -> Self {
        Self {
            labels: BTreeMap::new(),
            value,
            qualifier: qualifier.into(),
        }
    }

    pub fn with_label(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(column.into(), value.into());
        self
    }

    pub fn label(&self, column: &str) -> Option<&str> {
        self.labels.get(column).map(String::as_str)
    }
}

/// Predicate deciding whether a whole group takes part in the analysis.
pub type GroupFilter = Box<dyn Fn(&[Record]) -> bool>;

/// Selection condition on one definition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Is(String),
    OneOf(Vec<String>),
}

impl Condition {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Condition::Is(v) => v == value,
            Condition::OneOf(vs) => vs.iter().any(|v| v == value),
        }
    }
}

impl From<&str> for Condition {
    fn from(value: &str) -> Self {
        Condition::Is(value.to_string())
    }
}

impl<const N: usize> From<[&str; N]> for Condition {
    fn from(values: [&str; N]) -> Self {
        Condition::OneOf(values.iter().map(|v| v.to_string()).collect())
    }
}

fn definition_matches(definition: &BTreeMap<String, String>, conditions: &[(&str, Condition)]) -> bool {
    conditions.iter().all(|(key, cond)| {
        definition
            .get(*key)
            .is_some_and(|value| cond.matches(value))
    })
}

/// Wide table: one row per comparison group, one column per site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatTable<T> {
    /// Names of the row-key columns (parameter, then other groups).
    pub index_columns: Vec<String>,
    /// Every site present, sorted.
    pub sites: Vec<String>,
    pub rows: BTreeMap<Vec<String>, BTreeMap<String, T>>,
}

impl<T> StatTable<T> {
    fn new(index_columns: Vec<String>) -> Self {
        Self {
            index_columns,
            sites: Vec::new(),
            rows: BTreeMap::new(),
        }
    }

    fn insert(&mut self, key: Vec<String>, site: String, value: T) {
        if let Err(pos) = self.sites.binary_search(&site) {
            self.sites.insert(pos, site.clone());
        }
        self.rows.entry(key).or_default().insert(site, value);
    }

    /// Cell for a row key and a site.
    pub fn get(&self, key: &[&str], site: &str) -> Option<&T> {
        let key: Vec<String> = key.iter().map(|s| s.to_string()).collect();
        self.rows.get(&key)?.get(site)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every filled cell as (row key, site, value).
    pub fn cells(&self) -> impl Iterator<Item = (&[String], &str, &T)> {
        self.rows.iter().flat_map(|(key, row)| {
            row.iter()
                .map(move |(site, v)| (key.as_slice(), site.as_str(), v))
        })
    }

    pub fn map<U>(self, f: impl Fn(T) -> U) -> StatTable<U> {
        StatTable {
            index_columns: self.index_columns,
            sites: self.sites,
            rows: self
                .rows
                .into_iter()
                .map(|(key, row)| (key, row.into_iter().map(|(s, v)| (s, f(v))).collect()))
                .collect(),
        }
    }
}

/// Row and non-detect counts of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub count: usize,
    pub non_detect: usize,
}

/// Result of a test between two sites within one comparison group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub key: Vec<String>,
    pub site_1: String,
    pub site_2: String,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
}

/// Result of a test across all sites of one comparison group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllwayRecord {
    pub key: Vec<String>,
    pub sites: Vec<String>,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
}

/// One (site, parameter, other groups) group after filtering and imputation.
#[derive(Debug, Clone)]
struct TidyGroup {
    site: String,
    /// Parameter then other-group labels.
    key: Vec<String>,
    rows: Vec<RawObservation>,
    censored: Vec<bool>,
    /// Working values: imputed when enabled, raw otherwise.
    values: Vec<f64>,
}

impl TidyGroup {
    fn raw(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.value).collect()
    }
}

fn exactly_equal(x: &[f64], y: &[f64]) -> bool {
    x.len() == y.len() && x.iter().zip(y).all(|(a, b)| a == b)
}

fn log_values(x: &[f64]) -> Vec<f64> {
    x.iter().map(|v| v.ln()).collect()
}

/// Per-group summary: inventory plus descriptive statistics of the
/// working values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatSummary {
    pub count: usize,
    pub non_detect: usize,
    pub mean: f64,
    /// Sample standard deviation (n − 1).
    pub std_dev: f64,
    pub min: f64,
    /// `(fraction, value)` in request order.
    pub percentiles: Vec<(f64, f64)>,
    pub max: f64,
}

/// Percentiles (as fractions) reported by [`Collection::stat_summary`]
/// when none are given.
pub const DEFAULT_SUMMARY_PERCENTILES: [f64; 5] = [0.1, 0.25, 0.5, 0.75, 0.9];

/// Memoized comparisons of one site against another.
pub type DatasetList = Rc<[Rc<PairedComparison>]>;

/// A study's full table with its grouping.
pub struct Collection {
    config: CollectionConfig,
    records: Vec<Record>,
    filter: Option<GroupFilter>,
    estimator: Rc<dyn CensoredValueEstimator>,
    cache: StatCache,
    datasets: RefCell<HashMap<(String, String), DatasetList>>,
}

impl Collection {
    /// Fails with [`WqError::MissingColumn`] when a record lacks a grouping
    /// or pairing label.
    pub fn new(records: Vec<Record>, config: CollectionConfig) -> Result<Self> {
        let mut required = config.group_columns();
        required.extend(config.pair_groups.iter().cloned());
        for record in &records {
            if let Some(missing) = required.iter().find(|c| record.label(c).is_none()) {
                return Err(WqError::MissingColumn(missing.clone()));
            }
        }
        Ok(Self {
            config,
            records,
            filter: None,
            estimator: Rc::new(RegressionOnOrderStatistics::default()),
            cache: StatCache::new(),
            datasets: RefCell::new(HashMap::new()),
        })
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&[Record]) -> bool + 'static,
    {
        self.set_filter(filter);
        self
    }

    /// Replaces the group predicate and drops everything derived from it.
    pub fn set_filter<F>(&mut self, filter: F)
    where
        F: Fn(&[Record]) -> bool + 'static,
    {
        self.filter = Some(Box::new(filter));
        self.invalidate();
    }

    /// Removes the group predicate.
    pub fn clear_filter(&mut self) {
        self.filter = None;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.cache.invalidate();
        self.datasets.get_mut().clear();
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    fn label<'a>(&self, record: &'a Record, column: &str) -> &'a str {
        record.label(column).unwrap_or_default()
    }

    fn pair_key(&self, record: &Record, ordinal: usize) -> String {
        if self.config.pair_groups.is_empty() {
            ordinal.to_string()
        } else {
            self.config
                .pair_groups
                .iter()
                .map(|c| self.label(record, c))
                .collect::<Vec<_>>()
                .join("/")
        }
    }

    // -----------------------------------------------------------------------
    // Tidy groups
    // -----------------------------------------------------------------------

    fn tidy(&self) -> Rc<[TidyGroup]> {
        self.cache.get_or_insert_with("tidy", || self.build_tidy().into())
    }

    fn build_tidy(&self) -> Vec<TidyGroup> {
        let group_columns = self.config.group_columns();
        let mut groups: BTreeMap<Vec<String>, Vec<Record>> = BTreeMap::new();
        for record in &self.records {
            let key = group_columns
                .iter()
                .map(|c| self.label(record, c).to_string())
                .collect();
            groups.entry(key).or_default().push(record.clone());
        }

        let total = groups.len();
        let mut out = Vec::with_capacity(total);
        for (mut key, records) in groups {
            if let Some(filter) = &self.filter {
                if !filter(&records) {
                    trace!("group {key:?} removed by filter");
                    continue;
                }
            }
            let site = key.remove(0);
            let rows: Vec<RawObservation> = records
                .iter()
                .enumerate()
                .map(|(i, r)| RawObservation::new(self.pair_key(r, i), r.value, r.qualifier.clone()))
                .collect();
            let censored: Vec<bool> = records
                .iter()
                .map(|r| self.config.is_non_detect(&r.qualifier))
                .collect();
            let values = self.working_values(&site, &key, &rows, &censored);
            trace!("group {site} {key:?}: {} rows", rows.len());
            out.push(TidyGroup {
                site,
                key,
                rows,
                censored,
                values,
            });
        }
        debug!("tidied {} of {total} groups", out.len());
        out
    }

    fn working_values(&self, site: &str, key: &[String], rows: &[RawObservation], censored: &[bool]) -> Vec<f64> {
        let raw: Vec<f64> = rows.iter().map(|r| r.value).collect();
        if !self.config.use_imputation || !censored.contains(&true) {
            return raw;
        }
        match self.estimator.estimate(&raw, censored) {
            Ok(v) => v,
            Err(e) => {
                warn!("group {site} {key:?}: {e}; using raw values");
                raw
            }
        }
    }

    // Tidy groups of one comparison key, keyed by site.
    fn by_comparison_key(&self) -> BTreeMap<Vec<String>, BTreeMap<String, TidyGroup>> {
        let mut out: BTreeMap<Vec<String>, BTreeMap<String, TidyGroup>> = BTreeMap::new();
        for g in self.tidy().iter() {
            out.entry(g.key.clone())
                .or_default()
                .insert(g.site.clone(), g.clone());
        }
        out
    }

    // -----------------------------------------------------------------------
    // Locations and datasets
    // -----------------------------------------------------------------------

    fn observation_set(&self, site: &str, key: &[String], rows: Sample, stream: u64) -> ObservationSet {
        let site_type = SiteType::from_site_name(site).unwrap_or_default();
        let mut config = self.config.observation_config(site_type);
        if let Some(seed) = config.bootstrap.seed {
            config.bootstrap.seed = Some(counter_rng_seed(seed, stream));
        }
        let labels = std::iter::once(site).chain(key.iter().map(String::as_str));
        let definition = self
            .config
            .group_columns()
            .into_iter()
            .zip(labels.map(str::to_string))
            .collect();
        ObservationSet::new(rows, config)
            .with_estimator(Rc::clone(&self.estimator))
            .with_name(site)
            .with_definition(definition)
    }

    /// One observation set per (site, parameter, other groups), in sorted
    /// group order.
    pub fn locations(&self) -> Rc<[SharedObservationSet]> {
        self.cache.get_or_insert_with("locations", || {
            self.tidy()
                .iter()
                .enumerate()
                .map(|(i, g)| {
                    let set = self.observation_set(&g.site, &g.key, g.rows.clone(), i as u64);
                    Rc::new(RefCell::new(set))
                })
                .collect()
        })
    }

    /// Locations whose definition meets every condition.
    pub fn select_locations(&self, conditions: &[(&str, Condition)]) -> Vec<SharedObservationSet> {
        self.locations()
            .iter()
            .filter(|loc| definition_matches(loc.borrow().definition(), conditions))
            .cloned()
            .collect()
    }

    /// One comparison per parameter/other-groups combination where
    /// `site_2` has data, memoized per site pair until the filter changes.
    ///
    /// The comparisons share the memoized locations. A group without
    /// `site_1` data is compared against an empty set, so only its
    /// unpaired gates fail.
    pub fn datasets(&self, site_1: &str, site_2: &str) -> Result<DatasetList> {
        for site in [site_1, site_2] {
            if !self.records.iter().any(|r| self.label(r, &self.config.site_column) == site) {
                return Err(WqError::UnknownSite(site.to_string()));
            }
        }
        let memo_key = (site_1.to_string(), site_2.to_string());
        if let Some(list) = self.datasets.borrow().get(&memo_key) {
            return Ok(Rc::clone(list));
        }

        let list = self.build_datasets(site_1, site_2);
        debug!("{} datasets for {site_1} / {site_2}", list.len());
        self.datasets.borrow_mut().insert(memo_key, Rc::clone(&list));
        Ok(list)
    }

    fn build_datasets(&self, site_1: &str, site_2: &str) -> DatasetList {
        let locations = self.locations();
        let mut by_key: BTreeMap<Vec<String>, (Option<SharedObservationSet>, Option<SharedObservationSet>)> =
            BTreeMap::new();
        for (loc, g) in locations.iter().zip(self.tidy().iter()) {
            let slot = by_key.entry(g.key.clone()).or_default();
            if g.site == site_1 {
                slot.0 = Some(Rc::clone(loc));
            } else if g.site == site_2 {
                slot.1 = Some(Rc::clone(loc));
            }
        }

        let comparison_columns = self.config.comparison_columns();
        by_key
            .into_iter()
            .filter_map(|(key, (influent, effluent))| {
                let effluent = effluent?;
                let influent = influent.unwrap_or_else(|| {
                    trace!("no {site_1} data in {key:?}");
                    let empty = self.observation_set(site_1, &key, Sample::new(), 0);
                    Rc::new(RefCell::new(empty))
                });
                let definition = comparison_columns.iter().cloned().zip(key.iter().cloned()).collect();
                Some(Rc::new(
                    PairedComparison::new(influent, effluent)
                        .with_name(key.join("_"))
                        .with_definition(definition),
                ))
            })
            .collect()
    }

    /// Datasets whose definition meets every condition.
    pub fn select_datasets(
        &self,
        site_1: &str,
        site_2: &str,
        conditions: &[(&str, Condition)],
    ) -> Result<Vec<Rc<PairedComparison>>> {
        Ok(self
            .datasets(site_1, site_2)?
            .iter()
            .filter(|ds| definition_matches(ds.definition(), conditions))
            .cloned()
            .collect())
    }

    // -----------------------------------------------------------------------
    // Per-group statistics
    // -----------------------------------------------------------------------

    fn group_stat<T, F>(&self, f: F) -> StatTable<T>
    where
        F: Fn(&TidyGroup) -> T,
    {
        let mut table = StatTable::new(self.config.comparison_columns());
        for g in self.tidy().iter() {
            table.insert(g.key.clone(), g.site.clone(), f(g));
        }
        table
    }

    /// Applies `statistic` to every group's working values.
    ///
    /// With `use_bootstrap` each group gets a BCA interval from its own
    /// random stream; otherwise the interval is undefined.
    pub fn generic_stat<F>(&self, statistic: F, use_bootstrap: bool) -> StatTable<BootstrapResult>
    where
        F: Fn(&[f64]) -> f64,
    {
        let engine = BootstrapEngine::new(&self.config.bootstrap);
        let mut table = StatTable::new(self.config.comparison_columns());
        for (i, g) in self.tidy().iter().enumerate() {
            let result = if use_bootstrap {
                trace!("bootstrapping group {} {:?}", g.site, g.key);
                engine.stream(i as u64).estimate(&g.values, &statistic)
            } else {
                BootstrapResult::undefined_interval(statistic(&g.values))
            };
            table.insert(g.key.clone(), g.site.clone(), result);
        }
        table
    }

    pub fn count(&self) -> StatTable<usize> {
        self.cache
            .get_or_insert_with("count", || self.group_stat(|g| g.rows.len()))
    }

    pub fn inventory(&self) -> StatTable<Inventory> {
        self.cache.get_or_insert_with("inventory", || {
            self.group_stat(|g| Inventory {
                count: g.rows.len(),
                non_detect: g.censored.iter().filter(|&&c| c).count(),
            })
        })
    }

    /// Distinct values of `column` within each group of the unfiltered
    /// table.
    pub fn n_unique(&self, column: &str) -> Result<StatTable<usize>> {
        let group_columns = self.config.group_columns();
        let mut seen: BTreeMap<Vec<String>, BTreeSet<&str>> = BTreeMap::new();
        for record in &self.records {
            let value = record
                .label(column)
                .ok_or_else(|| WqError::MissingColumn(column.to_string()))?;
            let key = group_columns
                .iter()
                .map(|c| self.label(record, c).to_string())
                .collect();
            seen.entry(key).or_default().insert(value);
        }
        let mut table = StatTable::new(self.config.comparison_columns());
        for (mut key, values) in seen {
            let site = key.remove(0);
            table.insert(key, site, values.len());
        }
        Ok(table)
    }

    /// Inventory joined with mean, standard deviation, extremes and the
    /// given percentiles (fractions in [0, 1]) of each group's working
    /// values. `None` reports [`DEFAULT_SUMMARY_PERCENTILES`].
    pub fn stat_summary(&self, percentiles: Option<&[f64]>) -> StatTable<StatSummary> {
        let fractions = percentiles.unwrap_or(&DEFAULT_SUMMARY_PERCENTILES[..]);
        let inventory = self.inventory();
        self.group_stat(|g| {
            let inv = inventory
                .rows
                .get(&g.key)
                .and_then(|row| row.get(&g.site))
                .copied()
                .unwrap_or(Inventory { count: 0, non_detect: 0 });
            let or_nan = |v: Option<f64>| v.unwrap_or(f64::NAN);
            StatSummary {
                count: inv.count,
                non_detect: inv.non_detect,
                mean: or_nan(stats::mean(&g.values)),
                std_dev: or_nan(stats::std_dev(&g.values)),
                min: or_nan(stats::min(&g.values)),
                percentiles: fractions
                    .iter()
                    .map(|&q| (q, or_nan(stats::percentile(&g.values, q * 100.0))))
                    .collect(),
                max: or_nan(stats::max(&g.values)),
            }
        })
    }

    pub fn median(&self) -> StatTable<BootstrapResult> {
        self.cache.get_or_insert_with("median", || {
            self.generic_stat(|x| stats::median(x).unwrap_or(f64::NAN), true)
        })
    }

    pub fn mean(&self) -> StatTable<BootstrapResult> {
        self.cache.get_or_insert_with("mean", || {
            self.generic_stat(|x| stats::mean(x).unwrap_or(f64::NAN), true)
        })
    }

    /// Sample standard deviation (n − 1).
    pub fn std_dev(&self) -> StatTable<f64> {
        self.cache.get_or_insert_with("std_dev", || {
            self.group_stat(|g| stats::std_dev(&g.values).unwrap_or(f64::NAN))
        })
    }

    /// `p`-th percentile (0–100) of each group.
    pub fn percentile(&self, p: f64) -> StatTable<f64> {
        self.group_stat(|g| stats::percentile(&g.values, p).unwrap_or(f64::NAN))
    }

    pub fn logmean(&self) -> StatTable<BootstrapResult> {
        self.cache.get_or_insert_with("logmean", || {
            self.generic_stat(|x| stats::mean(&log_values(x)).unwrap_or(f64::NAN), true)
        })
    }

    /// Sample standard deviation (n − 1) of the logs.
    pub fn logstd_dev(&self) -> StatTable<f64> {
        self.cache.get_or_insert_with("logstd_dev", || {
            self.group_stat(|g| stats::std_dev(&log_values(&g.values)).unwrap_or(f64::NAN))
        })
    }

    pub fn geomean(&self) -> StatTable<BootstrapResult> {
        self.logmean().map(|r| r.map(f64::exp))
    }

    pub fn geostd_dev(&self) -> StatTable<f64> {
        self.logstd_dev().map(f64::exp)
    }

    pub fn shapiro(&self) -> StatTable<Option<NormalityResult>> {
        self.group_stat(|g| testing::shapiro_wilk_test(&g.values))
    }

    pub fn shapiro_log(&self) -> StatTable<Option<NormalityResult>> {
        self.group_stat(|g| testing::shapiro_wilk_test(&log_values(&g.values)))
    }

    pub fn lilliefors(&self) -> StatTable<Option<NormalityResult>> {
        self.group_stat(|g| testing::lilliefors_test(&g.values))
    }

    pub fn lilliefors_log(&self) -> StatTable<Option<NormalityResult>> {
        self.group_stat(|g| testing::lilliefors_test(&log_values(&g.values)))
    }

    // -----------------------------------------------------------------------
    // Comparisons between sites
    // -----------------------------------------------------------------------

    /// Runs `statistic` for every unordered pair of sites within each
    /// comparison group.
    ///
    /// Unpaired: on the working values of each site. Paired: on raw values
    /// joined by pairing key (the `pair_groups` labels, or the row's
    /// position within its group), dropping unmatched rows. `statistic`
    /// returns `(statistic, p-value)` or `None` when undefined.
    pub fn comparison_stat_twoway<F>(&self, statistic: F, paired: bool) -> Vec<ComparisonRecord>
    where
        F: Fn(&[f64], &[f64]) -> Option<(f64, f64)>,
    {
        let mut out = Vec::new();
        for (key, sites) in self.by_comparison_key() {
            let names: Vec<&String> = sites.keys().collect();
            for (i, a) in names.iter().enumerate() {
                for b in &names[i + 1..] {
                    let (ga, gb) = (&sites[*a], &sites[*b]);
                    let (x, y) = if paired {
                        join_on_pair_key(ga, gb)
                    } else {
                        (ga.values.clone(), gb.values.clone())
                    };
                    trace!("comparing {a} / {b} in {key:?} ({} vs {} values)", x.len(), y.len());
                    let result = statistic(&x, &y);
                    out.push(ComparisonRecord {
                        key: key.clone(),
                        site_1: (*a).clone(),
                        site_2: (*b).clone(),
                        statistic: result.map(|r| r.0),
                        p_value: result.map(|r| r.1),
                    });
                }
            }
        }
        out
    }

    /// Runs `statistic` over the working values of all sites within each
    /// comparison group, in sorted site order.
    pub fn comparison_stat_allway<F>(&self, statistic: F) -> Vec<AllwayRecord>
    where
        F: Fn(&[&[f64]]) -> Option<(f64, f64)>,
    {
        self.by_comparison_key()
            .into_iter()
            .map(|(key, sites)| {
                let samples: Vec<&[f64]> = sites.values().map(|g| g.values.as_slice()).collect();
                let result = statistic(&samples);
                AllwayRecord {
                    sites: sites.keys().cloned().collect(),
                    key,
                    statistic: result.map(|r| r.0),
                    p_value: result.map(|r| r.1),
                }
            })
            .collect()
    }

    /// Mann-Whitney U with a two-sided p-value. Identical samples give no
    /// result.
    pub fn mann_whitney(&self) -> Vec<ComparisonRecord> {
        self.comparison_stat_twoway(
            |x, y| {
                if exactly_equal(x, y) {
                    return None;
                }
                testing::mann_whitney_u_test(x, y).map(|r| (r.u, r.p_two_sided()))
            },
            false,
        )
    }

    /// Wilcoxon rank-sum z on the working values.
    pub fn ranksums(&self) -> Vec<ComparisonRecord> {
        self.comparison_stat_twoway(
            |x, y| testing::wilcoxon_rank_sum_test(x, y).map(|r| (r.statistic, r.p_value)),
            false,
        )
    }

    /// Welch's t-test.
    pub fn t_test(&self) -> Vec<ComparisonRecord> {
        self.comparison_stat_twoway(
            |x, y| testing::two_sample_t_test(x, y).map(|r| (r.statistic, r.p_value)),
            false,
        )
    }

    /// Median-centred Levene test.
    pub fn levene(&self) -> Vec<ComparisonRecord> {
        self.comparison_stat_twoway(
            |x, y| testing::levene_test(&[x, y]).map(|r| (r.statistic, r.p_value)),
            false,
        )
    }

    /// Wilcoxon signed-rank on paired raw values. Identical samples give no
    /// result.
    pub fn wilcoxon(&self) -> Vec<ComparisonRecord> {
        self.comparison_stat_twoway(
            |x, y| {
                if exactly_equal(x, y) {
                    return None;
                }
                testing::wilcoxon_signed_rank_test(x, y).map(|r| (r.statistic, r.p_value))
            },
            true,
        )
    }

    pub fn kendall(&self) -> Vec<ComparisonRecord> {
        self.comparison_stat_twoway(
            |x, y| correlation::kendall_tau_b(x, y).map(|r| (r.r, r.p_value)),
            true,
        )
    }

    pub fn spearman(&self) -> Vec<ComparisonRecord> {
        self.comparison_stat_twoway(
            |x, y| correlation::spearman(x, y).map(|r| (r.r, r.p_value)),
            true,
        )
    }

    pub fn kruskal_wallis(&self) -> Vec<AllwayRecord> {
        self.comparison_stat_allway(|groups| {
            testing::kruskal_wallis_test(groups).map(|r| (r.statistic, r.p_value))
        })
    }

    /// One-way ANOVA across sites.
    pub fn f_test(&self) -> Vec<AllwayRecord> {
        self.comparison_stat_allway(|groups| {
            testing::one_way_anova(groups).map(|r| (r.f_statistic, r.p_value))
        })
    }
}

// Raw values of `a` and `b` on their shared pairing keys, in `a`'s order.
fn join_on_pair_key(a: &TidyGroup, b: &TidyGroup) -> (Vec<f64>, Vec<f64>) {
    let raw_b = b.raw();
    let mut by_key: HashMap<&str, usize> = HashMap::new();
    for (j, row) in b.rows.iter().enumerate() {
        by_key.entry(row.index.as_str()).or_insert(j);
    }
    a.rows
        .iter()
        .filter_map(|row| {
            let j = *by_key.get(row.index.as_str())?;
            Some((row.value, raw_b[j]))
        })
        .unzip()
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sites: BTreeSet<&str> = self
            .records
            .iter()
            .map(|r| self.label(r, &self.config.site_column))
            .collect();
        f.debug_struct("Collection")
            .field("config", &self.config)
            .field("records", &self.records.len())
            .field("sites", &sites)
            .field("filtered", &self.filter.is_some())
            .field("cache", &self.cache)
            .field("dataset_pairs", &self.datasets.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootstrapConfig;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    const SITES: [&str; 3] = ["inflow", "outflow", "reference"];

    fn config() -> CollectionConfig {
        CollectionConfig::default()
            .with_site_column("loc")
            .with_parameter_column("param")
            .with_bootstrap(BootstrapConfig::default().with_iterations(200).with_seed(17))
    }

    // 8 parameters x 7 sub-groups x 4 dims x 3 sites, 10 rows each.
    fn grouped_records() -> Vec<Record> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let mut out = Vec::new();
        for param in 0..8 {
            for sub in 0..7 {
                for dim in 0..4 {
                    for site in SITES {
                        for _ in 0..10 {
                            let value: f64 = rng.random_range(1.0..20.0);
                            let qual = if value < 2.5 { "ND" } else { "=" };
                            out.push(
                                Record::new(value, qual)
                                    .with_label("loc", site)
                                    .with_label("param", format!("P{param}"))
                                    .with_label("sub", format!("S{sub}"))
                                    .with_label("dim", format!("D{dim}")),
                            );
                        }
                    }
                }
            }
        }
        out
    }

    fn paired_records() -> Vec<Record> {
        let mut out = Vec::new();
        for event in 0..25 {
            let base = 5.0 + (event as f64 * 0.9).sin() * 3.0 + event as f64 * 0.2;
            for (site, factor) in [("inflow", 1.0), ("outflow", 0.5), ("reference", 0.8)] {
                out.push(
                    Record::new(base * factor, "=")
                        .with_label("loc", site)
                        .with_label("param", "Cu")
                        .with_label("event", format!("E{event:02}")),
                );
            }
        }
        out
    }

    #[test]
    fn grouped_pairwise_comparisons() {
        let collection =
            Collection::new(grouped_records(), config().with_other_groups(["sub", "dim"])).expect("valid records");
        let records = collection.mann_whitney();
        assert_eq!(records.len(), 8 * 7 * 4 * 3);
        for r in &records {
            assert!(r.statistic.is_some_and(f64::is_finite), "{r:?}");
            assert!(r.p_value.is_some_and(|p| (0.0..=1.0).contains(&p)), "{r:?}");
        }
        assert_eq!(records[0].key, vec!["P0", "S0", "D0"]);
        assert_eq!((records[0].site_1.as_str(), records[0].site_2.as_str()), ("inflow", "outflow"));
    }

    #[test]
    fn locations_and_selection() {
        let collection = Collection::new(paired_records(), config()).expect("valid records");
        let locations = collection.locations();
        assert_eq!(locations.len(), 3);
        let first = locations[0].borrow();
        assert_eq!(first.definition().get("loc").map(String::as_str), Some("inflow"));
        assert_eq!(first.definition().get("param").map(String::as_str), Some("Cu"));
        assert_eq!(first.site_type(), SiteType::Inflow);
        assert_eq!(first.n(), 25);
        drop(first);

        let picked = collection.select_locations(&[("loc", ["inflow", "reference"].into())]);
        assert_eq!(picked.len(), 2);
        assert!(collection.select_locations(&[("loc", "upstream".into())]).is_empty());
        assert!(Rc::ptr_eq(&collection.locations()[0], &locations[0]), "memoized");
    }

    #[test]
    fn datasets_pair_two_sites() {
        let collection = Collection::new(paired_records(), config()).expect("valid records");
        let datasets = collection.datasets("inflow", "outflow").expect("known sites");
        assert_eq!(datasets.len(), 1);
        let ds = &datasets[0];
        assert_eq!(ds.definition().get("param").map(String::as_str), Some("Cu"));
        assert_eq!(ds.name(), Some("Cu"));
        assert_eq!(ds.n_pairs(), 25);
        assert!((ds.kendall_tau().expect("should compute") - 1.0).abs() < 1e-12);

        let selected = collection
            .select_datasets("inflow", "outflow", &[("param", "Pb".into())])
            .expect("known sites");
        assert!(selected.is_empty());

        let err = collection.datasets("inflow", "upstream");
        assert!(matches!(err, Err(WqError::UnknownSite(ref s)) if s == "upstream"));
    }

    #[test]
    fn datasets_are_memoized_until_filter_changes() {
        let mut collection = Collection::new(paired_records(), config()).expect("valid records");
        let first = collection.datasets("inflow", "outflow").expect("known sites");
        let tau = first[0].kendall_tau();
        let overlap = first[0].median_cis_overlap();
        let second = collection.datasets("inflow", "outflow").expect("known sites");
        assert!(Rc::ptr_eq(&first, &second));
        assert!(Rc::ptr_eq(&first[0], &second[0]));
        assert_eq!(second[0].kendall_tau(), tau);
        assert_eq!(second[0].median_cis_overlap(), overlap);

        let reversed = collection.datasets("outflow", "inflow").expect("known sites");
        assert!(!Rc::ptr_eq(&first[0], &reversed[0]));

        collection.set_filter(|rows| rows.len() > 3);
        let rebuilt = collection.datasets("inflow", "outflow").expect("known sites");
        assert!(!Rc::ptr_eq(&first[0], &rebuilt[0]));
        assert!(!Rc::ptr_eq(first[0].effluent(), rebuilt[0].effluent()));
        assert_eq!(rebuilt[0].n_pairs(), 25);
    }

    #[test]
    fn effluent_only_groups_get_an_empty_influent() {
        let mut records = paired_records();
        for i in 0..6 {
            records.push(
                Record::new(2.0 + i as f64, "=")
                    .with_label("loc", "outflow")
                    .with_label("param", "Zn"),
            );
            records.push(
                Record::new(3.0 + i as f64, "=")
                    .with_label("loc", "inflow")
                    .with_label("param", "Pb"),
            );
        }
        let collection = Collection::new(records, config()).expect("valid records");
        let datasets = collection.datasets("inflow", "outflow").expect("known sites");
        let names: Vec<_> = datasets.iter().map(|ds| ds.name().unwrap_or_default().to_string()).collect();
        assert_eq!(names, vec!["Cu", "Zn"]);

        let zn = &datasets[1];
        assert!(!zn.influent().borrow().has_data());
        assert_eq!(zn.influent().borrow().name(), "inflow");
        assert_eq!(zn.effluent().borrow().n(), 6);
        assert!(!zn.non_paired_stats());
        assert!(zn.mann_whitney().is_none());
        assert_eq!(zn.n_pairs(), 0);
    }

    #[test]
    fn paired_generators_join_on_pair_groups() {
        let mut records = paired_records();
        // shuffle one site so only the pairing key can align it
        records.reverse();
        let collection =
            Collection::new(records, config().with_pair_groups(["event"])).expect("valid records");

        let kendall = collection.kendall();
        assert_eq!(kendall.len(), 3);
        for r in &kendall {
            assert!((r.statistic.expect("should compute") - 1.0).abs() < 1e-12, "{r:?}");
        }
        let wilcoxon = collection.wilcoxon();
        let io = wilcoxon
            .iter()
            .find(|r| r.site_1 == "inflow" && r.site_2 == "outflow")
            .expect("pair present");
        assert_eq!(io.statistic, Some(0.0));
        assert!(io.p_value.is_some_and(|p| p < 1e-3));
        assert!(collection.spearman().iter().all(|r| r.statistic.is_some()));
    }

    #[test]
    fn identical_samples_have_no_rank_result() {
        let mut records = Vec::new();
        for i in 0..12 {
            for site in ["a", "b"] {
                records.push(
                    Record::new(1.0 + i as f64, "=")
                        .with_label("loc", site)
                        .with_label("param", "N"),
                );
            }
        }
        let collection = Collection::new(records, config()).expect("valid records");
        let mw = collection.mann_whitney();
        assert_eq!(mw.len(), 1);
        assert!(mw[0].statistic.is_none() && mw[0].p_value.is_none());
        assert!(collection.wilcoxon()[0].statistic.is_none());
        assert!(collection.t_test()[0].p_value.is_some_and(|p| (p - 1.0).abs() < 1e-12));
    }

    #[test]
    fn filter_drops_groups_and_resets_memo() {
        let mut collection = Collection::new(paired_records(), config()).expect("valid records");
        assert_eq!(collection.locations().len(), 3);
        collection.set_filter(|rows| rows.iter().all(|r| r.label("loc") != Some("reference")));
        assert_eq!(collection.locations().len(), 2);
        assert_eq!(collection.count().sites, vec!["inflow", "outflow"]);
        collection.clear_filter();
        assert_eq!(collection.count().sites.len(), 3);
    }

    #[test]
    fn summary_tables() {
        let mut records = paired_records();
        records[0].qualifier = "ND".to_string();
        let collection = Collection::new(records, config()).expect("valid records");

        assert_eq!(collection.count().get(&["Cu"], "outflow"), Some(&25));
        let inv = collection.inventory();
        assert_eq!(inv.get(&["Cu"], "inflow"), Some(&Inventory { count: 25, non_detect: 1 }));
        assert_eq!(inv.get(&["Cu"], "outflow").map(|i| i.non_detect), Some(0));

        let mean = collection.mean();
        let m = mean.get(&["Cu"], "outflow").expect("cell present");
        assert!(m.lower <= m.estimate && m.estimate <= m.upper, "{m:?}");

        let geo = collection.geomean();
        let log = collection.logmean();
        for (key, site, g) in geo.cells() {
            let keys: Vec<&str> = key.iter().map(String::as_str).collect();
            let l = log.get(&keys, site).expect("cell present");
            assert!((g.estimate - l.estimate.exp()).abs() < 1e-12);
        }

        let median = collection.percentile(50.0);
        let boot_median = collection.median();
        for site in SITES {
            let a = median.get(&["Cu"], site).expect("cell present");
            let b = boot_median.get(&["Cu"], site).expect("cell present");
            assert!((a - b.estimate).abs() < 1e-12);
        }

        let plain = collection.generic_stat(|x| x.len() as f64, false);
        assert!(plain.get(&["Cu"], "inflow").is_some_and(|r| r.lower.is_nan() && r.estimate == 25.0));
        assert!(collection.std_dev().cells().all(|(_, _, v)| *v > 0.0));
        assert!(collection.geostd_dev().cells().all(|(_, _, v)| *v > 1.0));
        assert!(collection.shapiro().cells().all(|(_, _, r)| r.is_some()));
        assert!(collection.lilliefors_log().cells().all(|(_, _, r)| r.is_some()));
    }

    #[test]
    fn rank_sums_between_sites() {
        let collection = Collection::new(paired_records(), config()).expect("valid records");
        let rs = collection.ranksums();
        assert_eq!(rs.len(), 3);
        let io = rs
            .iter()
            .find(|r| r.site_1 == "inflow" && r.site_2 == "outflow")
            .expect("pair present");
        assert!(io.statistic.is_some_and(|z| z > 0.0), "{io:?}");
        assert!(io.p_value.is_some_and(|p| p < 0.01), "{io:?}");
    }

    #[test]
    fn unique_counts_per_group() {
        let collection = Collection::new(paired_records(), config()).expect("valid records");
        let events = collection.n_unique("event").expect("column present");
        assert_eq!(events.sites, vec!["inflow", "outflow", "reference"]);
        assert!(events.cells().all(|(_, _, n)| *n == 25));
        let params = collection.n_unique("param").expect("column present");
        assert_eq!(params.get(&["Cu"], "outflow"), Some(&1));
        assert!(matches!(
            collection.n_unique("lab"),
            Err(WqError::MissingColumn(ref c)) if c == "lab"
        ));
    }

    #[test]
    fn stat_summary_joins_inventory() {
        let mut records = paired_records();
        records[0].qualifier = "ND".to_string();
        let collection = Collection::new(records, config()).expect("valid records");
        let summary = collection.stat_summary(None);
        let inflow = summary.get(&["Cu"], "inflow").expect("cell present");
        assert_eq!((inflow.count, inflow.non_detect), (25, 1));
        assert_eq!(inflow.percentiles.len(), DEFAULT_SUMMARY_PERCENTILES.len());
        assert!(inflow.min <= inflow.percentiles[0].1);
        assert!(inflow.percentiles.windows(2).all(|w| w[0].1 <= w[1].1));
        assert!(inflow.percentiles[4].1 <= inflow.max);

        let medians = collection.percentile(50.0);
        let custom = collection.stat_summary(Some(&[0.5]));
        for site in SITES {
            let cell = custom.get(&["Cu"], site).expect("cell present");
            assert_eq!(cell.percentiles.len(), 1);
            assert_eq!(Some(&cell.percentiles[0].1), medians.get(&["Cu"], site));
            assert_eq!(Some(&cell.std_dev), collection.std_dev().get(&["Cu"], site));
        }
    }

    #[test]
    fn allway_tests() {
        let collection = Collection::new(paired_records(), config()).expect("valid records");
        let kw = collection.kruskal_wallis();
        assert_eq!(kw.len(), 1);
        assert_eq!(kw[0].sites, vec!["inflow", "outflow", "reference"]);
        assert!(kw[0].p_value.is_some_and(|p| p < 0.05), "{:?}", kw[0]);
        let f = collection.f_test();
        assert!(f[0].statistic.is_some_and(|s| s > 0.0));
    }

    #[test]
    fn records_need_grouping_labels() {
        let records = vec![Record::new(1.0, "=").with_label("loc", "inflow")];
        let err = Collection::new(records, config());
        assert!(matches!(err, Err(WqError::MissingColumn(ref c)) if c == "param"));
    }
}
