//! Two-site comparison.
//!
//! A [`PairedComparison`] references an influent and an effluent
//! [`ObservationSet`] and computes unpaired tests on their working samples,
//! paired tests on rows joined by index, and a Theil-Sen fit of effluent on
//! influent.
//!
//! # Gating
//!
//! - Unpaired statistics (Mann-Whitney, Welch t, Levene) need data in both
//!   sets.
//! - Paired statistics (Wilcoxon, Kendall, Spearman, Theil-Sen) also need
//!   more than 20 joined pairs and at most half non-detects in each set.
//!
//! Statistics whose gate is closed are `None`.
//!
//! # Examples
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use u_wqstats::comparison::PairedComparison;
//! use u_wqstats::config::{BootstrapConfig, ObservationConfig};
//! use u_wqstats::observation::{ObservationSet, RawObservation, SiteType};
//!
//! let rows = |shift: f64| -> Vec<RawObservation> {
//!     (0..25)
//!         .map(|i| RawObservation::new(i.to_string(), 5.0 + (i as f64 * 0.37).sin() + i as f64 * 0.1 + shift, "="))
//!         .collect()
//! };
//! let cfg = ObservationConfig::default()
//!     .with_bootstrap(BootstrapConfig::default().with_iterations(200).with_seed(5));
//! let inflow = Rc::new(RefCell::new(ObservationSet::new(rows(2.0), cfg.clone())));
//! let outflow = Rc::new(RefCell::new(ObservationSet::new(
//!     rows(0.0),
//!     cfg.with_site_type(SiteType::Outflow),
//! )));
//!
//! let cmp = PairedComparison::new(inflow, outflow);
//! assert_eq!(cmp.n_pairs(), 25);
//! assert!(cmp.wilcoxon_p().unwrap() < 0.001);
//! assert!((cmp.kendall_tau().unwrap() - 1.0).abs() < 1e-12);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cache::StatCache;
use crate::correlation::{self, CorrelationResult};
use crate::error::{Result, WqError};
use crate::observation::ObservationSet;
use crate::regression;
use crate::testing::{self, MannWhitneyResult, TestResult};

/// An observation set shared between a collection and its comparisons.
pub type SharedObservationSet = Rc<RefCell<ObservationSet>>;

/// Pairs required (exclusive) before paired statistics are computed.
pub const MIN_PAIRS: usize = 20;

/// Largest non-detect fraction accepted for paired statistics.
pub const MAX_FRACTION_ND: f64 = 0.5;

/// One joined influent/effluent row, in raw values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedRow {
    pub index: String,
    pub influent: f64,
    pub influent_censored: bool,
    pub effluent: f64,
    pub effluent_censored: bool,
}

/// Which side of a pair is a non-detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonDetectCombination {
    /// Both sides censored.
    Both,
    /// Only the influent censored.
    Influent,
    /// Only the effluent censored.
    Effluent,
    /// Neither side censored.
    Neither,
}

impl NonDetectCombination {
    pub fn matches(&self, row: &PairedRow) -> bool {
        let (i, e) = (row.influent_censored, row.effluent_censored);
        match self {
            NonDetectCombination::Both => i && e,
            NonDetectCombination::Influent => i && !e,
            NonDetectCombination::Effluent => !i && e,
            NonDetectCombination::Neither => !i && !e,
        }
    }
}

impl FromStr for NonDetectCombination {
    type Err = WqError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "both" => Ok(NonDetectCombination::Both),
            "influent" => Ok(NonDetectCombination::Influent),
            "effluent" => Ok(NonDetectCombination::Effluent),
            "neither" => Ok(NonDetectCombination::Neither),
            other => Err(WqError::UnknownSelector(other.to_string())),
        }
    }
}

/// Theil-Sen fit of effluent on influent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TheilSlopeResult {
    pub medslope: f64,
    pub intercept: f64,
    pub loslope: f64,
    pub hislope: f64,
    /// True when the fit was run with effluent as the independent variable.
    pub is_inverted: bool,
    /// Fitted effluent for each pair, in raw units.
    pub estimated_effluent: Vec<f64>,
    /// Raw effluent minus `estimated_effluent`.
    pub residuals: Vec<f64>,
}

/// Comparison of two observation sets.
pub struct PairedComparison {
    influent: SharedObservationSet,
    effluent: SharedObservationSet,
    name: Option<String>,
    definition: BTreeMap<String, String>,
    include: Option<bool>,
    seen: Cell<(u64, u64)>,
    cache: StatCache,
}

impl PairedComparison {
    pub fn new(influent: SharedObservationSet, effluent: SharedObservationSet) -> Self {
        let seen = (influent.borrow().generation(), effluent.borrow().generation());
        Self {
            influent,
            effluent,
            name: None,
            definition: BTreeMap::new(),
            include: None,
            seen: Cell::new(seen),
            cache: StatCache::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_definition(mut self, definition: BTreeMap<String, String>) -> Self {
        self.definition = definition;
        self
    }

    pub fn influent(&self) -> &SharedObservationSet {
        &self.influent
    }

    pub fn effluent(&self) -> &SharedObservationSet {
        &self.effluent
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn definition(&self) -> &BTreeMap<String, String> {
        &self.definition
    }

    pub fn set_definition(&mut self, definition: BTreeMap<String, String>) {
        self.definition = definition;
    }

    /// Both sets included, unless overridden.
    pub fn include(&self) -> bool {
        self.include.unwrap_or_else(|| {
            self.influent.borrow().include() && self.effluent.borrow().include()
        })
    }

    pub fn set_include(&mut self, include: bool) {
        self.include = Some(include);
    }

    pub fn exclude(&self) -> bool {
        !self.include()
    }

    // Drops every cached statistic when either set changed since last read.
    fn sync(&self) {
        let now = (
            self.influent.borrow().generation(),
            self.effluent.borrow().generation(),
        );
        if self.seen.get() != now {
            debug!("comparison {:?}: observation sets changed, invalidating", self.name);
            self.cache.invalidate();
            self.seen.set(now);
        }
    }

    // -----------------------------------------------------------------------
    // Paired data and gates
    // -----------------------------------------------------------------------

    /// Rows present in both sets, joined on index in influent order.
    ///
    /// Duplicate indexes on the effluent side match their first row only.
    pub fn paired_data(&self) -> Rc<[PairedRow]> {
        self.sync();
        self.cache.get_or_insert_with("paired_data", || {
            let inf = self.influent.borrow();
            let eff = self.effluent.borrow();
            let eff_censored = eff.censored();
            let mut by_index: HashMap<&str, usize> = HashMap::new();
            for (i, row) in eff.raw_data().iter().enumerate() {
                by_index.entry(row.index.as_str()).or_insert(i);
            }
            let inf_censored = inf.censored();
            inf.raw_data()
                .iter()
                .zip(inf_censored)
                .filter_map(|(row, censored)| {
                    let j = *by_index.get(row.index.as_str())?;
                    let other = &eff.raw_data()[j];
                    let complete = row.value.is_finite() && other.value.is_finite();
                    complete.then(|| PairedRow {
                        index: row.index.clone(),
                        influent: row.value,
                        influent_censored: censored,
                        effluent: other.value,
                        effluent_censored: eff_censored[j],
                    })
                })
                .collect()
        })
    }

    pub fn n_pairs(&self) -> usize {
        self.paired_data().len()
    }

    /// Paired rows whose censoring matches `selector`
    /// (`"both"`, `"influent"`, `"effluent"` or `"neither"`).
    pub fn non_detect_pairs(&self, selector: &str) -> Result<Vec<PairedRow>> {
        let which: NonDetectCombination = selector.parse()?;
        Ok(self
            .paired_data()
            .iter()
            .filter(|r| which.matches(r))
            .cloned()
            .collect())
    }

    /// Both sets have data.
    pub fn non_paired_stats(&self) -> bool {
        self.influent.borrow().has_data() && self.effluent.borrow().has_data()
    }

    /// Unpaired gate plus more than [`MIN_PAIRS`] joined pairs.
    pub fn paired_stats(&self) -> bool {
        self.non_paired_stats() && self.n_pairs() > MIN_PAIRS
    }

    fn paired_eligible(&self) -> bool {
        self.paired_stats()
            && self.influent.borrow().fraction_nd() <= MAX_FRACTION_ND
            && self.effluent.borrow().fraction_nd() <= MAX_FRACTION_ND
    }

    fn paired_columns(&self) -> (Vec<f64>, Vec<f64>) {
        self.paired_data()
            .iter()
            .map(|r| (r.influent, r.effluent))
            .unzip()
    }

    // -----------------------------------------------------------------------
    // Unpaired statistics
    // -----------------------------------------------------------------------

    pub fn mann_whitney(&self) -> Option<MannWhitneyResult> {
        self.sync();
        self.cache.get_or_insert_with("mannwhitney", || {
            if !self.non_paired_stats() {
                return None;
            }
            let inf = self.influent.borrow().data();
            let eff = self.effluent.borrow().data();
            testing::mann_whitney_u_test(&inf, &eff)
        })
    }

    /// Welch's t-test on the working samples.
    pub fn t_test(&self) -> Option<TestResult> {
        self.sync();
        self.cache.get_or_insert_with("ttest", || {
            if !self.non_paired_stats() {
                return None;
            }
            let inf = self.influent.borrow().data();
            let eff = self.effluent.borrow().data();
            testing::two_sample_t_test(&inf, &eff)
        })
    }

    /// Median-centred Levene test on the working samples.
    pub fn levene(&self) -> Option<TestResult> {
        self.sync();
        self.cache.get_or_insert_with("levene", || {
            if !self.non_paired_stats() {
                return None;
            }
            let inf = self.influent.borrow().data();
            let eff = self.effluent.borrow().data();
            testing::levene_test(&[&inf[..], &eff[..]])
        })
    }

    // -----------------------------------------------------------------------
    // Paired statistics
    // -----------------------------------------------------------------------

    /// Wilcoxon signed-rank test on the logs of the paired values.
    pub fn wilcoxon(&self) -> Option<TestResult> {
        self.sync();
        self.cache.get_or_insert_with("wilcoxon", || {
            if !self.paired_eligible() {
                return None;
            }
            let (inf, eff) = self.paired_columns();
            let ln = |v: &[f64]| -> Vec<f64> { v.iter().map(|x| x.ln()).collect() };
            testing::wilcoxon_signed_rank_test(&ln(&inf), &ln(&eff))
        })
    }

    pub fn kendall(&self) -> Option<CorrelationResult> {
        self.sync();
        self.cache.get_or_insert_with("kendall", || {
            if !self.paired_eligible() {
                return None;
            }
            let (inf, eff) = self.paired_columns();
            correlation::kendall_tau_b(&inf, &eff)
        })
    }

    pub fn spearman(&self) -> Option<CorrelationResult> {
        self.sync();
        self.cache.get_or_insert_with("spearman", || {
            if !self.paired_eligible() {
                return None;
            }
            let (inf, eff) = self.paired_columns();
            correlation::spearman(&inf, &eff)
        })
    }

    /// Theil-Sen fit on the raw paired values.
    pub fn theil(&self) -> Option<TheilSlopeResult> {
        self.sync();
        self.cache
            .get_or_insert_with("theil", || self.theil_slopes(false, false))
    }

    /// Theil-Sen fit of effluent on influent, optionally in log space.
    ///
    /// The set with fewer distinct values is used as the independent
    /// variable, which usually avoids a zero median slope when values
    /// repeat. When effluent is independent the fit is inverted back:
    /// slope' = 1/slope, intercept' = −intercept/slope, and the bounds are
    /// reciprocated and reordered. Fitted values and residuals are always
    /// effluent-on-influent in raw units.
    pub fn theil_slopes(&self, log_influent: bool, log_effluent: bool) -> Option<TheilSlopeResult> {
        if !self.paired_eligible() {
            return None;
        }
        let (raw_inf, raw_eff) = self.paired_columns();
        let transform = |v: &[f64], log: bool| -> Option<Vec<f64>> {
            if !log {
                return Some(v.to_vec());
            }
            v.iter()
                .map(|&x| (x > 0.0).then(|| x.ln()))
                .collect()
        };
        let x = transform(&raw_inf, log_influent)?;
        let y = transform(&raw_eff, log_effluent)?;

        let is_inverted = self.influent.borrow().n_unique() > self.effluent.borrow().n_unique();
        let (medslope, intercept, loslope, hislope) = if is_inverted {
            let fit = regression::theil_slopes(&y, &x, 0.95)?;
            let lo = 1.0 / fit.low_slope;
            let hi = 1.0 / fit.high_slope;
            (
                1.0 / fit.slope,
                -fit.intercept / fit.slope,
                lo.min(hi),
                lo.max(hi),
            )
        } else {
            let fit = regression::theil_slopes(&x, &y, 0.95)?;
            (fit.slope, fit.intercept, fit.low_slope, fit.high_slope)
        };

        let estimated_effluent: Vec<f64> = x
            .iter()
            .map(|&xi| {
                let fitted = intercept + medslope * xi;
                if log_effluent { fitted.exp() } else { fitted }
            })
            .collect();
        let residuals = raw_eff
            .iter()
            .zip(&estimated_effluent)
            .map(|(obs, est)| obs - est)
            .collect();

        Some(TheilSlopeResult {
            medslope,
            intercept,
            loslope,
            hislope,
            is_inverted,
            estimated_effluent,
            residuals,
        })
    }

    /// True when the median confidence intervals intersect (touching
    /// counts). Also true when either set has no data or either interval
    /// is undefined.
    pub fn median_cis_overlap(&self) -> bool {
        self.sync();
        self.cache.get_or_insert_with("medianCIsOverlap", || {
            let inf = self.influent.borrow().median();
            let eff = self.effluent.borrow().median();
            match (inf, eff) {
                (Some(a), Some(b)) => {
                    let defined = [a.lower, a.upper, b.lower, b.upper]
                        .iter()
                        .all(|v| v.is_finite());
                    !defined || (a.lower <= b.upper && b.lower <= a.upper)
                }
                _ => true,
            }
        })
    }

    // -----------------------------------------------------------------------
    // Scalar accessors
    // -----------------------------------------------------------------------

    pub fn wilcoxon_stat(&self) -> Option<f64> {
        self.wilcoxon().map(|r| r.statistic)
    }

    pub fn wilcoxon_p(&self) -> Option<f64> {
        self.wilcoxon().map(|r| r.p_value)
    }

    pub fn mannwhitney_u(&self) -> Option<f64> {
        self.mann_whitney().map(|r| r.u)
    }

    /// Two-sided: twice the one-sided p-value of the test.
    pub fn mannwhitney_p(&self) -> Option<f64> {
        self.mann_whitney().map(|r| 2.0 * r.p_one_sided)
    }

    pub fn kendall_tau(&self) -> Option<f64> {
        self.kendall().map(|r| r.r)
    }

    pub fn kendall_p(&self) -> Option<f64> {
        self.kendall().map(|r| r.p_value)
    }

    pub fn spearman_rho(&self) -> Option<f64> {
        self.spearman().map(|r| r.r)
    }

    pub fn spearman_p(&self) -> Option<f64> {
        self.spearman().map(|r| r.p_value)
    }

    pub fn ttest_t(&self) -> Option<f64> {
        self.t_test().map(|r| r.statistic)
    }

    pub fn ttest_p(&self) -> Option<f64> {
        self.t_test().map(|r| r.p_value)
    }

    pub fn levene_stat(&self) -> Option<f64> {
        self.levene().map(|r| r.statistic)
    }

    pub fn levene_p(&self) -> Option<f64> {
        self.levene().map(|r| r.p_value)
    }

    pub fn theil_medslope(&self) -> Option<f64> {
        self.theil().map(|r| r.medslope)
    }

    pub fn theil_intercept(&self) -> Option<f64> {
        self.theil().map(|r| r.intercept)
    }

    pub fn theil_loslope(&self) -> Option<f64> {
        self.theil().map(|r| r.loslope)
    }

    pub fn theil_hislope(&self) -> Option<f64> {
        self.theil().map(|r| r.hislope)
    }
}

impl fmt::Debug for PairedComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairedComparison")
            .field("name", &self.name)
            .field("definition", &self.definition)
            .field("n_influent", &self.influent.borrow().n())
            .field("n_effluent", &self.effluent.borrow().n())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BootstrapConfig, ObservationConfig};
    use crate::observation::{RawObservation, Sample, SiteType};
    use crate::testdata;

    fn config(site_type: SiteType) -> ObservationConfig {
        ObservationConfig::default()
            .with_site_type(site_type)
            .with_bootstrap(BootstrapConfig::default().with_iterations(400).with_seed(11))
    }

    fn shared(rows: Sample, site_type: SiteType) -> SharedObservationSet {
        Rc::new(RefCell::new(ObservationSet::new(rows, config(site_type))))
    }

    fn shifted_pair() -> PairedComparison {
        PairedComparison::new(
            shared(testdata::reference_rows(3.0), SiteType::Inflow),
            shared(testdata::reference_rows(-1.5), SiteType::Outflow),
        )
    }

    fn rows_from(values: &[f64]) -> Sample {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| RawObservation::new(i.to_string(), v, "="))
            .collect()
    }

    #[test]
    fn shifted_copies_are_monotonic() {
        let cmp = shifted_pair();
        assert_eq!(cmp.n_pairs(), 35);
        assert!(cmp.paired_stats());
        assert!((cmp.kendall_tau().expect("should compute") - 1.0).abs() < 1e-12);
        assert!((cmp.spearman_rho().expect("should compute") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn wilcoxon_on_log_pairs() {
        let cmp = shifted_pair();
        assert_eq!(cmp.wilcoxon_stat(), Some(0.0));
        let p = cmp.wilcoxon_p().expect("should compute");
        assert!((p - 2.469e-7).abs() < 1e-9, "p = {p}");
    }

    #[test]
    fn mann_whitney_reports_two_sided() {
        let cmp = shifted_pair();
        let raw = {
            let inf = cmp.influent().borrow().data();
            let eff = cmp.effluent().borrow().data();
            testing::mann_whitney_u_test(&inf, &eff).expect("should compute")
        };
        assert_eq!(cmp.mannwhitney_p(), Some(2.0 * raw.p_one_sided));
        assert_eq!(cmp.mannwhitney_u(), Some(raw.u));
        assert!(cmp.ttest_p().is_some_and(|p| p < 0.05));
        assert!(cmp.levene().is_some());
    }

    #[test]
    fn shifted_theil_fit() {
        let cmp = shifted_pair();
        let fit = cmp.theil().expect("should compute");
        assert!(!fit.is_inverted, "equal unique counts keep influent independent");
        assert!((fit.medslope - 1.0).abs() < 1e-12, "slope = {}", fit.medslope);
        assert!((fit.intercept + 4.5).abs() < 1e-9, "intercept = {}", fit.intercept);
        assert!(fit.loslope <= fit.medslope && fit.medslope <= fit.hislope);
        assert_eq!(fit.residuals.len(), 35);
        assert!(fit.residuals.iter().all(|r| r.abs() < 1e-9));
        assert_eq!(cmp.theil_medslope(), Some(fit.medslope));
    }

    #[test]
    fn theil_inversion_follows_unique_counts() {
        let base: Vec<f64> = (0..30).map(|i| 1.0 + i as f64 * 0.5).collect();
        let coarse: Vec<f64> = base.iter().map(|v| (v / 2.0).round() * 2.0 + 0.5).collect();

        let forward = PairedComparison::new(
            shared(rows_from(&coarse), SiteType::Inflow),
            shared(rows_from(&base), SiteType::Outflow),
        );
        let fit = forward.theil().expect("should compute");
        assert!(!fit.is_inverted);

        let swapped = PairedComparison::new(
            shared(rows_from(&base), SiteType::Inflow),
            shared(rows_from(&coarse), SiteType::Outflow),
        );
        let inverted = swapped.theil().expect("should compute");
        assert!(inverted.is_inverted);

        let direct = regression::theil_slopes(&coarse, &base, 0.95).expect("should compute");
        assert!((inverted.medslope * direct.slope - 1.0).abs() < 1e-12);
        assert!((inverted.intercept + direct.intercept / direct.slope).abs() < 1e-12);
        assert!(inverted.loslope <= inverted.hislope);
        for ((est, x), (obs, res)) in inverted
            .estimated_effluent
            .iter()
            .zip(&base)
            .zip(coarse.iter().zip(&inverted.residuals))
        {
            assert!((est - (inverted.intercept + inverted.medslope * x)).abs() < 1e-9);
            assert!((obs - est - res).abs() < 1e-12);
        }
    }

    #[test]
    fn log_theil_fit_estimates_in_raw_units() {
        let cmp = shifted_pair();
        let fit = cmp.theil_slopes(true, true).expect("should compute");
        assert_eq!(fit.estimated_effluent.len(), 35);
        assert!(fit.estimated_effluent.iter().all(|v| *v > 0.0));
        let (inf, eff): (Vec<f64>, Vec<f64>) =
            cmp.paired_data().iter().map(|r| (r.influent, r.effluent)).unzip();
        for i in 0..35 {
            let fitted = (fit.intercept + fit.medslope * inf[i].ln()).exp();
            assert!((fit.estimated_effluent[i] - fitted).abs() < 1e-9);
            assert!((eff[i] - fitted - fit.residuals[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn few_pairs_disable_paired_statistics() {
        let values: Vec<f64> = (1..=15).map(|i| i as f64).collect();
        let shifted: Vec<f64> = values.iter().map(|v| v * 0.5).collect();
        let cmp = PairedComparison::new(
            shared(rows_from(&values), SiteType::Inflow),
            shared(rows_from(&shifted), SiteType::Outflow),
        );
        assert!(cmp.non_paired_stats());
        assert!(!cmp.paired_stats());
        assert!(cmp.wilcoxon().is_none());
        assert!(cmp.kendall().is_none());
        assert!(cmp.theil().is_none());
        assert!(cmp.mann_whitney().is_some());
    }

    #[test]
    fn heavy_censoring_disables_paired_statistics() {
        let rows: Sample = (0..30)
            .map(|i| RawObservation::new(i.to_string(), 1.0 + i as f64, if i < 16 { "ND" } else { "=" }))
            .collect();
        let cmp = PairedComparison::new(
            shared(rows, SiteType::Inflow),
            shared(testdata::reference_rows(0.0)[..30].to_vec(), SiteType::Outflow),
        );
        assert!(cmp.paired_stats());
        assert!(cmp.influent().borrow().fraction_nd() > 0.5);
        assert!(cmp.spearman().is_none());
        assert!(cmp.theil().is_none());
    }

    #[test]
    fn paired_data_joins_on_index() {
        let inf = vec![
            RawObservation::new("a", 1.0, "="),
            RawObservation::new("b", 2.0, "ND"),
            RawObservation::new("c", 3.0, "="),
        ];
        let eff = vec![
            RawObservation::new("c", 0.3, "ND"),
            RawObservation::new("a", 0.1, "="),
            RawObservation::new("z", 9.9, "="),
        ];
        let cmp = PairedComparison::new(shared(inf, SiteType::Inflow), shared(eff, SiteType::Outflow));
        let rows = cmp.paired_data();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, "a");
        assert_eq!(rows[1].effluent, 0.3);
        assert!(rows[1].effluent_censored);
        assert_eq!(cmp.non_detect_pairs("effluent").expect("known selector").len(), 1);
        assert_eq!(cmp.non_detect_pairs("neither").expect("known selector").len(), 1);
    }

    #[test]
    fn non_detect_selectors() {
        let cmp = shifted_pair();
        assert_eq!(cmp.non_detect_pairs("both").expect("known selector").len(), 7);
        assert_eq!(cmp.non_detect_pairs("neither").expect("known selector").len(), 28);
        assert!(cmp.non_detect_pairs("influent").expect("known selector").is_empty());
        let err = cmp.non_detect_pairs("inflow");
        assert!(matches!(err, Err(WqError::UnknownSelector(ref s)) if s == "inflow"));
        assert_eq!("both".parse::<NonDetectCombination>().ok(), Some(NonDetectCombination::Both));
    }

    #[test]
    fn median_interval_overlap() {
        let near = PairedComparison::new(
            shared(testdata::reference_rows(0.0), SiteType::Inflow),
            shared(testdata::reference_rows(0.5), SiteType::Outflow),
        );
        assert!(near.median_cis_overlap());

        let far = PairedComparison::new(
            shared(testdata::reference_rows(50.0), SiteType::Inflow),
            shared(testdata::reference_rows(0.0), SiteType::Outflow),
        );
        assert!(!far.median_cis_overlap());

        let empty = PairedComparison::new(
            shared(Vec::new(), SiteType::Inflow),
            shared(testdata::reference_rows(0.0), SiteType::Outflow),
        );
        assert!(empty.median_cis_overlap());
        assert!(!empty.non_paired_stats());
        assert!(empty.mann_whitney().is_none());
    }

    #[test]
    fn mutation_of_a_set_invalidates() {
        let cmp = shifted_pair();
        assert_eq!(cmp.n_pairs(), 35);
        assert!(cmp.kendall().is_some());

        cmp.effluent()
            .borrow_mut()
            .replace_data(testdata::reference_rows(-1.5)[..18].to_vec());
        assert_eq!(cmp.n_pairs(), 18);
        assert!(cmp.kendall().is_none());
    }

    #[test]
    fn include_defaults_to_both_sets() {
        let mut cmp = shifted_pair();
        assert!(cmp.include());
        cmp.influent().borrow_mut().set_include(false);
        assert!(cmp.exclude());
        cmp.set_include(true);
        assert!(cmp.include());
    }
}
