//! Configuration for observation sets, bootstrap runs, and collections.
//!
//! Qualifier-to-non-detect mapping lives here rather than in the data:
//! a row is censored when its qualifier matches one of
//! `non_detect_codes` exactly.
//!
//! # Examples
//!
//! ```
//! use u_wqstats::config::{BootstrapConfig, ObservationConfig};
//!
//! let cfg = ObservationConfig::default()
//!     .with_non_detect_codes(["ND", "<"])
//!     .with_bootstrap(BootstrapConfig::default().with_iterations(1500).with_seed(7));
//! assert!(cfg.is_non_detect("<"));
//! assert_eq!(cfg.bootstrap.n_iterations, 1500);
//! ```

use serde::{Deserialize, Serialize};

use crate::observation::SiteType;

/// Settings for the BCA bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Number of resamples. Default: 10 000.
    pub n_iterations: usize,
    /// Two-sided confidence level. Default: 0.95.
    pub confidence: f64,
    /// Base seed. `None` draws a fresh seed from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            n_iterations: 10_000,
            confidence: 0.95,
            seed: None,
        }
    }
}

impl BootstrapConfig {
    pub fn with_iterations(mut self, n_iterations: usize) -> Self {
        self.n_iterations = n_iterations;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Settings for a single [`ObservationSet`](crate::observation::ObservationSet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationConfig {
    /// Qualifiers that mark a result as non-detect. Default: `["ND"]`.
    pub non_detect_codes: Vec<String>,
    /// Bootstrap settings for the CI-bearing statistics.
    pub bootstrap: BootstrapConfig,
    /// Impute non-detects before computing statistics. Default: true.
    pub use_imputation: bool,
    /// Inclusion flag used when sets are selected programmatically. Default: true.
    pub include: bool,
    /// Role of the site. Default: inflow.
    pub site_type: SiteType,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            non_detect_codes: vec!["ND".to_string()],
            bootstrap: BootstrapConfig::default(),
            use_imputation: true,
            include: true,
            site_type: SiteType::Inflow,
        }
    }
}

impl ObservationConfig {
    pub fn with_non_detect_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_detect_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: BootstrapConfig) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_imputation(mut self, use_imputation: bool) -> Self {
        self.use_imputation = use_imputation;
        self
    }

    pub fn with_include(mut self, include: bool) -> Self {
        self.include = include;
        self
    }

    pub fn with_site_type(mut self, site_type: SiteType) -> Self {
        self.site_type = site_type;
        self
    }

    /// Returns true if `qualifier` is one of the configured non-detect codes.
    pub fn is_non_detect(&self, qualifier: &str) -> bool {
        self.non_detect_codes.iter().any(|c| c == qualifier)
    }
}

/// Settings for a [`Collection`](crate::collection::Collection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Label holding the site name. Default: `"station"`.
    pub site_column: String,
    /// Label holding the parameter name. Default: `"parameter"`.
    pub parameter_column: String,
    /// Extra grouping labels, in order.
    pub other_groups: Vec<String>,
    /// Labels that align rows of different sites for paired statistics.
    pub pair_groups: Vec<String>,
    /// Qualifiers that mark a result as non-detect. Default: `["ND"]`.
    pub non_detect_codes: Vec<String>,
    /// Impute non-detects per group. Default: true.
    pub use_imputation: bool,
    /// Bootstrap settings shared by every group.
    pub bootstrap: BootstrapConfig,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            site_column: "station".to_string(),
            parameter_column: "parameter".to_string(),
            other_groups: Vec::new(),
            pair_groups: Vec::new(),
            non_detect_codes: vec!["ND".to_string()],
            use_imputation: true,
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl CollectionConfig {
    pub fn with_site_column(mut self, column: impl Into<String>) -> Self {
        self.site_column = column.into();
        self
    }

    pub fn with_parameter_column(mut self, column: impl Into<String>) -> Self {
        self.parameter_column = column.into();
        self
    }

    pub fn with_other_groups<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.other_groups = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pair_groups<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pair_groups = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_non_detect_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_detect_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_imputation(mut self, use_imputation: bool) -> Self {
        self.use_imputation = use_imputation;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: BootstrapConfig) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn is_non_detect(&self, qualifier: &str) -> bool {
        self.non_detect_codes.iter().any(|c| c == qualifier)
    }

    /// Site, parameter, then other groups.
    pub fn group_columns(&self) -> Vec<String> {
        let mut cols = vec![self.site_column.clone(), self.parameter_column.clone()];
        cols.extend(self.other_groups.iter().cloned());
        cols
    }

    /// Parameter, then other groups (the site column is the comparison axis).
    pub fn comparison_columns(&self) -> Vec<String> {
        let mut cols = vec![self.parameter_column.clone()];
        cols.extend(self.other_groups.iter().cloned());
        cols
    }

    /// Per-observation settings derived from this collection.
    pub fn observation_config(&self, site_type: SiteType) -> ObservationConfig {
        ObservationConfig {
            non_detect_codes: self.non_detect_codes.clone(),
            bootstrap: self.bootstrap.clone(),
            use_imputation: self.use_imputation,
            include: true,
            site_type,
        }
    }
}
