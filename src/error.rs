//! Error types for u-wqstats.
//!
//! Only contract violations surface as errors. Statistics whose
//! preconditions are not met (too few points, too many non-detects,
//! non-positive values in log space) are reported as `None` or `NaN`
//! by the type that owns them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WqError {
    /// A non-detect combination selector outside the known set.
    #[error("unknown non-detect selector: {0:?} (expected \"both\", \"influent\", \"effluent\" or \"neither\")")]
    UnknownSelector(String),

    /// The censored-value estimator cannot regress on this sample.
    #[error("imputation unavailable: {reason}")]
    ImputationUnavailable { reason: String },

    /// A site label that does not appear in the collection.
    #[error("unknown site: {0}")]
    UnknownSite(String),

    /// A record lacks a label required by the collection's grouping.
    #[error("missing column: {0}")]
    MissingColumn(String),
}

pub type Result<T> = std::result::Result<T, WqError>;
