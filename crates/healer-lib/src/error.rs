//! Error taxonomy for the healing pipeline
//!
//! Every stage of a cycle converts its failures into a [`HealerError`] at its
//! own boundary, so a failing stage degrades its contribution to the cycle
//! instead of aborting it.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the detection, forecasting and actuation stages
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HealerError {
    /// No detection model was loaded at startup
    #[error("detection model not loaded")]
    ModelUnavailable,

    /// The metrics store returned an empty window
    #[error("no samples returned for `{query}`")]
    NoData { query: String },

    /// The metrics store could not be reached or answered with an error
    #[error("metrics store unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Not enough history to fit a trend
    #[error("insufficient history: {samples} sample(s), need at least {required}")]
    InsufficientHistory { samples: usize, required: usize },

    /// A control plane operation failed
    #[error("actuation failed: {0}")]
    ActuationFailure(String),

    /// A stage did not finish within its budget
    #[error("{stage} timed out after {}ms", .after.as_millis())]
    Timeout { stage: &'static str, after: Duration },

    /// A series violated the strictly-increasing timestamp invariant
    #[error("invalid series: {0}")]
    InvalidSeries(String),

    /// The model artifact could not be read or failed validation
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A remediation target string could not be parsed
    #[error("invalid target `{0}`, expected <namespace>/<selector>")]
    InvalidTarget(String),
}

impl HealerError {
    /// Short machine-friendly label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            HealerError::ModelUnavailable => "model_unavailable",
            HealerError::NoData { .. } => "no_data",
            HealerError::UpstreamUnavailable(_) => "upstream_unavailable",
            HealerError::InsufficientHistory { .. } => "insufficient_history",
            HealerError::ActuationFailure(_) => "actuation_failure",
            HealerError::Timeout { .. } => "timeout",
            HealerError::InvalidSeries(_) => "invalid_series",
            HealerError::ModelLoad(_) => "model_load",
            HealerError::InvalidConfig(_) => "invalid_config",
            HealerError::InvalidTarget(_) => "invalid_target",
        }
    }
}

pub type HealerResult<T> = std::result::Result<T, HealerError>;
