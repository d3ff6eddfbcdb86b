//! Metric series retrieval from the upstream metrics store

mod http;

pub use self::http::{PrometheusProvider, ProviderConfig};

use crate::error::HealerResult;
use crate::models::MetricSeries;
use async_trait::async_trait;
use std::time::Duration;

/// A range query: expression, how far back from now, and sample spacing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuery {
    pub expression: String,
    pub lookback: Duration,
    pub step: Duration,
}

impl SeriesQuery {
    pub fn new(expression: impl Into<String>, lookback: Duration, step: Duration) -> Self {
        Self {
            expression: expression.into(),
            lookback,
            step,
        }
    }
}

/// Source of ordered metric samples
#[async_trait]
pub trait MetricSeriesProvider: Send + Sync {
    /// Fetch the series for `query`; an empty series is a valid answer
    async fn query(&self, query: &SeriesQuery) -> HealerResult<MetricSeries>;

    /// Whether the store is reachable and ready
    async fn ping(&self) -> bool;
}
