//! Core data models for the healing pipeline
//!
//! Every value here is rebuilt from scratch each cycle and never mutated
//! after construction.

use crate::error::{HealerError, HealerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single timestamped observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl MetricSample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Ordered samples for one named signal
///
/// Timestamps are strictly increasing; the constructors enforce it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSeries {
    name: String,
    samples: Vec<MetricSample>,
}

impl MetricSeries {
    /// Build a series, rejecting samples whose timestamps are not strictly increasing
    pub fn new(name: impl Into<String>, samples: Vec<MetricSample>) -> HealerResult<Self> {
        let name = name.into();
        if let Some(pos) = samples
            .windows(2)
            .position(|w| w[1].timestamp <= w[0].timestamp)
        {
            return Err(HealerError::InvalidSeries(format!(
                "`{}`: timestamp at index {} does not advance",
                name,
                pos + 1
            )));
        }
        Ok(Self { name, samples })
    }

    /// Build a series from raw upstream samples
    ///
    /// Non-finite values are dropped, samples are sorted by time and for
    /// duplicate timestamps the last reported value wins.
    pub fn from_unsorted(name: impl Into<String>, mut samples: Vec<MetricSample>) -> Self {
        samples.retain(|s| s.value.is_finite());
        samples.sort_by_key(|s| s.timestamp);

        let mut deduped: Vec<MetricSample> = Vec::with_capacity(samples.len());
        for sample in samples {
            match deduped.last_mut() {
                Some(last) if last.timestamp == sample.timestamp => *last = sample,
                _ => deduped.push(sample),
            }
        }

        Self {
            name: name.into(),
            samples: deduped,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&MetricSample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&MetricSample> {
        self.samples.last()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }
}

/// Per-sample classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyLabel {
    Normal,
    Anomalous,
}

/// Output of classifying a reactive window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub series: MetricSeries,
    /// Index-aligned with `series`
    pub labels: Vec<AnomalyLabel>,
    pub current_value: f64,
    pub anomaly_count: usize,
}

impl DetectionResult {
    /// Assemble a result, deriving the summary fields from the labels
    pub fn new(series: MetricSeries, labels: Vec<AnomalyLabel>) -> HealerResult<Self> {
        if labels.len() != series.len() {
            return Err(HealerError::InvalidSeries(format!(
                "{} labels for {} samples",
                labels.len(),
                series.len()
            )));
        }

        let current_value = series
            .last()
            .map(|s| s.value)
            .ok_or_else(|| HealerError::NoData {
                query: series.name().to_string(),
            })?;
        let anomaly_count = labels
            .iter()
            .filter(|l| **l == AnomalyLabel::Anomalous)
            .count();

        Ok(Self {
            series,
            labels,
            current_value,
            anomaly_count,
        })
    }

    /// Anomalous samples in chronological order
    pub fn anomalies(&self) -> impl Iterator<Item = &MetricSample> {
        self.series
            .samples()
            .iter()
            .zip(&self.labels)
            .filter(|(_, label)| **label == AnomalyLabel::Anomalous)
            .map(|(sample, _)| sample)
    }
}

/// A forecast estimate with its uncertainty interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Time until the forecast first reaches the critical threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CrossingEta {
    /// Days from evaluation time, unrounded; shown to one decimal
    Days(f64),
    /// No crossing within the forecast horizon
    Safe,
}

impl CrossingEta {
    pub fn from_days(days: f64) -> Self {
        CrossingEta::Days(days)
    }

    /// Days rounded to one decimal, as reported
    pub fn rounded_days(&self) -> Option<f64> {
        match self {
            CrossingEta::Days(d) => Some((d * 10.0).round() / 10.0),
            CrossingEta::Safe => None,
        }
    }

    /// True when a crossing is forecast strictly sooner than `days`
    ///
    /// Compares the unrounded ETA, so 23 hours is sooner than one day even
    /// though it reports as "1.0 days".
    pub fn is_sooner_than(&self, days: f64) -> bool {
        match self {
            CrossingEta::Days(d) => *d < days,
            CrossingEta::Safe => false,
        }
    }
}

impl fmt::Display for CrossingEta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rounded_days() {
            Some(d) => write!(f, "{:.1} days", d),
            None => write!(f, "safe"),
        }
    }
}

impl From<CrossingEta> for String {
    fn from(eta: CrossingEta) -> Self {
        eta.to_string()
    }
}

impl TryFrom<String> for CrossingEta {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "safe" {
            return Ok(CrossingEta::Safe);
        }
        value
            .strip_suffix(" days")
            .and_then(|d| d.parse::<f64>().ok())
            .map(CrossingEta::Days)
            .ok_or_else(|| format!("invalid crossing eta `{}`", value))
    }
}

/// Output of one trend forecast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub history_tail_value: f64,
    /// In-sample fitted values over the end of the history window
    pub fitted_tail: Vec<ForecastPoint>,
    /// Future points only, all later than the last history sample
    pub forecast_points: Vec<ForecastPoint>,
    pub projected_value_at_horizon: f64,
    /// `None` when the history tail is zero: no growth signal
    pub growth_ratio: Option<f64>,
    pub threshold_crossing_eta: CrossingEta,
}

/// Remediation operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    DeletePods,
    RestartWorkload,
    Cleanup,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::DeletePods => "delete_pods",
            ActionKind::RestartWorkload => "restart_workload",
            ActionKind::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule produced an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Reactive,
    MemoryTrend,
    DiskCapacity,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Reactive => write!(f, "reactive"),
            TriggerSource::MemoryTrend => write!(f, "memory_trend"),
            TriggerSource::DiskCapacity => write!(f, "disk_capacity"),
        }
    }
}

/// Workload selector of the form `<namespace>/<selector>`
///
/// For pod deletion the selector is a label selector; for restarts it names
/// a Deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetRef {
    pub namespace: String,
    pub selector: String,
}

impl TargetRef {
    pub fn new(namespace: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            selector: selector.into(),
        }
    }
}

impl FromStr for TargetRef {
    type Err = HealerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, selector)) if !ns.trim().is_empty() && !selector.trim().is_empty() => {
                Ok(TargetRef::new(ns.trim(), selector.trim()))
            }
            _ => Err(HealerError::InvalidTarget(s.to_string())),
        }
    }
}

impl TryFrom<String> for TargetRef {
    type Error = HealerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetRef> for String {
    fn from(target: TargetRef) -> Self {
        target.to_string()
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.selector)
    }
}

/// A corrective operation decided for the current cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub kind: ActionKind,
    pub target: TargetRef,
    pub reason: String,
    pub triggered_by: TriggerSource,
}

/// Ordered actions produced in one cycle
pub type DecisionSnapshot = Vec<RemediationAction>;
