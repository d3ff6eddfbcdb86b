//! Reactive anomaly detection
//!
//! Classifies every sample of a short metric window with a pre-fit
//! isolation forest. The model is loaded once at startup; a detector built
//! without one fails every call with [`HealerError::ModelUnavailable`].

mod isolation_forest;

pub use isolation_forest::{average_path_length, IsolationForest, IsolationTree, TreeNode};

#[cfg(test)]
pub(crate) use isolation_forest::tests::single_split_forest;

use crate::error::{HealerError, HealerResult};
use crate::models::{AnomalyLabel, DetectionResult, MetricSeries};
use std::path::Path;
use std::sync::Arc;

/// Point-anomaly classifier over a reactive window
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    model: Option<Arc<IsolationForest>>,
}

impl AnomalyDetector {
    pub fn new(model: IsolationForest) -> Self {
        Self {
            model: Some(Arc::new(model)),
        }
    }

    /// Load the model artifact at `path`, verifying its checksum when given
    pub fn from_path(path: &Path, expected_sha256: Option<&str>) -> HealerResult<Self> {
        let model = IsolationForest::load(path, expected_sha256)
            .map_err(|e| HealerError::ModelLoad(format!("{:#}", e)))?;
        Ok(Self::new(model))
    }

    /// A detector with no model; every classification fails
    pub fn unavailable() -> Self {
        Self { model: None }
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model.as_deref().map(|m| m.version.as_str())
    }

    /// Label each sample of `series` and summarise the window
    pub fn classify(&self, series: MetricSeries) -> HealerResult<DetectionResult> {
        let model = self.model.as_deref().ok_or(HealerError::ModelUnavailable)?;

        if series.is_empty() {
            return Err(HealerError::NoData {
                query: series.name().to_string(),
            });
        }

        let labels = series
            .values()
            .map(|value| {
                if model.is_outlier(value) {
                    AnomalyLabel::Anomalous
                } else {
                    AnomalyLabel::Normal
                }
            })
            .collect();

        DetectionResult::new(series, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::isolation_forest::tests::single_split_forest;
    use super::*;
    use crate::models::MetricSample;
    use chrono::{Duration, TimeZone, Utc};

    fn cpu_window(values: &[f64]) -> MetricSeries {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricSample::new(start + Duration::seconds(60 * i as i64), *v))
            .collect();
        MetricSeries::new("cpu", samples).unwrap()
    }

    #[test]
    fn test_classify_without_model_fails() {
        let detector = AnomalyDetector::unavailable();
        let result = detector.classify(cpu_window(&[0.2, 0.3]));
        assert_eq!(result, Err(HealerError::ModelUnavailable));
        assert!(!detector.model_loaded());
    }

    #[test]
    fn test_classify_empty_window_is_no_data() {
        let detector = AnomalyDetector::new(single_split_forest(0.8));
        let result = detector.classify(cpu_window(&[]));
        assert!(matches!(result, Err(HealerError::NoData { .. })));
    }

    #[test]
    fn test_classify_window_with_two_spikes() {
        let detector = AnomalyDetector::new(single_split_forest(0.8));
        let mut values: Vec<f64> = (0..28).map(|i| 0.3 + (i % 5) as f64 * 0.02).collect();
        values.push(0.92);
        values.push(0.85);

        let result = detector.classify(cpu_window(&values)).unwrap();

        assert_eq!(result.labels.len(), 30);
        assert_eq!(result.anomaly_count, 2);
        assert_eq!(result.current_value, 0.85);
        assert_eq!(result.labels[28], AnomalyLabel::Anomalous);
    }

    #[test]
    fn test_missing_model_file_is_model_load_error() {
        let result = AnomalyDetector::from_path(Path::new("/nonexistent/model.json"), None);
        assert!(matches!(result, Err(HealerError::ModelLoad(_))));
    }

    #[test]
    fn test_classify_is_deterministic() {
        let detector = AnomalyDetector::new(single_split_forest(0.5));
        let values = [0.1, 0.6, 0.4, 0.9, 0.2];

        let first = detector.classify(cpu_window(&values)).unwrap();
        let second = detector.classify(cpu_window(&values)).unwrap();
        assert_eq!(first, second);

        let counted = first
            .labels
            .iter()
            .filter(|l| **l == AnomalyLabel::Anomalous)
            .count();
        assert_eq!(first.anomaly_count, counted);
    }
}
