//! Shared, immutable service state
//!
//! One [`ServiceContext`] is built at startup and shared by the control loop
//! and the HTTP handlers. Every call computes a fresh result from the
//! provider; nothing here is mutated after construction.

use crate::detector::AnomalyDetector;
use crate::error::{HealerError, HealerResult};
use crate::forecaster::TrendForecaster;
use crate::models::{DetectionResult, ForecastResult, MetricSeries};
use crate::provider::{MetricSeriesProvider, SeriesQuery};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Samples the trend fit needs before it can forecast
pub const MIN_FORECAST_SAMPLES: usize = 2;

/// A fetch-then-forecast pipeline for one signal
#[derive(Debug, Clone)]
pub struct SignalPipeline {
    pub query: SeriesQuery,
    /// Future points to project, spaced by the query step
    pub horizon_steps: usize,
    /// Level whose first crossing yields the ETA
    pub critical_threshold: f64,
}

/// Time budgets for the two stage families
#[derive(Debug, Clone)]
pub struct StageTimeouts {
    /// Fetch and classify the reactive window
    pub reactive: Duration,
    /// Fetch history and fit a forecast
    pub forecast: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            reactive: Duration::from_secs(5),
            forecast: Duration::from_secs(30),
        }
    }
}

/// Queries and pipelines served by the context
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub cpu_query: SeriesQuery,
    pub memory: SignalPipeline,
    pub disk: SignalPipeline,
    pub timeouts: StageTimeouts,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            cpu_query: SeriesQuery::new(
                "sum(rate(node_cpu_seconds_total[5m]))",
                Duration::from_secs(3600),
                Duration::from_secs(60),
            ),
            memory: SignalPipeline {
                query: SeriesQuery::new(
                    "sum(container_memory_working_set_bytes{pod=~\"memory-leak-app.*\"}) / 1048576",
                    Duration::from_secs(6 * 3600),
                    Duration::from_secs(600),
                ),
                horizon_steps: 30,
                critical_threshold: f64::MAX,
            },
            disk: SignalPipeline {
                query: SeriesQuery::new(
                    "100 * (1 - node_filesystem_avail_bytes{mountpoint=\"/\"} / node_filesystem_size_bytes{mountpoint=\"/\"})",
                    Duration::from_secs(48 * 3600),
                    Duration::from_secs(3600),
                ),
                horizon_steps: 72,
                critical_threshold: 90.0,
            },
            timeouts: StageTimeouts::default(),
        }
    }
}

/// Provider, detector and forecaster behind one handle
#[derive(Clone)]
pub struct ServiceContext {
    provider: Arc<dyn MetricSeriesProvider>,
    detector: AnomalyDetector,
    forecaster: TrendForecaster,
    config: ContextConfig,
}

impl ServiceContext {
    pub fn new(
        provider: Arc<dyn MetricSeriesProvider>,
        detector: AnomalyDetector,
        forecaster: TrendForecaster,
        config: ContextConfig,
    ) -> Self {
        Self {
            provider,
            detector,
            forecaster,
            config,
        }
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Whether the metrics store answers its readiness probe
    pub async fn upstream_connected(&self) -> bool {
        self.provider.ping().await
    }

    /// Classify the current reactive window
    pub async fn detect_live(&self) -> HealerResult<DetectionResult> {
        if !self.detector.model_loaded() {
            return Err(HealerError::ModelUnavailable);
        }

        let query = &self.config.cpu_query;
        let series = with_timeout("detect", self.config.timeouts.reactive, async {
            self.provider.query(query).await
        })
        .await?;

        debug!(query = %query.expression, samples = series.len(), "Reactive window fetched");
        self.detector.classify(series)
    }

    pub async fn forecast_memory(&self) -> HealerResult<ForecastResult> {
        self.forecast_signal("memory_forecast", &self.config.memory).await
    }

    pub async fn forecast_disk(&self) -> HealerResult<ForecastResult> {
        self.forecast_signal("disk_forecast", &self.config.disk).await
    }

    /// Fetch history for `pipeline` and project it forward
    ///
    /// The fetch and the fit share one budget; the fit runs on the blocking
    /// pool so a slow solve never stalls the runtime.
    pub async fn forecast_signal(
        &self,
        stage: &'static str,
        pipeline: &SignalPipeline,
    ) -> HealerResult<ForecastResult> {
        let forecaster = self.forecaster.clone();
        let pipeline = pipeline.clone();

        with_timeout(stage, self.config.timeouts.forecast, async move {
            let history = self.provider.query(&pipeline.query).await?;
            if history.len() < MIN_FORECAST_SAMPLES {
                return Err(HealerError::InsufficientHistory {
                    samples: history.len(),
                    required: MIN_FORECAST_SAMPLES,
                });
            }
            debug!(
                query = %pipeline.query.expression,
                samples = history.len(),
                horizon_steps = pipeline.horizon_steps,
                "Forecast history fetched"
            );

            tokio::task::spawn_blocking(move || fit(&forecaster, &history, &pipeline))
                .await
                .map_err(|e| HealerError::InvalidSeries(format!("forecast task failed: {}", e)))?
        })
        .await
    }
}

fn fit(
    forecaster: &TrendForecaster,
    history: &MetricSeries,
    pipeline: &SignalPipeline,
) -> HealerResult<ForecastResult> {
    forecaster.forecast(
        history,
        pipeline.horizon_steps,
        pipeline.query.step,
        pipeline.critical_threshold,
    )
}

async fn with_timeout<T>(
    stage: &'static str,
    after: Duration,
    fut: impl Future<Output = HealerResult<T>>,
) -> HealerResult<T> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| HealerError::Timeout { stage, after })?
}
