//! Prometheus HTTP API client
//!
//! Issues `query_range` requests and converts the first matrix result into
//! a [`MetricSeries`]. Transport and API errors surface as
//! [`HealerError::UpstreamUnavailable`].

use super::{MetricSeriesProvider, SeriesQuery};
use crate::error::{HealerError, HealerResult};
use crate::models::{MetricSample, MetricSeries};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const QUERY_RANGE_PATH: &str = "api/v1/query_range";
const READY_PATH: &str = "-/ready";

/// Configuration for the Prometheus client
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the Prometheus server
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://prometheus-kube-prometheus-prometheus.monitoring.svc:9090"
                .to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Metric provider backed by the Prometheus HTTP API
pub struct PrometheusProvider {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<MatrixData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixData {
    result_type: String,
    result: Vec<MatrixSeries>,
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl PrometheusProvider {
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        // A trailing slash keeps `join` from dropping the last path segment
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .map_err(|e| anyhow::anyhow!("Invalid Prometheus URL {}: {}", config.base_url, e))?;

        Ok(Self { client, base_url })
    }

    /// Range query ending at `end`
    pub async fn query_range(
        &self,
        query: &SeriesQuery,
        end: DateTime<Utc>,
    ) -> HealerResult<MetricSeries> {
        let lookback = chrono::Duration::from_std(query.lookback)
            .map_err(|e| HealerError::InvalidConfig(format!("lookback: {}", e)))?;
        let start = end - lookback;
        let url = self
            .base_url
            .join(QUERY_RANGE_PATH)
            .map_err(|e| HealerError::UpstreamUnavailable(e.to_string()))?;

        debug!(
            query = %query.expression,
            start = %start,
            end = %end,
            step_secs = query.step.as_secs(),
            "Querying metrics store"
        );

        let response = self
            .client
            .get(url)
            .query(&[
                ("query", query.expression.clone()),
                ("start", start.timestamp().to_string()),
                ("end", end.timestamp().to_string()),
                ("step", format!("{}s", query.step.as_secs().max(1))),
            ])
            .send()
            .await
            .map_err(|e| HealerError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        let body: ApiResponse = response.json().await.map_err(|e| {
            HealerError::UpstreamUnavailable(format!("invalid response ({}): {}", status, e))
        })?;

        if body.status != "success" {
            let message = body.error.unwrap_or_else(|| format!("status {}", status));
            warn!(query = %query.expression, error = %message, "Metrics store rejected query");
            return Err(HealerError::UpstreamUnavailable(message));
        }

        let data = body
            .data
            .ok_or_else(|| HealerError::UpstreamUnavailable("response has no data".to_string()))?;
        if data.result_type != "matrix" {
            return Err(HealerError::UpstreamUnavailable(format!(
                "expected matrix result, got {}",
                data.result_type
            )));
        }

        let samples = data
            .result
            .into_iter()
            .next()
            .map(|series| series.values)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(ts, raw)| {
                let timestamp = Utc
                    .timestamp_millis_opt((ts * 1000.0).round() as i64)
                    .single()?;
                let value = raw.parse::<f64>().ok()?;
                Some(MetricSample::new(timestamp, value))
            })
            .collect();

        Ok(MetricSeries::from_unsorted(query.expression.clone(), samples))
    }
}

#[async_trait]
impl MetricSeriesProvider for PrometheusProvider {
    async fn query(&self, query: &SeriesQuery) -> HealerResult<MetricSeries> {
        self.query_range(query, Utc::now()).await
    }

    async fn ping(&self) -> bool {
        let Ok(url) = self.base_url.join(READY_PATH) else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Metrics store readiness check failed");
                false
            }
        }
    }
}
