//! HTTP API: live detection, forecasts, health and Prometheus metrics
//!
//! Handlers compute a fresh result per request from the shared
//! [`ServiceContext`]; they never touch the control loop.

use crate::context::ServiceContext;
use crate::error::HealerError;
use crate::health::{Component, ComponentHealth, ComponentStatus, HealthRegistry};
use crate::models::{DetectionResult, ForecastResult, MetricSample};
use crate::observability::HealerMetrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ServiceContext>,
    pub health_registry: HealthRegistry,
    pub metrics: HealerMetrics,
}

impl AppState {
    pub fn new(
        ctx: Arc<ServiceContext>,
        health_registry: HealthRegistry,
        metrics: HealerMetrics,
    ) -> Self {
        Self {
            ctx,
            health_registry,
            metrics,
        }
    }
}

/// Error payload: `{"status": "error", "message": ...}`
#[derive(Debug)]
pub struct ApiError(pub HealerError);

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            HealerError::ModelUnavailable | HealerError::ModelLoad(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            HealerError::NoData { .. } => StatusCode::NOT_FOUND,
            HealerError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            HealerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            HealerError::InsufficientHistory { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<HealerError> for ApiError {
    fn from(err: HealerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self.0, kind = self.0.kind(), "Request failed");
        }
        let body = ErrorBody {
            status: "error",
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Success envelope: `{"status": "success", ...payload}`
#[derive(Serialize)]
struct Success<T> {
    status: &'static str,
    #[serde(flatten)]
    data: T,
}

fn success<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        status: "success",
        data,
    })
}

#[derive(Serialize)]
struct LiveDetection<'a> {
    data_points_analyzed: usize,
    anomalies_detected: usize,
    anomalies: Vec<&'a MetricSample>,
    #[serde(flatten)]
    result: &'a DetectionResult,
}

#[derive(Serialize)]
struct HealthBody {
    status: ComponentStatus,
    model_loaded: bool,
    upstream_connected: bool,
    components: BTreeMap<Component, ComponentHealth>,
}

/// Health: 200 unless a component is unhealthy
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.snapshot().await;
    let ping_budget = state.ctx.config().timeouts.reactive;
    let upstream_connected = tokio::time::timeout(ping_budget, state.ctx.upstream_connected())
        .await
        .unwrap_or(false);

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let body = HealthBody {
        status: health.status,
        model_loaded: state.ctx.detector().model_loaded(),
        upstream_connected,
        components: health.components,
    };
    (status_code, Json(body))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Classify the live reactive window
async fn detect_live(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let result = state.ctx.detect_live().await?;
    state.metrics.set_anomalies_in_window(result.anomaly_count);

    let body = LiveDetection {
        data_points_analyzed: result.labels.len(),
        anomalies_detected: result.anomaly_count,
        anomalies: result.anomalies().collect(),
        result: &result,
    };
    Ok(success(body).into_response())
}

async fn predict_memory(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Success<ForecastResult>>, ApiError> {
    Ok(success(state.ctx.forecast_memory().await?))
}

async fn predict_disk(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Success<ForecastResult>>, ApiError> {
    Ok(success(state.ctx.forecast_disk().await?))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/detect/live", get(detect_live))
        .route("/predict/memory", get(predict_memory))
        .route("/predict/disk", get(predict_disk))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (HealerError::ModelUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (
                HealerError::NoData {
                    query: "up".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                HealerError::UpstreamUnavailable("refused".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                HealerError::Timeout {
                    stage: "detect",
                    after: std::time::Duration::from_secs(5),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                HealerError::InsufficientHistory {
                    samples: 1,
                    required: 2,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                HealerError::InvalidSeries("unordered".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError(err).status_code(), expected);
        }
    }
}
