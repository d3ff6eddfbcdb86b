//! Self-healer - reactive and predictive remediation for Kubernetes workloads
//!
//! Polls Prometheus, classifies CPU spikes, forecasts memory and disk, and
//! dispatches remediation actions through the Kubernetes API.

use anyhow::{Context, Result};
use healer_lib::{
    api::{self, AppState},
    dispatch::KubeControlPlane,
    health::{Component, HealthRegistry},
    observability::{HealerMetrics, StructuredLogger},
    ActuationDispatcher, AnomalyDetector, ControlLoop, DecisionEngine, PrometheusProvider,
    ServiceContext, TrendForecaster,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const HEALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting self-healer");

    let config = config::HealerConfig::load()?;
    info!(
        node_name = %config.node_name,
        prometheus_url = %config.prometheus_url,
        poll_interval_secs = config.poll_interval_secs,
        "Healer configured"
    );

    let health_registry = HealthRegistry::new();

    let metrics = HealerMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    // A missing model disables reactive detection only, unless required
    let detector =
        match AnomalyDetector::from_path(&config.model_path, config.model_sha256.as_deref()) {
            Ok(detector) => detector,
            Err(e) if config.require_model => {
                return Err(e).context("Detection model is required");
            }
            Err(e) => {
                warn!(error = %e, "Running without a detection model");
                health_registry.record_error(Component::Detector, &e).await;
                AnomalyDetector::unavailable()
            }
        };
    metrics.set_model_loaded(detector.model_loaded());

    let forecaster = TrendForecaster::new(config.forecast_config())?;
    let engine = DecisionEngine::new(config.rule_config())?;
    let provider = PrometheusProvider::new(config.provider_config())?;
    // A dry run never touches the cluster, so it needs no kubeconfig
    let dispatcher = if config.dry_run {
        ActuationDispatcher::dry_run(config.dispatch_config())
    } else {
        let control_plane = KubeControlPlane::try_default().await?;
        ActuationDispatcher::new(Arc::new(control_plane), config.dispatch_config())
    };

    let ctx = Arc::new(ServiceContext::new(
        Arc::new(provider),
        detector,
        forecaster,
        config.context_config(),
    ));

    logger.log_startup(
        HEALER_VERSION,
        ctx.detector().model_version(),
        dispatcher.is_dry_run(),
    );

    let app_state = Arc::new(AppState::new(
        ctx.clone(),
        health_registry.clone(),
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let control = ControlLoop::new(
        ctx,
        engine,
        dispatcher,
        config.poll_interval(),
        health_registry.clone(),
        logger.clone(),
    );
    let control_handle = tokio::spawn(control.run(shutdown_rx));

    // Mark healer as ready after initialization
    health_registry.set_ready(true).await;

    // Start the HTTP API
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
                Ok(Ok(())) => {}
            }
            logger.log_shutdown("API server stopped");
        }
    }

    health_registry.set_ready(false).await;
    // A send error only means the loop already exited
    let _ = shutdown_tx.send(());
    if let Err(e) = control_handle.await {
        error!(error = %e, "Control loop task failed");
    }
    info!("Shutting down");

    Ok(())
}
