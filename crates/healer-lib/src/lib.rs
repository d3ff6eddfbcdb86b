//! Self-healing library for Kubernetes workloads
//!
//! This crate provides the core functionality for:
//! - Reactive anomaly detection with a pre-fit isolation forest
//! - Short-horizon trend forecasting for memory and disk
//! - Threshold rules that turn both into remediation actions
//! - Actuation against the Kubernetes API
//! - The HTTP surface, health checks and observability

pub mod api;
pub mod context;
pub mod control;
pub mod decision;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod forecaster;
pub mod health;
pub mod models;
pub mod observability;
pub mod provider;

pub use context::{ContextConfig, ServiceContext, SignalPipeline, StageTimeouts};
pub use control::{ControlLoop, CycleReport};
pub use decision::{CycleObservations, DecisionEngine, RuleConfig};
pub use detector::{AnomalyDetector, IsolationForest};
pub use dispatch::{ActuationDispatcher, ControlPlane, DispatchConfig, DispatchOutcome};
pub use error::{HealerError, HealerResult};
pub use forecaster::{validate_horizon, ForecastConfig, TrendForecaster};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthSnapshot, Readiness,
};
pub use models::*;
pub use observability::{HealerMetrics, StructuredLogger};
pub use provider::{MetricSeriesProvider, PrometheusProvider, ProviderConfig, SeriesQuery};
