//! Healer configuration
//!
//! Read from an optional file (`HEALER_CONFIG_FILE`, default `healer.toml`)
//! overlaid by `HEALER_*` environment variables. Every field has a default.

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::ConfigBuilder;
use healer_lib::{
    ActionKind, ContextConfig, DispatchConfig, ForecastConfig, ProviderConfig, RuleConfig,
    SeriesQuery, SignalPipeline, StageTimeouts, TargetRef, validate_horizon,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE_ENV: &str = "HEALER_CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "healer.toml";

/// Healer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HealerConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// HTTP API port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Isolation forest artifact
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    /// Expected SHA-256 of the artifact, hex encoded
    #[serde(default)]
    pub model_sha256: Option<String>,
    /// Refuse to start without a model instead of running forecasts only
    #[serde(default)]
    pub require_model: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_cpu_query")]
    pub cpu_query: String,
    #[serde(default = "default_cpu_lookback")]
    pub cpu_lookback_secs: u64,
    #[serde(default = "default_cpu_step")]
    pub cpu_step_secs: u64,

    #[serde(default = "default_memory_query")]
    pub memory_query: String,
    #[serde(default = "default_memory_lookback")]
    pub memory_lookback_secs: u64,
    #[serde(default = "default_memory_step")]
    pub memory_step_secs: u64,
    #[serde(default = "default_memory_horizon")]
    pub memory_horizon_steps: usize,

    #[serde(default = "default_disk_query")]
    pub disk_query: String,
    #[serde(default = "default_disk_lookback")]
    pub disk_lookback_secs: u64,
    #[serde(default = "default_disk_step")]
    pub disk_step_secs: u64,
    #[serde(default = "default_disk_horizon")]
    pub disk_horizon_steps: usize,

    #[serde(default = "default_memory_growth_threshold")]
    pub memory_growth_threshold: f64,
    /// Percent used above which the disk rule fires immediately
    #[serde(default = "default_disk_capacity_threshold")]
    pub disk_capacity_threshold: f64,
    /// Percent used whose forecast crossing yields the ETA
    #[serde(default = "default_disk_critical_threshold")]
    pub disk_critical_threshold: f64,
    #[serde(default = "default_disk_eta_threshold_days")]
    pub disk_eta_threshold_days: f64,
    #[serde(default = "default_disk_action")]
    pub disk_action: ActionKind,

    #[serde(default = "default_reactive_target")]
    pub reactive_target: TargetRef,
    #[serde(default = "default_leaking_target")]
    pub leaking_target: TargetRef,
    #[serde(default = "default_storage_target")]
    pub storage_target: TargetRef,

    #[serde(default = "default_reactive_timeout")]
    pub reactive_timeout_secs: u64,
    #[serde(default = "default_forecast_timeout")]
    pub forecast_timeout_secs: u64,
    #[serde(default = "default_actuation_timeout")]
    pub actuation_timeout_secs: u64,

    #[serde(default = "default_changepoint_prior_scale")]
    pub changepoint_prior_scale: f64,
    #[serde(default = "default_interval_width")]
    pub interval_width: f64,

    /// Log actions instead of performing them; no Kubernetes client is built
    #[serde(default)]
    pub dry_run: bool,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8000
}

fn default_prometheus_url() -> String {
    ProviderConfig::default().base_url
}

fn default_request_timeout() -> u64 {
    ProviderConfig::default().request_timeout.as_secs()
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/iso_forest.json")
}

fn default_poll_interval() -> u64 {
    10
}

fn default_cpu_query() -> String {
    ContextConfig::default().cpu_query.expression
}

fn default_cpu_lookback() -> u64 {
    ContextConfig::default().cpu_query.lookback.as_secs()
}

fn default_cpu_step() -> u64 {
    ContextConfig::default().cpu_query.step.as_secs()
}

fn default_memory_query() -> String {
    ContextConfig::default().memory.query.expression
}

fn default_memory_lookback() -> u64 {
    ContextConfig::default().memory.query.lookback.as_secs()
}

fn default_memory_step() -> u64 {
    ContextConfig::default().memory.query.step.as_secs()
}

fn default_memory_horizon() -> usize {
    ContextConfig::default().memory.horizon_steps
}

fn default_disk_query() -> String {
    ContextConfig::default().disk.query.expression
}

fn default_disk_lookback() -> u64 {
    ContextConfig::default().disk.query.lookback.as_secs()
}

fn default_disk_step() -> u64 {
    ContextConfig::default().disk.query.step.as_secs()
}

fn default_disk_horizon() -> usize {
    ContextConfig::default().disk.horizon_steps
}

fn default_memory_growth_threshold() -> f64 {
    RuleConfig::default().growth_threshold
}

fn default_disk_capacity_threshold() -> f64 {
    RuleConfig::default().capacity_threshold
}

fn default_disk_critical_threshold() -> f64 {
    ContextConfig::default().disk.critical_threshold
}

fn default_disk_eta_threshold_days() -> f64 {
    RuleConfig::default().eta_threshold_days
}

fn default_disk_action() -> ActionKind {
    RuleConfig::default().disk_action
}

fn default_reactive_target() -> TargetRef {
    RuleConfig::default().reactive_target
}

fn default_leaking_target() -> TargetRef {
    RuleConfig::default().leaking_target
}

fn default_storage_target() -> TargetRef {
    RuleConfig::default().storage_target
}

fn default_reactive_timeout() -> u64 {
    StageTimeouts::default().reactive.as_secs()
}

fn default_forecast_timeout() -> u64 {
    StageTimeouts::default().forecast.as_secs()
}

fn default_actuation_timeout() -> u64 {
    DispatchConfig::default().actuation_timeout.as_secs()
}

fn default_changepoint_prior_scale() -> f64 {
    ForecastConfig::default().changepoint_prior_scale
}

fn default_interval_width() -> f64 {
    ForecastConfig::default().interval_width
}

impl HealerConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let file =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(config::Environment::with_prefix("HEALER").try_parsing(true));

        Self::from_builder(builder)
            .with_context(|| format!("Failed to load configuration ({})", file))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: HealerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let nonzero = [
            ("poll_interval_secs", self.poll_interval_secs),
            ("cpu_step_secs", self.cpu_step_secs),
            ("memory_step_secs", self.memory_step_secs),
            ("disk_step_secs", self.disk_step_secs),
            ("reactive_timeout_secs", self.reactive_timeout_secs),
            ("forecast_timeout_secs", self.forecast_timeout_secs),
            ("actuation_timeout_secs", self.actuation_timeout_secs),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            anyhow::bail!("{} must be greater than zero", name);
        }
        validate_horizon(
            self.memory_horizon_steps,
            Duration::from_secs(self.memory_step_secs),
        )
        .context("memory forecast")?;
        validate_horizon(self.disk_horizon_steps, Duration::from_secs(self.disk_step_secs))
            .context("disk forecast")?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            base_url: self.prometheus_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            cpu_query: SeriesQuery::new(
                &self.cpu_query,
                Duration::from_secs(self.cpu_lookback_secs),
                Duration::from_secs(self.cpu_step_secs),
            ),
            memory: SignalPipeline {
                query: SeriesQuery::new(
                    &self.memory_query,
                    Duration::from_secs(self.memory_lookback_secs),
                    Duration::from_secs(self.memory_step_secs),
                ),
                horizon_steps: self.memory_horizon_steps,
                critical_threshold: f64::MAX,
            },
            disk: SignalPipeline {
                query: SeriesQuery::new(
                    &self.disk_query,
                    Duration::from_secs(self.disk_lookback_secs),
                    Duration::from_secs(self.disk_step_secs),
                ),
                horizon_steps: self.disk_horizon_steps,
                critical_threshold: self.disk_critical_threshold,
            },
            timeouts: StageTimeouts {
                reactive: Duration::from_secs(self.reactive_timeout_secs),
                forecast: Duration::from_secs(self.forecast_timeout_secs),
            },
        }
    }

    pub fn forecast_config(&self) -> ForecastConfig {
        ForecastConfig {
            changepoint_prior_scale: self.changepoint_prior_scale,
            interval_width: self.interval_width,
            ..ForecastConfig::default()
        }
    }

    pub fn rule_config(&self) -> RuleConfig {
        RuleConfig {
            growth_threshold: self.memory_growth_threshold,
            capacity_threshold: self.disk_capacity_threshold,
            eta_threshold_days: self.disk_eta_threshold_days,
            disk_action: self.disk_action,
            reactive_target: self.reactive_target.clone(),
            leaking_target: self.leaking_target.clone(),
            storage_target: self.storage_target.clone(),
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            actuation_timeout: Duration::from_secs(self.actuation_timeout_secs),
            dry_run: self.dry_run,
        }
    }
}
