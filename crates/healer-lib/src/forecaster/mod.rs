//! Short-horizon trend forecasting
//!
//! Refits a changepoint trend on every call and extrapolates it over a
//! fixed number of future steps. Seasonality is not modelled: horizons run
//! from minutes to a couple of days.

mod trend;

use crate::error::{HealerError, HealerResult};
use crate::models::{CrossingEta, ForecastPoint, ForecastResult, MetricSeries};
use std::time::Duration;
use trend::{interval_z, TrendModel};

/// Milliseconds per day, for crossing ETAs
const MS_PER_DAY: f64 = 86_400_000.0;

/// Largest number of future points one forecast may project
pub const MAX_HORIZON_STEPS: usize = 10_000;

/// Largest span a forecast may project past its history
pub const MAX_HORIZON: Duration = Duration::from_secs(365 * 86_400);

/// Reject horizons that are empty or reach beyond [`MAX_HORIZON`]
pub fn validate_horizon(horizon_steps: usize, step: Duration) -> HealerResult<()> {
    if horizon_steps == 0 || step.is_zero() {
        return Err(HealerError::InvalidConfig(
            "forecast horizon needs at least one non-zero step".to_string(),
        ));
    }
    let span = u32::try_from(horizon_steps)
        .ok()
        .filter(|_| horizon_steps <= MAX_HORIZON_STEPS)
        .and_then(|steps| step.checked_mul(steps));
    match span {
        Some(span) if span <= MAX_HORIZON => Ok(()),
        _ => Err(HealerError::InvalidConfig(format!(
            "forecast horizon of {} x {:?} exceeds {} steps or {} days",
            horizon_steps,
            step,
            MAX_HORIZON_STEPS,
            MAX_HORIZON.as_secs() / 86_400
        ))),
    }
}

/// Trend model configuration
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    /// Maximum number of potential changepoints
    pub n_changepoints: usize,
    /// Fraction of history in which changepoints may be placed
    pub changepoint_range: f64,
    /// Flexibility of the trend; larger values follow recent slope changes harder
    pub changepoint_prior_scale: f64,
    /// Width of the uncertainty interval (0.8 = 80%)
    pub interval_width: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            n_changepoints: 25,
            changepoint_range: 0.8,
            changepoint_prior_scale: 0.05,
            interval_width: 0.8,
        }
    }
}

impl ForecastConfig {
    pub fn validate(&self) -> HealerResult<()> {
        if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
            return Err(HealerError::InvalidConfig(format!(
                "changepoint_range must be in (0, 1], got {}",
                self.changepoint_range
            )));
        }
        if !(self.changepoint_prior_scale > 0.0 && self.changepoint_prior_scale.is_finite()) {
            return Err(HealerError::InvalidConfig(format!(
                "changepoint_prior_scale must be positive, got {}",
                self.changepoint_prior_scale
            )));
        }
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(HealerError::InvalidConfig(format!(
                "interval_width must be in (0, 1), got {}",
                self.interval_width
            )));
        }
        Ok(())
    }
}

/// Fits a fresh trend per call; holds configuration only
#[derive(Debug, Clone, Default)]
pub struct TrendForecaster {
    config: ForecastConfig,
}

impl TrendForecaster {
    pub fn new(config: ForecastConfig) -> HealerResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Forecast `horizon_steps` points past the end of `history`
    ///
    /// The crossing ETA is measured from the last history sample, which for
    /// a live window is the evaluation time.
    pub fn forecast(
        &self,
        history: &MetricSeries,
        horizon_steps: usize,
        step: Duration,
        critical_threshold: f64,
    ) -> HealerResult<ForecastResult> {
        validate_horizon(horizon_steps, step)?;
        let steps = i32::try_from(horizon_steps)
            .map_err(|e| HealerError::InvalidConfig(format!("forecast horizon: {}", e)))?;
        let step = chrono::Duration::from_std(step)
            .map_err(|e| HealerError::InvalidConfig(format!("forecast step: {}", e)))?;

        let samples = history.samples();
        let model = TrendModel::fit(samples, &self.config)?;
        let z = interval_z(self.config.interval_width);

        let point_at = |timestamp| {
            let (estimate, sd) = model.predict(timestamp);
            ForecastPoint {
                timestamp,
                point_estimate: estimate,
                lower_bound: estimate - z * sd,
                upper_bound: estimate + z * sd,
            }
        };

        // Non-empty: the fit above requires two samples
        let last = samples[samples.len() - 1];
        let tail_len = horizon_steps.min(samples.len());
        let fitted_tail = samples[samples.len() - tail_len..]
            .iter()
            .map(|s| point_at(s.timestamp))
            .collect();

        let forecast_points = (1..=steps)
            .map(|i| {
                step.checked_mul(i)
                    .and_then(|offset| last.timestamp.checked_add_signed(offset))
                    .map(&point_at)
                    .ok_or_else(|| {
                        HealerError::InvalidSeries("forecast horizon overflows time".to_string())
                    })
            })
            .collect::<HealerResult<Vec<ForecastPoint>>>()?;

        let projected_value_at_horizon = forecast_points
            .last()
            .map(|p| p.point_estimate)
            .unwrap_or(last.value);

        let growth_ratio = if last.value > 0.0 {
            Some(projected_value_at_horizon / last.value)
        } else {
            None
        };

        let threshold_crossing_eta = forecast_points
            .iter()
            .find(|p| p.point_estimate >= critical_threshold)
            .map(|p| {
                let ms = (p.timestamp - last.timestamp).num_milliseconds() as f64;
                CrossingEta::from_days(ms / MS_PER_DAY)
            })
            .unwrap_or(CrossingEta::Safe);

        Ok(ForecastResult {
            history_tail_value: last.value,
            fitted_tail,
            forecast_points,
            projected_value_at_horizon,
            growth_ratio,
            threshold_crossing_eta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricSample;
    use chrono::{TimeZone, Utc};

    fn hourly_series(values: impl IntoIterator<Item = f64>) -> MetricSeries {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let samples = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| MetricSample::new(start + chrono::Duration::hours(i as i64), v))
            .collect();
        MetricSeries::new("signal", samples).unwrap()
    }

    fn noisy_growth() -> MetricSeries {
        // Deterministic jitter around a rising line
        hourly_series((0..72).map(|i| {
            let jitter = ((i * 37) % 11) as f64 - 5.0;
            400.0 + 1.5 * i as f64 + jitter
        }))
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_insufficient_history() {
        let forecaster = TrendForecaster::default();

        let empty = hourly_series(std::iter::empty());
        let single = hourly_series([42.0]);

        assert!(matches!(
            forecaster.forecast(&empty, 12, HOUR, 90.0),
            Err(HealerError::InsufficientHistory { samples: 0, .. })
        ));
        assert!(matches!(
            forecaster.forecast(&single, 12, HOUR, 90.0),
            Err(HealerError::InsufficientHistory { samples: 1, .. })
        ));
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let forecaster = TrendForecaster::default();
        let result = forecaster.forecast(&noisy_growth(), 0, HOUR, 90.0);
        assert!(matches!(result, Err(HealerError::InvalidConfig(_))));
    }

    #[test]
    fn test_oversized_horizon_rejected() {
        let forecaster = TrendForecaster::default();
        let history = noisy_growth();

        let too_many = forecaster.forecast(&history, usize::MAX, HOUR, 90.0);
        assert!(matches!(too_many, Err(HealerError::InvalidConfig(_))));

        let too_long = forecaster.forecast(&history, 10, Duration::from_secs(u64::MAX / 4), 90.0);
        assert!(matches!(too_long, Err(HealerError::InvalidConfig(_))));

        assert!(validate_horizon(MAX_HORIZON_STEPS, Duration::from_secs(3600)).is_ok());
        assert!(validate_horizon(MAX_HORIZON_STEPS + 1, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_forecast_points_are_ordered_and_bounded() {
        let forecaster = TrendForecaster::default();
        let history = noisy_growth();
        let last_ts = history.last().unwrap().timestamp;

        let result = forecaster.forecast(&history, 24, HOUR, 1_000.0).unwrap();

        assert_eq!(result.forecast_points.len(), 24);
        assert!(result.forecast_points[0].timestamp > last_ts);
        for pair in result.forecast_points.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
        for point in result.forecast_points.iter().chain(&result.fitted_tail) {
            assert!(point.lower_bound <= point.point_estimate);
            assert!(point.point_estimate <= point.upper_bound);
        }

        let first = &result.forecast_points[0];
        let last = &result.forecast_points[23];
        assert!(last.upper_bound - last.lower_bound >= first.upper_bound - first.lower_bound);
    }

    #[test]
    fn test_fitted_tail_covers_end_of_history() {
        let forecaster = TrendForecaster::default();
        let history = noisy_growth();

        let result = forecaster.forecast(&history, 6, HOUR, 1_000.0).unwrap();
        assert_eq!(result.fitted_tail.len(), 6);
        assert_eq!(
            result.fitted_tail.last().unwrap().timestamp,
            history.last().unwrap().timestamp
        );

        let short = hourly_series([1.0, 2.0, 3.0]);
        let result = forecaster.forecast(&short, 6, HOUR, 1_000.0).unwrap();
        assert_eq!(result.fitted_tail.len(), 3);
    }

    #[test]
    fn test_forecast_is_reproducible() {
        let forecaster = TrendForecaster::default();
        let history = noisy_growth();

        let first = forecaster.forecast(&history, 12, HOUR, 600.0).unwrap();
        let second = forecaster.forecast(&history, 12, HOUR, 600.0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_growth_ratio_for_steady_leak() {
        // 500 MB now, rising 5 MB per 10 minutes: 650 MB after five hours
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let samples = (0..=60)
            .map(|i| {
                MetricSample::new(
                    start + chrono::Duration::minutes(10 * i),
                    200.0 + 5.0 * i as f64,
                )
            })
            .collect();
        let history = MetricSeries::new("memory", samples).unwrap();

        let result = TrendForecaster::default()
            .forecast(&history, 30, Duration::from_secs(600), f64::MAX)
            .unwrap();

        assert_eq!(result.history_tail_value, 500.0);
        assert!((result.projected_value_at_horizon - 650.0).abs() < 1e-6);
        let ratio = result.growth_ratio.unwrap();
        assert!((ratio - 1.3).abs() < 1e-6);
        assert_eq!(result.threshold_crossing_eta, CrossingEta::Safe);
    }

    #[test]
    fn test_growth_ratio_undefined_for_zero_tail() {
        let history = hourly_series([3.0, 2.0, 1.0, 0.0]);
        let result = TrendForecaster::default()
            .forecast(&history, 4, HOUR, 90.0)
            .unwrap();
        assert_eq!(result.growth_ratio, None);
    }

    #[test]
    fn test_disk_crossing_in_thirty_six_hours() {
        // 55% now, rising just under one point per hour: 90% is first reached 36h out
        let history = hourly_series((0..48).map(|i| 55.0 - 0.99 * (47 - i) as f64));

        let result = TrendForecaster::default()
            .forecast(&history, 72, HOUR, 90.0)
            .unwrap();

        assert_eq!(result.history_tail_value, 55.0);
        assert_eq!(result.threshold_crossing_eta, CrossingEta::Days(1.5));
        assert_eq!(result.threshold_crossing_eta.to_string(), "1.5 days");
    }

    #[test]
    fn test_crossing_under_a_day_keeps_hours() {
        // 60% now, rising 1.32 points per hour: 90% is first reached 23h out
        let history = hourly_series((0..24).map(|i| 60.0 - 1.32 * (23 - i) as f64));

        let result = TrendForecaster::default()
            .forecast(&history, 48, HOUR, 90.0)
            .unwrap();

        let eta = result.threshold_crossing_eta;
        assert_eq!(eta.to_string(), "1.0 days");
        assert_eq!(eta, CrossingEta::Days(23.0 / 24.0));
        assert!(eta.is_sooner_than(1.0));
    }

    #[test]
    fn test_flat_signal_is_safe() {
        let history = hourly_series((0..24).map(|_| 40.0));
        let result = TrendForecaster::default()
            .forecast(&history, 48, HOUR, 90.0)
            .unwrap();

        assert_eq!(result.threshold_crossing_eta, CrossingEta::Safe);
        assert!((result.growth_ratio.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ForecastConfig {
            interval_width: 1.5,
            ..ForecastConfig::default()
        };
        assert!(TrendForecaster::new(config).is_err());
    }
}
