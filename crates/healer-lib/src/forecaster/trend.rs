//! Piecewise-linear trend with changepoints
//!
//! The model is `y(t) = m + k*t + sum_j delta_j * max(t - s_j, 0)` on
//! normalised time `t` in [0, 1] and values scaled by the history's largest
//! magnitude. Changepoint deltas carry a ridge penalty whose strength comes
//! from the changepoint prior scale.

use super::ForecastConfig;
use crate::error::{HealerError, HealerResult};
use crate::models::MetricSample;
use chrono::{DateTime, Utc};

/// Nominal observation noise (in scaled units) used to turn the prior scale
/// into a ridge penalty
const NOMINAL_NOISE: f64 = 0.05;

/// Tiny penalty on offset and rate to keep the normal equations well posed
const BASE_RIDGE: f64 = 1e-9;

/// A fitted trend
#[derive(Debug, Clone)]
pub(crate) struct TrendModel {
    t_start: DateTime<Utc>,
    span_ms: f64,
    y_scale: f64,
    offset: f64,
    rate: f64,
    changepoints: Vec<f64>,
    deltas: Vec<f64>,
    /// Residual standard deviation in scaled units
    sigma: f64,
    /// Mean absolute changepoint delta in scaled units
    mean_abs_delta: f64,
}

impl TrendModel {
    /// Fit on `samples`, which must hold at least two strictly increasing timestamps
    pub(crate) fn fit(samples: &[MetricSample], config: &ForecastConfig) -> HealerResult<Self> {
        let n = samples.len();
        if n < 2 {
            return Err(HealerError::InsufficientHistory {
                samples: n,
                required: 2,
            });
        }

        let t_start = samples[0].timestamp;
        let span_ms = (samples[n - 1].timestamp - t_start).num_milliseconds() as f64;
        if span_ms <= 0.0 {
            return Err(HealerError::InsufficientHistory {
                samples: 1,
                required: 2,
            });
        }

        let y_scale = samples
            .iter()
            .map(|s| s.value.abs())
            .fold(0.0, f64::max);
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };

        let t: Vec<f64> = samples
            .iter()
            .map(|s| (s.timestamp - t_start).num_milliseconds() as f64 / span_ms)
            .collect();
        let y: Vec<f64> = samples.iter().map(|s| s.value / y_scale).collect();

        let changepoints = place_changepoints(&t, config);
        let p = 2 + changepoints.len();

        // Normal equations (X'X + L) beta = X'y
        let mut xtx = vec![vec![0.0; p]; p];
        let mut xty = vec![0.0; p];
        let mut row = vec![0.0; p];
        for (ti, yi) in t.iter().zip(&y) {
            design_row(*ti, &changepoints, &mut row);
            for a in 0..p {
                xty[a] += row[a] * yi;
                for b in a..p {
                    xtx[a][b] += row[a] * row[b];
                }
            }
        }
        for a in 0..p {
            for b in 0..a {
                xtx[a][b] = xtx[b][a];
            }
        }

        let ridge = (NOMINAL_NOISE / config.changepoint_prior_scale).powi(2);
        xtx[0][0] += BASE_RIDGE;
        xtx[1][1] += BASE_RIDGE;
        for j in 2..p {
            xtx[j][j] += ridge;
        }

        let beta = solve(xtx, xty).ok_or_else(|| {
            HealerError::InvalidSeries("trend normal equations are singular".to_string())
        })?;

        let offset = beta[0];
        let rate = beta[1];
        let deltas = beta[2..].to_vec();

        let mut model = Self {
            t_start,
            span_ms,
            y_scale,
            offset,
            rate,
            mean_abs_delta: if deltas.is_empty() {
                0.0
            } else {
                deltas.iter().map(|d| d.abs()).sum::<f64>() / deltas.len() as f64
            },
            changepoints,
            deltas,
            sigma: 0.0,
        };

        let sse: f64 = t
            .iter()
            .zip(&y)
            .map(|(ti, yi)| (yi - model.trend_scaled(*ti)).powi(2))
            .sum();
        model.sigma = (sse / n as f64).sqrt();

        Ok(model)
    }

    fn normalise(&self, timestamp: DateTime<Utc>) -> f64 {
        (timestamp - self.t_start).num_milliseconds() as f64 / self.span_ms
    }

    fn trend_scaled(&self, t: f64) -> f64 {
        let mut value = self.offset + self.rate * t;
        for (s, delta) in self.changepoints.iter().zip(&self.deltas) {
            if t > *s {
                value += delta * (t - s);
            }
        }
        value
    }

    /// Standard deviation of the prediction at normalised time `t`, scaled units
    ///
    /// Past the end of history, future rate changes arrive at the fitted
    /// changepoint density with the fitted mean magnitude, so the trend
    /// variance grows with the cube of the distance.
    fn std_dev_scaled(&self, t: f64) -> f64 {
        let ahead = (t - 1.0).max(0.0);
        let density = self.changepoints.len() as f64;
        let trend_var =
            density * 2.0 * self.mean_abs_delta.powi(2) * ahead.powi(3) / 3.0;
        (self.sigma.powi(2) + trend_var).sqrt()
    }

    /// Point estimate and standard deviation at `timestamp`, original units
    pub(crate) fn predict(&self, timestamp: DateTime<Utc>) -> (f64, f64) {
        let t = self.normalise(timestamp);
        (
            self.trend_scaled(t) * self.y_scale,
            self.std_dev_scaled(t) * self.y_scale,
        )
    }

    /// Final growth rate in original units per normalised time unit
    #[cfg(test)]
    pub(crate) fn final_rate(&self) -> f64 {
        (self.rate + self.deltas.iter().sum::<f64>()) * self.y_scale
    }
}

/// Evenly spaced changepoints over the first `changepoint_range` of history
fn place_changepoints(t: &[f64], config: &ForecastConfig) -> Vec<f64> {
    let hist_size = (t.len() as f64 * config.changepoint_range).floor() as usize;
    let count = config.n_changepoints.min(hist_size.saturating_sub(1));
    if count == 0 {
        return Vec::new();
    }

    let last = (hist_size - 1) as f64;
    (1..=count)
        .map(|i| {
            let index = (last * i as f64 / count as f64).round() as usize;
            t[index]
        })
        .collect()
}

fn design_row(t: f64, changepoints: &[f64], row: &mut [f64]) {
    row[0] = 1.0;
    row[1] = t;
    for (j, s) in changepoints.iter().enumerate() {
        row[2 + j] = (t - s).max(0.0);
    }
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < f64::EPSILON {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for r in (col + 1)..n {
            let factor = a[r][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                a[r][c] -= factor * a[col][c];
            }
            b[r] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for r in (0..n).rev() {
        let tail: f64 = ((r + 1)..n).map(|c| a[r][c] * x[c]).sum();
        x[r] = (b[r] - tail) / a[r][r];
    }
    Some(x)
}

/// Two-sided standard normal quantile for an interval of `width`
pub(crate) fn interval_z(width: f64) -> f64 {
    inverse_normal_cdf(0.5 + width / 2.0)
}

/// Acklam's rational approximation of the standard normal quantile
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p <= P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -inverse_normal_cdf(1.0 - p)
    }
}
