use serde::{Deserialize, Serialize};

use super::{Granularity, TimeWindow};

/// Relative change between neighbouring buckets that counts as movement.
pub const DIRECTION_THRESHOLD: f64 = 0.05;
/// Relative change on both sides of a bucket that makes it a change point.
pub const CHANGE_POINT_THRESHOLD: f64 = 0.20;
/// Below this R² a fitted slope is not trusted.
pub const MIN_R_SQUARED: f64 = 0.1;
/// Slope steeper than this share of the first bucket is volatile.
pub const VOLATILITY_RATIO: f64 = 0.05;
/// Mean lag-7 difference below this share of the mean is seasonal.
pub const SEASONALITY_RATIO: f64 = 0.10;
pub const SEASONAL_PERIOD: usize = 7;

const SLOPE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    Volatile,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
            TrendDirection::Volatile => "volatile",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendBucket {
    pub period: String,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
    /// Sample standard deviation, 0 for a single value
    pub stddev: f64,
    /// Relative change of the mean against the previous bucket
    pub change: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub metric_type: String,
    pub window: TimeWindow,
    pub granularity: Granularity,
    pub buckets: Vec<TrendBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePoint {
    pub period: String,
    pub value: f64,
    pub change_in: f64,
    pub change_out: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub metric_type: String,
    pub trend: TrendDirection,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// R² of the fit, 0 when there are too few buckets to fit
    pub trend_strength: f64,
    pub seasonality: bool,
    pub change_points: Vec<ChangePoint>,
    /// Next bucket: last value plus slope
    pub forecast: Option<f64>,
    pub bucket_count: usize,
}

/// Signed relative change from `previous` to `current`. A zero base
/// yields the sign of the move.
fn relative_change(previous: f64, current: f64) -> f64 {
    if previous == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            current.signum()
        }
    } else {
        (current - previous) / previous.abs()
    }
}

fn direction_of(change: f64) -> TrendDirection {
    if change > DIRECTION_THRESHOLD {
        TrendDirection::Increasing
    } else if change < -DIRECTION_THRESHOLD {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

/// Per-bucket statistics; the first bucket is always stable.
pub(crate) fn trend_buckets(groups: Vec<(String, Vec<f64>)>) -> Vec<TrendBucket> {
    let mut buckets: Vec<TrendBucket> = Vec::with_capacity(groups.len());
    for (period, values) in groups {
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let stddev = if count > 1 {
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        let change = buckets
            .last()
            .map(|prev| relative_change(prev.mean, mean))
            .unwrap_or(0.0);

        buckets.push(TrendBucket {
            period,
            mean,
            min,
            max,
            count,
            stddev,
            change,
            direction: direction_of(change),
        });
    }
    buckets
}

struct LinearFit {
    slope: f64,
    intercept: f64,
    r_squared: f64,
}

/// Ordinary least squares of `values` against their index.
fn fit_line(values: &[f64]) -> LinearFit {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, y) in values.iter().enumerate() {
        let x_diff = i as f64 - x_mean;
        numerator += x_diff * (y - y_mean);
        denominator += x_diff * x_diff;
    }
    let slope = if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    };
    let intercept = y_mean - slope * x_mean;

    let ss_res: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (slope * i as f64 + intercept)).powi(2))
        .sum();
    let ss_tot: f64 = values.iter().map(|y| (y - y_mean).powi(2)).sum();
    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        0.0
    };

    LinearFit {
        slope,
        intercept,
        r_squared,
    }
}

fn has_seasonality(values: &[f64]) -> bool {
    if values.len() <= SEASONAL_PERIOD {
        return false;
    }
    let diffs: Vec<f64> = values
        .windows(SEASONAL_PERIOD + 1)
        .map(|w| (w[SEASONAL_PERIOD] - w[0]).abs())
        .collect();
    let mean_diff = diffs.iter().sum::<f64>() / diffs.len() as f64;
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    mean_diff < SEASONALITY_RATIO * mean.abs()
}

fn change_points(periods: &[(String, f64)]) -> Vec<ChangePoint> {
    periods
        .windows(3)
        .filter_map(|w| {
            let (prev, (period, value), next) = (w[0].1, &w[1], w[2].1);
            if prev == 0.0 || *value == 0.0 {
                return None;
            }
            let change_in = relative_change(prev, *value);
            let change_out = relative_change(*value, next);
            (change_in.abs() > CHANGE_POINT_THRESHOLD && change_out.abs() > CHANGE_POINT_THRESHOLD)
                .then(|| ChangePoint {
                    period: period.clone(),
                    value: *value,
                    change_in,
                    change_out,
                })
        })
        .collect()
}

/// Trend of a series of bucket means, oldest first.
pub(crate) fn analyze(metric_type: &str, periods: &[(String, f64)]) -> TrendAnalysis {
    let values: Vec<f64> = periods.iter().map(|(_, v)| *v).collect();
    if values.len() < 3 {
        return TrendAnalysis {
            metric_type: metric_type.to_string(),
            trend: TrendDirection::Stable,
            slope: 0.0,
            intercept: values.first().copied().unwrap_or(0.0),
            r_squared: 0.0,
            trend_strength: 0.0,
            seasonality: false,
            change_points: Vec::new(),
            forecast: None,
            bucket_count: values.len(),
        };
    }

    let fit = fit_line(&values);
    let first = values[0];
    let trend = if fit.slope.abs() < SLOPE_EPSILON || fit.r_squared < MIN_R_SQUARED {
        TrendDirection::Stable
    } else if fit.slope.abs() > VOLATILITY_RATIO * first.abs() {
        TrendDirection::Volatile
    } else if fit.slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    TrendAnalysis {
        metric_type: metric_type.to_string(),
        trend,
        slope: fit.slope,
        intercept: fit.intercept,
        r_squared: fit.r_squared,
        trend_strength: fit.r_squared,
        seasonality: has_seasonality(&values),
        change_points: change_points(periods),
        forecast: values.last().map(|last| last + fit.slope),
        bucket_count: values.len(),
    }
}
