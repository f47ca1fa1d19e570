use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
    pub skewness: f64,
    /// Excess kurtosis (normal distribution = 0)
    pub kurtosis: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricOverviewEntry {
    pub metric_type: String,
    pub summary: StatisticalSummary,
}

/// Linear interpolation between closest ranks of sorted values.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let pos = p * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let fraction = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Describes `values`; `None` when there are none.
///
/// Skewness and kurtosis are population standardized moments; both are 0
/// when all values are equal.
pub fn summarize(values: &[f64]) -> Option<StatisticalSummary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let moment = |k: i32| sorted.iter().map(|v| (v - mean).powi(k)).sum::<f64>() / n;
    let m2 = moment(2);

    let stddev = if sorted.len() > 1 {
        (m2 * n / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    let (skewness, kurtosis) = if m2 > 0.0 {
        (moment(3) / m2.powf(1.5), moment(4) / (m2 * m2) - 3.0)
    } else {
        (0.0, 0.0)
    };

    Some(StatisticalSummary {
        count: sorted.len(),
        mean,
        median: quantile(&sorted, 0.5),
        stddev,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        q1: quantile(&sorted, 0.25),
        q3: quantile(&sorted, 0.75),
        skewness,
        kurtosis,
    })
}
