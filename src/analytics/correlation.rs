use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Samples above this count make a correlation significant.
pub const SIGNIFICANCE_MIN_SAMPLES: usize = 30;
/// Samples above this count get a confidence interval.
pub const INTERVAL_MIN_SAMPLES: usize = 10;
const Z_95: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    StrongPositive,
    ModeratePositive,
    WeakPositive,
    NoCorrelation,
    WeakNegative,
    ModerateNegative,
    StrongNegative,
}

impl CorrelationStrength {
    /// Buckets |r| at 0.8 / 0.6 / 0.3.
    pub fn from_coefficient(r: f64) -> Self {
        let magnitude = r.abs();
        let positive = r >= 0.0;
        match (magnitude, positive) {
            (m, true) if m >= 0.8 => CorrelationStrength::StrongPositive,
            (m, false) if m >= 0.8 => CorrelationStrength::StrongNegative,
            (m, true) if m >= 0.6 => CorrelationStrength::ModeratePositive,
            (m, false) if m >= 0.6 => CorrelationStrength::ModerateNegative,
            (m, true) if m >= 0.3 => CorrelationStrength::WeakPositive,
            (m, false) if m >= 0.3 => CorrelationStrength::WeakNegative,
            _ => CorrelationStrength::NoCorrelation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationStrength::StrongPositive => "strong_positive",
            CorrelationStrength::ModeratePositive => "moderate_positive",
            CorrelationStrength::WeakPositive => "weak_positive",
            CorrelationStrength::NoCorrelation => "no_correlation",
            CorrelationStrength::WeakNegative => "weak_negative",
            CorrelationStrength::ModerateNegative => "moderate_negative",
            CorrelationStrength::StrongNegative => "strong_negative",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub metric_a: String,
    pub metric_b: String,
    pub coefficient: f64,
    pub sample_size: usize,
    pub strength: CorrelationStrength,
    pub significant: bool,
    /// 95% interval via the Fisher z-transform
    pub confidence_interval: Option<(f64, f64)>,
}

/// Value pairs of two metric types sampled for the same file on the same
/// UTC day.
pub(crate) fn joined_pairs(
    conn: &Connection,
    metric_a: &str,
    metric_b: &str,
    cutoff: Option<i64>,
) -> Result<Vec<(f64, f64)>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT a.value, b.value
        FROM metrics a
        JOIN metrics b
          ON b.file_path = a.file_path
         AND date(b.recorded_at, 'unixepoch') = date(a.recorded_at, 'unixepoch')
        WHERE a.metric_type = ?1
          AND b.metric_type = ?2
          AND a.file_path IS NOT NULL
          AND (?3 IS NULL OR a.recorded_at >= ?3)
          AND (?3 IS NULL OR b.recorded_at >= ?3)
        ORDER BY a.recorded_at, a.id, b.id
        "#,
    )?;
    let pairs = stmt
        .query_map(params![metric_a, metric_b, cutoff], |row| {
            Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(pairs)
}

/// Pearson's r over non-empty `pairs`. A series with zero variance has
/// r = 0.
pub(crate) fn pearson(metric_a: &str, metric_b: &str, pairs: &[(f64, f64)]) -> Correlation {
    let n = pairs.len();
    let nf = n as f64;
    let mean_a = pairs.iter().map(|(a, _)| a).sum::<f64>() / nf;
    let mean_b = pairs.iter().map(|(_, b)| b).sum::<f64>() / nf;

    let mut covariance = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (a, b) in pairs {
        let da = a - mean_a;
        let db = b - mean_b;
        covariance += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let coefficient = if var_a > 0.0 && var_b > 0.0 {
        (covariance / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    Correlation {
        metric_a: metric_a.to_string(),
        metric_b: metric_b.to_string(),
        coefficient,
        sample_size: n,
        strength: CorrelationStrength::from_coefficient(coefficient),
        significant: n > SIGNIFICANCE_MIN_SAMPLES,
        confidence_interval: (n > INTERVAL_MIN_SAMPLES).then(|| fisher_interval(coefficient, n)),
    }
}

fn fisher_interval(r: f64, n: usize) -> (f64, f64) {
    // atanh(±1) is infinite
    let z = r.clamp(-0.999_999, 0.999_999).atanh();
    let half_width = Z_95 / ((n - 3) as f64).sqrt();
    ((z - half_width).tanh(), (z + half_width).tanh())
}
