//! Time-series analytics over the append-only metrics table.
//!
//! SQLite has no STDDEV, MEDIAN or quantile aggregates, so samples are
//! selected with bound parameters and reduced in Rust. Time windows and
//! bucket granularities are closed enums; the `strftime` format a
//! granularity maps to is bound as a parameter, never spliced into SQL.

pub mod correlation;
pub mod summary;
pub mod trends;

use std::fmt;
use std::str::FromStr;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::index::SqliteIndex;
use crate::storage;

pub use correlation::{Correlation, CorrelationStrength};
pub use summary::{summarize, MetricOverviewEntry, StatisticalSummary};
pub use trends::{ChangePoint, TrendAnalysis, TrendBucket, TrendDirection, TrendReport};

const DAY_SECS: i64 = 24 * 60 * 60;

/// How far back samples are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Day,
    Week,
    Month,
    Quarter,
    Year,
    All,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::Quarter => "quarter",
            TimeWindow::Year => "year",
            TimeWindow::All => "all",
        }
    }

    /// Earliest `recorded_at` (unix seconds) inside the window, `None` for
    /// no bound.
    pub fn cutoff(&self, now_secs: i64) -> Option<i64> {
        let days = match self {
            TimeWindow::Day => 1,
            TimeWindow::Week => 7,
            TimeWindow::Month => 30,
            TimeWindow::Quarter => 90,
            TimeWindow::Year => 365,
            TimeWindow::All => return None,
        };
        Some(now_secs - days * DAY_SECS)
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" | "1d" => Ok(TimeWindow::Day),
            "week" | "7d" => Ok(TimeWindow::Week),
            "month" | "30d" => Ok(TimeWindow::Month),
            "quarter" | "90d" => Ok(TimeWindow::Quarter),
            "year" | "365d" => Ok(TimeWindow::Year),
            "all" => Ok(TimeWindow::All),
            other => Err(format!("unknown time window '{}'", other)),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Width of a trend bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// `strftime` format producing the bucket label. Labels sort
    /// chronologically as strings.
    pub fn strftime_format(&self) -> &'static str {
        match self {
            Granularity::Hour => "%Y-%m-%d %H:00",
            Granularity::Day => "%Y-%m-%d",
            Granularity::Week => "%Y-%m-%d",
            Granularity::Month => "%Y-%m",
        }
    }

    /// Date modifiers applied before formatting. A week is labelled by its
    /// Monday, so weeks spanning a year boundary stay in one bucket.
    pub fn date_modifiers(&self) -> [&'static str; 2] {
        match self {
            Granularity::Week => ["-6 days", "weekday 1"],
            _ => ["+0 days", "+0 days"],
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            other => Err(format!("unknown granularity '{}'", other)),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only analytics over an index. Every query checks out its own
/// pooled connection and returns it before the next one starts.
pub struct MetricAnalytics<'a> {
    index: &'a SqliteIndex,
}

impl<'a> MetricAnalytics<'a> {
    pub fn new(index: &'a SqliteIndex) -> Self {
        Self { index }
    }

    /// Distinct metric types with at least one sample.
    pub fn metric_types(&self) -> Result<Vec<String>> {
        let conn = self.index.acquire()?;
        let mut stmt = conn.prepare("SELECT DISTINCT metric_type FROM metrics ORDER BY metric_type")?;
        let types = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(types)
    }

    pub fn trends(
        &self,
        metric_type: &str,
        window: TimeWindow,
        granularity: Granularity,
    ) -> Result<TrendReport> {
        let buckets = self.bucketed(metric_type, window, granularity)?;
        Ok(TrendReport {
            metric_type: metric_type.to_string(),
            window,
            granularity,
            buckets: trends::trend_buckets(buckets),
        })
    }

    /// Regression over daily bucket means.
    pub fn trend_analysis(&self, metric_type: &str, window: TimeWindow) -> Result<TrendAnalysis> {
        let buckets = self.bucketed(metric_type, window, Granularity::Day)?;
        let periods: Vec<(String, f64)> = buckets
            .into_iter()
            .map(|(period, values)| {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                (period, mean)
            })
            .collect();
        Ok(trends::analyze(metric_type, &periods))
    }

    pub fn correlation(
        &self,
        metric_a: &str,
        metric_b: &str,
        window: TimeWindow,
    ) -> Result<Correlation> {
        let pairs = {
            let conn = self.index.acquire()?;
            correlation::joined_pairs(&conn, metric_a, metric_b, window.cutoff(storage::now_secs()))?
        };
        if pairs.is_empty() {
            return Err(EngineError::EmptySample(format!(
                "no same-file, same-day samples of '{}' and '{}'",
                metric_a, metric_b
            )));
        }
        Ok(correlation::pearson(metric_a, metric_b, &pairs))
    }

    pub fn statistical_summary(
        &self,
        metric_type: &str,
        window: TimeWindow,
    ) -> Result<StatisticalSummary> {
        let values = {
            let conn = self.index.acquire()?;
            sample_values(&conn, metric_type, window.cutoff(storage::now_secs()))?
        };
        summarize(&values).ok_or_else(|| {
            EngineError::EmptySample(format!("no samples of '{}' in window {}", metric_type, window))
        })
    }

    /// Summary per metric type. Types with no samples in the window are
    /// left out; a type whose query fails is logged and left out.
    pub fn metric_overview(&self, window: TimeWindow) -> Result<Vec<MetricOverviewEntry>> {
        let mut entries = Vec::new();
        for metric_type in self.metric_types()? {
            match self.statistical_summary(&metric_type, window) {
                Ok(summary) => entries.push(MetricOverviewEntry {
                    metric_type,
                    summary,
                }),
                Err(EngineError::EmptySample(_)) => {}
                Err(e) => tracing::error!("Failed to summarize metric '{}': {}", metric_type, e),
            }
        }
        Ok(entries)
    }

    /// Sample values grouped by bucket label, oldest bucket first.
    fn bucketed(
        &self,
        metric_type: &str,
        window: TimeWindow,
        granularity: Granularity,
    ) -> Result<Vec<(String, Vec<f64>)>> {
        let modifiers = granularity.date_modifiers();
        let conn = self.index.acquire()?;
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT strftime(?1, recorded_at, 'unixepoch', ?4, ?5) AS period, value
            FROM metrics
            WHERE metric_type = ?2 AND (?3 IS NULL OR recorded_at >= ?3)
            ORDER BY period, recorded_at
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![
                    granularity.strftime_format(),
                    metric_type,
                    window.cutoff(storage::now_secs()),
                    modifiers[0],
                    modifiers[1]
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if rows.is_empty() {
            return Err(EngineError::EmptySample(format!(
                "no samples of '{}' in window {}",
                metric_type, window
            )));
        }

        let mut buckets: Vec<(String, Vec<f64>)> = Vec::new();
        for (period, value) in rows {
            match buckets.last_mut() {
                Some((last, values)) if *last == period => values.push(value),
                _ => buckets.push((period, vec![value])),
            }
        }
        Ok(buckets)
    }
}

fn sample_values(conn: &Connection, metric_type: &str, cutoff: Option<i64>) -> Result<Vec<f64>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT value FROM metrics
        WHERE metric_type = ?1 AND (?2 IS NULL OR recorded_at >= ?2)
        "#,
    )?;
    let values = stmt
        .query_map(params![metric_type, cutoff], |row| row.get::<_, f64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::index::MetricRecord;
    use tempfile::TempDir;

    fn open_index(dir: &TempDir) -> SqliteIndex {
        SqliteIndex::open(dir.path().join("index.db"), &StorageConfig::default()).unwrap()
    }

    #[test]
    fn test_window_cutoff() {
        assert_eq!(TimeWindow::Day.cutoff(100_000), Some(100_000 - DAY_SECS));
        assert_eq!(TimeWindow::All.cutoff(100_000), None);
        assert_eq!("Quarter".parse::<TimeWindow>(), Ok(TimeWindow::Quarter));
        assert!("fortnight".parse::<TimeWindow>().is_err());
        assert_eq!("week".parse::<Granularity>(), Ok(Granularity::Week));
    }

    #[test]
    fn test_trends_bucket_by_day() {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir);
        let now = storage::now_secs();
        let day0 = now - now % DAY_SECS - 3 * DAY_SECS;
        let samples = [
            (day0, 10.0),
            (day0 + 60, 14.0),
            (day0 + DAY_SECS, 20.0),
            (day0 + 2 * DAY_SECS, 20.5),
        ];
        let metrics: Vec<_> = samples
            .iter()
            .map(|(at, v)| MetricRecord::new("loc", "total", *v, *at))
            .collect();
        index.record_metrics(&metrics).unwrap();

        let report = MetricAnalytics::new(&index)
            .trends("loc", TimeWindow::All, Granularity::Day)
            .unwrap();
        assert_eq!(report.buckets.len(), 3);
        assert_eq!(report.buckets[0].count, 2);
        assert_eq!(report.buckets[0].mean, 12.0);
        assert_eq!(report.buckets[0].min, 10.0);
        assert_eq!(report.buckets[0].max, 14.0);
        assert_eq!(report.buckets[0].direction, TrendDirection::Stable);
        assert_eq!(report.buckets[1].direction, TrendDirection::Increasing);
        assert_eq!(report.buckets[2].direction, TrendDirection::Stable);
    }

    #[test]
    fn test_week_spanning_new_year_is_one_bucket() {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir);
        // Mon 2024-12-30, Wed 2025-01-01, Sun 2025-01-05 noon, Mon 2025-01-06
        let samples = [
            (1_735_516_800, 1.0),
            (1_735_689_600, 2.0),
            (1_736_078_400, 3.0),
            (1_736_121_600, 10.0),
        ];
        let metrics: Vec<_> = samples
            .iter()
            .map(|(at, v)| MetricRecord::new("loc", "total", *v, *at))
            .collect();
        index.record_metrics(&metrics).unwrap();

        let report = MetricAnalytics::new(&index)
            .trends("loc", TimeWindow::All, Granularity::Week)
            .unwrap();
        assert_eq!(report.buckets.len(), 2);
        assert_eq!(report.buckets[0].period, "2024-12-30");
        assert_eq!(report.buckets[0].count, 3);
        assert_eq!(report.buckets[1].period, "2025-01-06");

        let hourly = MetricAnalytics::new(&index)
            .trends("loc", TimeWindow::All, Granularity::Hour)
            .unwrap();
        assert_eq!(hourly.buckets[2].period, "2025-01-05 12:00");
    }

    #[test]
    fn test_empty_samples_are_errors() {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir);
        let analytics = MetricAnalytics::new(&index);

        assert!(matches!(
            analytics.trends("loc", TimeWindow::All, Granularity::Day),
            Err(EngineError::EmptySample(_))
        ));
        assert!(matches!(
            analytics.statistical_summary("loc", TimeWindow::Week),
            Err(EngineError::EmptySample(_))
        ));
        assert!(matches!(
            analytics.correlation("a", "b", TimeWindow::All),
            Err(EngineError::EmptySample(_))
        ));
        assert!(analytics.metric_overview(TimeWindow::All).unwrap().is_empty());
    }

    #[test]
    fn test_window_excludes_old_samples() {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir);
        let now = storage::now_secs();
        index
            .record_metrics(&[
                MetricRecord::new("loc", "total", 1.0, now - 400 * DAY_SECS),
                MetricRecord::new("loc", "total", 3.0, now - 60),
                MetricRecord::new("symbols", "count", 2.0, now - 60),
            ])
            .unwrap();

        let analytics = MetricAnalytics::new(&index);
        assert_eq!(analytics.metric_types().unwrap(), vec!["loc", "symbols"]);
        let week = analytics.statistical_summary("loc", TimeWindow::Week).unwrap();
        assert_eq!(week.count, 1);
        assert_eq!(week.mean, 3.0);
        let all = analytics.statistical_summary("loc", TimeWindow::All).unwrap();
        assert_eq!(all.count, 2);

        let overview = analytics.metric_overview(TimeWindow::Week).unwrap();
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[1].metric_type, "symbols");
    }
}
