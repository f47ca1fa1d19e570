//! Integration tests for metric analytics and the analysis cache.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use code_index_engine::analytics::{CorrelationStrength, Granularity, TimeWindow, TrendDirection};
use code_index_engine::cache::{AnalysisResult, CacheTable};
use code_index_engine::config::EngineConfig;
use code_index_engine::storage;
use code_index_engine::{Engine, EngineError, MetricRecord};

const DAY_SECS: i64 = 24 * 60 * 60;

fn open_engine(dir: &TempDir) -> Engine {
    let config = EngineConfig::with_state_dir(dir.path().join(".code-index"));
    Engine::open(config).expect("Failed to open engine")
}

/// One sample per day, oldest first, ending today.
fn daily_samples(metric_type: &str, values: &[f64]) -> Vec<MetricRecord> {
    let now = storage::now_secs();
    let today = now - now % DAY_SECS;
    let first_day = today - (values.len() as i64 - 1) * DAY_SECS;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            MetricRecord::new(metric_type, "total", *v, first_day + i as i64 * DAY_SECS + 60)
                .for_file("/project/src/main.rs")
        })
        .collect()
}

// ============================================================================
// Analytics
// ============================================================================

mod analytics {
    use super::*;

    #[tokio::test]
    async fn test_steady_growth_is_increasing() {
        let dir = TempDir::new().unwrap();
        let mut engine = open_engine(&dir);
        let values: Vec<f64> = (0..31).map(|i| 100.0 + i as f64).collect();
        engine
            .index()
            .record_metrics(&daily_samples("lines_of_code", &values))
            .unwrap();

        let analysis = engine.trend_analysis("lines_of_code", TimeWindow::All).unwrap();
        assert_eq!(analysis.bucket_count, 31);
        assert_eq!(analysis.trend, TrendDirection::Increasing);
        assert!((analysis.r_squared - 1.0).abs() < 1e-9);
        assert!((analysis.slope - 1.0).abs() < 1e-9);
        assert!(analysis.change_points.is_empty());

        let report = engine
            .trends("lines_of_code", TimeWindow::All, Granularity::Day)
            .unwrap();
        assert_eq!(report.buckets.len(), 31);
        assert_eq!(report.buckets[0].direction, TrendDirection::Stable);

        engine.close().await;
    }

    #[tokio::test]
    async fn test_two_buckets_are_neutral() {
        let dir = TempDir::new().unwrap();
        let mut engine = open_engine(&dir);
        engine
            .index()
            .record_metrics(&daily_samples("complexity", &[5.0, 50.0]))
            .unwrap();

        let analysis = engine.trend_analysis("complexity", TimeWindow::All).unwrap();
        assert_eq!(analysis.trend, TrendDirection::Stable);
        assert_eq!(analysis.trend_strength, 0.0);
        assert_eq!(analysis.bucket_count, 2);

        engine.close().await;
    }

    #[tokio::test]
    async fn test_correlation_of_mirrored_metrics() {
        let dir = TempDir::new().unwrap();
        let mut engine = open_engine(&dir);
        let now = storage::now_secs();
        let mut metrics = Vec::new();
        for i in 0..15 {
            let file = format!("/project/src/f{}.ts", i);
            let value = (i % 5) as f64 * 3.0 + i as f64;
            metrics.push(MetricRecord::new("symbols", "count", value, now).for_file(&file));
            metrics.push(MetricRecord::new("symbols_mirror", "count", value, now).for_file(&file));
            metrics.push(MetricRecord::new("symbols_inverse", "count", -value, now).for_file(&file));
        }
        engine.index().record_metrics(&metrics).unwrap();

        let same = engine
            .correlation("symbols", "symbols_mirror", TimeWindow::Week)
            .unwrap();
        assert!((same.coefficient - 1.0).abs() < 1e-12);
        assert_eq!(same.strength, CorrelationStrength::StrongPositive);
        assert!(!same.significant);

        let inverse = engine
            .correlation("symbols", "symbols_inverse", TimeWindow::Week)
            .unwrap();
        assert!((inverse.coefficient + 1.0).abs() < 1e-12);
        assert_eq!(inverse.strength, CorrelationStrength::StrongNegative);

        engine.close().await;
    }

    #[tokio::test]
    async fn test_empty_samples_and_overview() {
        let dir = TempDir::new().unwrap();
        let mut engine = open_engine(&dir);
        assert!(matches!(
            engine.statistical_summary("nothing", TimeWindow::All),
            Err(EngineError::EmptySample(_))
        ));
        assert!(matches!(
            engine.trends("nothing", TimeWindow::All, Granularity::Week),
            Err(EngineError::EmptySample(_))
        ));
        assert!(engine.metric_overview(TimeWindow::All).unwrap().is_empty());

        engine
            .index()
            .record_metrics(&daily_samples("lines_of_code", &[10.0, 20.0, 30.0]))
            .unwrap();
        let overview = engine.metric_overview(TimeWindow::All).unwrap();
        assert_eq!(overview.len(), 1);
        assert_eq!(overview[0].summary.count, 3);
        assert_eq!(overview[0].summary.median, 20.0);

        engine.close().await;
    }
}

// ============================================================================
// Cache
// ============================================================================

mod cache {
    use super::*;

    #[tokio::test]
    async fn test_maintenance_keeps_unexpired_entries() {
        let dir = TempDir::new().unwrap();
        let mut engine = open_engine(&dir);
        let cache = Arc::clone(engine.cache().unwrap());
        let result = AnalysisResult::Complexity {
            total: 3,
            max: 2,
            functions: 2,
        };

        cache
            .put_analysis("forever", None, "complexity", &result, 0.5, None)
            .unwrap();
        cache
            .put_analysis(
                "later",
                None,
                "complexity",
                &result,
                0.5,
                Some(Duration::from_secs(3600)),
            )
            .unwrap();
        cache
            .put_analysis(
                "soon",
                None,
                "complexity",
                &result,
                0.5,
                Some(Duration::from_millis(1)),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = engine.run_maintenance().unwrap();
        assert_eq!(report.total_expired(), 1);
        assert!(report.errors.is_empty());

        assert!(cache.get_analysis("forever").unwrap().is_some());
        assert!(cache.get_analysis("later").unwrap().is_some());
        assert!(cache.get_analysis("soon").unwrap().is_none());

        engine.close().await;
    }

    #[tokio::test]
    async fn test_overview_totals() {
        let dir = TempDir::new().unwrap();
        let mut engine = open_engine(&dir);

        let empty = engine.overview().unwrap();
        assert_eq!(empty.total_entries, 0);
        assert!(empty.tables.iter().all(|t| t.hit_rate == 0.0));

        let cache = Arc::clone(engine.cache().unwrap());
        cache
            .put_file_content("/project/a.ts", "abc", "{\"symbols\":[]}", None)
            .unwrap();
        cache
            .put_file_content("/project/b.ts", "def", "{}", None)
            .unwrap();

        let overview = engine.overview().unwrap();
        assert_eq!(overview.total_entries, 2);
        let table_sum: u64 = overview.tables.iter().map(|t| t.size_bytes).sum();
        assert_eq!(overview.total_size_bytes, table_sum);
        let files = overview.table(CacheTable::FileContent).unwrap();
        assert_eq!(files.total_entries, 2);
        assert_eq!(files.size_bytes, 16);

        engine.close().await;
    }

    #[tokio::test]
    async fn test_cache_is_unavailable_after_close() {
        let dir = TempDir::new().unwrap();
        let mut engine = open_engine(&dir);
        engine.close().await;
        engine.close().await;

        assert!(matches!(engine.cache(), Err(EngineError::Closed)));
        assert!(matches!(engine.run_maintenance(), Err(EngineError::Closed)));
        assert!(matches!(engine.health_metrics(), Err(EngineError::Closed)));
    }
}
