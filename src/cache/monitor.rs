//! Operator-facing cache reports.
//!
//! Reports never fail: a table whose statistics cannot be read is logged
//! and reported as empty.

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::cache::{CacheTable, SqliteCache, TableStats};
use crate::storage;

const SIZE_WARNING_BYTES: u64 = 500 * 1024 * 1024;
const SESSION_ENTRY_WARNING: u64 = 10_000;
const EXPIRED_RATIO_WARNING: f64 = 0.2;

/// Presentational pricing used for the savings section of the efficiency
/// report. These are heuristics, not measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Dollars per second of avoided computation
    pub cost_per_second: f64,
    /// Fraction of computation time assumed saved per hit
    pub improvement_per_hit: f64,
}

impl CostModel {
    pub const COST_PER_SECOND: f64 = 0.01;
    pub const IMPROVEMENT_PER_HIT: f64 = 0.5;
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            cost_per_second: Self::COST_PER_SECOND,
            improvement_per_hit: Self::IMPROVEMENT_PER_HIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOverview {
    pub table: CacheTable,
    pub total_entries: u64,
    pub valid_entries: u64,
    pub expired_entries: u64,
    pub size_bytes: u64,
    pub total_hits: u64,
    pub hit_rate: f64,
    pub avg_cost: f64,
}

impl TableOverview {
    fn from_stats(table: CacheTable, stats: &TableStats) -> Self {
        let hit_rate = if stats.total_entries == 0 {
            0.0
        } else {
            stats.total_hits as f64 / stats.total_entries as f64
        };
        Self {
            table,
            total_entries: stats.total_entries,
            valid_entries: stats.valid_entries,
            expired_entries: stats.expired_entries,
            size_bytes: stats.size_bytes,
            total_hits: stats.total_hits,
            hit_rate,
            avg_cost: stats.avg_cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheOverview {
    pub tables: Vec<TableOverview>,
    pub total_entries: u64,
    pub total_size_bytes: u64,
    pub generated_at: i64,
}

impl CacheOverview {
    pub fn table(&self, table: CacheTable) -> Option<&TableOverview> {
        self.tables.iter().find(|t| t.table == table)
    }

    fn valid_entries(&self) -> u64 {
        self.tables.iter().map(|t| t.valid_entries).sum()
    }

    fn expired_entries(&self) -> u64 {
        self.tables.iter().map(|t| t.expired_entries).sum()
    }

    /// Per-table hit rates averaged with each table's hit count as weight.
    fn weighted_hit_rate(&self) -> f64 {
        let hits: u64 = self.tables.iter().map(|t| t.total_hits).sum();
        if hits == 0 {
            return 0.0;
        }
        let weighted: f64 = self
            .tables
            .iter()
            .map(|t| t.hit_rate * t.total_hits as f64)
            .sum();
        weighted / hits as f64
    }

    fn utilization_percent(&self) -> f64 {
        if self.total_entries == 0 {
            0.0
        } else {
            self.valid_entries() as f64 / self.total_entries as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSavings {
    pub computation_seconds_saved: f64,
    pub estimated_cost_saved: f64,
    pub performance_improvement_seconds: f64,
    pub entries_hit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyReport {
    pub overall_hit_rate: f64,
    pub utilization_percent: f64,
    pub cost_savings: CostSavings,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthGrade {
    /// Both the hit rate and the utilization must clear a level's bar.
    pub fn from_scores(hit_rate: f64, utilization_percent: f64) -> Self {
        if hit_rate >= 0.8 && utilization_percent >= 80.0 {
            HealthGrade::Excellent
        } else if hit_rate >= 0.6 && utilization_percent >= 60.0 {
            HealthGrade::Good
        } else if hit_rate >= 0.4 && utilization_percent >= 40.0 {
            HealthGrade::Fair
        } else {
            HealthGrade::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthGrade::Excellent => "excellent",
            HealthGrade::Good => "good",
            HealthGrade::Fair => "fair",
            HealthGrade::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub grade: HealthGrade,
    pub hit_rate: f64,
    pub utilization_percent: f64,
    pub expired_ratio: f64,
    pub issues: Vec<String>,
}

/// Builds reports from a cache store's per-table statistics.
pub struct CacheMonitor<'a> {
    cache: &'a SqliteCache,
    cost_model: CostModel,
}

impl<'a> CacheMonitor<'a> {
    pub fn new(cache: &'a SqliteCache) -> Self {
        Self {
            cache,
            cost_model: CostModel::default(),
        }
    }

    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn overview(&self) -> CacheOverview {
        let now = storage::now_millis();
        let tables: Vec<TableOverview> = CacheTable::ALL
            .iter()
            .map(|&table| {
                let stats = self.cache.table_stats(table, now).unwrap_or_else(|e| {
                    error!("Failed to read stats for {}: {}", table.table_name(), e);
                    TableStats::default()
                });
                TableOverview::from_stats(table, &stats)
            })
            .collect();

        CacheOverview {
            total_entries: tables.iter().map(|t| t.total_entries).sum(),
            total_size_bytes: tables.iter().map(|t| t.size_bytes).sum(),
            tables,
            generated_at: now,
        }
    }

    pub fn efficiency_report(&self) -> EfficiencyReport {
        let overview = self.overview();

        let (seconds, entries_hit) = self.cache.analysis_savings().unwrap_or_else(|e| {
            error!("Failed to compute cache savings: {}", e);
            (0.0, 0)
        });
        let cost_savings = CostSavings {
            computation_seconds_saved: seconds,
            estimated_cost_saved: seconds * self.cost_model.cost_per_second,
            performance_improvement_seconds: seconds * self.cost_model.improvement_per_hit,
            entries_hit,
        };

        EfficiencyReport {
            overall_hit_rate: overview.weighted_hit_rate(),
            utilization_percent: overview.utilization_percent(),
            cost_savings,
            recommendations: recommendations(&overview),
        }
    }

    pub fn health_metrics(&self) -> HealthMetrics {
        let overview = self.overview();
        let hit_rate = overview.weighted_hit_rate();
        let utilization_percent = overview.utilization_percent();
        let expired_ratio = if overview.total_entries == 0 {
            0.0
        } else {
            overview.expired_entries() as f64 / overview.total_entries as f64
        };

        let mut issues = Vec::new();
        if overview.total_entries > 0 {
            if hit_rate < 0.4 {
                issues.push(format!("Low cache hit rate ({:.1}%)", hit_rate * 100.0));
            }
            if utilization_percent < 50.0 {
                issues.push(format!(
                    "Low cache utilization ({:.1}% of entries still valid)",
                    utilization_percent
                ));
            }
            if expired_ratio > EXPIRED_RATIO_WARNING {
                issues.push(format!(
                    "{:.1}% of entries are expired; maintenance may be falling behind",
                    expired_ratio * 100.0
                ));
            }
        }
        if overview.total_size_bytes > SIZE_WARNING_BYTES {
            issues.push(format!(
                "Cache size {} MB exceeds 500 MB",
                overview.total_size_bytes / (1024 * 1024)
            ));
        }

        HealthMetrics {
            grade: HealthGrade::from_scores(hit_rate, utilization_percent),
            hit_rate,
            utilization_percent,
            expired_ratio,
            issues,
        }
    }
}

fn recommendations(overview: &CacheOverview) -> Vec<String> {
    let mut out = Vec::new();

    if overview.total_size_bytes > SIZE_WARNING_BYTES {
        out.push(
            "Cache exceeds 500 MB; shorten TTLs or run maintenance more often".to_string(),
        );
    }

    for table in &overview.tables {
        let threshold = table.table.hit_rate_threshold();
        if table.total_entries > 0 && table.hit_rate < threshold {
            out.push(format!(
                "{} hit rate {:.1}% is below the {:.0}% target; review what gets cached there",
                table.table.table_name(),
                table.hit_rate * 100.0,
                threshold * 100.0
            ));
        }
    }

    if let Some(session) = overview.table(CacheTable::SessionMemory) {
        if session.total_entries > SESSION_ENTRY_WARNING {
            out.push(format!(
                "session_memory holds {} entries; clear finished sessions",
                session.total_entries
            ));
        }
    }

    if let Some(files) = overview.table(CacheTable::FileContent) {
        if files.total_entries > 0 && files.total_hits == 0 {
            out.push("file_content_cache is populated but has never been hit".to_string());
        }
    }

    out
}
