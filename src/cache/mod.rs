//! Short-lived computed results in a second SQLite store, with TTL reads,
//! a cancellable maintenance schedule and usage reports.

pub mod maintenance;
pub mod models;
pub mod monitor;
pub mod schema;
pub mod sqlite;

pub use maintenance::{CacheEngine, MaintenanceTask};
pub use models::*;
pub use monitor::{
    CacheMonitor, CacheOverview, CostModel, CostSavings, EfficiencyReport, HealthGrade,
    HealthMetrics, TableOverview,
};
pub use sqlite::SqliteCache;
