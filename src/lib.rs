pub mod analytics;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod git;
pub mod index;
pub mod indexer;
pub mod languages;
pub mod search;
pub mod storage;

pub use analytics::{Granularity, MetricAnalytics, TimeWindow};
pub use cache::{CacheEngine, CacheMonitor, SqliteCache};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use index::{
    DependencyEdge, DependencyRecord, FileRecord, MetricRecord, SqliteIndex, SymbolFilter,
    SymbolKind, SymbolRecord,
};
pub use indexer::{ChangeKind, IncrementalUpdater, ProjectChanges, UpdateStats};
pub use languages::{ExtractorRegistry, LanguageExtractor};
pub use search::{SearchQuery, SortDirection, SortField, SymbolSearch};

/// Tag written on every metric sample.
pub const ANALYSIS_VERSION: &str = env!("CARGO_PKG_VERSION");
