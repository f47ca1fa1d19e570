//! The engine context: both stores, the extractor registry and every
//! consumer-facing operation, owned by the caller and passed by reference.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::analytics::{
    Correlation, Granularity, MetricAnalytics, MetricOverviewEntry, StatisticalSummary,
    TimeWindow, TrendAnalysis, TrendReport,
};
use crate::cache::{
    AnalysisResult, CacheEngine, CacheMonitor, CacheOverview, EfficiencyReport, HealthMetrics,
    MaintenanceReport, SqliteCache,
};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::git::GitHistory;
use crate::index::{IndexStats, SqliteIndex, SymbolRecord};
use crate::indexer::{
    classify_path, detect_project_changes, path_key, ChangeKind, FileExtractor, FileWalker,
    IncrementalUpdater, ProjectChanges, UpdateStats,
};
use crate::languages::ExtractorRegistry;
use crate::search::{CrossReferences, Reference, SearchQuery, SymbolSearch, SymbolStatistics};

const COMPLEXITY_ANALYSIS: &str = "complexity";

pub struct Engine {
    config: EngineConfig,
    index: SqliteIndex,
    cache: CacheEngine,
    extractor: FileExtractor,
    walker: FileWalker,
}

impl Engine {
    /// Opens both stores under `config.state_dir` and starts cache
    /// maintenance. Must be called from within a tokio runtime.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let index = SqliteIndex::open(config.index_path(), &config.storage)?;
        let cache = CacheEngine::initialize(config.cache_path(), &config.cache)?;
        let extractor = FileExtractor::new(Arc::new(ExtractorRegistry::new()));
        let walker = FileWalker::new(config.excluded_dirs.iter().cloned());

        tracing::info!("Engine opened at {}", config.state_dir.display());
        Ok(Self {
            config,
            index,
            cache,
            extractor,
            walker,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn index(&self) -> &SqliteIndex {
        &self.index
    }

    /// The cache store; fails after [`close`](Self::close).
    pub fn cache(&self) -> Result<&Arc<SqliteCache>> {
        self.cache.store()
    }

    pub fn maintenance_cycles(&self) -> u64 {
        self.cache.maintenance_cycles()
    }

    fn updater(&self) -> IncrementalUpdater<'_> {
        IncrementalUpdater::new(&self.index, &self.extractor)
    }

    // === Incremental update ===

    pub fn classify_change(&self, path: &str) -> Result<ChangeKind> {
        let path = path_key(path);
        let stored = self.index.file(&path)?;
        Ok(classify_path(Path::new(&path), stored.as_ref())?)
    }

    /// Applies `paths` in one transaction, then drops cache entries of
    /// every path that changed.
    pub fn update_index(&self, paths: &[String]) -> Result<UpdateStats> {
        let stats = self.updater().update_index(paths)?;
        self.invalidate_cached(&stats.changed_paths);
        Ok(stats)
    }

    pub fn detect_project_changes(&self, root: &Path) -> Result<ProjectChanges> {
        detect_project_changes(&self.index, &self.walker, root)
    }

    /// Chunked update; `batch_size` defaults to the configured one.
    pub fn bulk_update(&self, paths: &[String], batch_size: Option<usize>) -> Result<UpdateStats> {
        let batch_size = batch_size.unwrap_or(self.config.bulk_batch_size);
        let stats = self.updater().bulk_update(paths, batch_size)?;
        self.invalidate_cached(&stats.changed_paths);
        Ok(stats)
    }

    /// Detects changes under `root` and applies them in batches.
    pub fn scan(&self, root: &Path) -> Result<(ProjectChanges, UpdateStats)> {
        let changes = self.detect_project_changes(root)?;
        let stats = self.bulk_update(&changes.pending(), None)?;
        Ok((changes, stats))
    }

    fn invalidate_cached(&self, paths: &[String]) {
        let Ok(cache) = self.cache.store() else {
            return;
        };
        let mut removed = 0;
        for path in paths {
            match cache.invalidate_file(path) {
                Ok(n) => removed += n,
                Err(e) => tracing::warn!("Failed to invalidate cache for {}: {}", path, e),
            }
        }
        if removed > 0 {
            tracing::debug!("Invalidated {} cache entries", removed);
        }
    }

    // === Index reads ===

    pub fn stats(&self) -> Result<IndexStats> {
        self.index.stats()
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.index.get_metadata(key)
    }

    pub fn set_metadata(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.index.set_metadata(key, value)
    }

    /// Complexity totals of one file, served from the analysis cache while
    /// the file is unchanged.
    pub fn file_complexity(&self, path: &str) -> Result<Option<AnalysisResult>> {
        let key_path = path_key(path);
        let path = key_path.as_str();
        let Some(file) = self.index.file(path)? else {
            return Ok(None);
        };
        let cache = self.cache.store()?;
        let key = format!("{}:{}:{}", COMPLEXITY_ANALYSIS, path, file.checksum);
        if let Some(entry) = cache.get_analysis(&key)? {
            return Ok(Some(entry.result));
        }

        let started = Instant::now();
        let callables: Vec<u32> = self
            .index
            .symbols_for_file(path)?
            .into_iter()
            .filter(|s| s.kind.is_callable())
            .map(|s| s.complexity)
            .collect();
        let result = AnalysisResult::Complexity {
            total: callables.iter().sum(),
            max: callables.iter().copied().max().unwrap_or(0),
            functions: callables.len() as u32,
        };
        cache.put_analysis(
            &key,
            Some(path),
            COMPLEXITY_ANALYSIS,
            &result,
            started.elapsed().as_secs_f64(),
            Some(self.cache.default_ttl()),
        )?;
        Ok(Some(result))
    }

    pub fn sync_history(&self, repo: &Path, limit: Option<usize>) -> Result<usize> {
        GitHistory::open(repo)?.sync(&self.index, limit)
    }

    /// Absolute paths of files git reports as uncommitted in `repo`,
    /// deletions included.
    pub fn git_changed_paths(&self, repo: &Path) -> Result<Vec<String>> {
        let changed = GitHistory::open(repo)?.changed_files()?;
        Ok(changed.into_iter().map(|f| f.path).collect())
    }

    // === Search ===

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SymbolRecord>> {
        let Some(ref file_path) = query.filter.file_path else {
            return SymbolSearch::new(&self.index).search(query);
        };
        let mut keyed = query.clone();
        keyed.filter.file_path = Some(path_key(file_path));
        SymbolSearch::new(&self.index).search(&keyed)
    }

    pub fn find_references(&self, name: &str, file_path: Option<&str>) -> Result<Vec<Reference>> {
        let file_path = file_path.map(path_key);
        SymbolSearch::new(&self.index).find_references(name, file_path.as_deref())
    }

    pub fn cross_references(&self, name: &str) -> Result<CrossReferences> {
        SymbolSearch::new(&self.index).cross_references(name)
    }

    pub fn symbol_statistics(&self) -> Result<SymbolStatistics> {
        SymbolSearch::new(&self.index).statistics()
    }

    pub fn full_text_search(&self, query: &str, limit: usize) -> Result<Vec<SymbolRecord>> {
        SymbolSearch::new(&self.index).full_text(query, limit)
    }

    // === Analytics ===

    pub fn trends(
        &self,
        metric_type: &str,
        window: TimeWindow,
        granularity: Granularity,
    ) -> Result<TrendReport> {
        MetricAnalytics::new(&self.index).trends(metric_type, window, granularity)
    }

    pub fn trend_analysis(&self, metric_type: &str, window: TimeWindow) -> Result<TrendAnalysis> {
        MetricAnalytics::new(&self.index).trend_analysis(metric_type, window)
    }

    pub fn correlation(
        &self,
        metric_a: &str,
        metric_b: &str,
        window: TimeWindow,
    ) -> Result<Correlation> {
        MetricAnalytics::new(&self.index).correlation(metric_a, metric_b, window)
    }

    pub fn statistical_summary(
        &self,
        metric_type: &str,
        window: TimeWindow,
    ) -> Result<StatisticalSummary> {
        MetricAnalytics::new(&self.index).statistical_summary(metric_type, window)
    }

    pub fn metric_overview(&self, window: TimeWindow) -> Result<Vec<MetricOverviewEntry>> {
        MetricAnalytics::new(&self.index).metric_overview(window)
    }

    // === Cache reports ===

    pub fn overview(&self) -> Result<CacheOverview> {
        Ok(CacheMonitor::new(self.cache.store()?).overview())
    }

    pub fn efficiency_report(&self) -> Result<EfficiencyReport> {
        Ok(CacheMonitor::new(self.cache.store()?).efficiency_report())
    }

    pub fn health_metrics(&self) -> Result<HealthMetrics> {
        Ok(CacheMonitor::new(self.cache.store()?).health_metrics())
    }

    /// Runs one maintenance cycle now, outside the schedule.
    pub fn run_maintenance(&self) -> Result<MaintenanceReport> {
        Ok(self.cache.store()?.run_maintenance())
    }

    /// Stops cache maintenance. Cache operations fail afterwards; index
    /// operations keep working until the engine is dropped.
    pub async fn close(&mut self) {
        self.cache.close().await;
        tracing::info!("Engine closed");
    }
}
