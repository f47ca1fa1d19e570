use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::SqliteCache;
use crate::config::CacheConfig;
use crate::error::{EngineError, Result};

/// Periodic maintenance loop over a cache store.
///
/// The loop only checks for cancellation between cycles, so a cycle that has
/// already started always runs to completion. [`MaintenanceTask::shutdown`]
/// waits for that, which means no cycle is running or will start once it
/// returns.
pub struct MaintenanceTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
    cycles: Arc<AtomicU64>,
}

impl MaintenanceTask {
    /// Starts the loop. Must be called from within a tokio runtime. The first
    /// cycle runs one full `period` after spawning.
    pub fn spawn(store: Arc<SqliteCache>, period: Duration) -> Self {
        let token = CancellationToken::new();
        let cycles = Arc::new(AtomicU64::new(0));

        let cancelled = token.clone();
        let counter = Arc::clone(&cycles);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval() completes its first tick immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let store = Arc::clone(&store);
                match tokio::task::spawn_blocking(move || store.run_maintenance()).await {
                    Ok(report) => {
                        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        debug!(
                            "Maintenance cycle {} done: {} expired, {} step errors",
                            n,
                            report.total_expired(),
                            report.errors.len()
                        );
                    }
                    Err(e) => error!("Maintenance cycle aborted: {}", e),
                }
            }
            debug!("Maintenance loop stopped");
        });

        Self {
            token,
            handle,
            cycles,
        }
    }

    /// Completed cycles so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Cancels the schedule and waits for the loop to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!("Maintenance task ended abnormally: {}", e);
        }
    }
}

/// The cache store together with its maintenance schedule.
pub struct CacheEngine {
    store: Arc<SqliteCache>,
    maintenance: Option<MaintenanceTask>,
    default_ttl: Duration,
}

impl CacheEngine {
    /// Opens the cache database and schedules maintenance. Must be called
    /// from within a tokio runtime.
    pub fn initialize(db_path: impl AsRef<Path>, config: &CacheConfig) -> Result<Self> {
        if config.maintenance_interval_ms == 0 {
            return Err(EngineError::Config(
                "maintenance_interval_ms must be greater than zero".to_string(),
            ));
        }
        let store = Arc::new(SqliteCache::open(db_path, &config.storage)?);
        let period = Duration::from_millis(config.maintenance_interval_ms);
        let maintenance = MaintenanceTask::spawn(Arc::clone(&store), period);
        info!(
            "Cache engine ready, maintenance every {}ms",
            config.maintenance_interval_ms
        );
        Ok(Self {
            store,
            maintenance: Some(maintenance),
            default_ttl: Duration::from_millis(config.default_ttl_ms),
        })
    }

    /// The underlying store. Fails once the engine is closed.
    pub fn store(&self) -> Result<&Arc<SqliteCache>> {
        if self.maintenance.is_none() {
            return Err(EngineError::Closed);
        }
        Ok(&self.store)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn is_closed(&self) -> bool {
        self.maintenance.is_none()
    }

    pub fn maintenance_cycles(&self) -> u64 {
        self.maintenance.as_ref().map(|m| m.cycles()).unwrap_or(0)
    }

    /// Stops the maintenance schedule. After this returns no maintenance
    /// cycle is running or will run. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if let Some(task) = self.maintenance.take() {
            task.shutdown().await;
            info!("Cache engine closed");
        }
    }
}

impl Drop for CacheEngine {
    fn drop(&mut self) {
        // Without an await we can only stop future cycles.
        if let Some(task) = self.maintenance.take() {
            task.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{AnalysisResult, CacheTable};
    use crate::config::StorageConfig;
    use crate::storage;
    use tempfile::TempDir;

    fn fast_config() -> CacheConfig {
        CacheConfig {
            maintenance_interval_ms: 20,
            ..CacheConfig::default()
        }
    }

    fn expired_entry(store: &SqliteCache, key: &str) {
        store
            .put_analysis(
                key,
                None,
                "t",
                &AnalysisResult::SymbolCount { count: 1 },
                0.0,
                Some(Duration::ZERO),
            )
            .unwrap();
    }

    fn analysis_rows(store: &SqliteCache) -> u64 {
        store
            .table_stats(CacheTable::Analysis, storage::now_millis())
            .unwrap()
            .total_entries
    }

    #[tokio::test]
    async fn test_maintenance_runs_and_stops_on_close() {
        let dir = TempDir::new().unwrap();
        let mut engine = CacheEngine::initialize(dir.path().join("cache.db"), &fast_config()).unwrap();
        let store = Arc::clone(engine.store().unwrap());

        expired_entry(&store, "a");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(engine.maintenance_cycles() >= 1);
        assert_eq!(analysis_rows(&store), 0);

        engine.close().await;
        assert!(engine.is_closed());
        assert!(matches!(engine.store(), Err(EngineError::Closed)));

        expired_entry(&store, "b");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(analysis_rows(&store), 1);
    }

    #[tokio::test]
    async fn test_failing_cycle_does_not_stop_schedule() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            SqliteCache::open(dir.path().join("cache.db"), &StorageConfig::default()).unwrap(),
        );
        store
            .acquire()
            .unwrap()
            .execute_batch("DROP TABLE cache_stats;")
            .unwrap();
        assert!(!store.run_maintenance().errors.is_empty());

        let task = MaintenanceTask::spawn(Arc::clone(&store), Duration::from_millis(20));
        expired_entry(&store, "a");
        for _ in 0..100 {
            if task.cycles() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(task.cycles() >= 2);
        assert_eq!(analysis_rows(&store), 0);

        expired_entry(&store, "b");
        let seen = task.cycles();
        for _ in 0..100 {
            if task.cycles() > seen {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        task.shutdown().await;
        assert_eq!(analysis_rows(&store), 0);
    }

    #[tokio::test]
    async fn test_close_twice() {
        let dir = TempDir::new().unwrap();
        let mut engine = CacheEngine::initialize(dir.path().join("cache.db"), &fast_config()).unwrap();
        engine.close().await;
        engine.close().await;
        assert_eq!(engine.maintenance_cycles(), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            maintenance_interval_ms: 0,
            ..CacheConfig::default()
        };
        let result = CacheEngine::initialize(dir.path().join("cache.db"), &config);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
