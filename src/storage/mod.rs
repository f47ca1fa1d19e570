//! Shared plumbing for the two embedded stores (index and cache).
//!
//! Each store is one SQLite file behind an r2d2 pool. Every pooled
//! connection gets the same performance pragmas on checkout, and the
//! schema is brought up to date on a dedicated connection before the pool
//! is built, so a file that cannot be opened fails immediately instead of
//! after the pool's connection timeout.

pub mod migrations;

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use r2d2::{CustomizeConnection, Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::config::StorageConfig;
use crate::error::{EngineError, Result};

pub use migrations::MigrationFn;

pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Connection checked out of a store's pool. Returned to the pool on drop,
/// which covers success, `?` propagation and panics alike.
pub type PooledConn = PooledConnection<SqliteConnectionManager>;

#[derive(Debug, Clone)]
struct ConnectionCustomizer {
    cache_kib: i64,
    threads: u32,
    busy_timeout: Duration,
}

impl ConnectionCustomizer {
    fn from_config(config: &StorageConfig) -> Self {
        Self {
            cache_kib: config.memory_limit_mb as i64 * 1024,
            threads: config.threads,
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
        }
    }

    fn apply(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.busy_timeout(self.busy_timeout)?;
        // Negative cache_size is a KiB budget rather than a page count.
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA cache_size = -{};
            PRAGMA threads = {};
            "#,
            self.cache_kib, self.threads
        ))
    }
}

impl CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        self.apply(conn)
    }
}

/// Creates the parent directory, migrates the schema and builds the pool.
/// Any failure here is an initialization failure: the store is unusable.
pub fn open_pool(
    db_path: &Path,
    config: &StorageConfig,
    migrations: &[MigrationFn],
) -> Result<ConnectionPool> {
    let init_err = |message: String| EngineError::Init {
        path: db_path.display().to_string(),
        message,
    };

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| init_err(format!("create directory {}: {}", parent.display(), e)))?;
        }
    }

    let customizer = ConnectionCustomizer::from_config(config);

    {
        let conn = Connection::open(db_path).map_err(|e| init_err(e.to_string()))?;
        customizer.apply(&conn).map_err(|e| init_err(e.to_string()))?;
        migrations::run_migrations(&conn, migrations).map_err(|e| init_err(e.to_string()))?;
    }

    let manager = SqliteConnectionManager::file(db_path);
    let pool = Pool::builder()
        .max_size(config.pool_size)
        .min_idle(Some(1))
        .connection_timeout(Duration::from_secs(30))
        .connection_customizer(Box::new(customizer))
        .build(manager)
        .map_err(|e| init_err(e.to_string()))?;

    tracing::debug!(
        "Opened store {} (pool size {})",
        db_path.display(),
        config.pool_size
    );
    Ok(pool)
}

/// Current time in unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Current time in unix seconds.
pub fn now_secs() -> i64 {
    now_millis() / 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_sample(conn: &Connection) -> Result<()> {
        conn.execute_batch("CREATE TABLE IF NOT EXISTS sample (id INTEGER PRIMARY KEY)")?;
        Ok(())
    }

    #[test]
    fn test_open_pool_creates_parent_dir() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested/state/store.db");

        let pool = open_pool(&db_path, &StorageConfig::default(), &[create_sample]).unwrap();
        assert!(db_path.exists());

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sample", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_open_pool_applies_pragmas() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            memory_limit_mb: 16,
            ..StorageConfig::default()
        };
        let pool = open_pool(&dir.path().join("p.db"), &config, &[]).unwrap();
        let conn = pool.get().unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let cache: i64 = conn
            .query_row("PRAGMA cache_size", [], |row| row.get(0))
            .unwrap();
        assert_eq!(cache, -16 * 1024);
    }

    #[test]
    fn test_open_pool_fails_when_directory_blocked() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let result = open_pool(&blocker.join("store.db"), &StorageConfig::default(), &[]);
        assert!(matches!(result, Err(EngineError::Init { .. })));
    }

    #[test]
    fn test_now_units() {
        let ms = now_millis();
        let s = now_secs();
        assert!((ms / 1000 - s).abs() <= 1);
    }
}
