//! Cache store schema. Every table carries the same lifecycle columns:
//! `created_at`, `expires_at` (NULL = never), `hit_count`, `last_accessed`,
//! `size_bytes`.

use rusqlite::Connection;

use crate::error::Result;
use crate::storage::MigrationFn;

pub const MIGRATIONS: &[MigrationFn] = &[migration_v1_tables, migration_v2_indexes];

fn migration_v1_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_cache (
            cache_key TEXT PRIMARY KEY,
            file_path TEXT,
            analysis_type TEXT NOT NULL,
            result TEXT NOT NULL,
            computation_cost REAL NOT NULL DEFAULT 0,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            hit_count INTEGER NOT NULL DEFAULT 0,
            last_accessed INTEGER
        );

        CREATE TABLE IF NOT EXISTS query_cache (
            query_hash TEXT PRIMARY KEY,
            query_text TEXT NOT NULL,
            result TEXT NOT NULL,
            execution_time_ms REAL NOT NULL DEFAULT 0,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            hit_count INTEGER NOT NULL DEFAULT 0,
            last_accessed INTEGER
        );

        CREATE TABLE IF NOT EXISTS file_content_cache (
            file_path TEXT NOT NULL,
            checksum TEXT NOT NULL,
            parsed_content TEXT NOT NULL,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            hit_count INTEGER NOT NULL DEFAULT 0,
            last_accessed INTEGER,
            PRIMARY KEY (file_path, checksum)
        );

        CREATE TABLE IF NOT EXISTS session_memory (
            session_id TEXT NOT NULL,
            memory_key TEXT NOT NULL,
            value TEXT NOT NULL,
            salience REAL NOT NULL DEFAULT 0,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            hit_count INTEGER NOT NULL DEFAULT 0,
            last_accessed INTEGER,
            PRIMARY KEY (session_id, memory_key)
        );

        CREATE TABLE IF NOT EXISTS api_response_cache (
            cache_key TEXT PRIMARY KEY,
            endpoint TEXT NOT NULL,
            response TEXT NOT NULL,
            status_code INTEGER NOT NULL,
            response_time_ms REAL NOT NULL DEFAULT 0,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            hit_count INTEGER NOT NULL DEFAULT 0,
            last_accessed INTEGER
        );

        -- Written by the maintenance cycle
        CREATE TABLE IF NOT EXISTS cache_stats (
            table_name TEXT PRIMARY KEY,
            entry_count INTEGER NOT NULL,
            total_hits INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn migration_v2_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_analysis_expires ON analysis_cache(expires_at);
        CREATE INDEX IF NOT EXISTS idx_analysis_file ON analysis_cache(file_path);
        CREATE INDEX IF NOT EXISTS idx_query_expires ON query_cache(expires_at);
        CREATE INDEX IF NOT EXISTS idx_file_content_expires ON file_content_cache(expires_at);
        CREATE INDEX IF NOT EXISTS idx_session_expires ON session_memory(expires_at);
        CREATE INDEX IF NOT EXISTS idx_session_salience ON session_memory(session_id, salience);
        CREATE INDEX IF NOT EXISTS idx_api_expires ON api_response_cache(expires_at);
        "#,
    )?;
    Ok(())
}
