use std::path::Path;
use std::time::Duration;

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::cache::schema::MIGRATIONS;
use crate::cache::{
    AnalysisCacheEntry, AnalysisResult, ApiResponseCacheEntry, CacheTable, EntryLifecycle,
    FileContentCacheEntry, MaintenanceReport, QueryCacheEntry, SessionMemoryEntry, TableStats,
};
use crate::config::StorageConfig;
use crate::error::Result;
use crate::index::compute_checksum;
use crate::storage::{self, ConnectionPool, PooledConn};

/// Rows visible to readers at time `?1`.
const LIVE: &str = "(expires_at IS NULL OR expires_at > ?1)";

const LIFECYCLE_COLUMNS: &str = "created_at, expires_at, hit_count, last_accessed, size_bytes";

/// The cache store. Every read filters out expired rows and records a hit;
/// expired rows are physically removed by [`SqliteCache::run_maintenance`].
pub struct SqliteCache {
    pool: ConnectionPool,
}

fn expiry(now: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now.saturating_add(ttl.as_millis() as i64))
}

fn lifecycle_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<EntryLifecycle> {
    Ok(EntryLifecycle {
        created_at: row.get(offset)?,
        expires_at: row.get(offset + 1)?,
        hit_count: row.get::<_, i64>(offset + 2)? as u64,
        last_accessed: row.get(offset + 3)?,
        size_bytes: row.get::<_, i64>(offset + 4)? as u64,
    })
}

fn decode_analysis(text: String) -> AnalysisResult {
    serde_json::from_str(&text).unwrap_or_else(|_| AnalysisResult::Opaque {
        bytes: text.into_bytes(),
    })
}

impl SqliteCache {
    pub fn open(db_path: impl AsRef<Path>, config: &StorageConfig) -> Result<Self> {
        let pool = storage::open_pool(db_path.as_ref(), config, MIGRATIONS)?;
        Ok(Self { pool })
    }

    pub fn acquire(&self) -> Result<PooledConn> {
        Ok(self.pool.get()?)
    }

    /// Bumps the hit counter of a live row. Returns false when the row is
    /// missing or expired. `key_clause` placeholders start at `?2`.
    fn record_hit(
        conn: &Connection,
        table: CacheTable,
        key_clause: &str,
        keys: &[&dyn ToSql],
        now: i64,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET hit_count = hit_count + 1, last_accessed = ?1 WHERE {} AND {}",
            table.table_name(),
            key_clause,
            LIVE
        );
        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(keys.len() + 1);
        values.push(&now);
        values.extend_from_slice(keys);
        Ok(conn.execute(&sql, values.as_slice())? > 0)
    }

    // === Analysis cache ===

    pub fn put_analysis(
        &self,
        cache_key: &str,
        file_path: Option<&str>,
        analysis_type: &str,
        result: &AnalysisResult,
        computation_cost: f64,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let payload = serde_json::to_string(result)?;
        let now = storage::now_millis();
        let conn = self.acquire()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO analysis_cache
            (cache_key, file_path, analysis_type, result, computation_cost, size_bytes,
             created_at, expires_at, hit_count, last_accessed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL)
            "#,
            params![
                cache_key,
                file_path,
                analysis_type,
                payload,
                computation_cost,
                payload.len() as i64,
                now,
                expiry(now, ttl),
            ],
        )?;
        Ok(())
    }

    pub fn get_analysis(&self, cache_key: &str) -> Result<Option<AnalysisCacheEntry>> {
        let conn = self.acquire()?;
        let now = storage::now_millis();
        if !Self::record_hit(&conn, CacheTable::Analysis, "cache_key = ?2", &[&cache_key], now)? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT cache_key, file_path, analysis_type, result, computation_cost, {} \
             FROM analysis_cache WHERE cache_key = ?2 AND {}",
            LIFECYCLE_COLUMNS, LIVE
        );
        let entry = conn
            .query_row(&sql, params![now, cache_key], |row| {
                Ok(AnalysisCacheEntry {
                    cache_key: row.get(0)?,
                    file_path: row.get(1)?,
                    analysis_type: row.get(2)?,
                    result: decode_analysis(row.get(3)?),
                    computation_cost: row.get(4)?,
                    lifecycle: lifecycle_from_row(row, 5)?,
                })
            })
            .optional()?;
        Ok(entry)
    }

    pub fn invalidate_analysis(&self, cache_key: &str) -> Result<bool> {
        let conn = self.acquire()?;
        let n = conn.execute(
            "DELETE FROM analysis_cache WHERE cache_key = ?1",
            params![cache_key],
        )?;
        Ok(n > 0)
    }

    // === Query cache ===

    /// Caches a query result keyed by the hash of its text. Returns the hash.
    pub fn put_query(
        &self,
        query_text: &str,
        result: &str,
        execution_time_ms: f64,
        ttl: Option<Duration>,
    ) -> Result<String> {
        let query_hash = compute_checksum(query_text.as_bytes());
        let now = storage::now_millis();
        let conn = self.acquire()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO query_cache
            (query_hash, query_text, result, execution_time_ms, size_bytes,
             created_at, expires_at, hit_count, last_accessed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL)
            "#,
            params![
                query_hash,
                query_text,
                result,
                execution_time_ms,
                result.len() as i64,
                now,
                expiry(now, ttl),
            ],
        )?;
        Ok(query_hash)
    }

    pub fn get_query(&self, query_text: &str) -> Result<Option<QueryCacheEntry>> {
        let query_hash = compute_checksum(query_text.as_bytes());
        let conn = self.acquire()?;
        let now = storage::now_millis();
        if !Self::record_hit(&conn, CacheTable::Query, "query_hash = ?2", &[&query_hash], now)? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT query_hash, query_text, result, execution_time_ms, {} \
             FROM query_cache WHERE query_hash = ?2 AND {}",
            LIFECYCLE_COLUMNS, LIVE
        );
        let entry = conn
            .query_row(&sql, params![now, query_hash], |row| {
                Ok(QueryCacheEntry {
                    query_hash: row.get(0)?,
                    query_text: row.get(1)?,
                    result: row.get(2)?,
                    execution_time_ms: row.get(3)?,
                    lifecycle: lifecycle_from_row(row, 4)?,
                })
            })
            .optional()?;
        Ok(entry)
    }

    // === File content cache ===

    pub fn put_file_content(
        &self,
        file_path: &str,
        checksum: &str,
        parsed_content: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let now = storage::now_millis();
        let conn = self.acquire()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO file_content_cache
            (file_path, checksum, parsed_content, size_bytes,
             created_at, expires_at, hit_count, last_accessed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL)
            "#,
            params![
                file_path,
                checksum,
                parsed_content,
                parsed_content.len() as i64,
                now,
                expiry(now, ttl),
            ],
        )?;
        Ok(())
    }

    pub fn get_file_content(
        &self,
        file_path: &str,
        checksum: &str,
    ) -> Result<Option<FileContentCacheEntry>> {
        let conn = self.acquire()?;
        let now = storage::now_millis();
        if !Self::record_hit(
            &conn,
            CacheTable::FileContent,
            "file_path = ?2 AND checksum = ?3",
            &[&file_path, &checksum],
            now,
        )? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT file_path, checksum, parsed_content, {} \
             FROM file_content_cache WHERE file_path = ?2 AND checksum = ?3 AND {}",
            LIFECYCLE_COLUMNS, LIVE
        );
        let entry = conn
            .query_row(&sql, params![now, file_path, checksum], |row| {
                Ok(FileContentCacheEntry {
                    file_path: row.get(0)?,
                    checksum: row.get(1)?,
                    parsed_content: row.get(2)?,
                    lifecycle: lifecycle_from_row(row, 3)?,
                })
            })
            .optional()?;
        Ok(entry)
    }

    /// Drops every analysis and file-content entry tied to `file_path`.
    pub fn invalidate_file(&self, file_path: &str) -> Result<usize> {
        let conn = self.acquire()?;
        let analysis = conn.execute(
            "DELETE FROM analysis_cache WHERE file_path = ?1",
            params![file_path],
        )?;
        let content = conn.execute(
            "DELETE FROM file_content_cache WHERE file_path = ?1",
            params![file_path],
        )?;
        Ok(analysis + content)
    }

    // === Session memory ===

    pub fn remember(
        &self,
        session_id: &str,
        memory_key: &str,
        value: &str,
        salience: f64,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let now = storage::now_millis();
        let conn = self.acquire()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO session_memory
            (session_id, memory_key, value, salience, size_bytes,
             created_at, expires_at, hit_count, last_accessed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL)
            "#,
            params![
                session_id,
                memory_key,
                value,
                salience,
                value.len() as i64,
                now,
                expiry(now, ttl),
            ],
        )?;
        Ok(())
    }

    pub fn recall(&self, session_id: &str, memory_key: &str) -> Result<Option<SessionMemoryEntry>> {
        let conn = self.acquire()?;
        let now = storage::now_millis();
        if !Self::record_hit(
            &conn,
            CacheTable::SessionMemory,
            "session_id = ?2 AND memory_key = ?3",
            &[&session_id, &memory_key],
            now,
        )? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT session_id, memory_key, value, salience, {} \
             FROM session_memory WHERE session_id = ?2 AND memory_key = ?3 AND {}",
            LIFECYCLE_COLUMNS, LIVE
        );
        let entry = conn
            .query_row(&sql, params![now, session_id, memory_key], Self::memory_from_row)
            .optional()?;
        Ok(entry)
    }

    /// Live memories of a session, most salient first. Listing does not
    /// count as a hit.
    pub fn session_memories(&self, session_id: &str, limit: usize) -> Result<Vec<SessionMemoryEntry>> {
        let conn = self.acquire()?;
        let sql = format!(
            "SELECT session_id, memory_key, value, salience, {} \
             FROM session_memory WHERE session_id = ?2 AND {} \
             ORDER BY salience DESC, memory_key LIMIT ?3",
            LIFECYCLE_COLUMNS, LIVE
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![storage::now_millis(), session_id, limit as i64],
            Self::memory_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn clear_session(&self, session_id: &str) -> Result<usize> {
        let conn = self.acquire()?;
        Ok(conn.execute(
            "DELETE FROM session_memory WHERE session_id = ?1",
            params![session_id],
        )?)
    }

    fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<SessionMemoryEntry> {
        Ok(SessionMemoryEntry {
            session_id: row.get(0)?,
            memory_key: row.get(1)?,
            value: row.get(2)?,
            salience: row.get(3)?,
            lifecycle: lifecycle_from_row(row, 4)?,
        })
    }

    // === API response cache ===

    pub fn put_api_response(
        &self,
        cache_key: &str,
        endpoint: &str,
        response: &str,
        status_code: u16,
        response_time_ms: f64,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let now = storage::now_millis();
        let conn = self.acquire()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO api_response_cache
            (cache_key, endpoint, response, status_code, response_time_ms, size_bytes,
             created_at, expires_at, hit_count, last_accessed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL)
            "#,
            params![
                cache_key,
                endpoint,
                response,
                status_code as i64,
                response_time_ms,
                response.len() as i64,
                now,
                expiry(now, ttl),
            ],
        )?;
        Ok(())
    }

    pub fn get_api_response(&self, cache_key: &str) -> Result<Option<ApiResponseCacheEntry>> {
        let conn = self.acquire()?;
        let now = storage::now_millis();
        if !Self::record_hit(
            &conn,
            CacheTable::ApiResponse,
            "cache_key = ?2",
            &[&cache_key],
            now,
        )? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT cache_key, endpoint, response, status_code, response_time_ms, {} \
             FROM api_response_cache WHERE cache_key = ?2 AND {}",
            LIFECYCLE_COLUMNS, LIVE
        );
        let entry = conn
            .query_row(&sql, params![now, cache_key], |row| {
                Ok(ApiResponseCacheEntry {
                    cache_key: row.get(0)?,
                    endpoint: row.get(1)?,
                    response: row.get(2)?,
                    status_code: row.get::<_, i64>(3)? as u16,
                    response_time_ms: row.get(4)?,
                    lifecycle: lifecycle_from_row(row, 5)?,
                })
            })
            .optional()?;
        Ok(entry)
    }

    pub fn clear_all(&self) -> Result<()> {
        let conn = self.acquire()?;
        for table in CacheTable::ALL {
            conn.execute(&format!("DELETE FROM {}", table.table_name()), [])?;
        }
        conn.execute("DELETE FROM cache_stats", [])?;
        Ok(())
    }

    // === Statistics ===

    /// Aggregates for one table, split into live and expired rows at `now`.
    pub fn table_stats(&self, table: CacheTable, now: i64) -> Result<TableStats> {
        let conn = self.acquire()?;
        let cost = table.cost_column().unwrap_or("0");
        let sql = format!(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN {live} THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(size_bytes), 0),
                   COALESCE(SUM(hit_count), 0),
                   COALESCE(SUM(CASE WHEN hit_count > 0 THEN 1 ELSE 0 END), 0),
                   COALESCE(AVG({cost}), 0.0)
            FROM {table}
            "#,
            live = LIVE,
            cost = cost,
            table = table.table_name()
        );
        let stats = conn.query_row(&sql, params![now], |row| {
            let total = row.get::<_, i64>(0)? as u64;
            let valid = row.get::<_, i64>(1)? as u64;
            Ok(TableStats {
                total_entries: total,
                valid_entries: valid,
                expired_entries: total.saturating_sub(valid),
                size_bytes: row.get::<_, i64>(2)? as u64,
                total_hits: row.get::<_, i64>(3)? as u64,
                entries_with_hits: row.get::<_, i64>(4)? as u64,
                avg_cost: row.get(5)?,
            })
        })?;
        Ok(stats)
    }

    /// Seconds of computation avoided by analysis-cache hits, and the number
    /// of analysis entries that were hit at least once.
    pub fn analysis_savings(&self) -> Result<(f64, u64)> {
        let conn = self.acquire()?;
        let (seconds, entries) = conn.query_row(
            r#"
            SELECT COALESCE(SUM(computation_cost * hit_count), 0.0), COUNT(*)
            FROM analysis_cache WHERE hit_count > 0
            "#,
            [],
            |row| Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok((seconds, entries as u64))
    }

    // === Maintenance ===

    /// Deletes every row with `expires_at <= now`. Rows without an expiry
    /// are never touched.
    pub fn expire_entries(&self, now: i64) -> Result<Vec<(CacheTable, usize)>> {
        let mut conn = self.acquire()?;
        let tx = conn.transaction()?;
        let mut removed = Vec::with_capacity(CacheTable::ALL.len());
        for table in CacheTable::ALL {
            let sql = format!(
                "DELETE FROM {} WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                table.table_name()
            );
            removed.push((table, tx.execute(&sql, params![now])?));
        }
        tx.commit()?;
        Ok(removed)
    }

    pub fn compact(&self) -> Result<()> {
        let conn = self.acquire()?;
        conn.execute_batch("PRAGMA optimize; ANALYZE;")?;
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        Ok(())
    }

    /// Rewrites `cache_stats` from the live tables.
    pub fn refresh_usage_stats(&self) -> Result<()> {
        let mut conn = self.acquire()?;
        let now = storage::now_millis();
        let tx = conn.transaction()?;
        for table in CacheTable::ALL {
            let sql = format!(
                r#"
                INSERT OR REPLACE INTO cache_stats
                (table_name, entry_count, total_hits, size_bytes, updated_at)
                SELECT ?1, COUNT(*), COALESCE(SUM(hit_count), 0), COALESCE(SUM(size_bytes), 0), ?2
                FROM {}
                "#,
                table.table_name()
            );
            tx.execute(&sql, params![table.table_name(), now])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// One maintenance cycle. Each step runs even if an earlier one failed;
    /// failures are logged and collected in the report.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.expire_entries(storage::now_millis()) {
            Ok(expired) => report.expired = expired,
            Err(e) => {
                tracing::error!("Cache maintenance: expiring entries failed: {}", e);
                report.errors.push(format!("expire: {}", e));
            }
        }

        match self.compact() {
            Ok(()) => report.compacted = true,
            Err(e) => {
                tracing::error!("Cache maintenance: compaction failed: {}", e);
                report.errors.push(format!("compact: {}", e));
            }
        }

        match self.refresh_usage_stats() {
            Ok(()) => report.stats_refreshed = true,
            Err(e) => {
                tracing::error!("Cache maintenance: usage statistics failed: {}", e);
                report.errors.push(format!("stats: {}", e));
            }
        }

        tracing::debug!(
            "Cache maintenance removed {} expired entries",
            report.total_expired()
        );
        report
    }

    /// Rows currently recorded in `cache_stats`.
    pub fn usage_stats(&self) -> Result<Vec<(String, u64, u64, u64)>> {
        let conn = self.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT table_name, entry_count, total_hits, size_bytes FROM cache_stats ORDER BY table_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? as u64,
                row.get::<_, i64>(2)? as u64,
                row.get::<_, i64>(3)? as u64,
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Backdates an entry's expiry. Test-only hook for expiry paths.
    #[cfg(test)]
    pub(crate) fn force_expiry(&self, table: CacheTable, expires_at: i64) -> Result<usize> {
        let conn = self.acquire()?;
        Ok(conn.execute(
            &format!("UPDATE {} SET expires_at = ?1", table.table_name()),
            params![expires_at],
        )?)
    }
}
