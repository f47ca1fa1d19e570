use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::StorageConfig;
use crate::error::Result;
use crate::index::schema::MIGRATIONS;
use crate::index::{
    DependencyEdge, DependencyKind, DependencyRecord, FileRecord, GitCommitRecord, IndexStats,
    MetricRecord, SymbolFilter, SymbolKind, SymbolMetadata, SymbolRecord, TodoKind, TodoRecord,
    Visibility,
};
use crate::storage::{self, ConnectionPool, PooledConn};

/// Row counts removed by [`SqliteIndex::delete_file_rows_in`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletedRows {
    pub dependencies: usize,
    pub metrics: usize,
    pub symbols: usize,
    pub todos: usize,
    pub files: usize,
}

impl DeletedRows {
    pub fn total(&self) -> usize {
        self.dependencies + self.metrics + self.symbols + self.todos + self.files
    }
}

pub(crate) const SYMBOL_COLUMNS: &str =
    "id, name, kind, file_path, line_number, signature, visibility, complexity, language, metadata";

const UPSERT_SYMBOL_SQL: &str = r#"
    INSERT INTO symbols
    (id, name, kind, file_path, line_number, signature, visibility, complexity, language, metadata)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(id) DO UPDATE SET
        name = excluded.name,
        kind = excluded.kind,
        file_path = excluded.file_path,
        line_number = excluded.line_number,
        signature = excluded.signature,
        visibility = excluded.visibility,
        complexity = excluded.complexity,
        language = excluded.language,
        metadata = excluded.metadata
"#;

const UPSERT_FILE_SQL: &str = r#"
    INSERT INTO files
    (path, name, directory, extension, language, size, line_count, last_modified, checksum,
     is_binary, indexed_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT(path) DO UPDATE SET
        name = excluded.name,
        directory = excluded.directory,
        extension = excluded.extension,
        language = excluded.language,
        size = excluded.size,
        line_count = excluded.line_count,
        last_modified = excluded.last_modified,
        checksum = excluded.checksum,
        is_binary = excluded.is_binary,
        indexed_at = excluded.indexed_at
"#;

const INSERT_METRIC_SQL: &str = r#"
    INSERT INTO metrics
    (id, file_path, symbol_id, metric_type, metric_name, value, recorded_at, analysis_version)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#;

/// The index store: files, symbols, metrics, dependency edges, history and
/// TODOs in one SQLite file.
///
/// Methods named `*_in` take an explicit connection so several writes can be
/// composed inside one caller-owned transaction; the rest acquire a pooled
/// connection for the duration of the call.
pub struct SqliteIndex {
    pool: ConnectionPool,
}

impl SqliteIndex {
    /// Opens (creating if needed) the index at `db_path`. Fails if the
    /// directory or file cannot be created or opened.
    pub fn open(db_path: impl AsRef<Path>, config: &StorageConfig) -> Result<Self> {
        let pool = storage::open_pool(db_path.as_ref(), config, MIGRATIONS)?;
        Ok(Self { pool })
    }

    /// Checks a connection out of the pool. It is released when dropped.
    pub fn acquire(&self) -> Result<PooledConn> {
        Ok(self.pool.get()?)
    }

    // === Files ===

    pub fn upsert_file(&self, file: &FileRecord) -> Result<()> {
        let conn = self.acquire()?;
        Self::upsert_file_in(&conn, file)
    }

    /// Upserts many files through one prepared statement in one transaction.
    pub fn batch_upsert_files(&self, files: &[FileRecord]) -> Result<()> {
        let mut conn = self.acquire()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_FILE_SQL)?;
            let now = storage::now_millis();
            for file in files {
                Self::execute_file_upsert(&mut stmt, file, now)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_file_in(conn: &Connection, file: &FileRecord) -> Result<()> {
        let mut stmt = conn.prepare_cached(UPSERT_FILE_SQL)?;
        Self::execute_file_upsert(&mut stmt, file, storage::now_millis())
    }

    fn execute_file_upsert(
        stmt: &mut rusqlite::CachedStatement<'_>,
        file: &FileRecord,
        now: i64,
    ) -> Result<()> {
        stmt.execute(params![
            file.path,
            file.name,
            file.directory,
            file.extension,
            file.language,
            file.size as i64,
            file.line_count as i64,
            file.last_modified,
            file.checksum,
            file.is_binary,
            now,
        ])?;
        Ok(())
    }

    pub fn file(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.acquire()?;
        Self::file_in(&conn, path)
    }

    pub fn file_in(conn: &Connection, path: &str) -> Result<Option<FileRecord>> {
        let record = conn
            .query_row(
                r#"
                SELECT path, name, directory, extension, language, size, line_count,
                       last_modified, checksum, is_binary
                FROM files WHERE path = ?1
                "#,
                params![path],
                Self::file_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All paths currently in the index.
    pub fn indexed_paths(&self) -> Result<HashSet<String>> {
        let conn = self.acquire()?;
        let mut stmt = conn.prepare("SELECT path FROM files")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(paths)
    }

    /// Every indexed file, ordered by path.
    pub fn files(&self) -> Result<Vec<FileRecord>> {
        let conn = self.acquire()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT path, name, directory, extension, language, size, line_count,
                   last_modified, checksum, is_binary
            FROM files ORDER BY path
            "#,
        )?;
        let files = stmt
            .query_map([], Self::file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Removes every row that belongs to `path`, children first: dependency
    /// edges in either direction, metrics, symbols, TODOs, then the file.
    pub fn delete_file_rows_in(conn: &Connection, path: &str) -> Result<DeletedRows> {
        let dependencies = conn.execute(
            "DELETE FROM dependencies WHERE from_file = ?1 OR to_file = ?1",
            params![path],
        )?;
        let metrics = conn.execute(
            r#"
            DELETE FROM metrics
            WHERE file_path = ?1
               OR symbol_id IN (SELECT id FROM symbols WHERE file_path = ?1)
            "#,
            params![path],
        )?;
        let symbols = conn.execute("DELETE FROM symbols WHERE file_path = ?1", params![path])?;
        let todos = conn.execute("DELETE FROM todos WHERE file_path = ?1", params![path])?;
        let files = conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;

        Ok(DeletedRows {
            dependencies,
            metrics,
            symbols,
            todos,
            files,
        })
    }

    pub fn remove_file(&self, path: &str) -> Result<DeletedRows> {
        let mut conn = self.acquire()?;
        let tx = conn.transaction()?;
        let deleted = Self::delete_file_rows_in(&tx, path)?;
        tx.commit()?;
        Ok(deleted)
    }

    // === Symbols ===

    pub fn upsert_symbol(&self, symbol: &SymbolRecord) -> Result<()> {
        let conn = self.acquire()?;
        Self::batch_upsert_symbols_in(&conn, std::slice::from_ref(symbol))
    }

    /// Upserts many symbols through one prepared statement in one transaction.
    pub fn batch_upsert_symbols(&self, symbols: &[SymbolRecord]) -> Result<()> {
        if symbols.is_empty() {
            return Ok(());
        }
        let mut conn = self.acquire()?;
        let tx = conn.transaction()?;
        Self::batch_upsert_symbols_in(&tx, symbols)?;
        tx.commit()?;
        Ok(())
    }

    pub fn batch_upsert_symbols_in(conn: &Connection, symbols: &[SymbolRecord]) -> Result<()> {
        let mut stmt = conn.prepare_cached(UPSERT_SYMBOL_SQL)?;
        for symbol in symbols {
            let metadata = symbol
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            stmt.execute(params![
                symbol.id,
                symbol.name,
                symbol.kind.as_str(),
                symbol.file_path,
                symbol.line_number as i64,
                symbol.signature,
                symbol.visibility.as_str(),
                symbol.complexity as i64,
                symbol.language,
                metadata,
            ])?;
        }
        Ok(())
    }

    /// Parameterized symbol lookup, always ordered by name.
    pub fn query(&self, filter: &SymbolFilter) -> Result<Vec<SymbolRecord>> {
        let conn = self.acquire()?;
        let (clause, mut values) = filter.conditions();
        let page = filter.pagination(&mut values);
        let sql = format!(
            "SELECT {} FROM symbols WHERE {} ORDER BY name, file_path, line_number{}",
            SYMBOL_COLUMNS, clause, page
        );
        let mut stmt = conn.prepare(&sql)?;
        let symbols = stmt
            .query_map(params_from_iter(values), Self::symbol_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(symbols)
    }

    pub fn symbols_for_file(&self, path: &str) -> Result<Vec<SymbolRecord>> {
        let conn = self.acquire()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM symbols WHERE file_path = ?1 ORDER BY line_number",
            SYMBOL_COLUMNS
        ))?;
        let symbols = stmt
            .query_map(params![path], Self::symbol_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(symbols)
    }

    /// Full-text lookup over symbol name, signature and file path. Each
    /// whitespace-separated term is quoted so FTS5 operators in user input
    /// are matched literally.
    pub fn full_text_search(&self, query: &str, limit: usize) -> Result<Vec<SymbolRecord>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.acquire()?;
        let columns = SYMBOL_COLUMNS
            .split(", ")
            .map(|c| format!("s.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r#"
            SELECT {}
            FROM symbols s
            JOIN symbols_fts ON s.rowid = symbols_fts.rowid
            WHERE symbols_fts MATCH ?1
            ORDER BY bm25(symbols_fts)
            LIMIT ?2
            "#,
            columns
        );
        let mut stmt = conn.prepare(&sql)?;
        let symbols = stmt
            .query_map(params![terms.join(" "), limit as i64], Self::symbol_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(symbols)
    }

    // === Dependencies ===

    /// Replaces the outgoing edges of `from_file` with `edges`.
    pub fn replace_dependencies_in(
        conn: &Connection,
        from_file: &str,
        edges: &[DependencyEdge],
    ) -> Result<usize> {
        conn.execute(
            "DELETE FROM dependencies WHERE from_file = ?1",
            params![from_file],
        )?;
        Self::insert_dependencies_in(conn, from_file, edges)
    }

    pub fn insert_dependencies_in(
        conn: &Connection,
        from_file: &str,
        edges: &[DependencyEdge],
    ) -> Result<usize> {
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO dependencies
            (from_file, to_file, kind, specifier, symbol_name, is_external, package_name,
             package_version, line_number)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )?;
        for edge in edges {
            stmt.execute(params![
                from_file,
                edge.to_file,
                edge.kind.as_str(),
                edge.specifier,
                edge.symbol_name,
                edge.is_external,
                edge.package_name,
                edge.package_version,
                edge.line_number as i64,
            ])?;
        }
        Ok(edges.len())
    }

    pub fn dependencies_from(&self, path: &str) -> Result<Vec<DependencyRecord>> {
        let conn = self.acquire()?;
        Self::dependencies_where(&conn, "from_file = ?1", path)
    }

    pub fn dependencies_to(&self, path: &str) -> Result<Vec<DependencyRecord>> {
        let conn = self.acquire()?;
        Self::dependencies_where(&conn, "to_file = ?1", path)
    }

    fn dependencies_where(
        conn: &Connection,
        clause: &'static str,
        path: &str,
    ) -> Result<Vec<DependencyRecord>> {
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT id, from_file, to_file, kind, specifier, symbol_name, is_external,
                   package_name, package_version, line_number
            FROM dependencies WHERE {} ORDER BY from_file, line_number, id
            "#,
            clause
        ))?;
        let deps = stmt
            .query_map(params![path], Self::dependency_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(deps)
    }

    /// Indexed files with an edge pointing at `path` (excluding itself).
    pub fn dependents_of(&self, path: &str) -> Result<Vec<String>> {
        let conn = self.acquire()?;
        Self::dependents_of_in(&conn, path)
    }

    pub fn dependents_of_in(conn: &Connection, path: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT DISTINCT d.from_file
            FROM dependencies d
            JOIN files f ON f.path = d.from_file
            WHERE d.to_file = ?1 AND d.from_file != ?1
            ORDER BY d.from_file
            "#,
        )?;
        let paths = stmt
            .query_map(params![path], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    // === Metrics ===

    pub fn record_metric(&self, metric: &MetricRecord) -> Result<()> {
        let conn = self.acquire()?;
        Self::record_metrics_in(&conn, std::slice::from_ref(metric))
    }

    pub fn record_metrics(&self, metrics: &[MetricRecord]) -> Result<()> {
        let mut conn = self.acquire()?;
        let tx = conn.transaction()?;
        Self::record_metrics_in(&tx, metrics)?;
        tx.commit()?;
        Ok(())
    }

    pub fn record_metrics_in(conn: &Connection, metrics: &[MetricRecord]) -> Result<()> {
        let mut stmt = conn.prepare_cached(INSERT_METRIC_SQL)?;
        for metric in metrics {
            stmt.execute(params![
                metric.id,
                metric.file_path,
                metric.symbol_id,
                metric.metric_type,
                metric.metric_name,
                metric.value,
                metric.recorded_at,
                metric.analysis_version,
            ])?;
        }
        Ok(())
    }

    pub fn metrics_for_file(&self, path: &str) -> Result<Vec<MetricRecord>> {
        let conn = self.acquire()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, file_path, symbol_id, metric_type, metric_name, value, recorded_at,
                   analysis_version
            FROM metrics WHERE file_path = ?1 ORDER BY recorded_at, metric_type
            "#,
        )?;
        let metrics = stmt
            .query_map(params![path], |row| {
                Ok(MetricRecord {
                    id: row.get(0)?,
                    file_path: row.get(1)?,
                    symbol_id: row.get(2)?,
                    metric_type: row.get(3)?,
                    metric_name: row.get(4)?,
                    value: row.get(5)?,
                    recorded_at: row.get(6)?,
                    analysis_version: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(metrics)
    }

    // === TODOs ===

    pub fn insert_todos_in(conn: &Connection, todos: &[TodoRecord]) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT OR REPLACE INTO todos (id, file_path, line_number, kind, text)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )?;
        for todo in todos {
            stmt.execute(params![
                todo.id,
                todo.file_path,
                todo.line_number as i64,
                todo.kind.as_str(),
                todo.text,
            ])?;
        }
        Ok(())
    }

    /// TODOs for one file, or for the whole index when `path` is `None`.
    pub fn todos(&self, path: Option<&str>) -> Result<Vec<TodoRecord>> {
        let conn = self.acquire()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, file_path, line_number, kind, text FROM todos
            WHERE ?1 IS NULL OR file_path = ?1
            ORDER BY file_path, line_number
            "#,
        )?;
        let todos = stmt
            .query_map(params![path], |row| {
                let kind: String = row.get(3)?;
                Ok(TodoRecord {
                    id: row.get(0)?,
                    file_path: row.get(1)?,
                    line_number: row.get::<_, i64>(2)? as u32,
                    kind: TodoKind::from_str(&kind).unwrap_or(TodoKind::Todo),
                    text: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(todos)
    }

    // === Git history ===

    pub fn upsert_commits(&self, commits: &[GitCommitRecord]) -> Result<usize> {
        let mut conn = self.acquire()?;
        let tx = conn.transaction()?;
        {
            let mut commit_stmt = tx.prepare_cached(
                r#"
                INSERT OR REPLACE INTO git_commits (hash, author, email, committed_at, message)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            let mut file_stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO git_commit_files (commit_hash, file_path) VALUES (?1, ?2)",
            )?;
            for commit in commits {
                commit_stmt.execute(params![
                    commit.hash,
                    commit.author,
                    commit.email,
                    commit.committed_at,
                    commit.message,
                ])?;
                for file in &commit.files {
                    file_stmt.execute(params![commit.hash, file])?;
                }
            }
        }
        tx.commit()?;
        Ok(commits.len())
    }

    /// Commits touching `path`, newest first.
    pub fn commits_for_file(&self, path: &str) -> Result<Vec<GitCommitRecord>> {
        let conn = self.acquire()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT c.hash, c.author, c.email, c.committed_at, c.message
            FROM git_commits c
            JOIN git_commit_files cf ON cf.commit_hash = c.hash
            WHERE cf.file_path = ?1
            ORDER BY c.committed_at DESC
            "#,
        )?;
        let mut commits = stmt
            .query_map(params![path], |row| {
                Ok(GitCommitRecord {
                    hash: row.get(0)?,
                    author: row.get(1)?,
                    email: row.get(2)?,
                    committed_at: row.get(3)?,
                    message: row.get(4)?,
                    files: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut files_stmt =
            conn.prepare("SELECT file_path FROM git_commit_files WHERE commit_hash = ?1")?;
        for commit in &mut commits {
            commit.files = files_stmt
                .query_map(params![commit.hash], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
        }
        Ok(commits)
    }

    // === Metadata ===

    pub fn get_metadata(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.acquire()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    /// Typed variant of [`get_metadata`](Self::get_metadata).
    pub fn get_metadata_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_metadata(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set_metadata<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let conn = self.acquire()?;
        let json = serde_json::to_string(value)?;
        conn.execute(
            r#"
            INSERT INTO metadata (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, json, storage::now_millis()],
        )?;
        Ok(())
    }

    // === Stats / maintenance ===

    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.acquire()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };

        let mut stmt = conn.prepare(
            "SELECT language, COUNT(*) FROM files GROUP BY language ORDER BY COUNT(*) DESC, language",
        )?;
        let files_by_language = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(IndexStats {
            total_files: count("files")?,
            total_symbols: count("symbols")?,
            total_dependencies: count("dependencies")?,
            total_metrics: count("metrics")?,
            total_todos: count("todos")?,
            files_by_language,
        })
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.acquire()?;
        conn.execute_batch(
            r#"
            DELETE FROM dependencies;
            DELETE FROM metrics;
            DELETE FROM symbols;
            DELETE FROM todos;
            DELETE FROM files;
            DELETE FROM git_commit_files;
            DELETE FROM git_commits;
            "#,
        )?;
        Ok(())
    }

    // === Row mapping ===

    fn file_from_row(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
        Ok(FileRecord {
            path: row.get(0)?,
            name: row.get(1)?,
            directory: row.get(2)?,
            extension: row.get(3)?,
            language: row.get(4)?,
            size: row.get::<_, i64>(5)? as u64,
            line_count: row.get::<_, i64>(6)? as u32,
            last_modified: row.get(7)?,
            checksum: row.get(8)?,
            is_binary: row.get(9)?,
        })
    }

    pub(crate) fn symbol_from_row(row: &rusqlite::Row) -> rusqlite::Result<SymbolRecord> {
        let kind: String = row.get(2)?;
        let visibility: String = row.get(6)?;
        let metadata: Option<String> = row.get(9)?;
        Ok(SymbolRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: SymbolKind::from_str(&kind).unwrap_or(SymbolKind::Variable),
            file_path: row.get(3)?,
            line_number: row.get::<_, i64>(4)? as u32,
            signature: row.get(5)?,
            visibility: Visibility::from_str(&visibility).unwrap_or(Visibility::Private),
            complexity: row.get::<_, i64>(7)? as u32,
            language: row.get(8)?,
            // Unreadable payloads are kept as raw bytes instead of failing the row.
            metadata: metadata.map(|raw| {
                serde_json::from_str::<SymbolMetadata>(&raw).unwrap_or(SymbolMetadata::Opaque {
                    bytes: raw.into_bytes(),
                })
            }),
        })
    }

    fn dependency_from_row(row: &rusqlite::Row) -> rusqlite::Result<DependencyRecord> {
        let kind: String = row.get(3)?;
        Ok(DependencyRecord {
            id: row.get(0)?,
            from_file: row.get(1)?,
            to_file: row.get(2)?,
            kind: DependencyKind::from_str(&kind).unwrap_or(DependencyKind::Import),
            specifier: row.get(4)?,
            symbol_name: row.get(5)?,
            is_external: row.get(6)?,
            package_name: row.get(7)?,
            package_version: row.get(8)?,
            line_number: row.get::<_, i64>(9)? as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_index() -> (SqliteIndex, TempDir) {
        let dir = TempDir::new().unwrap();
        let index = SqliteIndex::open(dir.path().join("index.db"), &StorageConfig::default())
            .unwrap();
        (index, dir)
    }

    fn add_test_file(index: &SqliteIndex, path: &str) {
        let file = FileRecord::from_content(path, "typescript", b"export const x = 1;\n", 1_000);
        index.upsert_file(&file).unwrap();
    }

    fn edge_to(target: Option<&str>, specifier: &str) -> DependencyEdge {
        DependencyEdge {
            to_file: target.map(|t| t.to_string()),
            kind: DependencyKind::Import,
            specifier: specifier.to_string(),
            symbol_name: None,
            is_external: target.is_none(),
            package_name: None,
            package_version: None,
            line_number: 1,
        }
    }

    #[test]
    fn test_upsert_and_get_file() {
        let (index, _dir) = create_index();
        add_test_file(&index, "/p/a.ts");

        let file = index.file("/p/a.ts").unwrap().unwrap();
        assert_eq!(file.name, "a.ts");
        assert_eq!(file.language, "typescript");
        assert_eq!(file.last_modified, 1_000);
        assert!(index.file("/p/missing.ts").unwrap().is_none());
    }

    #[test]
    fn test_upsert_file_replaces_by_key() {
        let (index, _dir) = create_index();
        add_test_file(&index, "/p/a.ts");
        let updated = FileRecord::from_content("/p/a.ts", "typescript", b"changed", 2_000);
        index.upsert_file(&updated).unwrap();

        assert_eq!(index.indexed_paths().unwrap().len(), 1);
        assert_eq!(index.file("/p/a.ts").unwrap().unwrap().checksum, updated.checksum);
    }

    #[test]
    fn test_batch_upsert_symbols_idempotent() {
        let (index, _dir) = create_index();
        add_test_file(&index, "/p/a.ts");
        let symbols = vec![
            SymbolRecord::new("alpha", SymbolKind::Function, "/p/a.ts", 1, "typescript"),
            SymbolRecord::new("beta", SymbolKind::Class, "/p/a.ts", 5, "typescript"),
        ];

        index.batch_upsert_symbols(&symbols).unwrap();
        index.batch_upsert_symbols(&symbols).unwrap();

        assert_eq!(index.symbols_for_file("/p/a.ts").unwrap(), symbols);
    }

    #[test]
    fn test_query_filters_and_orders_by_name() {
        let (index, _dir) = create_index();
        add_test_file(&index, "/p/a.ts");
        index
            .batch_upsert_symbols(&[
                SymbolRecord::new("zeta", SymbolKind::Function, "/p/a.ts", 1, "typescript")
                    .with_complexity(7),
                SymbolRecord::new("alpha", SymbolKind::Function, "/p/a.ts", 2, "typescript")
                    .with_complexity(2),
                SymbolRecord::new("Alphabet", SymbolKind::Class, "/p/a.ts", 3, "typescript"),
            ])
            .unwrap();

        let all = index.query(&SymbolFilter::default()).unwrap();
        let names: Vec<_> = all.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Alphabet", "alpha", "zeta"]);

        let funcs = index
            .query(&SymbolFilter {
                kind: Some(SymbolKind::Function),
                min_complexity: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(funcs.len(), 1);
        assert_eq!(funcs[0].name, "zeta");

        let by_name = index
            .query(&SymbolFilter {
                name: Some("lpha".into()),
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].name, "alpha");
    }

    #[test]
    fn test_query_binds_hostile_input() {
        let (index, _dir) = create_index();
        add_test_file(&index, "/p/a.ts");
        index
            .upsert_symbol(&SymbolRecord::new("safe", SymbolKind::Function, "/p/a.ts", 1, "ts"))
            .unwrap();

        let result = index
            .query(&SymbolFilter {
                name: Some("'; DROP TABLE symbols; --".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(index.stats().unwrap().total_symbols, 1);
    }

    #[test]
    fn test_symbol_metadata_persists() {
        let (index, _dir) = create_index();
        add_test_file(&index, "/p/a.ts");
        let symbol = SymbolRecord::new("run", SymbolKind::Function, "/p/a.ts", 1, "typescript")
            .with_metadata(SymbolMetadata::Callable {
                parameters: 3,
                is_async: true,
            });
        index.upsert_symbol(&symbol).unwrap();

        let stored = index.symbols_for_file("/p/a.ts").unwrap();
        assert_eq!(stored[0].metadata, symbol.metadata);
    }

    #[test]
    fn test_delete_file_rows_only_touches_target() {
        let (index, _dir) = create_index();
        add_test_file(&index, "/p/a.ts");
        add_test_file(&index, "/p/b.ts");
        index
            .batch_upsert_symbols(&[
                SymbolRecord::new("a1", SymbolKind::Function, "/p/a.ts", 1, "typescript"),
                SymbolRecord::new("b1", SymbolKind::Function, "/p/b.ts", 1, "typescript"),
            ])
            .unwrap();
        {
            let conn = index.acquire().unwrap();
            SqliteIndex::insert_dependencies_in(&conn, "/p/a.ts", &[edge_to(Some("/p/b.ts"), "./b")])
                .unwrap();
            SqliteIndex::insert_dependencies_in(&conn, "/p/b.ts", &[edge_to(None, "react")])
                .unwrap();
            SqliteIndex::insert_todos_in(
                &conn,
                &[TodoRecord::new("/p/a.ts", 3, TodoKind::Todo, "later")],
            )
            .unwrap();
        }
        index
            .record_metric(&MetricRecord::new("complexity", "total", 3.0, 10).for_file("/p/a.ts"))
            .unwrap();

        let deleted = index.remove_file("/p/a.ts").unwrap();
        assert_eq!(
            deleted,
            DeletedRows {
                dependencies: 1,
                metrics: 1,
                symbols: 1,
                todos: 1,
                files: 1,
            }
        );

        assert!(index.file("/p/a.ts").unwrap().is_none());
        assert_eq!(index.symbols_for_file("/p/b.ts").unwrap().len(), 1);
        assert_eq!(index.dependencies_from("/p/b.ts").unwrap().len(), 1);
    }

    #[test]
    fn test_dependents_of_excludes_self_and_unindexed() {
        let (index, _dir) = create_index();
        add_test_file(&index, "/p/a.ts");
        add_test_file(&index, "/p/b.ts");
        let conn = index.acquire().unwrap();
        SqliteIndex::insert_dependencies_in(&conn, "/p/a.ts", &[edge_to(Some("/p/b.ts"), "./b")])
            .unwrap();
        SqliteIndex::insert_dependencies_in(&conn, "/p/b.ts", &[edge_to(Some("/p/b.ts"), "./b")])
            .unwrap();
        SqliteIndex::insert_dependencies_in(&conn, "/p/ghost.ts", &[edge_to(Some("/p/b.ts"), "./b")])
            .unwrap();
        drop(conn);

        assert_eq!(index.dependents_of("/p/b.ts").unwrap(), vec!["/p/a.ts".to_string()]);
    }

    #[test]
    fn test_replace_dependencies() {
        let (index, _dir) = create_index();
        add_test_file(&index, "/p/a.ts");
        let conn = index.acquire().unwrap();
        SqliteIndex::insert_dependencies_in(&conn, "/p/a.ts", &[edge_to(None, "lodash")]).unwrap();
        SqliteIndex::replace_dependencies_in(
            &conn,
            "/p/a.ts",
            &[edge_to(None, "react"), edge_to(None, "zod")],
        )
        .unwrap();
        drop(conn);

        let specifiers: Vec<_> = index
            .dependencies_from("/p/a.ts")
            .unwrap()
            .into_iter()
            .map(|d| d.specifier)
            .collect();
        assert_eq!(specifiers, vec!["react", "zod"]);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let (index, _dir) = create_index();
        assert!(index.get_metadata("missing").unwrap().is_none());

        index
            .set_metadata("last_run", &serde_json::json!({"processed": 3}))
            .unwrap();
        index
            .set_metadata("last_run", &serde_json::json!({"processed": 4}))
            .unwrap();

        let value = index.get_metadata("last_run").unwrap().unwrap();
        assert_eq!(value["processed"], 4);
    }

    #[test]
    fn test_full_text_search() {
        let (index, _dir) = create_index();
        add_test_file(&index, "/p/a.ts");
        index
            .batch_upsert_symbols(&[
                SymbolRecord::new("parseConfig", SymbolKind::Function, "/p/a.ts", 1, "typescript")
                    .with_signature("function parseConfig(raw: string): Config"),
                SymbolRecord::new("render", SymbolKind::Function, "/p/a.ts", 9, "typescript"),
            ])
            .unwrap();

        let hits = index.full_text_search("parseConfig", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "parseConfig");

        let by_signature = index.full_text_search("Config", 10).unwrap();
        assert_eq!(by_signature.len(), 1);

        assert!(index.full_text_search("\"unbalanced", 10).unwrap().is_empty());
        assert!(index.full_text_search("   ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_commits_for_file() {
        let (index, _dir) = create_index();
        index
            .upsert_commits(&[
                GitCommitRecord {
                    hash: "aaa".into(),
                    author: "Dev".into(),
                    email: "dev@example.com".into(),
                    committed_at: 100,
                    message: "first".into(),
                    files: vec!["src/a.ts".into()],
                },
                GitCommitRecord {
                    hash: "bbb".into(),
                    author: "Dev".into(),
                    email: "dev@example.com".into(),
                    committed_at: 200,
                    message: "second".into(),
                    files: vec!["src/a.ts".into(), "src/b.ts".into()],
                },
            ])
            .unwrap();

        let commits = index.commits_for_file("src/a.ts").unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].hash, "bbb");
        assert_eq!(commits[0].files.len(), 2);
    }

    #[test]
    fn test_stats_and_clear() {
        let (index, _dir) = create_index();
        add_test_file(&index, "/p/a.ts");
        index
            .upsert_symbol(&SymbolRecord::new("a", SymbolKind::Function, "/p/a.ts", 1, "typescript"))
            .unwrap();

        let stats = index.stats().unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_symbols, 1);
        assert_eq!(stats.files_by_language, vec![("typescript".to_string(), 1)]);

        index.clear().unwrap();
        let stats = index.stats().unwrap();
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.total_symbols, 0);
    }
}
