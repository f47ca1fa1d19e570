//! Index store schema: tables first, then secondary indexes, then the
//! full-text structure over symbols.

use rusqlite::Connection;

use crate::error::Result;
use crate::storage::MigrationFn;

pub const MIGRATIONS: &[MigrationFn] = &[
    migration_v1_tables,
    migration_v2_indexes,
    migration_v3_symbol_fts,
];

fn migration_v1_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            path TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            directory TEXT NOT NULL,
            extension TEXT,
            language TEXT NOT NULL,
            size INTEGER NOT NULL,
            line_count INTEGER NOT NULL,
            last_modified INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            is_binary INTEGER NOT NULL DEFAULT 0,
            indexed_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS symbols (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            file_path TEXT NOT NULL REFERENCES files(path),
            line_number INTEGER NOT NULL,
            signature TEXT,
            visibility TEXT NOT NULL,
            complexity INTEGER NOT NULL DEFAULT 1,
            language TEXT NOT NULL,
            metadata TEXT
        );

        -- Append-only; rows are never updated in place
        CREATE TABLE IF NOT EXISTS metrics (
            id TEXT PRIMARY KEY,
            file_path TEXT REFERENCES files(path),
            symbol_id TEXT REFERENCES symbols(id),
            metric_type TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            value REAL NOT NULL,
            recorded_at INTEGER NOT NULL,
            analysis_version TEXT NOT NULL
        );

        -- to_file has no FK: external targets live outside the index
        CREATE TABLE IF NOT EXISTS dependencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_file TEXT NOT NULL REFERENCES files(path),
            to_file TEXT,
            kind TEXT NOT NULL,
            specifier TEXT NOT NULL,
            symbol_name TEXT,
            is_external INTEGER NOT NULL DEFAULT 0,
            package_name TEXT,
            package_version TEXT,
            line_number INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS git_commits (
            hash TEXT PRIMARY KEY,
            author TEXT NOT NULL,
            email TEXT NOT NULL,
            committed_at INTEGER NOT NULL,
            message TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS git_commit_files (
            commit_hash TEXT NOT NULL REFERENCES git_commits(hash),
            file_path TEXT NOT NULL,
            PRIMARY KEY (commit_hash, file_path)
        );

        CREATE TABLE IF NOT EXISTS todos (
            id TEXT PRIMARY KEY,
            file_path TEXT NOT NULL REFERENCES files(path),
            line_number INTEGER NOT NULL,
            kind TEXT NOT NULL,
            text TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn migration_v2_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_files_language ON files(language);
        CREATE INDEX IF NOT EXISTS idx_files_directory ON files(directory);

        CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
        CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);
        CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_path);
        CREATE INDEX IF NOT EXISTS idx_symbols_language ON symbols(language);
        CREATE INDEX IF NOT EXISTS idx_symbols_complexity ON symbols(complexity);

        CREATE INDEX IF NOT EXISTS idx_metrics_type_time ON metrics(metric_type, recorded_at);
        CREATE INDEX IF NOT EXISTS idx_metrics_file ON metrics(file_path);
        CREATE INDEX IF NOT EXISTS idx_metrics_symbol ON metrics(symbol_id);

        CREATE INDEX IF NOT EXISTS idx_deps_from ON dependencies(from_file);
        CREATE INDEX IF NOT EXISTS idx_deps_to ON dependencies(to_file);
        CREATE INDEX IF NOT EXISTS idx_deps_symbol ON dependencies(symbol_name);

        CREATE INDEX IF NOT EXISTS idx_commit_files_path ON git_commit_files(file_path);
        CREATE INDEX IF NOT EXISTS idx_commits_time ON git_commits(committed_at);

        CREATE INDEX IF NOT EXISTS idx_todos_file ON todos(file_path);
        "#,
    )?;
    Ok(())
}

/// External-content FTS5 table kept in sync by triggers. Symbol writes use
/// `ON CONFLICT DO UPDATE` so the update trigger (not a silent REPLACE)
/// keeps the index consistent.
fn migration_v3_symbol_fts(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS symbols_fts USING fts5(
            name,
            signature,
            file_path,
            content='symbols',
            content_rowid='rowid'
        );

        CREATE TRIGGER IF NOT EXISTS symbols_ai AFTER INSERT ON symbols BEGIN
            INSERT INTO symbols_fts(rowid, name, signature, file_path)
            VALUES (new.rowid, new.name, new.signature, new.file_path);
        END;

        CREATE TRIGGER IF NOT EXISTS symbols_ad AFTER DELETE ON symbols BEGIN
            INSERT INTO symbols_fts(symbols_fts, rowid, name, signature, file_path)
            VALUES ('delete', old.rowid, old.name, old.signature, old.file_path);
        END;

        CREATE TRIGGER IF NOT EXISTS symbols_au AFTER UPDATE ON symbols BEGIN
            INSERT INTO symbols_fts(symbols_fts, rowid, name, signature, file_path)
            VALUES ('delete', old.rowid, old.name, old.signature, old.file_path);
            INSERT INTO symbols_fts(rowid, name, signature, file_path)
            VALUES (new.rowid, new.name, new.signature, new.file_path);
        END;

        INSERT INTO symbols_fts(symbols_fts) VALUES ('rebuild');
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::{get_schema_version, index_exists, run_migrations, table_exists};

    #[test]
    fn test_index_schema_fresh() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, MIGRATIONS).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), MIGRATIONS.len() as u32);
        for table in [
            "files",
            "symbols",
            "metrics",
            "dependencies",
            "git_commits",
            "git_commit_files",
            "todos",
            "metadata",
            "symbols_fts",
        ] {
            assert!(table_exists(&conn, table).unwrap(), "missing table {}", table);
        }
        assert!(index_exists(&conn, "idx_deps_to").unwrap());
    }

    #[test]
    fn test_fts_tracks_symbol_updates() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, MIGRATIONS).unwrap();

        conn.execute_batch(
            r#"
            INSERT INTO symbols (id, name, kind, file_path, line_number, visibility, language)
            VALUES ('s1', 'parseConfig', 'function', '/a.ts', 1, 'public', 'typescript');
            UPDATE symbols SET name = 'loadConfig' WHERE id = 's1';
            "#,
        )
        .unwrap();

        let old: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM symbols_fts WHERE symbols_fts MATCH 'parseConfig'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let new: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM symbols_fts WHERE symbols_fts MATCH 'loadConfig'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(old, 0);
        assert_eq!(new, 1);
    }
}
