//! Versioned schema migrations.
//!
//! Versions are tracked in the `meta` table under `schema_version`. Each
//! store passes its own ordered list; index + 1 is the version number and
//! each migration runs exactly once.

use rusqlite::Connection;

use crate::error::Result;

/// Migration function type.
pub type MigrationFn = fn(&Connection) -> Result<()>;

/// Runs all pending migrations, each inside its own transaction.
pub fn run_migrations(conn: &Connection, migrations: &[MigrationFn]) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    for (idx, migration) in migrations.iter().enumerate() {
        let version = (idx + 1) as u32;
        if version > current_version {
            conn.execute_batch("BEGIN")?;
            let applied = migration(conn).and_then(|_| set_schema_version(conn, version));
            match applied {
                Ok(()) => conn.execute_batch("COMMIT")?,
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(e);
                }
            }
            tracing::debug!("Applied schema migration v{}", version);
        }
    }

    Ok(())
}

/// Gets the current schema version (0 for a fresh database).
pub fn get_schema_version(conn: &Connection) -> Result<u32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .ok();

    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [version.to_string()],
    )?;
    Ok(())
}

/// Checks if a table (or virtual table) exists.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Checks if an index exists.
pub fn index_exists(conn: &Connection, index: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name=?1",
        [index],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn v1(conn: &Connection) -> Result<()> {
        conn.execute_batch("CREATE TABLE IF NOT EXISTS a (id INTEGER)")?;
        Ok(())
    }

    fn v2(conn: &Connection) -> Result<()> {
        conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_a ON a(id)")?;
        Ok(())
    }

    fn broken(conn: &Connection) -> Result<()> {
        conn.execute_batch("CREATE TABLE b (id INTEGER)")?;
        Err(EngineError::Config("boom".into()))
    }

    #[test]
    fn test_fresh_database_migrations() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, &[v1, v2]).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), 2);
        assert!(table_exists(&conn, "a").unwrap());
        assert!(index_exists(&conn, "idx_a").unwrap());
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, &[v1, v2]).unwrap();
        run_migrations(&conn, &[v1, v2]).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(run_migrations(&conn, &[v1, broken]).is_err());

        assert_eq!(get_schema_version(&conn).unwrap(), 1);
        assert!(!table_exists(&conn, "b").unwrap());
    }
}
