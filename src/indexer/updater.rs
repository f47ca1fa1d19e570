//! Transactional incremental update of the index.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::index::SqliteIndex;
use crate::indexer::changes::{classify, ChangeKind};
use crate::indexer::extractor::{path_key, DiskSnapshot, FileExtraction, FileExtractor};

/// Metadata key holding the counters of the most recent run.
pub const LAST_UPDATE_KEY: &str = "last_incremental_update";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFailure {
    pub path: String,
    pub message: String,
}

/// Counters of one `update_index` / `bulk_update` run.
///
/// `processed` counts paths whose rows were written or removed, `skipped`
/// counts unchanged paths and paths that are neither on disk nor indexed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateStats {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration_ms: u64,
    pub new_files: usize,
    pub modified_files: usize,
    pub deleted_files: usize,
    pub dependents_refreshed: usize,
    /// New, modified and deleted paths, in input order
    pub changed_paths: Vec<String>,
    pub failures: Vec<UpdateFailure>,
}

impl UpdateStats {
    fn record_failure(&mut self, path: &str, message: String) {
        self.errors += 1;
        self.failures.push(UpdateFailure {
            path: path.to_string(),
            message,
        });
    }

    fn record_change(&mut self, path: &str, kind: ChangeKind) {
        match kind {
            ChangeKind::New => self.new_files += 1,
            ChangeKind::Modified => self.modified_files += 1,
            ChangeKind::Deleted => self.deleted_files += 1,
            ChangeKind::Unchanged => {
                self.skipped += 1;
                return;
            }
        }
        self.processed += 1;
        self.changed_paths.push(path.to_string());
    }

    /// Adds the counters of a later batch.
    pub fn merge(&mut self, other: UpdateStats) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.duration_ms += other.duration_ms;
        self.new_files += other.new_files;
        self.modified_files += other.modified_files;
        self.deleted_files += other.deleted_files;
        self.dependents_refreshed += other.dependents_refreshed;
        self.changed_paths.extend(other.changed_paths);
        self.failures.extend(other.failures);
    }
}

/// Applies filesystem changes to the index.
///
/// Every call to [`update_index`](Self::update_index) runs in one
/// transaction. A path that cannot be read is recorded as a failure and the
/// batch goes on; a failing storage statement rolls the whole batch back.
pub struct IncrementalUpdater<'a> {
    index: &'a SqliteIndex,
    extractor: &'a FileExtractor,
}

impl<'a> IncrementalUpdater<'a> {
    pub fn new(index: &'a SqliteIndex, extractor: &'a FileExtractor) -> Self {
        Self { index, extractor }
    }

    /// Paths may be relative to the working directory; rows are keyed by
    /// [`path_key`].
    pub fn update_index(&self, paths: &[String]) -> Result<UpdateStats> {
        let started = Instant::now();
        let paths: Vec<String> = paths.iter().map(path_key).collect();
        let mut stats = UpdateStats::default();
        // Files with an edge into a changed path, re-derived after the batch
        let mut dependents = BTreeSet::new();

        let mut conn = self.index.acquire()?;
        let tx = conn.transaction()?;

        for path in &paths {
            match self.apply_path(&tx, path, &mut dependents) {
                Ok(Some(kind)) => stats.record_change(path, kind),
                Ok(None) => {
                    tracing::debug!("Skipping {}: not on disk and not indexed", path);
                    stats.skipped += 1;
                }
                Err(e) if e.is_storage() => {
                    tracing::error!("Index update rolled back at {}: {}", path, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Failed to update {}: {}", path, e);
                    stats.record_failure(path, e.to_string());
                }
            }
        }

        for dependent in &dependents {
            match self.refresh_dependent(&tx, dependent) {
                Ok(true) => stats.dependents_refreshed += 1,
                Ok(false) => {}
                Err(e) if e.is_storage() => {
                    tracing::error!("Index update rolled back at dependent {}: {}", dependent, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Failed to refresh dependent {}: {}", dependent, e);
                    stats.record_failure(dependent, e.to_string());
                }
            }
        }

        tx.commit()?;
        drop(conn);

        stats.duration_ms = started.elapsed().as_millis() as u64;
        self.record_run(&stats);

        tracing::info!(
            "Updated index: {} processed ({} new, {} modified, {} deleted), {} skipped, {} errors, {} dependents in {}ms",
            stats.processed,
            stats.new_files,
            stats.modified_files,
            stats.deleted_files,
            stats.skipped,
            stats.errors,
            stats.dependents_refreshed,
            stats.duration_ms
        );
        Ok(stats)
    }

    /// Runs [`update_index`](Self::update_index) over fixed-size chunks.
    /// A batch that fails as a whole is recorded as a failure for each of
    /// its paths and the remaining batches still run.
    pub fn bulk_update(&self, paths: &[String], batch_size: usize) -> Result<UpdateStats> {
        if batch_size == 0 {
            return Err(EngineError::InvalidArgument(
                "batch_size must be greater than zero".into(),
            ));
        }

        let started = Instant::now();
        let paths: Vec<String> = paths.iter().map(path_key).collect();
        let mut total = UpdateStats::default();
        let batches = paths.len().div_ceil(batch_size);

        for (i, batch) in paths.chunks(batch_size).enumerate() {
            tracing::debug!("Bulk update batch {}/{} ({} paths)", i + 1, batches, batch.len());
            match self.update_index(batch) {
                Ok(stats) => total.merge(stats),
                Err(e) => {
                    tracing::error!("Bulk update batch {}/{} failed: {}", i + 1, batches, e);
                    let message = e.to_string();
                    for path in batch {
                        total.record_failure(path, message.clone());
                    }
                }
            }
        }

        total.duration_ms = started.elapsed().as_millis() as u64;
        self.record_run(&total);
        Ok(total)
    }

    /// Stores the run counters. The index is already committed by now, so
    /// a failure here is logged and the counters are still returned.
    fn record_run(&self, stats: &UpdateStats) {
        if let Err(e) = self.index.set_metadata(LAST_UPDATE_KEY, stats) {
            tracing::error!("Failed to store {}: {}", LAST_UPDATE_KEY, e);
        }
    }

    /// Brings one path in line with the disk. Returns `None` when the path
    /// is neither on disk nor indexed.
    fn apply_path(
        &self,
        conn: &Connection,
        path: &str,
        dependents: &mut BTreeSet<String>,
    ) -> Result<Option<ChangeKind>> {
        let stored = SqliteIndex::file_in(conn, path)?;
        let disk = DiskSnapshot::read(Path::new(path)).map_err(|e| EngineError::Extraction {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        let Some(snapshot) = disk else {
            if stored.is_none() {
                return Ok(None);
            }
            dependents.extend(SqliteIndex::dependents_of_in(conn, path)?);
            let deleted = SqliteIndex::delete_file_rows_in(conn, path)?;
            tracing::debug!("Removed {} ({} rows)", path, deleted.total());
            return Ok(Some(ChangeKind::Deleted));
        };

        let kind = classify(stored.as_ref(), Some(&snapshot));
        if kind == ChangeKind::Unchanged {
            return Ok(Some(kind));
        }

        let extraction = self.extractor.extract(path, &snapshot);
        if stored.is_some() {
            dependents.extend(SqliteIndex::dependents_of_in(conn, path)?);
            SqliteIndex::delete_file_rows_in(conn, path)?;
        }
        write_extraction(conn, &extraction)?;
        tracing::debug!("Indexed {} as {}", path, kind.as_str());

        Ok(Some(kind))
    }

    /// Re-derives the outgoing edges of an indexed file. Returns `false`
    /// when the file is no longer indexed or no longer on disk.
    fn refresh_dependent(&self, conn: &Connection, path: &str) -> Result<bool> {
        if SqliteIndex::file_in(conn, path)?.is_none() {
            return Ok(false);
        }
        let snapshot = DiskSnapshot::read(Path::new(path)).map_err(|e| EngineError::Extraction {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        let Some(snapshot) = snapshot else {
            tracing::debug!("Dependent {} is gone from disk; left for its own update", path);
            return Ok(false);
        };

        let edges = self.extractor.extract_dependencies(path, &snapshot);
        SqliteIndex::replace_dependencies_in(conn, path, &edges)?;
        Ok(true)
    }
}

fn write_extraction(conn: &Connection, extraction: &FileExtraction) -> Result<()> {
    let path = extraction.file.path.as_str();
    SqliteIndex::upsert_file_in(conn, &extraction.file)?;
    SqliteIndex::batch_upsert_symbols_in(conn, &extraction.symbols)?;
    SqliteIndex::insert_dependencies_in(conn, path, &extraction.dependencies)?;
    SqliteIndex::insert_todos_in(conn, &extraction.todos)?;
    SqliteIndex::record_metrics_in(conn, &extraction.metrics)?;
    Ok(())
}
