//! Change classification against the index.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::{compute_checksum, FileRecord, SqliteIndex};
use crate::indexer::extractor::{path_key, DiskSnapshot};
use crate::indexer::walker::FileWalker;

/// Modification times closer than this are treated as equal.
pub const MTIME_TOLERANCE_MS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Modified,
    Deleted,
    Unchanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::New => "new",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Unchanged => "unchanged",
        }
    }
}

/// Compares the stored record of a path with what is on disk.
///
/// Missing on disk is `Deleted`; on disk but not stored is `New`. A checksum
/// mismatch is `Modified`. With equal checksums, a modification time that
/// moved by more than [`MTIME_TOLERANCE_MS`] is still `Modified`.
pub fn classify(stored: Option<&FileRecord>, disk: Option<&DiskSnapshot>) -> ChangeKind {
    let Some(disk) = disk else {
        return ChangeKind::Deleted;
    };
    let Some(stored) = stored else {
        return ChangeKind::New;
    };
    if stored.checksum != compute_checksum(&disk.content) {
        return ChangeKind::Modified;
    }
    if (stored.last_modified - disk.last_modified).abs() > MTIME_TOLERANCE_MS {
        return ChangeKind::Modified;
    }
    ChangeKind::Unchanged
}

/// Reads `path` and classifies it against `stored`.
pub fn classify_path(path: &Path, stored: Option<&FileRecord>) -> std::io::Result<ChangeKind> {
    let disk = DiskSnapshot::read(path)?;
    Ok(classify(stored, disk.as_ref()))
}

/// Project-wide difference between the filesystem and the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectChanges {
    pub new_files: Vec<String>,
    pub changed_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub unchanged_files: Vec<String>,
}

impl ProjectChanges {
    /// Paths that need an update: new, changed and deleted.
    pub fn pending(&self) -> Vec<String> {
        self.new_files
            .iter()
            .chain(&self.changed_files)
            .chain(&self.deleted_files)
            .cloned()
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        !(self.new_files.is_empty() && self.changed_files.is_empty() && self.deleted_files.is_empty())
    }
}

/// Walks `root` and diffs it against the indexed files under `root`.
/// Files present in both are checksummed in parallel.
pub fn detect_project_changes(
    index: &SqliteIndex,
    walker: &FileWalker,
    root: &Path,
) -> Result<ProjectChanges> {
    let root = PathBuf::from(path_key(root));
    let on_disk: HashSet<String> = walker.walk(&root)?.into_iter().map(path_key).collect();

    let indexed: HashMap<String, FileRecord> = index
        .files()?
        .into_iter()
        .filter(|f| Path::new(&f.path).starts_with(&root))
        .map(|f| (f.path.clone(), f))
        .collect();

    let mut changes = ProjectChanges::default();

    for path in &on_disk {
        if !indexed.contains_key(path) {
            changes.new_files.push(path.clone());
        }
    }
    for path in indexed.keys() {
        if !on_disk.contains(path) {
            changes.deleted_files.push(path.clone());
        }
    }

    let common: Vec<(&String, &FileRecord)> = indexed
        .iter()
        .filter(|(path, _)| on_disk.contains(*path))
        .collect();
    let classified: Vec<(String, ChangeKind)> = common
        .par_iter()
        .map(|(path, stored)| {
            let kind = classify_path(Path::new(path.as_str()), Some(*stored)).unwrap_or_else(|e| {
                tracing::warn!("Could not read {}: {}", path, e);
                ChangeKind::Modified
            });
            ((*path).clone(), kind)
        })
        .collect();

    for (path, kind) in classified {
        match kind {
            ChangeKind::Unchanged => changes.unchanged_files.push(path),
            ChangeKind::Deleted => changes.deleted_files.push(path),
            ChangeKind::New | ChangeKind::Modified => changes.changed_files.push(path),
        }
    }

    changes.new_files.sort();
    changes.changed_files.sort();
    changes.deleted_files.sort();
    changes.unchanged_files.sort();

    tracing::info!(
        "Detected {} new, {} changed, {} deleted, {} unchanged under {}",
        changes.new_files.len(),
        changes.changed_files.len(),
        changes.deleted_files.len(),
        changes.unchanged_files.len(),
        root.display()
    );
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content: &[u8], last_modified: i64) -> FileRecord {
        FileRecord::from_content("/a.ts", "typescript", content, last_modified)
    }

    fn snapshot(content: &[u8], last_modified: i64) -> DiskSnapshot {
        DiskSnapshot {
            content: content.to_vec(),
            last_modified,
        }
    }

    #[test]
    fn test_classify() {
        let stored = record(b"a", 10_000);

        assert_eq!(classify(Some(&stored), None), ChangeKind::Deleted);
        assert_eq!(classify(None, Some(&snapshot(b"a", 0))), ChangeKind::New);
        assert_eq!(
            classify(Some(&stored), Some(&snapshot(b"b", 10_000))),
            ChangeKind::Modified
        );
        assert_eq!(
            classify(Some(&stored), Some(&snapshot(b"a", 10_900))),
            ChangeKind::Unchanged
        );
        assert_eq!(
            classify(Some(&stored), Some(&snapshot(b"a", 12_000))),
            ChangeKind::Modified
        );
    }

    #[test]
    fn test_pending_order() {
        let changes = ProjectChanges {
            new_files: vec!["n".into()],
            changed_files: vec!["c".into()],
            deleted_files: vec!["d".into()],
            unchanged_files: vec!["u".into()],
        };
        assert_eq!(changes.pending(), vec!["n", "c", "d"]);
        assert!(changes.has_changes());
        assert!(!ProjectChanges::default().has_changes());
    }
}
