use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{EngineError, Result};
use crate::index::{GitCommitRecord, SqliteIndex};
use crate::indexer::path_key;

/// Starts each commit header in `git log` output.
const RECORD_MARKER: &str = "\u{1e}";
/// Separates header fields.
const FIELD_SEPARATOR: char = '\u{1f}';
const LOG_FORMAT: &str = "--format=%x1e%H%x1f%an%x1f%ae%x1f%ct%x1f%s";

/// Reads commit history and working-tree status through the `git` binary.
///
/// Paths are reported absolute (joined onto the repository top level) so
/// they line up with the paths stored in the index.
pub struct GitHistory {
    top_level: PathBuf,
}

/// Working-tree status of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeStatus {
    /// Maps a two-letter porcelain status (`XY`).
    pub fn from_porcelain(status: &str) -> Self {
        if status.starts_with('?') || status.contains('A') {
            ChangeStatus::Added
        } else if status.contains('D') {
            ChangeStatus::Deleted
        } else if status.starts_with('R') {
            ChangeStatus::Renamed
        } else {
            ChangeStatus::Modified
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Modified => "modified",
            ChangeStatus::Deleted => "deleted",
            ChangeStatus::Renamed => "renamed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub status: ChangeStatus,
}

impl GitHistory {
    /// Fails with [`EngineError::Git`] when `repo_path` is not inside a
    /// work tree or git cannot be run.
    pub fn open(repo_path: impl AsRef<Path>) -> Result<Self> {
        let repo_path = repo_path.as_ref();
        let output = run_git(repo_path, &["rev-parse", "--show-toplevel"])?;
        let top_level = PathBuf::from(output.trim());
        Ok(Self { top_level })
    }

    pub fn top_level(&self) -> &Path {
        &self.top_level
    }

    /// Commits reachable from HEAD, newest first, with the files each one
    /// touched. An empty repository yields no commits.
    pub fn commits(&self, limit: Option<usize>) -> Result<Vec<GitCommitRecord>> {
        let mut args = vec!["log".to_string(), "--name-only".to_string(), LOG_FORMAT.to_string()];
        if let Some(limit) = limit {
            args.push(format!("-n{}", limit));
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = match run_git(&self.top_level, &args) {
            Ok(output) => output,
            Err(EngineError::Git(message)) if message.contains("does not have any commits") => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        Ok(self.parse_log(&output))
    }

    /// Reads history and stores it in the index. Returns the number of
    /// commits written.
    pub fn sync(&self, index: &SqliteIndex, limit: Option<usize>) -> Result<usize> {
        let commits = self.commits(limit)?;
        let stored = index.upsert_commits(&commits)?;
        tracing::info!(
            "Stored {} commits from {}",
            stored,
            self.top_level.display()
        );
        Ok(stored)
    }

    /// Uncommitted changes, including untracked files.
    pub fn changed_files(&self) -> Result<Vec<ChangedFile>> {
        let output = run_git(&self.top_level, &["status", "--porcelain", "--untracked-files=all"])?;
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for line in output.lines() {
            let Some((status, path)) = parse_status_line(line) else {
                continue;
            };
            let path = self.absolute(path);
            if seen.insert(path.clone()) {
                files.push(ChangedFile { path, status });
            }
        }
        Ok(files)
    }

    fn parse_log(&self, output: &str) -> Vec<GitCommitRecord> {
        let mut commits = Vec::new();
        for record in output.split(RECORD_MARKER).filter(|r| !r.trim().is_empty()) {
            let mut lines = record.lines();
            let Some(header) = lines.next() else {
                continue;
            };
            let fields: Vec<&str> = header.splitn(5, FIELD_SEPARATOR).collect();
            if fields.len() < 5 {
                tracing::warn!("Skipping malformed git log header: {:?}", header);
                continue;
            }
            let files = lines
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| self.absolute(l))
                .collect();
            commits.push(GitCommitRecord {
                hash: fields[0].to_string(),
                author: fields[1].to_string(),
                email: fields[2].to_string(),
                committed_at: fields[3].parse().unwrap_or(0),
                message: fields[4].to_string(),
                files,
            });
        }
        commits
    }

    fn absolute(&self, relative: &str) -> String {
        path_key(self.top_level.join(relative))
    }
}

/// `XY path` or `XY old -> new` from `git status --porcelain`.
fn parse_status_line(line: &str) -> Option<(ChangeStatus, &str)> {
    if line.len() < 4 {
        return None;
    }
    let status = ChangeStatus::from_porcelain(&line[0..2]);
    let path = line[3..].trim();
    let path = path.rsplit(" -> ").next().unwrap_or(path).trim_matches('"');
    Some((status, path))
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| EngineError::Git(format!("failed to run git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::Git(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or(""),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use std::fs;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> bool {
        Command::new("git")
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_change_status_from_porcelain() {
        assert_eq!(ChangeStatus::from_porcelain("??"), ChangeStatus::Added);
        assert_eq!(ChangeStatus::from_porcelain("A "), ChangeStatus::Added);
        assert_eq!(ChangeStatus::from_porcelain(" M"), ChangeStatus::Modified);
        assert_eq!(ChangeStatus::from_porcelain(" D"), ChangeStatus::Deleted);
        assert_eq!(ChangeStatus::from_porcelain("R "), ChangeStatus::Renamed);
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(
            parse_status_line(" M src/main.rs"),
            Some((ChangeStatus::Modified, "src/main.rs"))
        );
        assert_eq!(
            parse_status_line("R  old.rs -> new.rs"),
            Some((ChangeStatus::Renamed, "new.rs"))
        );
        assert_eq!(parse_status_line("M"), None);
    }

    #[test]
    fn test_open_outside_repository() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(GitHistory::open(dir.path()), Err(EngineError::Git(_))));
    }

    #[test]
    fn test_commits_and_sync() {
        let dir = TempDir::new().unwrap();
        if !git(dir.path(), &["init", "-q"]) {
            return; // git unavailable
        }
        fs::write(dir.path().join("a.ts"), "export const A = 1;\n").unwrap();
        assert!(git(dir.path(), &["add", "."]));
        assert!(git(dir.path(), &["commit", "-q", "-m", "first commit"]));
        fs::write(dir.path().join("b.ts"), "export const B = 1;\n").unwrap();

        let history = GitHistory::open(dir.path()).unwrap();
        let commits = history.commits(None).unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, "first commit");
        assert_eq!(commits[0].author, "Test");
        assert_eq!(commits[0].files.len(), 1);
        assert!(commits[0].files[0].ends_with("a.ts"));

        let changed = history.changed_files().unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].status, ChangeStatus::Added);
        assert!(changed[0].path.ends_with("b.ts"));

        let index =
            SqliteIndex::open(dir.path().join(".state/index.db"), &StorageConfig::default())
                .unwrap();
        assert_eq!(history.sync(&index, Some(10)).unwrap(), 1);
        let stored = index.commits_for_file(&commits[0].files[0]).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].hash, commits[0].hash);
    }
}
