use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;

use crate::error::{EngineError, Result};

/// Lists the regular files of a project, honouring ignore files and never
/// descending into excluded directories (VCS metadata, build output,
/// dependency caches).
pub struct FileWalker {
    excluded_dirs: Arc<HashSet<String>>,
}

impl FileWalker {
    pub fn new<I, S>(excluded_dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded_dirs: Arc::new(excluded_dirs.into_iter().map(Into::into).collect()),
        }
    }

    pub fn walk(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(EngineError::InvalidArgument(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let excluded = Arc::clone(&self.excluded_dirs);
        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .ignore(true)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                !(is_dir && excluded.contains(entry.file_name().to_string_lossy().as_ref()))
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => tracing::warn!("Skipping unreadable entry under {}: {}", root.display(), e),
            }
        }
        files.sort();

        Ok(files)
    }

    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs.contains(name)
    }
}
