//! Turns one file's bytes into the rows the index stores for it.

use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, Result};
use crate::index::{
    DependencyEdge, FileRecord, MetricRecord, SymbolRecord, TodoKind, TodoRecord,
};
use crate::languages::{normalize_path, ExtractorRegistry};
use crate::storage;

static TODO_COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?://|#|/\*|^\s*\*|<!--|--)\s*(TODO|FIXME|HACK|XXX)\b[:(\s]*(.*)$")
        .expect("valid todo regex")
});

/// The form a path takes as an index key: absolute, with `.` and `..`
/// resolved lexically. `./src/a.ts`, `src/a.ts` and `/work/src/a.ts` (run
/// from `/work`) share one key. Symlinks are not followed.
pub fn path_key(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(e) => {
                tracing::warn!("Cannot resolve {} against the working directory: {}", path.display(), e);
                path.to_path_buf()
            }
        }
    };
    normalize_path(&absolute).to_string_lossy().into_owned()
}

/// Rewrites resolved edge targets into index keys.
fn key_targets(edges: &mut [DependencyEdge]) {
    for edge in edges {
        if let Some(to_file) = edge.to_file.as_mut() {
            *to_file = path_key(to_file.as_str());
        }
    }
}

/// A file as read from disk.
#[derive(Debug, Clone)]
pub struct DiskSnapshot {
    pub content: Vec<u8>,
    /// Unix milliseconds
    pub last_modified: i64,
}

impl DiskSnapshot {
    /// Reads `path`. A missing file is `Ok(None)`.
    pub fn read(path: &Path) -> std::io::Result<Option<Self>> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            return Ok(None);
        }
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let content = fs::read(path)?;
        Ok(Some(Self {
            content,
            last_modified,
        }))
    }
}

/// Everything derived from one file.
#[derive(Debug, Clone)]
pub struct FileExtraction {
    pub file: FileRecord,
    pub symbols: Vec<SymbolRecord>,
    pub dependencies: Vec<DependencyEdge>,
    pub todos: Vec<TodoRecord>,
    pub metrics: Vec<MetricRecord>,
}

pub struct FileExtractor {
    registry: Arc<ExtractorRegistry>,
}

impl FileExtractor {
    pub fn new(registry: Arc<ExtractorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Reads and extracts `path`. Read failures are per-file extraction
    /// errors.
    pub fn extract_path(&self, path: &str) -> Result<FileExtraction> {
        let snapshot = DiskSnapshot::read(Path::new(path))
            .map_err(|e| EngineError::Extraction {
                path: path.to_string(),
                message: e.to_string(),
            })?
            .ok_or_else(|| EngineError::Extraction {
                path: path.to_string(),
                message: "file not found".to_string(),
            })?;
        Ok(self.extract(path, &snapshot))
    }

    pub fn extract(&self, path: &str, snapshot: &DiskSnapshot) -> FileExtraction {
        let extractor = self.registry.get_for_file(Path::new(path));
        let language = self.registry.language_for_file(Path::new(path));
        let file = FileRecord::from_content(path, &language, &snapshot.content, snapshot.last_modified);

        if file.is_binary {
            return FileExtraction {
                metrics: file_metrics(&file, &[]),
                file,
                symbols: Vec::new(),
                dependencies: Vec::new(),
                todos: Vec::new(),
            };
        }

        let text = String::from_utf8_lossy(&snapshot.content);
        let (symbols, mut dependencies) = match &extractor {
            Some(ext) => (
                ext.extract_symbols(path, &text),
                ext.extract_dependencies(path, &text),
            ),
            None => (Vec::new(), Vec::new()),
        };
        key_targets(&mut dependencies);
        let todos = extract_todos(path, &text);
        let metrics = file_metrics(&file, &symbols);

        tracing::debug!(
            "Extracted {}: {} symbols, {} dependencies, {} todos",
            path,
            symbols.len(),
            dependencies.len(),
            todos.len()
        );

        FileExtraction {
            file,
            symbols,
            dependencies,
            todos,
            metrics,
        }
    }

    /// Outgoing edges only, used when re-deriving a dependent file.
    pub fn extract_dependencies(&self, path: &str, snapshot: &DiskSnapshot) -> Vec<DependencyEdge> {
        if FileRecord::from_content(path, "", &snapshot.content, 0).is_binary {
            return Vec::new();
        }
        let mut edges = match self.registry.get_for_file(Path::new(path)) {
            Some(ext) => ext.extract_dependencies(path, &String::from_utf8_lossy(&snapshot.content)),
            None => Vec::new(),
        };
        key_targets(&mut edges);
        edges
    }
}

/// Marker comments in any language.
pub fn extract_todos(path: &str, content: &str) -> Vec<TodoRecord> {
    let mut todos = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let Some(caps) = TODO_COMMENT.captures(line) else {
            continue;
        };
        let Some(kind) = TodoKind::from_str(&caps[1]) else {
            continue;
        };
        let text = caps[2]
            .trim()
            .trim_end_matches("-->")
            .trim_end_matches("*/")
            .trim_end()
            .trim_start_matches(|c| c == ')' || c == ':')
            .trim()
            .to_string();
        todos.push(TodoRecord::new(path, idx as u32 + 1, kind, text));
    }
    todos
}

/// Per-file metrics appended on every (re)index.
fn file_metrics(file: &FileRecord, symbols: &[SymbolRecord]) -> Vec<MetricRecord> {
    let now = storage::now_secs();
    let complexity: u32 = symbols
        .iter()
        .filter(|s| s.kind.is_callable())
        .map(|s| s.complexity)
        .sum();
    vec![
        MetricRecord::new("lines_of_code", "total", file.line_count as f64, now).for_file(&file.path),
        MetricRecord::new("complexity", "cyclomatic_total", complexity as f64, now)
            .for_file(&file.path),
        MetricRecord::new("symbols", "count", symbols.len() as f64, now).for_file(&file.path),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SymbolKind;
    use std::fs;
    use tempfile::TempDir;

    fn extractor() -> FileExtractor {
        FileExtractor::new(Arc::new(ExtractorRegistry::new()))
    }

    #[test]
    fn test_extract_todos() {
        let source = "// TODO: split this up\nlet x = 1; # FIXME(alice) handle None\n/* HACK */\nconst TODO_LIST = [];\n<!-- XXX check -->\n";
        let todos = extract_todos("/a.ts", source);
        let found: Vec<_> = todos.iter().map(|t| (t.line_number, t.kind, t.text.as_str())).collect();
        assert_eq!(
            found,
            vec![
                (1, TodoKind::Todo, "split this up"),
                (2, TodoKind::Fixme, "alice) handle None"),
                (3, TodoKind::Hack, ""),
                (5, TodoKind::Xxx, "check"),
            ]
        );
    }

    #[test]
    fn test_extract_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.ts");
        fs::write(
            &path,
            "// TODO: more\nexport function f(a) {\n  if (a) { return 1; }\n  return 0;\n}\n",
        )
        .unwrap();
        let path = path.to_string_lossy().into_owned();

        let extraction = extractor().extract_path(&path).unwrap();
        assert_eq!(extraction.file.language, "typescript");
        assert_eq!(extraction.file.line_count, 5);
        assert_eq!(extraction.symbols.len(), 1);
        assert_eq!(extraction.symbols[0].kind, SymbolKind::Function);
        assert_eq!(extraction.todos.len(), 1);

        let metrics: Vec<_> = extraction
            .metrics
            .iter()
            .map(|m| (m.metric_type.as_str(), m.metric_name.as_str(), m.value))
            .collect();
        assert_eq!(
            metrics,
            vec![
                ("lines_of_code", "total", 5.0),
                ("complexity", "cyclomatic_total", 2.0),
                ("symbols", "count", 1.0),
            ]
        );
        assert!(extraction
            .metrics
            .iter()
            .all(|m| m.file_path.as_deref() == Some(path.as_str())));
    }

    #[test]
    fn test_unknown_language_and_binary() {
        let dir = TempDir::new().unwrap();
        let notes = dir.path().join("notes.txt");
        fs::write(&notes, "plain text").unwrap();
        let blob = dir.path().join("blob.bin");
        fs::write(&blob, [0u8, 1, 2, 3]).unwrap();

        let extraction = extractor().extract_path(&notes.to_string_lossy()).unwrap();
        assert_eq!(extraction.file.language, "unknown");
        assert!(extraction.symbols.is_empty());

        let extraction = extractor().extract_path(&blob.to_string_lossy()).unwrap();
        assert!(extraction.file.is_binary);
        assert!(extraction.todos.is_empty());
    }

    #[test]
    fn test_missing_file_is_extraction_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone.ts");
        let result = extractor().extract_path(&missing.to_string_lossy());
        assert!(matches!(result, Err(EngineError::Extraction { .. })));
    }
}
