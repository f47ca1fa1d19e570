//! Regex-based symbol and dependency extraction, one extractor per
//! language, looked up by file extension.

pub mod go;
pub mod python;
pub mod rust;
pub mod typescript;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use regex::Regex;

use crate::index::{DependencyEdge, DependencyKind, SymbolKind, SymbolMetadata, SymbolRecord, Visibility};

/// Language used for files no extractor claims.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

pub trait LanguageExtractor: Send + Sync {
    fn language(&self) -> &'static str;
    fn extensions(&self) -> &[&'static str];
    fn extract_symbols(&self, path: &str, content: &str) -> Vec<SymbolRecord>;
    /// Outgoing edges of the file. Relative specifiers are resolved against
    /// the filesystem; anything unresolvable is kept with `to_file = None`.
    fn extract_dependencies(&self, path: &str, content: &str) -> Vec<DependencyEdge>;
}

pub struct ExtractorRegistry {
    languages: HashMap<String, Arc<dyn LanguageExtractor>>,
    extension_map: HashMap<String, String>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(typescript::TypeScriptExtractor::typescript()));
        registry.register(Arc::new(typescript::TypeScriptExtractor::javascript()));
        registry.register(Arc::new(rust::RustExtractor));
        registry.register(Arc::new(python::PythonExtractor));
        registry.register(Arc::new(go::GoExtractor));
        registry
    }

    pub fn empty() -> Self {
        Self {
            languages: HashMap::new(),
            extension_map: HashMap::new(),
        }
    }

    /// Adds or replaces the extractor for a language and its extensions.
    pub fn register(&mut self, extractor: Arc<dyn LanguageExtractor>) {
        let name = extractor.language().to_string();
        for ext in extractor.extensions() {
            self.extension_map.insert(ext.to_string(), name.clone());
        }
        self.languages.insert(name, extractor);
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn LanguageExtractor>> {
        self.languages.get(name).cloned()
    }

    pub fn get_for_file(&self, path: &Path) -> Option<Arc<dyn LanguageExtractor>> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.extension_map.get(ext))
            .and_then(|name| self.languages.get(name))
            .cloned()
    }

    /// Language name for a path, `"unknown"` when no extractor claims it.
    pub fn language_for_file(&self, path: &Path) -> String {
        self.get_for_file(path)
            .map(|e| e.language().to_string())
            .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string())
    }

    pub fn supported_languages(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.languages.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =====================================================
// Shared extraction helpers
// =====================================================

/// A declaration found by a language scanner, before complexity is known.
#[derive(Debug, Clone)]
pub(crate) struct Declaration {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based
    pub line: u32,
    pub signature: String,
    pub visibility: Visibility,
    pub metadata: Option<SymbolMetadata>,
}

/// Turns declarations into records. A callable's complexity is 1 plus the
/// decision tokens between its line and the next declaration.
pub(crate) fn build_symbols(
    path: &str,
    language: &str,
    content: &str,
    mut decls: Vec<Declaration>,
    decisions: &Regex,
) -> Vec<SymbolRecord> {
    decls.sort_by_key(|d| d.line);
    let lines: Vec<&str> = content.lines().collect();

    let mut symbols = Vec::with_capacity(decls.len());
    for (i, decl) in decls.iter().enumerate() {
        let complexity = if decl.kind.is_callable() {
            let start = decl.line.saturating_sub(1) as usize;
            let end = decls
                .get(i + 1)
                .map(|next| next.line.saturating_sub(1) as usize)
                .unwrap_or(lines.len())
                .max(start + 1)
                .min(lines.len());
            let branches: usize = lines
                .get(start..end)
                .unwrap_or_default()
                .iter()
                .map(|line| decisions.find_iter(line).count())
                .sum();
            1 + branches as u32
        } else {
            1
        };

        let mut symbol = SymbolRecord::new(&decl.name, decl.kind, path, decl.line, language)
            .with_signature(decl.signature.trim())
            .with_visibility(decl.visibility)
            .with_complexity(complexity);
        if let Some(metadata) = &decl.metadata {
            symbol = symbol.with_metadata(metadata.clone());
        }
        symbols.push(symbol);
    }
    symbols
}

/// Counts top-level comma-separated parameters.
pub(crate) fn count_parameters(params: &str) -> u32 {
    let params = params.trim();
    if params.is_empty() {
        return 0;
    }
    let mut depth = 0i32;
    let mut count = 1u32;
    for c in params.chars() {
        match c {
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => depth -= 1,
            ',' if depth == 0 => count += 1,
            _ => {}
        }
    }
    // Trailing comma
    if params.ends_with(',') {
        count -= 1;
    }
    count
}

/// 1-based line of a byte offset.
pub(crate) fn line_of(content: &str, offset: usize) -> u32 {
    content[..offset.min(content.len())]
        .bytes()
        .filter(|b| *b == b'\n')
        .count() as u32
        + 1
}

/// Lexically resolves `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// First existing file among `base`, `base.<ext>` and `base/<index>.<ext>`.
pub(crate) fn probe_file(base: &Path, extensions: &[&str], index_stems: &[&str]) -> Option<String> {
    let base = normalize_path(base);
    if base.is_file() {
        return Some(base.to_string_lossy().into_owned());
    }
    for ext in extensions {
        let mut candidate = base.clone().into_os_string();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return Some(candidate.to_string_lossy().into_owned());
        }
    }
    for stem in index_stems {
        for ext in extensions {
            let candidate = base.join(format!("{}.{}", stem, ext));
            if candidate.is_file() {
                return Some(candidate.to_string_lossy().into_owned());
            }
        }
    }
    None
}

/// Directory of the file at `path`.
pub(crate) fn parent_dir(path: &str) -> PathBuf {
    Path::new(path)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

pub(crate) fn internal_edge(
    kind: DependencyKind,
    specifier: &str,
    to_file: Option<String>,
    symbol_name: Option<String>,
    line_number: u32,
) -> DependencyEdge {
    DependencyEdge {
        to_file,
        kind,
        specifier: specifier.to_string(),
        symbol_name,
        is_external: false,
        package_name: None,
        package_version: None,
        line_number,
    }
}

pub(crate) fn external_edge(
    kind: DependencyKind,
    specifier: &str,
    package: &str,
    symbol_name: Option<String>,
    line_number: u32,
) -> DependencyEdge {
    DependencyEdge {
        to_file: None,
        kind,
        specifier: specifier.to_string(),
        symbol_name,
        is_external: true,
        package_name: Some(package.to_string()),
        package_version: None,
        line_number,
    }
}

/// One edge per imported name, or a single name-less edge when nothing is
/// named.
pub(crate) fn edges_for_names(
    names: Vec<String>,
    make: impl Fn(Option<String>) -> DependencyEdge,
) -> Vec<DependencyEdge> {
    if names.is_empty() {
        vec![make(None)]
    } else {
        names.into_iter().map(|n| make(Some(n))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_registry_lookup() {
        let registry = ExtractorRegistry::new();
        assert_eq!(registry.language_for_file(Path::new("a.ts")), "typescript");
        assert_eq!(registry.language_for_file(Path::new("a.tsx")), "typescript");
        assert_eq!(registry.language_for_file(Path::new("a.js")), "javascript");
        assert_eq!(registry.language_for_file(Path::new("lib.rs")), "rust");
        assert_eq!(registry.language_for_file(Path::new("app.py")), "python");
        assert_eq!(registry.language_for_file(Path::new("main.go")), "go");
        assert_eq!(registry.language_for_file(Path::new("README.md")), UNKNOWN_LANGUAGE);
        assert_eq!(registry.language_for_file(Path::new("Makefile")), UNKNOWN_LANGUAGE);
    }

    #[test]
    fn test_count_parameters() {
        assert_eq!(count_parameters(""), 0);
        assert_eq!(count_parameters("a"), 1);
        assert_eq!(count_parameters("a: Map<K, V>, b: (i32, i32)"), 2);
        assert_eq!(count_parameters("a, b,"), 2);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/src/a/../b/./c.ts")),
            PathBuf::from("/src/b/c.ts")
        );
    }

    #[test]
    fn test_probe_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("util.ts"), "").unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/index.js"), "").unwrap();

        let found = probe_file(&dir.path().join("util"), &["ts", "js"], &["index"]).unwrap();
        assert!(found.ends_with("util.ts"));
        let found = probe_file(&dir.path().join("lib"), &["ts", "js"], &["index"]).unwrap();
        assert!(found.ends_with("index.js"));
        assert!(probe_file(&dir.path().join("missing"), &["ts"], &["index"]).is_none());
    }

    #[test]
    fn test_complexity_spans_to_next_declaration() {
        let decisions = Regex::new(r"\bif\b").unwrap();
        let content = "fn a\nif\nif\nfn b\nif\n";
        let decls = vec![
            Declaration {
                name: "b".into(),
                kind: SymbolKind::Function,
                line: 4,
                signature: "fn b".into(),
                visibility: Visibility::Private,
                metadata: None,
            },
            Declaration {
                name: "a".into(),
                kind: SymbolKind::Function,
                line: 1,
                signature: "fn a".into(),
                visibility: Visibility::Private,
                metadata: None,
            },
        ];
        let symbols = build_symbols("/x.rs", "rust", content, decls, &decisions);
        assert_eq!(symbols[0].name, "a");
        assert_eq!(symbols[0].complexity, 3);
        assert_eq!(symbols[1].complexity, 2);
    }
}
