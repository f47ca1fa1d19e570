use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    build_symbols, count_parameters, edges_for_names, external_edge, internal_edge, line_of,
    normalize_path, parent_dir, Declaration, LanguageExtractor,
};
use crate::index::{DependencyEdge, DependencyKind, SymbolKind, SymbolMetadata, SymbolRecord, Visibility};

static FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(\s*)(pub(?:\([^)]*\))?\s+)?(?:default\s+)?(?:const\s+)?(async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+([A-Za-z_]\w*)\s*(<[^(]*>)?\s*\(([^)]*)\)?"#,
    )
    .expect("valid fn regex")
});

static ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?(struct|enum|trait|type|mod|const|static|union)\s+(?:mut\s+)?([A-Za-z_]\w*)\s*(<)?",
    )
    .expect("valid item regex")
});

static IMPL_OR_TRAIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?(?:impl\b|trait\s)").expect("valid impl regex")
});

static DECISIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:if|for|while|loop)\b|=>|&&|\|\|").expect("valid decision regex")
});

static USE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?use\s+([^;]+);").expect("valid use regex")
});

static MOD_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_]\w*)\s*;").expect("valid mod regex")
});

static EXTERN_CRATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*extern\s+crate\s+([A-Za-z_]\w*)").expect("valid extern crate regex")
});

pub struct RustExtractor;

fn visibility(modifier: Option<&str>) -> Visibility {
    match modifier.map(str::trim) {
        Some("pub") => Visibility::Public,
        Some(_) => Visibility::Internal,
        None => Visibility::Private,
    }
}

/// `self`, `&self`, `&'a mut self`, `self: Box<Self>`
fn is_receiver(param: &str) -> bool {
    let param = param.trim().trim_start_matches('&');
    param.starts_with("self") || param.split_whitespace().last() == Some("self")
}

fn signature(line: &str) -> String {
    line.trim()
        .trim_end_matches('{')
        .trim_end_matches(';')
        .trim_end()
        .to_string()
}

/// Directory holding the children of the module defined by `file`:
/// `src/a.rs` -> `src/a/`, `src/a/mod.rs` -> `src/a/`, `src/lib.rs` -> `src/`.
fn module_dir(file: &str) -> PathBuf {
    let path = Path::new(file);
    let dir = parent_dir(file);
    match path.file_stem().and_then(|s| s.to_str()) {
        Some("mod") | Some("lib") | Some("main") | None => dir,
        Some(stem) => dir.join(stem),
    }
}

/// The `src` directory enclosing `file`, if any.
fn crate_root(file: &str) -> Option<PathBuf> {
    Path::new(file)
        .ancestors()
        .find(|p| p.file_name().map(|n| n == "src").unwrap_or(false))
        .map(Path::to_path_buf)
}

/// Longest module prefix of `segments` under `dir` that exists as a file.
fn resolve_module(dir: &Path, segments: &[&str]) -> Option<String> {
    for len in (1..=segments.len()).rev() {
        let mut base = dir.to_path_buf();
        for seg in &segments[..len] {
            base.push(seg);
        }
        let file = base.with_extension("rs");
        if file.is_file() {
            return Some(normalize_path(&file).to_string_lossy().into_owned());
        }
        let mod_file = base.join("mod.rs");
        if mod_file.is_file() {
            return Some(normalize_path(&mod_file).to_string_lossy().into_owned());
        }
    }
    None
}

/// Leaf names of a use tree: `a::{b, c::D as E, self}` -> `[b, D]`.
fn use_names(tree: &str) -> Vec<String> {
    let tree: String = tree.split_whitespace().collect::<Vec<_>>().join(" ");
    let leaves: Vec<&str> = match (tree.find('{'), tree.rfind('}')) {
        (Some(open), Some(close)) if close > open => tree[open + 1..close]
            .split(|c| c == ',' || c == '{' || c == '}')
            .collect(),
        _ => vec![tree.as_str()],
    };
    leaves
        .into_iter()
        .filter_map(|leaf| {
            let leaf = leaf.trim();
            let path = leaf.split(" as ").next().unwrap_or(leaf).trim();
            let name = path.rsplit("::").next().unwrap_or(path).trim();
            if name.is_empty() || name == "*" || name == "self" || name.ends_with("::") {
                None
            } else {
                Some(name.to_string())
            }
        })
        .collect()
}

impl RustExtractor {
    fn use_edges(&self, path: &str, tree: &str, line: u32) -> Vec<DependencyEdge> {
        let tree = tree.split_whitespace().collect::<Vec<_>>().join(" ");
        let tree = tree.trim_start_matches("::");
        let prefix = tree.split('{').next().unwrap_or(tree);
        let segments: Vec<&str> = prefix
            .split("::")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let Some(root) = segments.first().copied() else {
            return Vec::new();
        };
        let names = use_names(tree);

        let internal_base = match root {
            "crate" => Some((crate_root(path), 1)),
            "self" => Some((Some(module_dir(path)), 1)),
            "super" => {
                let supers = segments.iter().take_while(|s| **s == "super").count();
                let mut dir = module_dir(path);
                for _ in 0..supers {
                    dir.pop();
                }
                Some((Some(dir), supers))
            }
            _ => None,
        };

        match internal_base {
            Some((dir, skip)) => {
                let to_file = dir.and_then(|d| resolve_module(&d, &segments[skip.min(segments.len())..]));
                edges_for_names(names, |name| {
                    internal_edge(DependencyKind::Use, &tree, to_file.clone(), name, line)
                })
            }
            None => edges_for_names(names, |name| {
                external_edge(DependencyKind::Use, &tree, root, name, line)
            }),
        }
    }
}

impl LanguageExtractor for RustExtractor {
    fn language(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &[&'static str] {
        &["rs"]
    }

    fn extract_symbols(&self, path: &str, content: &str) -> Vec<SymbolRecord> {
        let mut decls = Vec::new();
        let mut in_impl = false;

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                continue;
            }
            // Top-level items open or close an impl/trait body
            if !line.starts_with(char::is_whitespace) {
                if IMPL_OR_TRAIT.is_match(line) {
                    in_impl = true;
                } else if FUNCTION.is_match(line) || ITEM.is_match(line) {
                    in_impl = false;
                }
            }

            if let Some(caps) = FUNCTION.captures(line) {
                let indented = !caps[1].is_empty();
                let kind = if indented && in_impl {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                let params = caps.get(6).map(|m| m.as_str()).unwrap_or("");
                let mut parameters = count_parameters(params);
                if params.split(',').next().map(is_receiver).unwrap_or(false) {
                    parameters -= 1;
                }
                decls.push(Declaration {
                    name: caps[4].to_string(),
                    kind,
                    line: line_no,
                    signature: signature(line),
                    visibility: visibility(caps.get(2).map(|m| m.as_str())),
                    metadata: Some(SymbolMetadata::Callable {
                        parameters,
                        is_async: caps.get(3).is_some(),
                    }),
                });
            } else if let Some(caps) = ITEM.captures(line) {
                let kind = match &caps[2] {
                    "struct" | "union" => SymbolKind::Struct,
                    "enum" => SymbolKind::Enum,
                    "trait" => SymbolKind::Trait,
                    "type" => SymbolKind::TypeAlias,
                    "mod" => SymbolKind::Module,
                    "const" => SymbolKind::Constant,
                    _ => SymbolKind::Variable,
                };
                let metadata = match kind {
                    SymbolKind::Struct | SymbolKind::Enum | SymbolKind::Trait | SymbolKind::TypeAlias => {
                        Some(SymbolMetadata::TypeDef {
                            generic: caps.get(4).is_some(),
                        })
                    }
                    _ => None,
                };
                decls.push(Declaration {
                    name: caps[3].to_string(),
                    kind,
                    line: line_no,
                    signature: signature(line),
                    visibility: visibility(caps.get(1).map(|m| m.as_str())),
                    metadata,
                });
            }
        }

        build_symbols(path, "rust", content, decls, &DECISIONS)
    }

    fn extract_dependencies(&self, path: &str, content: &str) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();

        for caps in USE.captures_iter(content) {
            let line = line_of(content, caps.get(0).map(|m| m.start()).unwrap_or(0));
            edges.extend(self.use_edges(path, &caps[1], line));
        }

        for caps in MOD_DECL.captures_iter(content) {
            let line = line_of(content, caps.get(0).map(|m| m.start()).unwrap_or(0));
            let name = &caps[1];
            let to_file = resolve_module(&module_dir(path), &[name]);
            edges.push(internal_edge(DependencyKind::Include, name, to_file, None, line));
        }

        for caps in EXTERN_CRATE.captures_iter(content) {
            let line = line_of(content, caps.get(0).map(|m| m.start()).unwrap_or(0));
            let name = &caps[1];
            edges.push(external_edge(DependencyKind::Use, name, name, None, line));
        }

        edges.sort_by_key(|e| e.line_number);
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_extract_items() {
        let source = r#"
pub struct Config<T> {
    value: T,
}

impl Config<u8> {
    pub async fn load(&self, path: &str) -> Result<()> {
        if path.is_empty() || self.value == 0 {
            return Ok(());
        }
        Ok(())
    }
}

pub(crate) fn helper(a: u32, b: u32) -> u32 {
    match a {
        0 => b,
        _ => a,
    }
}

const LIMIT: usize = 10;
"#;
        let symbols = RustExtractor.extract_symbols("/src/lib.rs", source);
        let found: Vec<_> = symbols.iter().map(|s| (s.name.as_str(), s.kind)).collect();
        assert_eq!(
            found,
            vec![
                ("Config", SymbolKind::Struct),
                ("load", SymbolKind::Method),
                ("helper", SymbolKind::Function),
                ("LIMIT", SymbolKind::Constant),
            ]
        );

        assert_eq!(symbols[0].visibility, Visibility::Public);
        assert_eq!(symbols[0].metadata, Some(SymbolMetadata::TypeDef { generic: true }));
        assert_eq!(symbols[1].complexity, 3);
        assert_eq!(
            symbols[1].metadata,
            Some(SymbolMetadata::Callable {
                parameters: 1,
                is_async: true
            })
        );
        assert_eq!(symbols[2].visibility, Visibility::Internal);
        assert_eq!(symbols[2].complexity, 3);
        assert_eq!(symbols[3].visibility, Visibility::Private);
    }

    #[test]
    fn test_use_names() {
        assert_eq!(use_names("std::collections::HashMap"), vec!["HashMap"]);
        assert_eq!(
            use_names("crate::index::{self, FileRecord, models::SymbolKind as Kind}"),
            vec!["FileRecord", "SymbolKind"]
        );
        assert!(use_names("super::*").is_empty());
    }

    #[test]
    fn test_dependencies() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("index")).unwrap();
        fs::write(src.join("index/mod.rs"), "").unwrap();
        fs::write(src.join("config.rs"), "").unwrap();
        let lib = src.join("lib.rs");
        let lib = lib.to_string_lossy();

        let source = "mod config;\nuse crate::index::FileRecord;\nuse serde::{Deserialize, Serialize};\nuse std::path::Path;\n";
        let edges = RustExtractor.extract_dependencies(&lib, source);
        assert_eq!(edges.len(), 5);

        assert_eq!(edges[0].kind, DependencyKind::Include);
        assert!(edges[0].to_file.as_deref().unwrap().ends_with("config.rs"));

        assert!(edges[1].to_file.as_deref().unwrap().ends_with("mod.rs"));
        assert_eq!(edges[1].symbol_name.as_deref(), Some("FileRecord"));
        assert!(!edges[1].is_external);

        assert!(edges[2].is_external);
        assert_eq!(edges[2].package_name.as_deref(), Some("serde"));
        assert_eq!(edges[4].package_name.as_deref(), Some("std"));
    }
}
