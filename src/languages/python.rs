use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    build_symbols, count_parameters, edges_for_names, external_edge, internal_edge, parent_dir,
    probe_file, Declaration, LanguageExtractor,
};
use crate::index::{DependencyEdge, DependencyKind, SymbolKind, SymbolMetadata, SymbolRecord, Visibility};

static DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(async\s+)?def\s+([A-Za-z_]\w*)\s*\(([^)]*)\)?").expect("valid def regex")
});

static CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)class\s+([A-Za-z_]\w*)\s*(\[)?").expect("valid class regex")
});

static CONSTANT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z][A-Z0-9_]*)\s*(?::[^=]+)?=[^=]").expect("valid constant regex")
});

static DECISIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:if|elif|for|while|except|and|or|case)\b").expect("valid decision regex")
});

static IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*import\s+(.+)$").expect("valid import regex")
});

static FROM_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*from\s+(\.*[\w.]*)\s+import\s+(.+)$").expect("valid from-import regex")
});

pub struct PythonExtractor;

/// `_private` and `__mangled` names are private; dunders are public.
fn visibility(name: &str) -> Visibility {
    if name.starts_with("__") && name.ends_with("__") {
        Visibility::Public
    } else if name.starts_with('_') {
        Visibility::Private
    } else {
        Visibility::Public
    }
}

fn is_receiver(param: &str) -> bool {
    matches!(param.trim().split(':').next().map(str::trim), Some("self") | Some("cls"))
}

/// Resolves `from <module> import ...`. Leading dots climb from the
/// importing file's directory; plain names are tried next to it.
fn resolve(from_file: &str, module: &str) -> Option<String> {
    let dots = module.chars().take_while(|c| *c == '.').count();
    let mut base: PathBuf = parent_dir(from_file);
    for _ in 1..dots {
        base.pop();
    }
    let rest = &module[dots..];
    for part in rest.split('.').filter(|p| !p.is_empty()) {
        base.push(part);
    }
    if rest.is_empty() {
        return probe_file(&base.join("__init__"), &["py"], &[]);
    }
    probe_file(&base, &["py", "pyi"], &["__init__"])
}

fn top_package(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

impl PythonExtractor {
    fn module_edges(
        &self,
        path: &str,
        module: &str,
        names: Vec<String>,
        line: u32,
    ) -> Vec<DependencyEdge> {
        let kind = DependencyKind::Import;
        match resolve(path, module) {
            Some(to_file) => edges_for_names(names, |name| {
                internal_edge(kind, module, Some(to_file.clone()), name, line)
            }),
            None if module.starts_with('.') => {
                edges_for_names(names, |name| internal_edge(kind, module, None, name, line))
            }
            None => {
                let package = top_package(module);
                edges_for_names(names, |name| external_edge(kind, module, package, name, line))
            }
        }
    }
}

impl LanguageExtractor for PythonExtractor {
    fn language(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &[&'static str] {
        &["py", "pyi"]
    }

    fn extract_symbols(&self, path: &str, content: &str) -> Vec<SymbolRecord> {
        let mut decls = Vec::new();
        // Indentation of the innermost open class
        let mut class_indent: Option<usize> = None;

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let indent = line.len() - trimmed.len();
            if class_indent.map(|ci| indent <= ci).unwrap_or(false) {
                class_indent = None;
            }

            if let Some(caps) = DEF.captures(line) {
                let name = &caps[3];
                let params = caps.get(4).map(|m| m.as_str()).unwrap_or("");
                let in_class = class_indent.is_some();
                let mut parameters = count_parameters(params);
                if in_class && params.split(',').next().map(is_receiver).unwrap_or(false) {
                    parameters -= 1;
                }
                decls.push(Declaration {
                    name: name.to_string(),
                    kind: if in_class {
                        SymbolKind::Method
                    } else {
                        SymbolKind::Function
                    },
                    line: line_no,
                    signature: trimmed.trim_end_matches(':').to_string(),
                    visibility: visibility(name),
                    metadata: Some(SymbolMetadata::Callable {
                        parameters,
                        is_async: caps.get(2).is_some(),
                    }),
                });
            } else if let Some(caps) = CLASS.captures(line) {
                class_indent = Some(caps[1].len());
                let name = &caps[2];
                decls.push(Declaration {
                    name: name.to_string(),
                    kind: SymbolKind::Class,
                    line: line_no,
                    signature: trimmed.trim_end_matches(':').to_string(),
                    visibility: visibility(name),
                    metadata: Some(SymbolMetadata::TypeDef {
                        generic: caps.get(3).is_some() || trimmed.contains("Generic["),
                    }),
                });
            } else if let Some(caps) = CONSTANT.captures(line) {
                decls.push(Declaration {
                    name: caps[1].to_string(),
                    kind: SymbolKind::Constant,
                    line: line_no,
                    signature: trimmed.to_string(),
                    visibility: Visibility::Public,
                    metadata: None,
                });
            }
        }

        build_symbols(path, "python", content, decls, &DECISIONS)
    }

    fn extract_dependencies(&self, path: &str, content: &str) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx as u32 + 1;
            if let Some(caps) = FROM_IMPORT.captures(line) {
                let module = &caps[1];
                let names: Vec<String> = caps[2]
                    .trim_matches(|c| c == '(' || c == ')' || c == '\\' || char::is_whitespace(c))
                    .split(',')
                    .filter_map(|n| n.split_whitespace().next())
                    .filter(|n| *n != "*" && *n != "(")
                    .map(str::to_string)
                    .collect();

                if module.chars().all(|c| c == '.') {
                    // `from . import a, b` imports sibling modules
                    for name in names {
                        let target = format!("{}{}", module, name);
                        let mut sibling = self.module_edges(path, &target, Vec::new(), line_no);
                        for edge in &mut sibling {
                            edge.specifier = module.to_string();
                            edge.symbol_name = Some(name.clone());
                        }
                        edges.extend(sibling);
                    }
                } else {
                    edges.extend(self.module_edges(path, module, names, line_no));
                }
            } else if let Some(caps) = IMPORT.captures(line) {
                for item in caps[1].split(',') {
                    let module = item.split_whitespace().next().unwrap_or("");
                    if !module.is_empty() {
                        edges.extend(self.module_edges(path, module, Vec::new(), line_no));
                    }
                }
            }
        }
        edges
    }
}
