use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    build_symbols, count_parameters, edges_for_names, external_edge, internal_edge, line_of,
    parent_dir, probe_file, Declaration, LanguageExtractor,
};
use crate::index::{DependencyEdge, DependencyKind, SymbolKind, SymbolMetadata, SymbolRecord, Visibility};

const IDENT: &str = r"[A-Za-z_$][\w$]*";

static FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^\s*(export\s+)?(?:default\s+)?(async\s+)?function\s*\*?\s*({IDENT})\s*(<[^>]*>)?\s*\(([^)]*)\)?"
    ))
    .expect("valid function regex")
});

static ARROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^\s*(export\s+)?(?:const|let|var)\s+({IDENT})\s*(?::[^=]+)?=\s*(async\s+)?(?:\(([^)]*)\)|({IDENT}))\s*(?::\s*[^=]+)?=>"
    ))
    .expect("valid arrow regex")
});

static CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^\s*(export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+({IDENT})\s*(<)?"
    ))
    .expect("valid class regex")
});

static INTERFACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^\s*(export\s+)?interface\s+({IDENT})\s*(<)?")).expect("valid interface regex")
});

static TYPE_ALIAS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^\s*(export\s+)?type\s+({IDENT})\s*(<[^=]*>)?\s*=")).expect("valid type regex")
});

static ENUM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^\s*(export\s+)?(?:const\s+)?enum\s+({IDENT})")).expect("valid enum regex")
});

static CONSTANT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^(export\s+)?const\s+({IDENT})\s*[:=]")).expect("valid const regex")
});

static METHOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^\s+(?:(public|private|protected)\s+)?(?:static\s+)?(?:readonly\s+)?(async\s+)?(?:get\s+|set\s+)?(#?{IDENT})\s*(?:<[^>]*>)?\s*\(([^)]*)\)\s*(?::\s*[^{{=;]+)?\{{\s*$"
    ))
    .expect("valid method regex")
});

static DECISIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:if|for|while|case|catch)\b|&&|\|\||\?\?").expect("valid decision regex")
});

static IMPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s+(?:type\s+)?([^'";]*?)\s*from\s+['"]([^'"]+)['"]"#)
        .expect("valid import regex")
});

static IMPORT_BARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s+['"]([^'"]+)['"]"#).expect("valid import regex")
});

static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s+(?:type\s+)?(\*(?:\s+as\s+[\w$]+)?|\{[^}]*\})\s*from\s+['"]([^'"]+)['"]"#)
        .expect("valid export regex")
});

static REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid require regex")
});

static DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid dynamic import regex")
});

const NOT_METHODS: &[&str] = &["if", "for", "while", "switch", "catch", "return", "function", "with"];

/// TypeScript and JavaScript share one scanner; only the language name and
/// extensions differ.
pub struct TypeScriptExtractor {
    language: &'static str,
    extensions: &'static [&'static str],
}

impl TypeScriptExtractor {
    pub fn typescript() -> Self {
        Self {
            language: "typescript",
            extensions: &["ts", "tsx", "mts", "cts"],
        }
    }

    pub fn javascript() -> Self {
        Self {
            language: "javascript",
            extensions: &["js", "jsx", "mjs", "cjs"],
        }
    }

    fn resolve(&self, from_file: &str, specifier: &str) -> Option<String> {
        let base = if specifier.starts_with('/') {
            std::path::PathBuf::from(specifier)
        } else {
            parent_dir(from_file).join(specifier)
        };
        const EXTENSIONS: &[&str] = &["ts", "tsx", "d.ts", "js", "jsx", "mjs", "cjs"];
        probe_file(&base, EXTENSIONS, &["index"]).or_else(|| {
            // `./x.js` written in TypeScript sources refers to `./x.ts`
            let stripped = specifier.strip_suffix(".js")?;
            let base = parent_dir(from_file).join(stripped);
            probe_file(&base, EXTENSIONS, &["index"])
        })
    }

    fn edges(
        &self,
        from_file: &str,
        kind: DependencyKind,
        specifier: &str,
        names: Vec<String>,
        line: u32,
    ) -> Vec<DependencyEdge> {
        if specifier.starts_with('.') || specifier.starts_with('/') {
            let to_file = self.resolve(from_file, specifier);
            edges_for_names(names, |name| {
                internal_edge(kind, specifier, to_file.clone(), name, line)
            })
        } else {
            let package = package_name(specifier);
            edges_for_names(names, |name| external_edge(kind, specifier, package, name, line))
        }
    }
}

/// `@scope/pkg/sub` -> `@scope/pkg`, `pkg/sub` -> `pkg`.
fn package_name(specifier: &str) -> &str {
    let mut parts = specifier.splitn(3, '/');
    let first = parts.next().unwrap_or(specifier);
    if first.starts_with('@') {
        match parts.next() {
            Some(second) => &specifier[..first.len() + 1 + second.len()],
            None => specifier,
        }
    } else {
        first
    }
}

/// Names bound by an import clause: `Def, { a, b as c }, * as ns`.
/// Aliased names report the exported name.
fn imported_names(clause: &str) -> Vec<String> {
    let mut names = Vec::new();
    let clause = clause.trim();
    let (outside, inside) = match (clause.find('{'), clause.rfind('}')) {
        (Some(open), Some(close)) if close > open => (
            format!("{}{}", &clause[..open], &clause[close + 1..]),
            Some(&clause[open + 1..close]),
        ),
        _ => (clause.to_string(), None),
    };

    for part in outside.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(ns) = part.strip_prefix('*') {
            if let Some(alias) = ns.trim().strip_prefix("as") {
                names.push(alias.trim().to_string());
            }
        } else {
            names.push(part.to_string());
        }
    }

    if let Some(inside) = inside {
        for part in inside.split(',') {
            let part = part.trim().trim_start_matches("type ").trim();
            let name = part.split_whitespace().next().unwrap_or("");
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    names
}

fn visibility(exported: bool) -> Visibility {
    if exported {
        Visibility::Public
    } else {
        Visibility::Private
    }
}

fn signature(line: &str) -> String {
    line.trim().trim_end_matches('{').trim_end().to_string()
}

impl LanguageExtractor for TypeScriptExtractor {
    fn language(&self) -> &'static str {
        self.language
    }

    fn extensions(&self) -> &[&'static str] {
        self.extensions
    }

    fn extract_symbols(&self, path: &str, content: &str) -> Vec<SymbolRecord> {
        let mut decls = Vec::new();
        let mut in_class = false;

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with("/*") {
                continue;
            }
            if line.starts_with('}') {
                in_class = false;
            }

            let decl = |name: &str, kind, vis, metadata| Declaration {
                name: name.to_string(),
                kind,
                line: line_no,
                signature: signature(line),
                visibility: vis,
                metadata,
            };

            if let Some(caps) = FUNCTION.captures(line) {
                let params = caps.get(5).map(|m| m.as_str()).unwrap_or("");
                decls.push(decl(
                    &caps[3],
                    SymbolKind::Function,
                    visibility(caps.get(1).is_some()),
                    Some(SymbolMetadata::Callable {
                        parameters: count_parameters(params),
                        is_async: caps.get(2).is_some(),
                    }),
                ));
            } else if let Some(caps) = ARROW.captures(line) {
                let parameters = match (caps.get(4), caps.get(5)) {
                    (Some(list), _) => count_parameters(list.as_str()),
                    (None, Some(_)) => 1,
                    _ => 0,
                };
                decls.push(decl(
                    &caps[2],
                    SymbolKind::Function,
                    visibility(caps.get(1).is_some()),
                    Some(SymbolMetadata::Callable {
                        parameters,
                        is_async: caps.get(3).is_some(),
                    }),
                ));
            } else if let Some(caps) = CLASS.captures(line) {
                in_class = true;
                decls.push(decl(
                    &caps[2],
                    SymbolKind::Class,
                    visibility(caps.get(1).is_some()),
                    Some(SymbolMetadata::TypeDef {
                        generic: caps.get(3).is_some(),
                    }),
                ));
            } else if let Some(caps) = INTERFACE.captures(line) {
                decls.push(decl(
                    &caps[2],
                    SymbolKind::Interface,
                    visibility(caps.get(1).is_some()),
                    Some(SymbolMetadata::TypeDef {
                        generic: caps.get(3).is_some(),
                    }),
                ));
            } else if let Some(caps) = TYPE_ALIAS.captures(line) {
                decls.push(decl(
                    &caps[2],
                    SymbolKind::TypeAlias,
                    visibility(caps.get(1).is_some()),
                    Some(SymbolMetadata::TypeDef {
                        generic: caps.get(3).is_some(),
                    }),
                ));
            } else if let Some(caps) = ENUM.captures(line) {
                decls.push(decl(
                    &caps[2],
                    SymbolKind::Enum,
                    visibility(caps.get(1).is_some()),
                    None,
                ));
            } else if let Some(caps) = CONSTANT.captures(line) {
                decls.push(decl(
                    &caps[2],
                    SymbolKind::Constant,
                    visibility(caps.get(1).is_some()),
                    None,
                ));
            } else if in_class {
                if let Some(caps) = METHOD.captures(line) {
                    let name = &caps[3];
                    if NOT_METHODS.contains(&name) {
                        continue;
                    }
                    let vis = match caps.get(1).map(|m| m.as_str()) {
                        Some("private") => Visibility::Private,
                        Some("protected") => Visibility::Protected,
                        _ if name.starts_with('#') => Visibility::Private,
                        _ => Visibility::Public,
                    };
                    decls.push(decl(
                        name,
                        SymbolKind::Method,
                        vis,
                        Some(SymbolMetadata::Callable {
                            parameters: count_parameters(&caps[4]),
                            is_async: caps.get(2).is_some(),
                        }),
                    ));
                }
            }
        }

        build_symbols(path, self.language, content, decls, &DECISIONS)
    }

    fn extract_dependencies(&self, path: &str, content: &str) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();

        for caps in IMPORT_FROM.captures_iter(content) {
            let line = line_of(content, caps.get(0).map(|m| m.start()).unwrap_or(0));
            let names = imported_names(&caps[1]);
            edges.extend(self.edges(path, DependencyKind::Import, &caps[2], names, line));
        }
        for caps in IMPORT_BARE.captures_iter(content) {
            let line = line_of(content, caps.get(0).map(|m| m.start()).unwrap_or(0));
            edges.extend(self.edges(path, DependencyKind::Import, &caps[1], Vec::new(), line));
        }
        for caps in EXPORT_FROM.captures_iter(content) {
            let line = line_of(content, caps.get(0).map(|m| m.start()).unwrap_or(0));
            let names = if caps[1].starts_with('{') {
                imported_names(&caps[1])
            } else {
                Vec::new()
            };
            edges.extend(self.edges(path, DependencyKind::Import, &caps[2], names, line));
        }
        for caps in REQUIRE.captures_iter(content) {
            let line = line_of(content, caps.get(0).map(|m| m.start()).unwrap_or(0));
            edges.extend(self.edges(path, DependencyKind::Require, &caps[1], Vec::new(), line));
        }
        for caps in DYNAMIC_IMPORT.captures_iter(content) {
            let line = line_of(content, caps.get(0).map(|m| m.start()).unwrap_or(0));
            edges.extend(self.edges(path, DependencyKind::Import, &caps[1], Vec::new(), line));
        }

        edges.sort_by_key(|e| e.line_number);
        edges
    }
}
