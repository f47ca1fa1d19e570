use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    build_symbols, count_parameters, external_edge, internal_edge, line_of, parent_dir,
    Declaration, LanguageExtractor,
};
use crate::index::{DependencyEdge, DependencyKind, SymbolKind, SymbolMetadata, SymbolRecord, Visibility};

static FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^func\s+(\([^)]*\)\s*)?([A-Za-z_]\w*)\s*(\[[^\]]*\])?\s*\(([^)]*)\)?")
        .expect("valid func regex")
});

static TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:type\s+|\s+)([A-Za-z_]\w*)\s*(\[[^\]]*\])?\s+(struct|interface)?")
        .expect("valid type regex")
});

static TYPE_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^type\s").expect("valid regex"));

static VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(const|var)\s+([A-Za-z_]\w*)").expect("valid value regex")
});

static DECISIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:if|for|case|select)\b|&&|\|\|").expect("valid decision regex")
});

static IMPORT_SINGLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^import\s+(?:[\w.]+\s+)?"([^"]+)""#).expect("valid import regex")
});

static IMPORT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ms)^import\s*\((.*?)\)").expect("valid import block regex")
});

static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("valid regex"));

pub struct GoExtractor;

/// Exported identifiers start with an upper-case letter.
fn visibility(name: &str) -> Visibility {
    if name.chars().next().map(char::is_uppercase).unwrap_or(false) {
        Visibility::Public
    } else {
        Visibility::Private
    }
}

fn import_edge(path: &str, import_path: &str, line: u32) -> DependencyEdge {
    if import_path.starts_with('.') {
        let dir = super::normalize_path(&parent_dir(path).join(import_path));
        let to_file = dir.is_dir().then(|| dir.to_string_lossy().into_owned());
        internal_edge(DependencyKind::Import, import_path, to_file, None, line)
    } else {
        external_edge(DependencyKind::Import, import_path, import_path, None, line)
    }
}

impl LanguageExtractor for GoExtractor {
    fn language(&self) -> &'static str {
        "go"
    }

    fn extensions(&self) -> &[&'static str] {
        &["go"]
    }

    fn extract_symbols(&self, path: &str, content: &str) -> Vec<SymbolRecord> {
        let mut decls = Vec::new();
        let mut in_type_block = false;

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = line.trim();
            if trimmed.starts_with("//") {
                continue;
            }
            if trimmed.starts_with("type (") {
                in_type_block = true;
                continue;
            }
            if in_type_block && trimmed == ")" {
                in_type_block = false;
                continue;
            }

            if let Some(caps) = FUNC.captures(line) {
                let name = &caps[2];
                decls.push(Declaration {
                    name: name.to_string(),
                    kind: if caps.get(1).is_some() {
                        SymbolKind::Method
                    } else {
                        SymbolKind::Function
                    },
                    line: line_no,
                    signature: trimmed.trim_end_matches('{').trim_end().to_string(),
                    visibility: visibility(name),
                    metadata: Some(SymbolMetadata::Callable {
                        parameters: count_parameters(caps.get(4).map(|m| m.as_str()).unwrap_or("")),
                        is_async: false,
                    }),
                });
            } else if TYPE_KEYWORD.is_match(line) || in_type_block {
                let Some(caps) = TYPE.captures(line) else {
                    continue;
                };
                let name = &caps[1];
                let kind = match caps.get(3).map(|m| m.as_str()) {
                    Some("struct") => SymbolKind::Struct,
                    Some("interface") => SymbolKind::Interface,
                    _ => SymbolKind::TypeAlias,
                };
                decls.push(Declaration {
                    name: name.to_string(),
                    kind,
                    line: line_no,
                    signature: trimmed.trim_end_matches('{').trim_end().to_string(),
                    visibility: visibility(name),
                    metadata: Some(SymbolMetadata::TypeDef {
                        generic: caps.get(2).is_some(),
                    }),
                });
            } else if let Some(caps) = VALUE.captures(line) {
                let name = &caps[2];
                decls.push(Declaration {
                    name: name.to_string(),
                    kind: if &caps[1] == "const" {
                        SymbolKind::Constant
                    } else {
                        SymbolKind::Variable
                    },
                    line: line_no,
                    signature: trimmed.to_string(),
                    visibility: visibility(name),
                    metadata: None,
                });
            }
        }

        build_symbols(path, "go", content, decls, &DECISIONS)
    }

    fn extract_dependencies(&self, path: &str, content: &str) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();

        for caps in IMPORT_SINGLE.captures_iter(content) {
            let line = line_of(content, caps.get(0).map(|m| m.start()).unwrap_or(0));
            edges.push(import_edge(path, &caps[1], line));
        }

        for block in IMPORT_BLOCK.captures_iter(content) {
            let Some(body) = block.get(1) else {
                continue;
            };
            for caps in QUOTED.captures_iter(body.as_str()) {
                let offset = body.start() + caps.get(0).map(|m| m.start()).unwrap_or(0);
                edges.push(import_edge(path, &caps[1], line_of(content, offset)));
            }
        }

        edges.sort_by_key(|e| e.line_number);
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"package main

import (
	"fmt"
	str "strings"
)

import "os"

type Server struct {
	addr string
}

type Handler interface {
	Serve() error
}

const DefaultPort = 8080

func (s *Server) Start(port int, host string) error {
	if port == 0 || host == "" {
		return nil
	}
	return nil
}

func helper() {
	for i := 0; i < 3; i++ {
	}
}
"#;

    #[test]
    fn test_extract_symbols() {
        let symbols = GoExtractor.extract_symbols("/main.go", SOURCE);
        let found: Vec<_> = symbols.iter().map(|s| (s.name.as_str(), s.kind)).collect();
        assert_eq!(
            found,
            vec![
                ("Server", SymbolKind::Struct),
                ("Handler", SymbolKind::Interface),
                ("DefaultPort", SymbolKind::Constant),
                ("Start", SymbolKind::Method),
                ("helper", SymbolKind::Function),
            ]
        );
        assert_eq!(symbols[3].visibility, Visibility::Public);
        assert_eq!(symbols[3].complexity, 3);
        assert_eq!(symbols[4].visibility, Visibility::Private);
        assert_eq!(symbols[4].complexity, 2);
    }

    #[test]
    fn test_imports() {
        let edges = GoExtractor.extract_dependencies("/main.go", SOURCE);
        let specs: Vec<_> = edges.iter().map(|e| e.specifier.as_str()).collect();
        assert_eq!(specs, vec!["fmt", "strings", "os"]);
        assert!(edges.iter().all(|e| e.is_external));
        assert_eq!(edges[0].line_number, 4);
        assert_eq!(edges[2].line_number, 8);
    }
}
