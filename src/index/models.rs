use std::path::Path;

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

// =====================================================
// Files
// =====================================================

/// One row per indexed path. Checksum plus modification time decide whether
/// the file changed since it was last indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub name: String,
    pub directory: String,
    pub extension: Option<String>,
    pub language: String,
    pub size: u64,
    pub line_count: u32,
    /// Modification time in unix milliseconds
    pub last_modified: i64,
    pub checksum: String,
    pub is_binary: bool,
}

impl FileRecord {
    /// Builds a record from a path and its raw content.
    pub fn from_content(path: &str, language: &str, content: &[u8], last_modified: i64) -> Self {
        let p = Path::new(path);
        let is_binary = is_binary_content(content);
        let line_count = if is_binary {
            0
        } else {
            count_lines(content)
        };

        Self {
            path: path.to_string(),
            name: p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            directory: p
                .parent()
                .map(|d| d.to_string_lossy().into_owned())
                .unwrap_or_default(),
            extension: p.extension().map(|e| e.to_string_lossy().into_owned()),
            language: language.to_string(),
            size: content.len() as u64,
            line_count,
            last_modified,
            checksum: compute_checksum(content),
            is_binary,
        }
    }
}

/// xxh3-64 of the raw bytes, as lower-case hex.
pub fn compute_checksum(content: &[u8]) -> String {
    format!("{:016x}", xxh3_64(content))
}

/// A NUL byte in the first 8 KiB marks a file as binary.
pub fn is_binary_content(content: &[u8]) -> bool {
    content.iter().take(8192).any(|b| *b == 0)
}

fn count_lines(content: &[u8]) -> u32 {
    if content.is_empty() {
        return 0;
    }
    let newlines = content.iter().filter(|b| **b == b'\n').count();
    let trailing = if content.last() == Some(&b'\n') { 0 } else { 1 };
    (newlines + trailing) as u32
}

// =====================================================
// Symbols
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Struct,
    Class,
    Interface,
    Trait,
    Enum,
    Constant,
    Variable,
    Module,
    TypeAlias,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Struct => "struct",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Trait => "trait",
            SymbolKind::Enum => "enum",
            SymbolKind::Constant => "constant",
            SymbolKind::Variable => "variable",
            SymbolKind::Module => "module",
            SymbolKind::TypeAlias => "type_alias",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "function" => Some(SymbolKind::Function),
            "method" => Some(SymbolKind::Method),
            "struct" => Some(SymbolKind::Struct),
            "class" => Some(SymbolKind::Class),
            "interface" => Some(SymbolKind::Interface),
            "trait" => Some(SymbolKind::Trait),
            "enum" => Some(SymbolKind::Enum),
            "constant" => Some(SymbolKind::Constant),
            "variable" => Some(SymbolKind::Variable),
            "module" => Some(SymbolKind::Module),
            "type_alias" => Some(SymbolKind::TypeAlias),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
    Protected,
    Internal,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Protected => "protected",
            Visibility::Internal => "internal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "private" => Some(Visibility::Private),
            "protected" => Some(Visibility::Protected),
            "internal" => Some(Visibility::Internal),
            _ => None,
        }
    }
}

/// Extra per-symbol facts. Stored as JSON; shapes we know about get their own
/// variant, anything caller-defined goes through `Opaque`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SymbolMetadata {
    Callable { parameters: u32, is_async: bool },
    TypeDef { generic: bool },
    Opaque { bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    pub line_number: u32,
    pub signature: Option<String>,
    pub visibility: Visibility,
    /// Cyclomatic complexity estimate, 1 for non-callables
    pub complexity: u32,
    pub language: String,
    pub metadata: Option<SymbolMetadata>,
}

impl SymbolRecord {
    pub fn new(
        name: impl Into<String>,
        kind: SymbolKind,
        file_path: impl Into<String>,
        line_number: u32,
        language: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let file_path = file_path.into();
        let id = symbol_id(&file_path, kind, &name, line_number);
        Self {
            id,
            name,
            kind,
            file_path,
            line_number,
            signature: None,
            visibility: Visibility::Private,
            complexity: 1,
            language: language.into(),
            metadata: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_complexity(mut self, complexity: u32) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_metadata(mut self, metadata: SymbolMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Stable id derived from location, so re-extracting an unchanged declaration
/// yields the same key.
pub fn symbol_id(file_path: &str, kind: SymbolKind, name: &str, line: u32) -> String {
    let key = format!("{}\u{0}{}\u{0}{}\u{0}{}", file_path, kind.as_str(), name, line);
    format!("{:016x}", xxh3_64(key.as_bytes()))
}

// =====================================================
// Metrics
// =====================================================

/// Append-only sample of a numeric metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,
    pub file_path: Option<String>,
    pub symbol_id: Option<String>,
    pub metric_type: String,
    pub metric_name: String,
    pub value: f64,
    /// Unix seconds
    pub recorded_at: i64,
    pub analysis_version: String,
}

impl MetricRecord {
    pub fn new(
        metric_type: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
        recorded_at: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path: None,
            symbol_id: None,
            metric_type: metric_type.into(),
            metric_name: metric_name.into(),
            value,
            recorded_at,
            analysis_version: crate::ANALYSIS_VERSION.to_string(),
        }
    }

    pub fn for_file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn for_symbol(mut self, symbol_id: impl Into<String>) -> Self {
        self.symbol_id = Some(symbol_id.into());
        self
    }
}

// =====================================================
// Dependencies
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Import,
    Require,
    Use,
    Include,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Import => "import",
            DependencyKind::Require => "require",
            DependencyKind::Use => "use",
            DependencyKind::Include => "include",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "import" => Some(DependencyKind::Import),
            "require" => Some(DependencyKind::Require),
            "use" => Some(DependencyKind::Use),
            "include" => Some(DependencyKind::Include),
            _ => None,
        }
    }
}

/// An outgoing edge as produced by a language extractor, before it is
/// attached to a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub to_file: Option<String>,
    pub kind: DependencyKind,
    pub specifier: String,
    pub symbol_name: Option<String>,
    pub is_external: bool,
    pub package_name: Option<String>,
    pub package_version: Option<String>,
    pub line_number: u32,
}

/// Directed edge "from_file references to_file / symbol". `to_file` is
/// `None` for external packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub id: i64,
    pub from_file: String,
    pub to_file: Option<String>,
    pub kind: DependencyKind,
    pub specifier: String,
    pub symbol_name: Option<String>,
    pub is_external: bool,
    pub package_name: Option<String>,
    pub package_version: Option<String>,
    pub line_number: u32,
}

// =====================================================
// History and TODOs
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitCommitRecord {
    pub hash: String,
    pub author: String,
    pub email: String,
    /// Unix seconds
    pub committed_at: i64,
    pub message: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoKind {
    Todo,
    Fixme,
    Hack,
    Xxx,
}

impl TodoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TodoKind::Todo => "todo",
            TodoKind::Fixme => "fixme",
            TodoKind::Hack => "hack",
            TodoKind::Xxx => "xxx",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "todo" => Some(TodoKind::Todo),
            "fixme" => Some(TodoKind::Fixme),
            "hack" => Some(TodoKind::Hack),
            "xxx" => Some(TodoKind::Xxx),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoRecord {
    pub id: String,
    pub file_path: String,
    pub line_number: u32,
    pub kind: TodoKind,
    pub text: String,
}

impl TodoRecord {
    pub fn new(file_path: &str, line_number: u32, kind: TodoKind, text: impl Into<String>) -> Self {
        let key = format!("{}\u{0}{}\u{0}{}", file_path, line_number, kind.as_str());
        Self {
            id: format!("{:016x}", xxh3_64(key.as_bytes())),
            file_path: file_path.to_string(),
            line_number,
            kind,
            text: text.into(),
        }
    }
}

// =====================================================
// Queries
// =====================================================

/// Optional AND-ed predicates over the symbol table. Values are always bound
/// as parameters; only the choice of clauses is structural.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolFilter {
    /// Substring match on name
    pub name: Option<String>,
    pub kind: Option<SymbolKind>,
    pub language: Option<String>,
    pub file_path: Option<String>,
    pub min_complexity: Option<u32>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SymbolFilter {
    pub fn by_file(file_path: impl Into<String>) -> Self {
        Self {
            file_path: Some(file_path.into()),
            ..Self::default()
        }
    }

    /// Returns the `WHERE` body (or `1=1`) and its positional parameters.
    pub fn conditions(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(ref name) = self.name {
            clauses.push("name LIKE ? ESCAPE '\\'".to_string());
            params.push(Value::Text(format!("%{}%", escape_like(name))));
        }
        if let Some(kind) = self.kind {
            clauses.push("kind = ?".to_string());
            params.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(ref language) = self.language {
            clauses.push("language = ?".to_string());
            params.push(Value::Text(language.clone()));
        }
        if let Some(ref file_path) = self.file_path {
            clauses.push("file_path = ?".to_string());
            params.push(Value::Text(file_path.clone()));
        }
        if let Some(min) = self.min_complexity {
            clauses.push("complexity >= ?".to_string());
            params.push(Value::Integer(min as i64));
        }

        if clauses.is_empty() {
            ("1=1".to_string(), params)
        } else {
            (clauses.join(" AND "), params)
        }
    }

    /// Appends `LIMIT ? OFFSET ?` parameters; SQLite needs a LIMIT for OFFSET,
    /// so a bare offset uses `LIMIT -1`.
    pub fn pagination(&self, params: &mut Vec<Value>) -> &'static str {
        match (self.limit, self.offset) {
            (None, None) => "",
            (limit, offset) => {
                params.push(Value::Integer(limit.map(|l| l as i64).unwrap_or(-1)));
                params.push(Value::Integer(offset.unwrap_or(0) as i64));
                " LIMIT ? OFFSET ?"
            }
        }
    }
}

/// Escapes `%`, `_` and the escape char itself for a `LIKE ... ESCAPE '\'`.
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_symbols: usize,
    pub total_dependencies: usize,
    pub total_metrics: usize,
    pub total_todos: usize,
    pub files_by_language: Vec<(String, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_record_from_content() {
        let record = FileRecord::from_content("/proj/src/a.ts", "typescript", b"a\nb\nc", 1000);
        assert_eq!(record.name, "a.ts");
        assert_eq!(record.directory, "/proj/src");
        assert_eq!(record.extension.as_deref(), Some("ts"));
        assert_eq!(record.line_count, 3);
        assert_eq!(record.size, 5);
        assert!(!record.is_binary);
    }

    #[test]
    fn test_file_record_binary() {
        let record = FileRecord::from_content("/x.bin", "unknown", &[0x89, 0, 1, 2], 0);
        assert!(record.is_binary);
        assert_eq!(record.line_count, 0);
    }

    #[test]
    fn test_count_lines_trailing_newline() {
        assert_eq!(count_lines(b""), 0);
        assert_eq!(count_lines(b"one\n"), 1);
        assert_eq!(count_lines(b"one\ntwo"), 2);
    }

    #[test]
    fn test_checksum_whitespace_sensitive() {
        assert_eq!(compute_checksum(b"fn main() {}"), compute_checksum(b"fn main() {}"));
        assert_ne!(compute_checksum(b"fn main() {}"), compute_checksum(b"fn main(){}"));
        assert_eq!(compute_checksum(b"").len(), 16);
    }

    #[test]
    fn test_symbol_id_stable_and_distinct() {
        let a = SymbolRecord::new("run", SymbolKind::Function, "/a.rs", 3, "rust");
        let b = SymbolRecord::new("run", SymbolKind::Function, "/a.rs", 3, "rust");
        let c = SymbolRecord::new("run", SymbolKind::Function, "/a.rs", 4, "rust");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_symbol_kind_roundtrip_names() {
        for kind in [SymbolKind::Function, SymbolKind::TypeAlias, SymbolKind::Interface] {
            assert_eq!(SymbolKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(SymbolKind::from_str("nope"), None);
    }

    #[test]
    fn test_symbol_metadata_tagged_json() {
        let meta = SymbolMetadata::Callable {
            parameters: 2,
            is_async: true,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"type\":\"callable\""));
        let back: SymbolMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_filter_conditions_empty() {
        let (clause, params) = SymbolFilter::default().conditions();
        assert_eq!(clause, "1=1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_filter_conditions_binds_values() {
        let filter = SymbolFilter {
            name: Some("get_%".into()),
            kind: Some(SymbolKind::Function),
            min_complexity: Some(3),
            ..Default::default()
        };
        let (clause, params) = filter.conditions();
        assert_eq!(clause, "name LIKE ? ESCAPE '\\' AND kind = ? AND complexity >= ?");
        assert_eq!(params.len(), 3);
        assert_eq!(params[0], Value::Text("%get\\_\\%%".into()));
        assert!(!clause.contains("get_"));
    }

    #[test]
    fn test_filter_pagination() {
        let mut params = Vec::new();
        let filter = SymbolFilter {
            offset: Some(5),
            ..Default::default()
        };
        assert_eq!(filter.pagination(&mut params), " LIMIT ? OFFSET ?");
        assert_eq!(params, vec![Value::Integer(-1), Value::Integer(5)]);

        let mut params = Vec::new();
        assert_eq!(SymbolFilter::default().pagination(&mut params), "");
        assert!(params.is_empty());
    }

    #[test]
    fn test_todo_kind_case_insensitive() {
        assert_eq!(TodoKind::from_str("FIXME"), Some(TodoKind::Fixme));
        assert_eq!(TodoKind::from_str("note"), None);
    }
}
