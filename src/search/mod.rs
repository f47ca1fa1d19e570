//! Symbol search and cross-reference resolution over the index.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::sqlite::SYMBOL_COLUMNS;
use crate::index::{escape_like, SqliteIndex, SymbolFilter, SymbolRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Name,
    Kind,
    Language,
    File,
    Line,
    Complexity,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Kind => "kind",
            SortField::Language => "language",
            SortField::File => "file_path",
            SortField::Line => "line_number",
            SortField::Complexity => "complexity",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(SortField::Name),
            "kind" | "type" => Ok(SortField::Kind),
            "language" => Ok(SortField::Language),
            "file" | "file_path" => Ok(SortField::File),
            "line" => Ok(SortField::Line),
            "complexity" => Ok(SortField::Complexity),
            other => Err(format!("unknown sort field '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction '{}'", other)),
        }
    }
}

/// Filters plus an optional explicit ordering. Without one, results are
/// ordered by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub filter: SymbolFilter,
    pub sort_by: Option<SortField>,
    pub direction: SortDirection,
}

impl SearchQuery {
    pub fn new(filter: SymbolFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sorted(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort_by = Some(field);
        self.direction = direction;
        self
    }

    fn order_by(&self) -> String {
        match self.sort_by {
            // Ties fall back to a stable name/location order
            Some(field) => format!(
                "{} {}, name, file_path, line_number",
                field.column(),
                self.direction.keyword()
            ),
            None => "name, file_path, line_number".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceRole {
    /// Declaration of the symbol
    Definition,
    /// Import of the symbol by name
    Import,
    /// Mention in another symbol's signature
    Usage,
}

impl fmt::Display for ReferenceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferenceRole::Definition => "definition",
            ReferenceRole::Import => "import",
            ReferenceRole::Usage => "usage",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub role: ReferenceRole,
    pub name: String,
    pub file_path: String,
    pub line_number: u32,
    /// Symbol kind for definitions and usages, dependency kind for imports
    pub kind: String,
    /// Signature or import specifier
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReferences {
    pub name: String,
    pub definitions: Vec<Reference>,
    pub usages: Vec<Reference>,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolStatistics {
    pub total_symbols: usize,
    pub by_kind: Vec<(String, usize)>,
    pub by_language: Vec<(String, usize)>,
    pub avg_complexity: f64,
    pub max_complexity: u32,
}

pub struct SymbolSearch<'a> {
    index: &'a SqliteIndex,
}

impl<'a> SymbolSearch<'a> {
    pub fn new(index: &'a SqliteIndex) -> Self {
        Self { index }
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SymbolRecord>> {
        let conn = self.index.acquire()?;
        let (clause, mut values) = query.filter.conditions();
        let page = query.filter.pagination(&mut values);
        let sql = format!(
            "SELECT {} FROM symbols WHERE {} ORDER BY {}{}",
            SYMBOL_COLUMNS,
            clause,
            query.order_by(),
            page
        );
        let mut stmt = conn.prepare(&sql)?;
        let symbols = stmt
            .query_map(params_from_iter(values), SqliteIndex::symbol_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(symbols)
    }

    /// Definitions of `name` followed by its imports and usages, each
    /// group ordered by file and line.
    pub fn find_references(&self, name: &str, file_path: Option<&str>) -> Result<Vec<Reference>> {
        let refs = self.cross_references_in(name, file_path)?;
        Ok(refs.definitions.into_iter().chain(refs.usages).collect())
    }

    pub fn cross_references(&self, name: &str) -> Result<CrossReferences> {
        self.cross_references_in(name, None)
    }

    fn cross_references_in(&self, name: &str, file_path: Option<&str>) -> Result<CrossReferences> {
        let conn = self.index.acquire()?;
        let definitions = definitions(&conn, name, file_path)?;
        let mut usages = imports(&conn, name, file_path)?;
        usages.extend(signature_usages(&conn, name, file_path)?);
        usages.sort_by(|a, b| {
            (a.file_path.as_str(), a.line_number).cmp(&(b.file_path.as_str(), b.line_number))
        });

        Ok(CrossReferences {
            name: name.to_string(),
            total: definitions.len() + usages.len(),
            definitions,
            usages,
        })
    }

    pub fn statistics(&self) -> Result<SymbolStatistics> {
        let conn = self.index.acquire()?;
        let (total, avg, max): (i64, Option<f64>, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), AVG(complexity), MAX(complexity) FROM symbols",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(SymbolStatistics {
            total_symbols: total as usize,
            by_kind: group_counts(&conn, "kind")?,
            by_language: group_counts(&conn, "language")?,
            avg_complexity: avg.unwrap_or(0.0),
            max_complexity: max.unwrap_or(0) as u32,
        })
    }

    pub fn full_text(&self, query: &str, limit: usize) -> Result<Vec<SymbolRecord>> {
        self.index.full_text_search(query, limit)
    }
}

fn group_counts(conn: &Connection, column: &'static str) -> Result<Vec<(String, usize)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {0}, COUNT(*) FROM symbols GROUP BY {0} ORDER BY COUNT(*) DESC, {0}",
        column
    ))?;
    let counts = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(counts)
}

/// Binds `name` and, when present, a filter on `column`.
fn bind(name: Value, file_path: Option<&str>, column: &'static str) -> (Vec<Value>, String) {
    match file_path {
        Some(path) => (
            vec![name, Value::Text(path.to_string())],
            format!(" AND {} = ?2", column),
        ),
        None => (vec![name], String::new()),
    }
}

fn definitions(conn: &Connection, name: &str, file_path: Option<&str>) -> Result<Vec<Reference>> {
    let (values, file_clause) = bind(Value::Text(name.to_string()), file_path, "file_path");
    let sql = format!(
        "SELECT name, file_path, line_number, kind, signature FROM symbols WHERE name = ?1{} ORDER BY file_path, line_number",
        file_clause
    );
    query_references(conn, &sql, values, ReferenceRole::Definition)
}

fn imports(conn: &Connection, name: &str, file_path: Option<&str>) -> Result<Vec<Reference>> {
    let (values, file_clause) = bind(Value::Text(name.to_string()), file_path, "from_file");
    let sql = format!(
        "SELECT symbol_name, from_file, line_number, kind, specifier FROM dependencies WHERE symbol_name = ?1{} ORDER BY from_file, line_number",
        file_clause
    );
    query_references(conn, &sql, values, ReferenceRole::Import)
}

/// Symbols other than `name` whose signature mentions it. The LIKE narrows
/// candidates; the word-boundary check runs here.
fn signature_usages(
    conn: &Connection,
    name: &str,
    file_path: Option<&str>,
) -> Result<Vec<Reference>> {
    let pattern = Value::Text(format!("%{}%", escape_like(name)));
    let (mut values, file_clause) = bind(pattern, file_path, "file_path");
    values.push(Value::Text(name.to_string()));
    let name_param = values.len();
    let sql = format!(
        "SELECT name, file_path, line_number, kind, signature FROM symbols WHERE signature LIKE ?1 ESCAPE '\\'{} AND name != ?{} ORDER BY file_path, line_number",
        file_clause,
        name_param
    );
    let mut refs = query_references(conn, &sql, values, ReferenceRole::Usage)?;
    refs.retain(|r| mentions_word(&r.context, name));
    for r in &mut refs {
        r.name = name.to_string();
    }
    Ok(refs)
}

fn mentions_word(text: &str, word: &str) -> bool {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    text.match_indices(word).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + word.len()..].chars().next();
        !before.map(is_ident).unwrap_or(false) && !after.map(is_ident).unwrap_or(false)
    })
}

fn query_references(
    conn: &Connection,
    sql: &str,
    values: Vec<Value>,
    role: ReferenceRole,
) -> Result<Vec<Reference>> {
    let mut stmt = conn.prepare(sql)?;
    let refs = stmt
        .query_map(params_from_iter(values), |row| {
            Ok(Reference {
                role,
                name: row.get(0)?,
                file_path: row.get(1)?,
                line_number: row.get::<_, i64>(2)? as u32,
                kind: row.get(3)?,
                context: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::index::{DependencyEdge, DependencyKind, FileRecord, SymbolKind};
    use tempfile::TempDir;

    fn create_index() -> (SqliteIndex, TempDir) {
        let dir = TempDir::new().unwrap();
        let index =
            SqliteIndex::open(dir.path().join("index.db"), &StorageConfig::default()).unwrap();

        for path in ["/src/config.ts", "/src/app.ts", "/src/lib.rs"] {
            let language = if path.ends_with(".rs") { "rust" } else { "typescript" };
            index
                .upsert_file(&FileRecord::from_content(path, language, b"", 0))
                .unwrap();
        }
        index
            .batch_upsert_symbols(&[
                SymbolRecord::new("Config", SymbolKind::Interface, "/src/config.ts", 1, "typescript"),
                SymbolRecord::new("loadConfig", SymbolKind::Function, "/src/config.ts", 5, "typescript")
                    .with_signature("export function loadConfig(path: string): Config")
                    .with_complexity(4),
                SymbolRecord::new("start", SymbolKind::Function, "/src/app.ts", 3, "typescript")
                    .with_signature("function start(cfg: Config, ConfigLoader: unknown)")
                    .with_complexity(2),
                SymbolRecord::new("Configure", SymbolKind::Class, "/src/app.ts", 9, "typescript")
                    .with_signature("class Configure"),
                SymbolRecord::new("parse", SymbolKind::Function, "/src/lib.rs", 1, "rust")
                    .with_complexity(7),
            ])
            .unwrap();

        let conn = index.acquire().unwrap();
        SqliteIndex::insert_dependencies_in(
            &conn,
            "/src/app.ts",
            &[DependencyEdge {
                to_file: Some("/src/config.ts".into()),
                kind: DependencyKind::Import,
                specifier: "./config".into(),
                symbol_name: Some("Config".into()),
                is_external: false,
                package_name: None,
                package_version: None,
                line_number: 1,
            }],
        )
        .unwrap();
        drop(conn);

        (index, dir)
    }

    #[test]
    fn test_search_default_and_explicit_order() {
        let (index, _dir) = create_index();
        let search = SymbolSearch::new(&index);

        let names: Vec<_> = search
            .search(&SearchQuery::new(SymbolFilter::by_file("/src/config.ts")))
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["Config", "loadConfig"]);

        let query = SearchQuery::new(SymbolFilter {
            min_complexity: Some(2),
            ..SymbolFilter::default()
        })
        .sorted(SortField::Complexity, SortDirection::Desc);
        let names: Vec<_> = search.search(&query).unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["parse", "loadConfig", "start"]);
    }

    #[test]
    fn test_search_name_filter_is_literal() {
        let (index, _dir) = create_index();
        let query = SearchQuery::new(SymbolFilter {
            name: Some("%".into()),
            ..SymbolFilter::default()
        });
        assert!(SymbolSearch::new(&index).search(&query).unwrap().is_empty());
    }

    #[test]
    fn test_cross_references() {
        let (index, _dir) = create_index();
        let refs = SymbolSearch::new(&index).cross_references("Config").unwrap();

        assert_eq!(refs.definitions.len(), 1);
        assert_eq!(refs.definitions[0].file_path, "/src/config.ts");

        let usages: Vec<_> = refs
            .usages
            .iter()
            .map(|r| (r.role, r.file_path.as_str(), r.line_number))
            .collect();
        assert_eq!(
            usages,
            vec![
                (ReferenceRole::Import, "/src/app.ts", 1),
                (ReferenceRole::Usage, "/src/app.ts", 3),
                (ReferenceRole::Usage, "/src/config.ts", 5),
            ]
        );
        assert_eq!(refs.total, 4);
    }

    #[test]
    fn test_find_references_file_filter() {
        let (index, _dir) = create_index();
        let refs = SymbolSearch::new(&index)
            .find_references("Config", Some("/src/app.ts"))
            .unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.file_path == "/src/app.ts"));
        assert!(refs.iter().all(|r| r.role != ReferenceRole::Definition));
    }

    #[test]
    fn test_statistics() {
        let (index, _dir) = create_index();
        let stats = SymbolSearch::new(&index).statistics().unwrap();
        assert_eq!(stats.total_symbols, 5);
        assert_eq!(stats.by_language, vec![("typescript".to_string(), 4), ("rust".to_string(), 1)]);
        assert_eq!(stats.by_kind[0], ("function".to_string(), 3));
        assert_eq!(stats.max_complexity, 7);
    }

    #[test]
    fn test_mentions_word() {
        assert!(mentions_word("fn f(c: Config)", "Config"));
        assert!(!mentions_word("ConfigLoader", "Config"));
        assert!(!mentions_word("$Config", "Config"));
    }
}
