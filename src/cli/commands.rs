use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use code_index_engine::analytics::{Granularity, TimeWindow};
use code_index_engine::index::{SymbolFilter, SymbolKind};
use code_index_engine::search::{SearchQuery, SortDirection, SortField};
use code_index_engine::Engine;

use super::CacheCommands;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_window(window: &str) -> Result<TimeWindow> {
    window.parse().map_err(|e: String| anyhow!(e))
}

pub fn update(engine: &Engine, paths: &[String], git: Option<&Path>) -> Result<()> {
    let mut paths = paths.to_vec();
    if let Some(repo) = git {
        let changed = engine
            .git_changed_paths(repo)
            .with_context(|| format!("reading git status of {}", repo.display()))?;
        println!("git reports {} changed files", changed.len());
        paths.extend(changed);
    }
    if paths.is_empty() {
        println!("Nothing to update");
        return Ok(());
    }

    let stats = engine.update_index(&paths)?;
    println!(
        "Processed {} files ({} new, {} modified, {} deleted), skipped {}, {} errors in {}ms",
        stats.processed,
        stats.new_files,
        stats.modified_files,
        stats.deleted_files,
        stats.skipped,
        stats.errors,
        stats.duration_ms
    );
    for failure in &stats.failures {
        eprintln!("  {}: {}", failure.path, failure.message);
    }
    Ok(())
}

pub fn scan(engine: &Engine, root: &Path, batch_size: Option<usize>) -> Result<()> {
    let changes = engine.detect_project_changes(root)?;
    println!(
        "Found {} new, {} modified, {} deleted, {} unchanged files",
        changes.new_files.len(),
        changes.changed_files.len(),
        changes.deleted_files.len(),
        changes.unchanged_files.len()
    );
    if !changes.has_changes() {
        return Ok(());
    }

    let stats = engine.bulk_update(&changes.pending(), batch_size)?;
    println!(
        "Indexed {} files, skipped {}, {} errors in {}ms",
        stats.processed, stats.skipped, stats.errors, stats.duration_ms
    );
    for failure in &stats.failures {
        eprintln!("  {}: {}", failure.path, failure.message);
    }
    Ok(())
}

pub fn changes(engine: &Engine, root: &Path) -> Result<()> {
    print_json(&engine.detect_project_changes(root)?)
}

pub struct SearchArgs {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub language: Option<String>,
    pub file: Option<String>,
    pub min_complexity: Option<u32>,
    pub sort: Option<String>,
    pub direction: String,
    pub limit: usize,
    pub offset: Option<usize>,
    pub fts: Option<String>,
}

pub fn search(engine: &Engine, args: SearchArgs) -> Result<()> {
    if let Some(ref text) = args.fts {
        return print_json(&engine.full_text_search(text, args.limit)?);
    }

    let kind = match args.kind {
        Some(ref k) => {
            Some(SymbolKind::from_str(k).ok_or_else(|| anyhow!("unknown symbol kind '{}'", k))?)
        }
        None => None,
    };
    let filter = SymbolFilter {
        name: args.name,
        kind,
        language: args.language,
        file_path: args.file,
        min_complexity: args.min_complexity,
        limit: Some(args.limit),
        offset: args.offset,
    };

    let mut query = SearchQuery::new(filter);
    if let Some(ref field) = args.sort {
        let field: SortField = field.parse().map_err(|e: String| anyhow!(e))?;
        let direction: SortDirection = args.direction.parse().map_err(|e: String| anyhow!(e))?;
        query = query.sorted(field, direction);
    }

    let symbols = engine.search(&query)?;
    if symbols.is_empty() {
        println!("No symbols found");
        return Ok(());
    }
    for symbol in &symbols {
        println!(
            "{} [{}] {}:{} (complexity {})",
            symbol.name,
            symbol.kind.as_str(),
            symbol.file_path,
            symbol.line_number,
            symbol.complexity
        );
    }
    Ok(())
}

pub fn refs(engine: &Engine, name: &str, file: Option<&str>) -> Result<()> {
    if file.is_some() {
        return print_json(&engine.find_references(name, file)?);
    }
    print_json(&engine.cross_references(name)?)
}

pub fn complexity(engine: &Engine, path: &str) -> Result<()> {
    match engine.file_complexity(path)? {
        Some(result) => print_json(&result),
        None => {
            println!("{} is not indexed", path);
            Ok(())
        }
    }
}

pub fn stats(engine: &Engine) -> Result<()> {
    let stats = engine.stats()?;
    println!("Index Statistics:");
    println!("  Files: {}", stats.total_files);
    println!("  Symbols: {}", stats.total_symbols);
    println!("  Dependencies: {}", stats.total_dependencies);
    println!("  Metrics: {}", stats.total_metrics);
    println!("  TODOs: {}", stats.total_todos);
    if !stats.files_by_language.is_empty() {
        println!("\nFiles by language:");
        for (language, count) in &stats.files_by_language {
            println!("  {}: {}", language, count);
        }
    }

    let symbols = engine.symbol_statistics()?;
    println!("\nSymbols by kind:");
    for (kind, count) in &symbols.by_kind {
        println!("  {}: {}", kind, count);
    }
    println!(
        "\nComplexity: avg {:.2}, max {}",
        symbols.avg_complexity, symbols.max_complexity
    );
    Ok(())
}

pub fn trends(
    engine: &Engine,
    metric_type: &str,
    window: &str,
    granularity: &str,
    analyze: bool,
) -> Result<()> {
    let window = parse_window(window)?;
    if analyze {
        return print_json(&engine.trend_analysis(metric_type, window)?);
    }
    let granularity: Granularity = granularity.parse().map_err(|e: String| anyhow!(e))?;
    print_json(&engine.trends(metric_type, window, granularity)?)
}

pub fn correlate(engine: &Engine, metric_a: &str, metric_b: &str, window: &str) -> Result<()> {
    print_json(&engine.correlation(metric_a, metric_b, parse_window(window)?)?)
}

pub fn summary(engine: &Engine, metric_type: Option<&str>, window: &str) -> Result<()> {
    let window = parse_window(window)?;
    match metric_type {
        Some(metric_type) => print_json(&engine.statistical_summary(metric_type, window)?),
        None => print_json(&engine.metric_overview(window)?),
    }
}

pub fn cache(engine: &Engine, command: CacheCommands) -> Result<()> {
    match command {
        CacheCommands::Overview => print_json(&engine.overview()?),
        CacheCommands::Efficiency => print_json(&engine.efficiency_report()?),
        CacheCommands::Health => print_json(&engine.health_metrics()?),
        CacheCommands::Maintain => print_json(&engine.run_maintenance()?),
    }
}

pub fn history(engine: &Engine, repo: &Path, limit: Option<usize>) -> Result<()> {
    let stored = engine.sync_history(repo, limit)?;
    println!("Stored {} commits", stored);
    Ok(())
}
