mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::*;

#[derive(Parser)]
#[command(name = "code-index-engine")]
#[command(about = "Incremental code index with metric analytics and an analysis cache")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Index a project, skipping unchanged files
    code-index-engine scan ./my-project

    # Re-index specific files
    code-index-engine update src/main.rs src/lib.rs

    # Re-index whatever git reports as changed
    code-index-engine update --git .

    # Search functions, most complex first
    code-index-engine search --kind function --sort complexity --direction desc

    # Metric trends over the last month
    code-index-engine trends line_count --window month --granularity week

    # Cache health
    code-index-engine cache health
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the index and cache databases
    #[arg(long, global = true, default_value = ".code-index")]
    pub state_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Re-index the given files in one transaction
    Update {
        /// Files to re-index
        paths: Vec<String>,

        /// Also re-index files git reports as changed in this repository
        #[arg(long)]
        git: Option<PathBuf>,
    },

    /// Detect changes under a directory and apply them in batches
    Scan {
        /// Project root
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Files per transaction
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show what changed under a directory since it was last indexed
    Changes {
        /// Project root
        #[arg(default_value = ".")]
        root: PathBuf,
    },

    /// Search symbols
    Search {
        /// Substring of the symbol name
        #[arg(long)]
        name: Option<String>,

        /// Symbol kind (function, method, class, ...)
        #[arg(long)]
        kind: Option<String>,

        #[arg(long)]
        language: Option<String>,

        /// Exact file path
        #[arg(long)]
        file: Option<String>,

        #[arg(long)]
        min_complexity: Option<u32>,

        /// Sort field (name, kind, language, file, line, complexity)
        #[arg(long)]
        sort: Option<String>,

        /// asc or desc
        #[arg(long, default_value = "asc")]
        direction: String,

        #[arg(long, default_value = "50")]
        limit: usize,

        #[arg(long)]
        offset: Option<usize>,

        /// Full-text query over names, signatures and doc comments
        #[arg(long)]
        fts: Option<String>,
    },

    /// Find definitions and usages of a symbol
    Refs {
        name: String,

        /// Only references in this file
        #[arg(long)]
        file: Option<String>,
    },

    /// Cached complexity totals of one file
    Complexity { path: String },

    /// Index and symbol statistics
    Stats,

    /// Metric trend buckets
    Trends {
        metric_type: String,

        /// day, week, month, quarter, year or all
        #[arg(long, default_value = "month")]
        window: String,

        /// hour, day, week or month
        #[arg(long, default_value = "day")]
        granularity: String,

        /// Regression, seasonality and change points over daily buckets
        #[arg(long)]
        analyze: bool,
    },

    /// Pearson correlation between two metric types
    Correlate {
        metric_a: String,
        metric_b: String,

        #[arg(long, default_value = "month")]
        window: String,
    },

    /// Descriptive statistics of one metric type, or of every type
    Summary {
        metric_type: Option<String>,

        #[arg(long, default_value = "month")]
        window: String,
    },

    /// Inspect and maintain the analysis cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Store commit history of a git repository in the index
    History {
        #[arg(default_value = ".")]
        repo: PathBuf,

        /// Maximum number of commits
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Per-table entry counts, sizes and hit rates
    Overview,
    /// Hit rates, utilization and estimated savings
    Efficiency,
    /// Health grade and issues
    Health,
    /// Run one maintenance cycle now
    Maintain,
}
