mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use code_index_engine::config::EngineConfig;
use code_index_engine::Engine;

use crate::cli::{Cli, Commands, SearchArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "code_index_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let config = EngineConfig::load(&cli.state_dir)?;
    let mut engine = Engine::open(config)?;

    // Close the engine even when the command fails
    let result = run(&engine, cli.command);
    engine.close().await;
    result
}

fn run(engine: &Engine, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Update { paths, git } => cli::update(engine, &paths, git.as_deref()),
        Commands::Scan { root, batch_size } => cli::scan(engine, &root, batch_size),
        Commands::Changes { root } => cli::changes(engine, &root),
        Commands::Search {
            name,
            kind,
            language,
            file,
            min_complexity,
            sort,
            direction,
            limit,
            offset,
            fts,
        } => cli::search(
            engine,
            SearchArgs {
                name,
                kind,
                language,
                file,
                min_complexity,
                sort,
                direction,
                limit,
                offset,
                fts,
            },
        ),
        Commands::Refs { name, file } => cli::refs(engine, &name, file.as_deref()),
        Commands::Complexity { path } => cli::complexity(engine, &path),
        Commands::Stats => cli::stats(engine),
        Commands::Trends {
            metric_type,
            window,
            granularity,
            analyze,
        } => cli::trends(engine, &metric_type, &window, &granularity, analyze),
        Commands::Correlate {
            metric_a,
            metric_b,
            window,
        } => cli::correlate(engine, &metric_a, &metric_b, &window),
        Commands::Summary {
            metric_type,
            window,
        } => cli::summary(engine, metric_type.as_deref(), &window),
        Commands::Cache { command } => cli::cache(engine, command),
        Commands::History { repo, limit } => cli::history(engine, &repo, limit),
    }
}
