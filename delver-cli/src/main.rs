//! Command-line front end for the Delver research pipeline.

use anyhow::{Context, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use delver_core::config::load_config;
use delver_core::heuristics::{HeuristicPlanner, ScoreAnalyst, TemplateWriter};
use delver_core::orchestrator::Orchestrator;
use delver_core::providers::TavilySearch;

#[derive(Debug, Parser)]
#[command(name = "delver", version, about = "Deep research from the command line")]
struct Cli {
    /// The research question.
    query: String,

    /// Path to a TOML config file (overrides the user config lookup).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "delver_core=info,delver=info",
        1 => "delver_core=debug,delver=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(
        max_parallel_searches = config.max_parallel_searches,
        max_retries = config.max_retries,
        cache_dir = %config.cache.dir.display(),
        "configuration loaded"
    );

    let Some(api_key) = config.search.api_key.clone() else {
        bail!(
            "no search API key configured; set DELVER_SEARCH__API_KEY or \
             search.api_key in config.toml"
        );
    };

    let search = TavilySearch::new(
        api_key,
        config.max_search_results,
        Duration::from_secs(config.search.timeout_secs),
    )
    .context("failed to build search client")?;

    let analyst = ScoreAnalyst::new(
        config.relevance_threshold,
        config.fallback_relevance_threshold,
    );
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(HeuristicPlanner::new()),
        Arc::new(search),
        Arc::new(analyst),
        Arc::new(TemplateWriter::new()),
    );

    match orchestrator.run(&cli.query).await {
        Ok(report) => {
            println!("{}", report.render());
            if !report.sources.is_empty() {
                println!("Sources:");
                for source in &report.sources {
                    println!("  - {source}");
                }
            }
            Ok(())
        }
        Err(failure) => {
            eprintln!("error: {failure}");
            eprintln!();
            eprintln!("session log:");
            for line in &failure.session.logs {
                eprintln!("  {line}");
            }
            std::process::exit(1);
        }
    }
}
