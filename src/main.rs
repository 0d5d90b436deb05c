//! Gemini-Ripple main entry point
//!
//! This is the command-line interface for the Gemini-Ripple crawler.

use anyhow::Context;
use clap::Parser;
use gemini_ripple::config::{load_config_with_hash, validate, Config};
use gemini_ripple::crawler::run_crawl;
use gemini_ripple::transport::GeminiTransport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Gemini-Ripple: a breadth-first Gemini crawler
///
/// Gemini-Ripple starts from a few seed URLs, follows every gemini:// link it
/// finds, stores each page body once in a content-addressed cache directory
/// and appends every fetched page to a ledger file. Restarting with the same
/// cache skips everything already stored.
#[derive(Parser, Debug)]
#[command(name = "gemini-ripple")]
#[command(version)]
#[command(about = "A breadth-first Gemini crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Start from this URL instead of the configured seeds (repeatable)
    #[arg(long = "seed", value_name = "URL")]
    seeds: Vec<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if !cli.seeds.is_empty() {
        config.seeds = cli.seeds;
        validate(&config).context("invalid --seed")?;
    }

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    handle_crawl(config).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("gemini_ripple=info,warn"),
            1 => EnvFilter::new("gemini_ripple=debug,info"),
            2 => EnvFilter::new("gemini_ripple=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Gemini-Ripple Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", config.crawler.workers);
    println!("  Request timeout: {}ms", config.crawler.request_timeout_ms);
    println!("  Max attempts: {}", config.crawler.max_attempts);
    println!("  Retry cooldown: {}ms", config.crawler.retry_cooldown_ms);

    println!("\nStorage:");
    println!("  Cache directory: {}", config.storage.cache_dir.display());
    println!("  Ledger: {}", config.storage.ledger_path.display());
    println!(
        "  Cache write attempts: {} ({}ms apart)",
        config.storage.write_attempts, config.storage.write_cooldown_ms
    );

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> anyhow::Result<()> {
    let transport = GeminiTransport::new().context("failed to build TLS client")?;

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, finishing in-flight fetches");
            let _ = stop.send(true);
        }
    });

    tracing::info!("Starting crawl from {} seed URLs", config.seeds.len());
    match run_crawl(&config, Arc::new(transport), shutdown).await {
        Ok(summary) => {
            tracing::info!(
                "Crawl completed: {} fetched, {} failed, {} already cached, {} ledger records{}",
                summary.fetched,
                summary.failed,
                summary.already_cached,
                summary.ledger_records,
                if summary.interrupted { " (interrupted)" } else { "" }
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
