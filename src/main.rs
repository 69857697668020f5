//! Ripple-Scraper main entry point
//!
//! This is the command-line interface for the Ripple-Scraper crawling engine.

use clap::Parser;
use ripple_scraper::config::{load_config_with_hash, Config};
use ripple_scraper::crawler::{crawl, CrawlSetup};
use ripple_scraper::host::SelectorHost;
use ripple_scraper::output::{load_statistics, print_statistics, print_stored_statistics};
use ripple_scraper::storage::SqliteStorage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Ripple-Scraper: a scriptable web-crawling engine
///
/// Ripple-Scraper fetches pages starting from a set of start URLs, runs a page
/// function against each page, follows links matching pseudo-URL patterns and
/// stores the extracted records in a dataset.
#[derive(Parser, Debug)]
#[command(name = "ripple-scraper")]
#[command(version)]
#[command(about = "A scriptable web-crawling engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a fresh crawl, clearing the frontier and dataset
    #[arg(long)]
    fresh: bool,

    /// Validate config and compile the page function without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the crawl database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load and validate configuration
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            setup_logging(cli.verbose, cli.quiet, false);
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    setup_logging(cli.verbose, cli.quiet, config.crawler.debug_log);
    tracing::info!(
        "Configuration loaded from {} (hash: {})",
        cli.config.display(),
        config_hash
    );

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `debug_log` from the configuration raises the default level to debug.
fn setup_logging(verbose: u8, quiet: bool, debug_log: bool) {
    let verbose = if debug_log { verbose.max(1) } else { verbose };
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_scraper=info,warn"),
            1 => EnvFilter::new("ripple_scraper=debug,info"),
            2 => EnvFilter::new("ripple_scraper=trace,debug"),
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

/// Handles the --dry-run mode: compiles everything and shows what would be crawled
fn handle_dry_run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Ripple-Scraper Dry Run ===\n");

    let setup = CrawlSetup::new(config, &SelectorHost)?;
    let config = setup.config();
    let crawler = &config.crawler;
    let limit = |value: u64| match value {
        0 => "unlimited".to_string(),
        n => n.to_string(),
    };

    println!("Crawler Configuration:");
    println!("  Use request queue: {}", crawler.use_request_queue);
    println!(
        "  Concurrency: {} - {}",
        crawler.min_concurrency, crawler.max_concurrency
    );
    println!("  Max request retries: {}", crawler.max_request_retries);
    println!("  Max pages: {}", limit(crawler.max_pages_per_crawl));
    println!("  Max results: {}", limit(crawler.max_results_per_crawl));
    println!(
        "  Max depth: {}",
        limit(u64::from(crawler.max_crawling_depth))
    );
    println!(
        "  Timeouts: page load {}s, page function {}s",
        crawler.page_load_timeout_secs, crawler.page_function_timeout_secs
    );
    println!("  User agent: {}", crawler.user_agent);

    println!("\nStart URLs ({}):", crawler.start_urls.len());
    for start in &crawler.start_urls {
        println!("  - {}", start.url());
    }

    println!(
        "\nLink selector: {}",
        crawler.link_selector.as_deref().unwrap_or("(none)")
    );
    println!("Pseudo-URLs ({}):", setup.rules().len());
    for rule in setup.rules() {
        println!("  - {}", rule.pattern());
    }

    println!("\nOutput:");
    match &config.output.database_path {
        Some(path) => println!("  Database: {}", path),
        None => println!("  Database: (in memory)"),
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Page function compiled");
    println!(
        "✓ Would start crawling with {} start URLs",
        crawler.start_urls.len()
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = config.output.database_path.as_deref() else {
        return Err("--stats requires [output] database-path in the configuration".into());
    };

    println!("Database: {}\n", path);

    // Open the database
    let storage = SqliteStorage::new(Path::new(path))?;

    // Load statistics
    let stats = load_statistics(&storage)?;

    // Print statistics
    print_stored_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, fresh: bool) -> Result<(), Box<dyn std::error::Error>> {
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous state)");
    } else {
        tracing::info!("Starting crawl (will resume if an earlier run left state behind)");
    }

    tracing::info!(
        "Start URLs: {}, Pseudo-URLs: {}",
        config.crawler.start_urls.len(),
        config.pseudo_urls.len()
    );

    // Run the crawler
    match crawl(config, fresh).await {
        Ok(stats) => {
            tracing::info!("Crawl completed successfully");
            print_statistics(&stats);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
