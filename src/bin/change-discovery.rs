//! change-discovery CLI — harvest activity feeds into a local store.
//!
//! Usage:
//!   change-discovery crawl <provider|url> [--config path]
//!   change-discovery ingest <provider> [--db path]
//!   change-discovery backfill [--max-records n] [--db path]
//!   change-discovery stats [--provider tag] [--db path]
//!   change-discovery providers

use change_discovery::{
    crawl_all, load_root, Crawl, HarvestConfig, Harvester, HttpTransport, ManifestFilter,
    ManifestStore, OpenStore, SqliteStore, StopReason, Transport,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "change-discovery",
    version,
    about = "Harvest IIIF change discovery feeds"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Path to SQLite database file (overrides the config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Log per-page and per-record detail
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk a feed and summarize its activities without storing anything
    Crawl {
        /// Provider tag from the config, or a feed URL
        target: String,
    },
    /// Walk a provider's feed and record every Manifest it mentions
    Ingest {
        /// Provider tag from the config
        provider: String,
    },
    /// Fetch content for records that do not have it yet
    Backfill {
        /// Stop after this many records
        #[arg(long)]
        max_records: Option<usize>,
    },
    /// Show store statistics
    Stats {
        /// Limit to one provider
        #[arg(long)]
        provider: Option<String>,
        /// Also list distinct Manifest labels
        #[arg(long)]
        labels: bool,
    },
    /// List configured providers
    Providers,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_store(config: &HarvestConfig, db: Option<PathBuf>) -> Result<SqliteStore, String> {
    let db_path = db.unwrap_or_else(|| config.database_path());
    SqliteStore::open(&db_path)
        .map_err(|e| format!("Failed to open database {}: {}", db_path.display(), e))
}

fn open_transport(config: &HarvestConfig) -> Result<HttpTransport, String> {
    HttpTransport::new(config.request_timeout(), &config.http.user_agent)
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

/// Resolve a provider tag (or a literal https URL) to a feed endpoint
fn resolve_endpoint(config: &HarvestConfig, target: &str) -> Result<String, String> {
    if target.starts_with("https://") {
        return Ok(target.to_string());
    }
    config
        .provider(target)
        .map(|p| p.endpoint.clone())
        .ok_or_else(|| format!("provider '{}' is not configured", target))
}

fn crawl_feed(transport: &dyn Transport, config: &HarvestConfig, endpoint: &str) -> Result<Crawl, String> {
    let root = load_root(transport, endpoint).map_err(|e| e.to_string())?;
    crawl_all(transport, &root, &config.crawl_options()).map_err(|e| e.to_string())
}

fn cmd_crawl(config: &HarvestConfig, target: &str) -> Result<(), String> {
    let endpoint = resolve_endpoint(config, target)?;
    let transport = open_transport(config)?;
    let crawl = crawl_feed(&transport, config, &endpoint)?;

    println!("Pages:      {}", crawl.pages_visited.len());
    println!("Activities: {}", crawl.activities.len());
    println!("{:<10}  {:>8}", "KIND", "COUNT");
    println!("{}", "-".repeat(20));
    for (kind, count) in crawl.kind_counts() {
        println!("{:<10}  {:>8}", kind, count);
    }
    Ok(())
}

fn cmd_ingest(config: &HarvestConfig, db: Option<PathBuf>, provider: &str) -> Result<(), String> {
    let endpoint = resolve_endpoint(config, provider)?;
    let store = open_store(config, db)?;
    let transport = Arc::new(open_transport(config)?);
    let crawl = crawl_feed(transport.as_ref(), config, &endpoint)?;

    let harvester = Harvester::new(Arc::new(store), transport);
    let summary = harvester
        .ingest_crawl(provider, &crawl)
        .map_err(|e| e.to_string())?;
    println!(
        "Recorded {} new manifests ({} already known, {} ignored activities)",
        summary.inserted, summary.already_present, summary.ignored
    );
    Ok(())
}

fn cmd_backfill(config: &HarvestConfig, db: Option<PathBuf>, max_records: Option<usize>) -> Result<(), String> {
    let store = open_store(config, db)?;
    let transport = open_transport(config)?;
    let mut policy = config.backfill_policy();
    if let Some(max) = max_records {
        policy = policy.with_max_records(max);
    }

    let harvester = Harvester::new(Arc::new(store), Arc::new(transport)).with_policy(policy);
    let summary = harvester
        .run_backfill(std::thread::sleep)
        .map_err(|e| e.to_string())?;

    println!(
        "Populated {}, gone {}, transient failures {}",
        summary.populated, summary.gone, summary.transient_failures
    );
    match summary.stopped {
        StopReason::Drained => println!("Nothing left to backfill."),
        StopReason::RecordLimit => println!("Stopped at record limit."),
        StopReason::TooManyFailures => {
            return Err("stopped after repeated transient failures; try again later".to_string())
        }
    }
    Ok(())
}

fn cmd_stats(
    config: &HarvestConfig,
    db: Option<PathBuf>,
    provider: Option<&str>,
    labels: bool,
) -> Result<(), String> {
    let store = open_store(config, db)?;
    let err = |e: change_discovery::StorageError| e.to_string();

    let mut filter = ManifestFilter::new();
    if let Some(tag) = provider {
        filter = filter.with_provider(tag);
    }

    if provider.is_none() {
        println!("{:<24}  {:>9}", "PROVIDER", "MANIFESTS");
        println!("{}", "-".repeat(35));
        for (tag, count) in store.count_by_provider().map_err(err)? {
            println!("{:<24}  {:>9}", tag, count);
        }
        println!();
    }

    let total = store.count_matching(&filter).map_err(err)?;
    let pending = store.count_matching(&filter.clone().awaiting_backfill()).map_err(err)?;
    let gone = store.count_matching(&filter.clone().with_content_empty(true)).map_err(err)?;
    println!("Manifests:         {}", total);
    println!("Awaiting backfill: {}", pending);
    println!("Gone upstream:     {}", gone);

    if labels {
        println!();
        for label in store.distinct_labels(provider).map_err(err)? {
            println!("{}", label);
        }
    }
    Ok(())
}

fn cmd_providers(config: &HarvestConfig) -> Result<(), String> {
    if config.providers.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }
    println!("{:<16}  {}", "TAG", "ENDPOINT");
    println!("{}", "-".repeat(72));
    for provider in &config.providers {
        println!("{:<16}  {}", provider.tag, provider.endpoint);
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match HarvestConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Crawl { target } => cmd_crawl(&config, &target),
        Commands::Ingest { provider } => cmd_ingest(&config, cli.db, &provider),
        Commands::Backfill { max_records } => cmd_backfill(&config, cli.db, max_records),
        Commands::Stats { provider, labels } => cmd_stats(&config, cli.db, provider.as_deref(), labels),
        Commands::Providers => cmd_providers(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
