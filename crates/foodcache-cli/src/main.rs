use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use foodcache_core::{FoodCache, ProductCandidate, Settings};
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

/// Barcode nutrition cache - look up, refresh and import cached products
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite cache (overrides CACHE_DATABASE_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Staleness window in hours, 0 disables expiry (overrides CACHE_CACHE_TTL_HOURS)
    #[arg(long, global = true, allow_negative_numbers = true)]
    ttl_hours: Option<i64>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read-through lookup: serve from the cache, fetch when missing or stale
    Lookup {
        barcode: String,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-fetch a product from Open Food Facts regardless of cache age
    Refresh {
        barcode: String,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search cached product names (case-insensitive substring)
    Search {
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Bulk upsert products from a JSON array file
    Import {
        /// Path to a JSON file containing an array of products
        file_path: PathBuf,
    },

    /// Print the resolved settings (secrets redacted)
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Resolve configuration: CLI flags > env vars > config files > defaults
    let mut settings = Settings::load()?;
    if let Some(db) = cli.db {
        settings.database_path = db;
    }
    if let Some(ttl) = cli.ttl_hours {
        settings.cache_ttl_hours = ttl;
    }

    let color = ColorMode(!cli.no_color);
    let mut out = std::io::stdout().lock();

    match cli.command {
        Command::Config => {
            output::print_settings(&mut out, &settings)?;
            Ok(())
        }
        Command::Lookup { barcode, json } => {
            let cache = FoodCache::from_settings(settings)?;
            let record = cache.lookup(&barcode).await?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&record)?)?;
            } else {
                let ttl = cache.settings().cache_ttl_hours;
                output::print_record(&mut out, &record, ttl, Utc::now(), color)?;
            }
            Ok(())
        }
        Command::Refresh { barcode, json } => {
            let cache = FoodCache::from_settings(settings)?;
            let record = cache.force_refresh(&barcode).await?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&record)?)?;
            } else {
                let ttl = cache.settings().cache_ttl_hours;
                output::print_record(&mut out, &record, ttl, Utc::now(), color)?;
            }
            Ok(())
        }
        Command::Search { query, limit, json } => {
            let cache = FoodCache::from_settings(settings)?;
            let records = cache.search(&query, limit)?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
            } else {
                output::print_search_results(&mut out, &query, &records, color)?;
            }
            Ok(())
        }
        Command::Import { file_path } => {
            let raw = std::fs::read_to_string(&file_path)
                .with_context(|| format!("failed to read {}", file_path.display()))?;
            let candidates: Vec<ProductCandidate> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON array of products", file_path.display()))?;
            let cache = FoodCache::from_settings(settings)?;
            let records = cache.bulk_ingest(&candidates)?;
            output::print_import_summary(&mut out, &records, color)?;
            Ok(())
        }
    }
}
