//! clubcache - command-line front end for the club data cache.
//!
//! Lists, inspects and invalidates stored entries, and reads tables from the
//! remote data service through the same cache the app screens use.

mod cli;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clubcache_core::api::{RestClient, TableQuery};
use clubcache_core::utils::{format_age, truncate_string};
use clubcache_core::{CacheKey, CacheManager, Config, EntryStatus, FileStore, Ttl};

use cli::{Cli, Command};

// ============================================================================
// Constants
// ============================================================================

/// Width of the key column in `list` output
const KEY_COLUMN_WIDTH: usize = 48;

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr unless `log_file` is given. The returned guard flushes
/// the file writer and must live until exit.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

fn load_config(cli: &Cli) -> Config {
    let mut config = Config::load()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        })
        .with_env_overrides();

    if let Some(ref club) = cli.club {
        config.club_id = Some(club.clone());
    }
    if let Some(ref dir) = cli.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;
    info!("clubcache starting");

    let config = load_config(&cli);
    let cache_dir = config.cache_dir()?;
    info!(dir = %cache_dir.display(), "Using cache directory");
    let manager = CacheManager::new(Arc::new(FileStore::new(cache_dir)));

    let ttl_or_default = |ttl: Option<i64>| ttl.map(Ttl::secs).unwrap_or(config.default_ttl());

    match cli.command {
        Command::List { ttl } => list(&manager, ttl_or_default(ttl)).await,
        Command::Show { ref key } => show(&manager, key).await,
        Command::Invalidate { ref keys } => invalidate(&manager, keys).await,
        Command::Clear => {
            let removed = manager.clear().await?;
            println!("Removed {} entries", removed);
            Ok(())
        }
        Command::Get {
            ref table,
            ref filters,
            ref select,
            ttl,
            refresh,
        } => {
            let mut query = TableQuery::new(table.as_str()).select(select.as_str());
            for (column, value) in filters {
                query = query.eq(column.as_str(), value.as_str());
            }
            get(&manager, &config, query, ttl_or_default(ttl), refresh).await
        }
    }
}

async fn list(manager: &CacheManager, ttl: Ttl) -> Result<()> {
    let keys = manager.keys().await?;
    if keys.is_empty() {
        println!("Cache is empty");
        return Ok(());
    }

    for key in keys {
        let (age, state) = match manager.status(&key, ttl).await {
            EntryStatus::Fresh { age } => (format_age(age.num_minutes()), "fresh"),
            EntryStatus::Stale { age } => (format_age(age.num_minutes()), "stale"),
            EntryStatus::Missing => ("-".to_string(), "unreadable"),
        };
        println!(
            "{:<width$}  {:>10}  {}",
            truncate_string(key.as_str(), KEY_COLUMN_WIDTH),
            age,
            state,
            width = KEY_COLUMN_WIDTH
        );
    }
    Ok(())
}

async fn show(manager: &CacheManager, key: &str) -> Result<()> {
    let key = CacheKey::from(key);
    let entry = manager
        .peek::<serde_json::Value>(&key)
        .await
        .ok_or_else(|| anyhow::anyhow!("No readable cache entry for '{}'", key))?;

    eprintln!(
        "{} (stored {}, {})",
        key,
        entry.stored_at.to_rfc3339(),
        entry.age_display(manager.now())
    );
    println!("{}", serde_json::to_string_pretty(&entry.payload)?);
    Ok(())
}

async fn invalidate(manager: &CacheManager, keys: &[String]) -> Result<()> {
    for key in keys {
        manager
            .invalidate(&CacheKey::from(key.as_str()))
            .await
            .with_context(|| format!("Failed to invalidate '{}'", key))?;
        println!("Invalidated {}", key);
    }
    Ok(())
}

async fn get(
    manager: &CacheManager,
    config: &Config,
    query: TableQuery,
    ttl: Ttl,
    refresh: bool,
) -> Result<()> {
    let client = RestClient::from_config(config.api_url.as_deref(), config.api_key.as_deref())?;
    let key = query.cache_key();
    let fetch = client.fetcher::<serde_json::Value>(query);

    let resolved = if refresh {
        manager.force_refresh(&key, move || fetch()).await?
    } else {
        manager
            .resolve(Some(&key), move || fetch(), ttl)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Nothing resolved for '{}'", key))?
    };

    if let Some(error) = resolved.error() {
        eprintln!("Refresh failed, showing stale data: {}", error);
    }
    eprintln!(
        "{} ({})",
        key,
        format_age((manager.now() - resolved.stored_at).num_minutes())
    );
    println!("{}", serde_json::to_string_pretty(&resolved.data)?);
    Ok(())
}
