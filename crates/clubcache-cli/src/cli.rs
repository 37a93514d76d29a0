//! Command-line interface parsing for clubcache.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// clubcache - inspect and fill the club data cache
#[derive(Parser, Debug)]
#[command(name = "clubcache")]
#[command(about = "Inspect, invalidate and fill the club data cache")]
#[command(version)]
pub struct Cli {
    /// Club whose cache directory to use (overrides config)
    #[arg(long, global = true)]
    pub club: Option<String>,

    /// Cache directory (overrides config and --club)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// List cached keys with their age and freshness
    List {
        /// Freshness window in seconds (defaults to config)
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Print the stored payload for a key
    Show { key: String },
    /// Delete entries so the next read fetches again
    Invalidate {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Delete every entry in the cache directory
    Clear,
    /// Read a table through the cache and print it as JSON
    ///
    /// Examples:
    ///   clubcache get teams --eq club_id=abc
    ///   clubcache get events --eq club_id=abc --select id,title --refresh
    Get {
        table: String,
        /// Equality filter, repeatable
        #[arg(long = "eq", value_name = "COLUMN=VALUE", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
        /// Columns to select
        #[arg(long, default_value = "*")]
        select: String,
        /// Freshness window in seconds (defaults to config)
        #[arg(long)]
        ttl: Option<i64>,
        /// Ignore freshness and fetch now
        #[arg(long)]
        refresh: bool,
    },
}

/// Parse `column=value` into its two halves.
pub fn parse_filter(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((column, value)) if !column.is_empty() => {
            Ok((column.to_string(), value.to_string()))
        }
        _ => Err(format!("expected COLUMN=VALUE, got '{}'", s)),
    }
}
