//! Formatting helpers shared by the cache and the CLI.

pub mod format;

pub use format::{format_age, truncate_string};
