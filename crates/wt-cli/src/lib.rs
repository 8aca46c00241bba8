//! Web time tracker CLI library.
//!
//! This crate provides the `wt` command line interface and the daemon
//! runtime that drives the tracking engine.

mod cli;
pub mod commands;
mod config;
pub mod daemon;

use anyhow::{Context, Result};
use wt_db::{Database, SharedDatabase};

pub use cli::{Cli, Commands};
pub use config::Config;

/// Opens the configured database as a shared store.
pub fn open_store(config: &Config) -> Result<SharedDatabase> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    Ok(SharedDatabase::new(db))
}
