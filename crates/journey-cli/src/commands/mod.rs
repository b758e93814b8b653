//! CLI subcommand implementations.

use anyhow::{Context, Result};
use journey_store::SqliteStore;

use crate::Config;

pub mod status;
pub mod track;

/// Opens the session database, ensuring the parent directory exists.
pub fn open_store(config: &Config) -> Result<SqliteStore> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}
