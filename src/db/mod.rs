//! Database connection management.
use std::str::FromStr as _;

use anyhow::{Context as _, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

pub(crate) mod migrator;

/// The store handle passed to every service.
pub type Db = SqlitePool;

/// Open (creating if needed) the SQLite database at `url` and return a connection pool.
///
/// Foreign keys are enforced so that report deletion cascades to photos.
pub async fn establish_pool(url: &str) -> Result<Db> {
    let opts = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("failed to parse database url {url:?}"))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    if let Some(parent) = opts.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
    }

    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await
        .context("failed to connect to database")
}
