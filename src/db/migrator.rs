//! Database migration management.
//!
//! The schema is created by the embedded `sqlx` migrations. Databases created by older
//! releases may lack columns that were introduced later; those are added by the additive
//! column pass, which only ever issues `ALTER TABLE .. ADD COLUMN` for missing columns.

use sqlx::{SqlitePool, migrate::Migrator};
use thiserror::Error;
use tracing::info;

/// Embedded schema migrations.
static MIGRATOR: Migrator = sqlx::migrate!();

/// Columns added after the first release, as `(table, column, declaration)`.
pub(crate) const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[(
    "users",
    "language",
    "TEXT NOT NULL DEFAULT 'ru' CHECK (language IN ('uz', 'ru', 'en'))",
)];

/// Error type for migration-related issues.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration failed: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),
    #[error("failed to add column {table}.{column}: {source}")]
    AddColumn {
        table: &'static str,
        column: &'static str,
        source: sqlx::Error,
    },
}

/// Migrator struct for managing database migrations.
pub struct DatabaseMigrator {
    /// SQLite connection pool.
    db: SqlitePool,
}

impl DatabaseMigrator {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Migrates the database to the latest schema or throws an error.
    pub async fn migrate_to_latest_or_throw(&self) -> Result<(), MigrationError> {
        MIGRATOR.run(&self.db).await?;
        let added = self.add_missing_columns(ADDITIVE_COLUMNS).await?;
        if added > 0 {
            info!("added {added} column(s) to existing tables");
        }
        Ok(())
    }

    /// Adds every listed column that does not exist yet. Returns the number of columns added.
    ///
    /// Running this repeatedly is a no-op once all columns exist.
    pub async fn add_missing_columns(
        &self,
        columns: &[(&'static str, &'static str, &'static str)],
    ) -> Result<usize, MigrationError> {
        let mut added = 0;
        for &(table, column, decl) in columns {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM pragma_table_info(?) WHERE name = ?)",
            )
            .bind(table)
            .bind(column)
            .fetch_one(&self.db)
            .await
            .map_err(|source| MigrationError::AddColumn {
                table,
                column,
                source,
            })?;

            if exists {
                continue;
            }

            info!("adding column {table}.{column}");
            // N.B: Identifiers cannot be bound as parameters. They only ever come from
            // the static column list above.
            sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
                .execute(&self.db)
                .await
                .map_err(|source| MigrationError::AddColumn {
                    table,
                    column,
                    source,
                })?;
            added += 1;
        }

        Ok(added)
    }
}
