//! SQLite pool setup and schema migrations.

use crate::services::storage_service::StorageResult;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr};
use tokio::fs;
use tracing::{debug, info};

/// Embedded schema. Statements are separated by `;`.
const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

/// Open a pool for `database_url`, creating the database file and its parent
/// directory when they are missing.
pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<SqlitePool> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    debug!("Interpreted SQLite path => {}", db_path);

    if db_path != ":memory:" {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !fs::try_exists(parent).await? {
                fs::create_dir_all(parent).await?;
                info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Run the embedded schema statements. Every statement is idempotent, so
/// this is safe on an already migrated database.
pub async fn run_migrations(db: &SqlitePool) -> StorageResult<usize> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    info!("Running {} migration statements...", statements.len());

    for stmt in &statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(*stmt).execute(db).await?;
    }

    Ok(statements.len())
}
