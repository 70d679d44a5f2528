//! Database module
//!
//! This module provides the SQLite persistence backend:
//! - Schema and migrations
//! - Model definitions
//! - Repository implementing the `Store` contract

pub mod models;
pub mod repository;
pub mod schema;

pub use models::*;
pub use repository::Repository;
pub use schema::initialize_database;

use crate::config::{DB_BUSY_TIMEOUT_SECS, DB_MAX_CONNECTIONS};
use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Where an OKR database lives.
#[derive(Debug, Clone, Copy)]
enum Location<'a> {
    File(&'a Path),
    Memory,
}

impl Location<'_> {
    /// Options for every connection to this database.
    ///
    /// Foreign keys are always enforced: owner and parent cascades rely on them.
    fn options(self) -> SqliteConnectOptions {
        let options = match self {
            Location::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .busy_timeout(Duration::from_secs(DB_BUSY_TIMEOUT_SECS))
                .journal_mode(SqliteJournalMode::Wal),
            // A memory database is private to its connection
            Location::Memory => SqliteConnectOptions::new().in_memory(true),
        };
        options.foreign_keys(true)
    }

    /// Pool sizing for this database.
    fn pool(self) -> SqlitePoolOptions {
        match self {
            Location::File(_) => SqlitePoolOptions::new().max_connections(DB_MAX_CONNECTIONS),
            Location::Memory => SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        }
    }
}

/// Open the OKR database file, applying pending migrations first.
///
/// The schema is brought up to date over a lone connection that is closed
/// before the shared pool opens.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::info!("Opening OKR database at {}", db_path.display());

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let location = Location::File(db_path);
    let migrator = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(location.options())
        .await?;
    initialize_database(&migrator).await?;
    migrator.close().await;

    let pool = location.pool().connect_with(location.options()).await?;
    tracing::debug!("OKR database ready with up to {} connections", DB_MAX_CONNECTIONS);
    Ok(pool)
}

/// Open a migrated database that lives as long as the returned pool.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let location = Location::Memory;
    let pool = location.pool().connect_with(location.options()).await?;
    initialize_database(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn journal_mode(pool: &SqlitePool) -> String {
        sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn foreign_keys(pool: &SqlitePool) -> i32 {
        sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_pool_enforces_foreign_keys() {
        let pool = create_memory_pool().await.unwrap();
        assert_eq!(foreign_keys(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_file_pool_creates_directory_and_uses_wal() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("okr.db");

        let pool = create_pool(&db_path).await.unwrap();

        assert!(db_path.exists());
        assert_eq!(journal_mode(&pool).await, "wal");
        assert_eq!(foreign_keys(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_file_pool_reopens_migrated_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("okr.db");

        create_pool(&db_path).await.unwrap().close().await;
        let pool = create_pool(&db_path).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
