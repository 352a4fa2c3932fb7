//! Database module for persistent storage.
//!
//! Provides async SQLite access via SQLx for the two override lists
//! (blacklist, whitelist) and the pattern/ban-config tables described in
//! the persistent state layout.

mod lists;
mod patterns;

pub use lists::{ListEntry, ListKind, ListRepository};
pub use patterns::{BanConfigRow, PatternRepository, PatternRow};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub use crate::error::DbError;

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            let options = SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        tracing::warn!(path = %parent.display(), error = %e, "failed to create database directory");
                    }
                }
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "database connected");

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run embedded migrations, one table group per file, applied only if
    /// the table is missing.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap_or(false)
        }

        if !table_exists(pool, "patterns").await {
            Self::run_migration_file(pool, include_str!("../../migrations/001_patterns.sql"))
                .await;
            info!("database migrations applied (001_patterns)");
        }

        if !table_exists(pool, "ban_config").await {
            Self::run_migration_file(pool, include_str!("../../migrations/002_ban_config.sql"))
                .await;
            info!("database migrations applied (002_ban_config)");
        }

        if !table_exists(pool, "blacklist").await {
            Self::run_migration_file(pool, include_str!("../../migrations/003_blacklist.sql"))
                .await;
            info!("database migrations applied (003_blacklist)");
        }

        if !table_exists(pool, "whitelist").await {
            Self::run_migration_file(pool, include_str!("../../migrations/004_whitelist.sql"))
                .await;
            info!("database migrations applied (004_whitelist)");
        }

        Ok(())
    }

    /// Run a single migration file, executing each statement.
    async fn run_migration_file(pool: &SqlitePool, migration: &str) {
        for statement in migration.split(';') {
            let mut sql_lines: Vec<&str> = Vec::new();
            for line in statement.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with("--") {
                    continue;
                }
                sql_lines.push(line);
            }

            if sql_lines.is_empty() {
                continue;
            }

            let sql = sql_lines.join("\n");

            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                let err_str = e.to_string();
                if !err_str.contains("already exists") {
                    tracing::warn!(sql = %sql, error = %e, "migration statement failed");
                }
            }
        }
    }

    /// Get the blacklist repository.
    pub fn blacklist(&self) -> ListRepository<'_> {
        ListRepository::new(&self.pool, ListKind::Blacklist)
    }

    /// Get the whitelist repository.
    pub fn whitelist(&self) -> ListRepository<'_> {
        ListRepository::new(&self.pool, ListKind::Whitelist)
    }

    /// Get the pattern/ban-config repository.
    pub fn patterns(&self) -> PatternRepository<'_> {
        PatternRepository::new(&self.pool)
    }
}
