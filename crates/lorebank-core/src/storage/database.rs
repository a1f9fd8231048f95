//! SQLite database operations
//!
//! Provides connection pool management and database initialization for the
//! shared learning store. Several application processes may open the same
//! file, so connections run in WAL mode with a busy timeout.

use crate::storage::migrations;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Default maximum connections in the pool
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a connection waits on a locked database before reporting busy
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database configuration options
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to run migrations automatically
    pub auto_migrate: bool,
    /// Journal mode (default: WAL so readers never block the writer)
    pub journal_mode: SqliteJournalMode,
    /// Synchronous mode (default: NORMAL)
    pub synchronous: SqliteSynchronous,
    /// Wait applied by SQLite itself before returning SQLITE_BUSY
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auto_migrate: true,
            journal_mode: SqliteJournalMode::Wal,
            synchronous: SqliteSynchronous::Normal,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl DatabaseConfig {
    /// Create a new database config with the specified path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a config for an in-memory database (useful for testing)
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            max_connections: 1, // Each in-memory connection is its own database
            ..Default::default()
        }
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the busy timeout
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Disable automatic migrations
    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.path.to_string_lossy() == ":memory:"
    }
}

/// Get the default database path
pub fn default_database_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        config_dir.join("lorebank").join("lorebank.db")
    } else {
        PathBuf::from("lorebank.db")
    }
}

/// Database connection pool wrapper
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    /// Create a new database connection with the given configuration
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if !config.is_in_memory() {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory: {:?}", parent)
                    })?;
                }
            }
        }

        let connection_str = if config.is_in_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", config.path.display())
        };

        // Pragmas set here apply to every pooled connection, not just the first
        let connect_options = SqliteConnectOptions::from_str(&connection_str)?
            .journal_mode(config.journal_mode)
            .synchronous(config.synchronous)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("Failed to connect to database: {:?}", config.path))?;

        debug!(path = %config.path.display(), max_connections = config.max_connections, "Database opened");

        let db = Self {
            pool,
            config: config.clone(),
        };

        if config.auto_migrate {
            db.migrate().await?;
        }

        Ok(db)
    }

    /// Create a database connection with default configuration
    pub async fn default() -> Result<Self> {
        Self::new(DatabaseConfig::default()).await
    }

    /// Create an in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the database configuration
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to run database migrations")
    }

    /// Check migration status
    pub async fn migration_status(&self) -> Result<migrations::MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to check migration status")
    }

    /// Check if database is healthy
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::in_memory()
            .await
            .expect("Failed to create in-memory database");

        db.health_check().await.expect("Health check failed");

        let status = db
            .migration_status()
            .await
            .expect("Failed to get migration status");
        assert!(!status.needs_migration);
    }

    #[tokio::test]
    async fn test_database_config_builder() {
        let config = DatabaseConfig::with_path("/tmp/lorebank-test.db")
            .max_connections(10)
            .busy_timeout(Duration::from_millis(250))
            .no_migrate();

        assert_eq!(config.path, PathBuf::from("/tmp/lorebank-test.db"));
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert!(!config.auto_migrate);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let db = Database::in_memory()
            .await
            .expect("Failed to create database");

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .expect("Failed to check foreign_keys pragma");

        assert_eq!(result.0, 1, "Foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("store.db");

        let db = Database::new(DatabaseConfig::with_path(&path))
            .await
            .expect("Failed to open file database");
        assert!(path.exists());
        assert_eq!(db.path(), path.as_path());

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .expect("Failed to read journal mode");
        assert_eq!(mode.to_lowercase(), "wal");
        db.close().await;
    }

    #[tokio::test]
    async fn test_edge_cascades_with_learning() {
        let db = Database::in_memory()
            .await
            .expect("Failed to create database");
        let now = "2026-01-01T00:00:00.000000Z";

        for id in ["a", "b"] {
            sqlx::query(
                r#"
                INSERT INTO learnings (id, app, scope, variant, content, fingerprint, created_at, updated_at)
                VALUES (?, 'horizon', 'app', 'general', '{}', ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(id)
            .bind(now)
            .bind(now)
            .execute(db.pool())
            .await
            .expect("Failed to insert learning");
        }
        sqlx::query(
            "INSERT INTO learning_edges (id, kind, from_id, to_id, created_at) VALUES ('e', 'supports', 'a', 'b', ?)",
        )
        .bind(now)
        .execute(db.pool())
        .await
        .expect("Failed to insert edge");

        sqlx::query("DELETE FROM learnings WHERE id = 'a'")
            .execute(db.pool())
            .await
            .expect("Failed to delete learning");

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM learning_edges")
            .fetch_one(db.pool())
            .await
            .expect("Failed to count edges");
        assert_eq!(count, 0, "Edge should be deleted via cascade");
    }
}
