//! SQLite pool for the flow registry
//!
//! The repository leans on the store for two guarantees:
//! - at most one non-removed row per endpoint pair, enforced by the partial
//!   unique index from migration v2;
//! - writers that queue for the write lock. Every connection waits up to
//!   `busy_timeout`, so two racing adds for one pair end in a unique-index
//!   violation the repository can retry, never in `SQLITE_BUSY`.
//!
//! An in-memory database only exists while its connection is open, so its pool
//! holds exactly one connection and never recycles it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::debug;

use crate::storage::migrations;

/// Default pool size for a file-backed registry
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a connection waits for the write lock before giving up
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the registry lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Memory,
    File(PathBuf),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Memory => f.write_str(":memory:"),
            Location::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub location: Location,
    /// Upper bound for file-backed pools; in-memory pools always use one
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    /// Registry stored in a file, created (with its parent directories) on open
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            max_connections: 1,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn pool_size(&self) -> u32 {
        match self.location {
            Location::Memory => 1,
            Location::File(_) => self.max_connections.max(1),
        }
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = match &self.location {
            Location::Memory => SqliteConnectOptions::from_str("sqlite::memory:")?,
            Location::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
            }
        };
        Ok(options.busy_timeout(self.busy_timeout))
    }
}

/// Default registry file under the platform data directory
pub fn default_database_path() -> PathBuf {
    match dirs::data_dir() {
        Some(data_dir) => data_dir.join("flowledger").join("flowledger.db"),
        None => PathBuf::from("flowledger.db"),
    }
}

/// An open, migrated flow registry
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    location: Location,
}

impl Database {
    /// Open the registry and bring its schema up to date
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        let mut pool_options = SqlitePoolOptions::new().max_connections(config.pool_size());
        if config.location == Location::Memory {
            pool_options = pool_options.min_connections(1).idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Failed to connect to database: {}", config.location))?;

        migrations::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        debug!(location = %config.location, connections = config.pool_size(), "Database opened");
        Ok(Self {
            pool,
            location: config.location,
        })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::open(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub async fn migration_status(&self) -> Result<migrations::MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to check migration status")
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
