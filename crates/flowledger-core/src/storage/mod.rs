//! Storage layer - SQLite
//!
//! Provides database management and migrations for the flow registry.
//!
//! # Architecture
//!
//! - `database`: Pool setup (busy timeout, single-connection in-memory) and opening
//! - `migrations`: Schema versioning and automatic migration
//!
//! # Usage
//!
//! ```ignore
//! use flowledger_core::storage::{Database, DatabaseConfig};
//!
//! // In-memory database for testing
//! let db = Database::in_memory().await?;
//!
//! // File-backed database
//! let db = Database::open(DatabaseConfig::file("flows.db")).await?;
//! ```

pub mod database;
pub mod migrations;

pub use database::{
    default_database_path, Database, DatabaseConfig, Location, DEFAULT_BUSY_TIMEOUT, DEFAULT_MAX_CONNECTIONS,
};
pub use migrations::{migration_status, needs_migration, run_migrations, MigrationStatus, CURRENT_VERSION};
