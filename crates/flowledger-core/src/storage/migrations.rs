//! Database migrations
//!
//! Versioned SQLite schema migrations, applied automatically on connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Logical flow table
const MIGRATION_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS logical_flows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_entity_kind TEXT NOT NULL,
        source_entity_id INTEGER NOT NULL,
        target_entity_kind TEXT NOT NULL,
        target_entity_id INTEGER NOT NULL,
        entity_lifecycle_status TEXT NOT NULL DEFAULT 'ACTIVE',
        is_removed INTEGER NOT NULL DEFAULT 0,  -- legacy mirror of entity_lifecycle_status
        last_updated_by TEXT NOT NULL,
        last_updated_at TEXT NOT NULL,
        last_attested_by TEXT,
        last_attested_at TEXT,
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        provenance TEXT NOT NULL DEFAULT 'flowledger'
    );

    CREATE INDEX IF NOT EXISTS idx_logical_flows_source
        ON logical_flows(source_entity_kind, source_entity_id);
    CREATE INDEX IF NOT EXISTS idx_logical_flows_target
        ON logical_flows(target_entity_kind, target_entity_id);
    CREATE INDEX IF NOT EXISTS idx_logical_flows_status
        ON logical_flows(entity_lifecycle_status);
"#;

/// Migration 2: Active endpoint-pair uniqueness
///
/// At most one non-removed flow may exist per (source, target). Concurrent
/// restore-or-insert calls for the same pair rely on this index to collide.
const MIGRATION_V2: &str = r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_logical_flows_active_pair
        ON logical_flows(source_entity_kind, source_entity_id, target_entity_kind, target_entity_id)
        WHERE entity_lifecycle_status != 'REMOVED' AND is_removed = 0;
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_one(pool)
        .await?;

    Ok(version.unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Logical flow table");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Active endpoint-pair uniqueness");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}
