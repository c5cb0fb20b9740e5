//! Database migrations
//!
//! This module manages SQLite schema migrations for storefront.
//! Migrations are versioned and applied automatically on database connection.

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

/// Migration 1: Plugin catalogue, installations and settings
const MIGRATION_V1: &str = r#"
    -- Plugin catalogue (administratively registered manifests)
    CREATE TABLE IF NOT EXISTS plugins (
        id TEXT PRIMARY KEY NOT NULL,
        plugin_key TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        description TEXT,
        version TEXT NOT NULL,
        plugin_type TEXT NOT NULL CHECK (plugin_type IN ('widget', 'dashboard_module', 'backend_handler', 'mixed')),
        public_widget_path TEXT,
        dashboard_settings_path TEXT,
        backend_handler_path TEXT,
        default_settings TEXT NOT NULL DEFAULT '{}',
        is_premium INTEGER NOT NULL DEFAULT 0,
        price REAL NOT NULL DEFAULT 0.0 CHECK (price >= 0),
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_plugins_is_active ON plugins(is_active);

    -- Per-tenant installations
    CREATE TABLE IF NOT EXISTS installed_plugins (
        id TEXT PRIMARY KEY NOT NULL,
        plugin_id TEXT NOT NULL REFERENCES plugins(id) ON DELETE RESTRICT,
        business_id TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 0,
        installed_version TEXT NOT NULL,
        installed_by TEXT,
        installed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (plugin_id, business_id)
    );

    CREATE INDEX IF NOT EXISTS idx_installed_plugins_business_id ON installed_plugins(business_id);

    -- Installation settings (1:1, created lazily)
    CREATE TABLE IF NOT EXISTS plugin_settings (
        installed_plugin_id TEXT PRIMARY KEY NOT NULL REFERENCES installed_plugins(id) ON DELETE CASCADE,
        settings_json TEXT NOT NULL DEFAULT '{}',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 2: Plugin audit log
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS plugin_audit_log (
        id TEXT PRIMARY KEY NOT NULL,
        business_id TEXT,
        user_id TEXT,
        action TEXT NOT NULL,
        installation_id TEXT,
        plugin_key TEXT,
        details TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_plugin_audit_log_business_id ON plugin_audit_log(business_id);
    CREATE INDEX IF NOT EXISTS idx_plugin_audit_log_created_at ON plugin_audit_log(created_at);
"#;

async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    // MAX() yields a NULL row on an empty table
    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

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
        tracing::info!("Applying migration v1: Plugin catalogue and installations");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Plugin audit log");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
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
