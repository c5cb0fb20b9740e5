//! Plugin repository for database operations
//!
//! SQLite implementation of [`PluginStore`].

use super::entity::{Installation, PluginManifest, PluginType};
use super::event::{AuditAction, AuditEntry};
use super::repository_trait::PluginStore;
use super::value::{Settings, settings_from_json_map, settings_to_json_map};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

const PLUGIN_COLUMNS: &str = "id, plugin_key, name, description, version, plugin_type, \
     public_widget_path, dashboard_settings_path, backend_handler_path, default_settings, \
     is_premium, price, is_active, created_at, updated_at";

const INSTALLATION_COLUMNS: &str =
    "id, plugin_id, business_id, is_active, installed_version, installed_by, installed_at, updated_at";

/// Repository for plugin database operations
#[derive(Debug, Clone)]
pub struct SqlitePluginStore {
    pool: SqlitePool,
}

impl SqlitePluginStore {
    /// Create a new repository with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_plugin(&self, clause: &str, arg: String) -> Result<Option<PluginManifest>> {
        let sql = format!("SELECT {PLUGIN_COLUMNS} FROM plugins WHERE {clause}");
        let row: Option<PluginRow> = sqlx::query_as(&sql)
            .bind(arg)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        row.map(PluginRow::into_manifest).transpose()
    }
}

fn settings_json(settings: &Settings) -> Result<String> {
    serde_json::to_string(&serde_json::Value::Object(settings_to_json_map(settings)))
        .map_err(|e| Error::Parse(format!("Failed to serialize settings: {}", e)))
}

fn parse_settings(raw: &str) -> Result<Settings> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(settings_from_json_map(map)),
        Ok(other) => Err(Error::Parse(format!(
            "Settings must be a JSON object, found {}",
            other
        ))),
        Err(e) => Err(Error::Parse(format!("Invalid settings JSON: {}", e))),
    }
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Parse(format!("Invalid {}: {}", what, e)))
}

#[async_trait]
impl PluginStore for SqlitePluginStore {
    async fn upsert_plugin(&self, manifest: &PluginManifest) -> Result<PluginManifest> {
        let default_settings = settings_json(&manifest.default_settings)?;

        sqlx::query(
            r#"
            INSERT INTO plugins (id, plugin_key, name, description, version, plugin_type,
                public_widget_path, dashboard_settings_path, backend_handler_path, default_settings,
                is_premium, price, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(plugin_key) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                version = excluded.version,
                plugin_type = excluded.plugin_type,
                public_widget_path = excluded.public_widget_path,
                dashboard_settings_path = excluded.dashboard_settings_path,
                backend_handler_path = excluded.backend_handler_path,
                default_settings = excluded.default_settings,
                is_premium = excluded.is_premium,
                price = excluded.price,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(manifest.id.to_string())
        .bind(&manifest.plugin_key)
        .bind(&manifest.name)
        .bind(&manifest.description)
        .bind(&manifest.version)
        .bind(manifest.plugin_type.as_str())
        .bind(&manifest.public_widget_path)
        .bind(&manifest.dashboard_settings_path)
        .bind(&manifest.backend_handler_path)
        .bind(&default_settings)
        .bind(manifest.is_premium)
        .bind(manifest.price)
        .bind(manifest.is_active)
        .bind(manifest.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| match Error::from_write(e, "plugin") {
            // plugin_key clashes are absorbed by the upsert, so this is the primary key
            Error::Conflict(_) => Error::InvalidInput(format!(
                "plugin id {} already belongs to another plugin",
                manifest.id
            )),
            other => other,
        })?;

        self.find_plugin_by_key(&manifest.plugin_key)
            .await?
            .ok_or_else(|| Error::PluginNotFound(manifest.plugin_key.clone()))
    }

    async fn find_plugin_by_key(&self, plugin_key: &str) -> Result<Option<PluginManifest>> {
        self.fetch_plugin("plugin_key = ?", plugin_key.to_string())
            .await
    }

    async fn find_active_plugin_by_key(&self, plugin_key: &str) -> Result<Option<PluginManifest>> {
        self.fetch_plugin("plugin_key = ? AND is_active = 1", plugin_key.to_string())
            .await
    }

    async fn find_plugin_by_id(&self, plugin_id: Uuid) -> Result<Option<PluginManifest>> {
        self.fetch_plugin("id = ?", plugin_id.to_string()).await
    }

    async fn list_plugins(&self, active_only: bool) -> Result<Vec<PluginManifest>> {
        let sql = if active_only {
            format!("SELECT {PLUGIN_COLUMNS} FROM plugins WHERE is_active = 1 ORDER BY plugin_key ASC")
        } else {
            format!("SELECT {PLUGIN_COLUMNS} FROM plugins ORDER BY plugin_key ASC")
        };

        let rows: Vec<PluginRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        rows.into_iter().map(PluginRow::into_manifest).collect()
    }

    async fn set_plugin_active(&self, plugin_key: &str, is_active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE plugins SET is_active = ?, updated_at = ? WHERE plugin_key = ?")
            .bind(is_active)
            .bind(Utc::now())
            .bind(plugin_key)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_installation(&self, installation: &Installation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO installed_plugins (id, plugin_id, business_id, is_active, installed_version, installed_by, installed_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(installation.id.to_string())
        .bind(installation.plugin_id.to_string())
        .bind(installation.business_id.to_string())
        .bind(installation.is_active)
        .bind(&installation.installed_version)
        .bind(installation.installed_by.map(|u| u.to_string()))
        .bind(installation.installed_at)
        .bind(installation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::from_write(
                e,
                &format!(
                    "plugin {} is already installed for business {}",
                    installation.plugin_id, installation.business_id
                ),
            )
        })?;

        Ok(())
    }

    async fn find_installation(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
    ) -> Result<Option<Installation>> {
        let sql = format!(
            "SELECT {INSTALLATION_COLUMNS} FROM installed_plugins WHERE id = ? AND business_id = ?"
        );
        let row: Option<InstallationRow> = sqlx::query_as(&sql)
            .bind(installation_id.to_string())
            .bind(business_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        row.map(InstallationRow::into_installation).transpose()
    }

    async fn installation_exists(&self, installation_id: Uuid) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM installed_plugins WHERE id = ?")
            .bind(installation_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        Ok(count > 0)
    }

    async fn list_installations(&self, business_id: Uuid) -> Result<Vec<Installation>> {
        let sql = format!(
            "SELECT {INSTALLATION_COLUMNS} FROM installed_plugins WHERE business_id = ? ORDER BY installed_at ASC"
        );
        let rows: Vec<InstallationRow> = sqlx::query_as(&sql)
            .bind(business_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        rows.into_iter()
            .map(InstallationRow::into_installation)
            .collect()
    }

    async fn set_installation_active(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        is_active: bool,
    ) -> Result<Option<Installation>> {
        sqlx::query(
            r#"
            UPDATE installed_plugins
            SET is_active = ?, updated_at = ?
            WHERE id = ? AND business_id = ? AND is_active != ?
            "#,
        )
        .bind(is_active)
        .bind(Utc::now())
        .bind(installation_id.to_string())
        .bind(business_id.to_string())
        .bind(is_active)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        self.find_installation(installation_id, business_id).await
    }

    async fn set_installed_version(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        version: &str,
    ) -> Result<Option<Installation>> {
        sqlx::query(
            r#"
            UPDATE installed_plugins
            SET installed_version = ?, updated_at = ?
            WHERE id = ? AND business_id = ?
            "#,
        )
        .bind(version)
        .bind(Utc::now())
        .bind(installation_id.to_string())
        .bind(business_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        self.find_installation(installation_id, business_id).await
    }

    async fn delete_installation(&self, installation_id: Uuid, business_id: Uuid) -> Result<bool> {
        let id = installation_id.to_string();
        let business = business_id.to_string();

        let mut tx = self.pool.begin().await.map_err(Error::DatabaseError)?;

        sqlx::query(
            r#"
            DELETE FROM plugin_settings
            WHERE installed_plugin_id IN (
                SELECT id FROM installed_plugins WHERE id = ? AND business_id = ?
            )
            "#,
        )
        .bind(&id)
        .bind(&business)
        .execute(&mut *tx)
        .await
        .map_err(Error::DatabaseError)?;

        let result = sqlx::query("DELETE FROM installed_plugins WHERE id = ? AND business_id = ?")
            .bind(&id)
            .bind(&business)
            .execute(&mut *tx)
            .await
            .map_err(Error::DatabaseError)?;

        tx.commit().await.map_err(Error::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_settings(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
    ) -> Result<Option<Settings>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT s.settings_json
            FROM plugin_settings s
            JOIN installed_plugins i ON i.id = s.installed_plugin_id
            WHERE s.installed_plugin_id = ? AND i.business_id = ?
            "#,
        )
        .bind(installation_id.to_string())
        .bind(business_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        row.map(|(raw,)| parse_settings(&raw)).transpose()
    }

    async fn save_settings(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        settings: &Settings,
    ) -> Result<()> {
        let id = installation_id.to_string();
        let json = settings_json(settings)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Error::DatabaseError)?;

        let owned: Option<(String,)> =
            sqlx::query_as("SELECT id FROM installed_plugins WHERE id = ? AND business_id = ?")
                .bind(&id)
                .bind(business_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::DatabaseError)?;

        if owned.is_none() {
            return Err(Error::InstallationNotFound(id));
        }

        sqlx::query(
            r#"
            INSERT INTO plugin_settings (installed_plugin_id, settings_json, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(installed_plugin_id) DO UPDATE SET
                settings_json = excluded.settings_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(&json)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::DatabaseError)?;

        tx.commit().await.map_err(Error::DatabaseError)?;

        Ok(())
    }

    async fn record_audit(&self, entry: &AuditEntry) -> Result<()> {
        let details = entry.details.as_ref().map(|d| d.to_string());

        sqlx::query(
            r#"
            INSERT INTO plugin_audit_log (id, business_id, user_id, action, installation_id, plugin_key, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.business_id.map(|b| b.to_string()))
        .bind(entry.user_id.map(|u| u.to_string()))
        .bind(entry.action.as_str())
        .bind(entry.installation_id.map(|i| i.to_string()))
        .bind(&entry.plugin_key)
        .bind(&details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        Ok(())
    }

    async fn list_audit(&self, business_id: Option<Uuid>, limit: i64) -> Result<Vec<AuditEntry>> {
        let business = business_id.map(|b| b.to_string());

        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, business_id, user_id, action, installation_id, plugin_key, details, created_at
            FROM plugin_audit_log
            WHERE (? IS NULL OR business_id = ?)
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(&business)
        .bind(&business)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        rows.into_iter().map(AuditRow::into_entry).collect()
    }
}

/// Database row for a plugin manifest
#[derive(sqlx::FromRow)]
struct PluginRow {
    id: String,
    plugin_key: String,
    name: String,
    description: Option<String>,
    version: String,
    plugin_type: String,
    public_widget_path: Option<String>,
    dashboard_settings_path: Option<String>,
    backend_handler_path: Option<String>,
    default_settings: String,
    is_premium: bool,
    price: f64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PluginRow {
    fn into_manifest(self) -> Result<PluginManifest> {
        let plugin_type = PluginType::parse(&self.plugin_type).ok_or_else(|| {
            Error::Parse(format!("Unknown plugin type: {}", self.plugin_type))
        })?;

        Ok(PluginManifest {
            id: parse_uuid(&self.id, "plugin ID")?,
            plugin_key: self.plugin_key,
            name: self.name,
            description: self.description,
            version: self.version,
            plugin_type,
            public_widget_path: self.public_widget_path,
            dashboard_settings_path: self.dashboard_settings_path,
            backend_handler_path: self.backend_handler_path,
            default_settings: parse_settings(&self.default_settings)?,
            is_premium: self.is_premium,
            price: self.price,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Database row for an installation
#[derive(sqlx::FromRow)]
struct InstallationRow {
    id: String,
    plugin_id: String,
    business_id: String,
    is_active: bool,
    installed_version: String,
    installed_by: Option<String>,
    installed_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InstallationRow {
    fn into_installation(self) -> Result<Installation> {
        Ok(Installation {
            id: parse_uuid(&self.id, "installation ID")?,
            plugin_id: parse_uuid(&self.plugin_id, "plugin ID")?,
            business_id: parse_uuid(&self.business_id, "business ID")?,
            is_active: self.is_active,
            installed_version: self.installed_version,
            installed_by: self
                .installed_by
                .as_deref()
                .map(|u| parse_uuid(u, "user ID"))
                .transpose()?,
            installed_at: self.installed_at,
            updated_at: self.updated_at,
        })
    }
}

/// Database row for an audit entry
#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    business_id: Option<String>,
    user_id: Option<String>,
    action: String,
    installation_id: Option<String>,
    plugin_key: Option<String>,
    details: Option<String>,
    created_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_entry(self) -> Result<AuditEntry> {
        let action = AuditAction::parse(&self.action)
            .ok_or_else(|| Error::Parse(format!("Unknown audit action: {}", self.action)))?;
        let details = self
            .details
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| Error::Parse(format!("Invalid audit details JSON: {}", e)))?;

        Ok(AuditEntry {
            id: parse_uuid(&self.id, "audit ID")?,
            business_id: self
                .business_id
                .as_deref()
                .map(|b| parse_uuid(b, "business ID"))
                .transpose()?,
            user_id: self
                .user_id
                .as_deref()
                .map(|u| parse_uuid(u, "user ID"))
                .transpose()?,
            action,
            installation_id: self
                .installation_id
                .as_deref()
                .map(|i| parse_uuid(i, "installation ID"))
                .transpose()?,
            plugin_key: self.plugin_key,
            details,
            created_at: self.created_at,
        })
    }
}
