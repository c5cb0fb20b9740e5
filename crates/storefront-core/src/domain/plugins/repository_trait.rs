//! Repository trait for plugin persistence
//!
//! This module defines the trait for plugin catalogue, installation, settings
//! and audit storage. The trait abstracts over storage backends (SQLite, etc.).
//!
//! Every read or write of an installation after it is created takes the owning
//! `business_id` alongside the installation id.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

use super::entity::{Installation, PluginManifest};
use super::event::AuditEntry;
use super::value::Settings;

/// Repository trait for plugin persistence
#[async_trait]
pub trait PluginStore: Send + Sync {
    // ========== Catalogue ==========

    /// Insert a manifest, or update the existing one with the same plugin key.
    ///
    /// Returns the stored manifest (the original `id` and `created_at` are kept
    /// on update).
    async fn upsert_plugin(&self, manifest: &PluginManifest) -> Result<PluginManifest>;

    /// Find a manifest by plugin key, active or not
    async fn find_plugin_by_key(&self, plugin_key: &str) -> Result<Option<PluginManifest>>;

    /// Find a manifest by plugin key if it is offered in the marketplace
    async fn find_active_plugin_by_key(&self, plugin_key: &str) -> Result<Option<PluginManifest>>;

    /// Find a manifest by its id
    async fn find_plugin_by_id(&self, plugin_id: Uuid) -> Result<Option<PluginManifest>>;

    /// List manifests ordered by plugin key
    async fn list_plugins(&self, active_only: bool) -> Result<Vec<PluginManifest>>;

    /// Toggle marketplace availability. Returns false if the key is unknown.
    async fn set_plugin_active(&self, plugin_key: &str, is_active: bool) -> Result<bool>;

    // ========== Installations ==========

    /// Insert a new installation.
    ///
    /// A second installation for the same (plugin, business) fails with
    /// `Error::Conflict`, enforced by the storage constraint.
    async fn insert_installation(&self, installation: &Installation) -> Result<()>;

    /// Find an installation owned by `business_id`
    async fn find_installation(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
    ) -> Result<Option<Installation>>;

    /// Whether an installation with this id exists under any business.
    ///
    /// Never returns the row itself.
    async fn installation_exists(&self, installation_id: Uuid) -> Result<bool>;

    /// List a business's installations, oldest first
    async fn list_installations(&self, business_id: Uuid) -> Result<Vec<Installation>>;

    /// Set `is_active`, bumping `updated_at` only when the value changes
    async fn set_installation_active(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        is_active: bool,
    ) -> Result<Option<Installation>>;

    /// Record a new installed version
    async fn set_installed_version(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        version: &str,
    ) -> Result<Option<Installation>>;

    /// Delete an installation and its settings atomically.
    ///
    /// Returns false if no installation matched `(installation_id, business_id)`.
    async fn delete_installation(&self, installation_id: Uuid, business_id: Uuid) -> Result<bool>;

    // ========== Settings ==========

    /// Get the stored settings for an installation, if any were ever written
    async fn get_settings(&self, installation_id: Uuid, business_id: Uuid)
    -> Result<Option<Settings>>;

    /// Create or replace the settings row of an installation owned by `business_id`
    async fn save_settings(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        settings: &Settings,
    ) -> Result<()>;

    // ========== Audit ==========

    /// Append an audit entry
    async fn record_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// List recent audit entries, newest first
    async fn list_audit(&self, business_id: Option<Uuid>, limit: i64) -> Result<Vec<AuditEntry>>;
}
