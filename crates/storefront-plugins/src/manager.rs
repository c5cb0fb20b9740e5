//! Tenant-scoped plugin lifecycle
//!
//! The plugin manager orchestrates catalogue administration and the
//! per-business lifecycle of installations:
//!
//! ```text
//! not installed --install--> inactive <--activate/deactivate--> active
//!       ^                        |                                 |
//!       +-------uninstall--------+---------------------------------+
//! ```
//!
//! Every installation lookup is scoped by `(installation_id, business_id)`.
//! A lookup that misses under the caller's business but hits under another
//! one is reported as [`PluginError::Forbidden`] and audited; the foreign row
//! itself is never read.

use crate::audit::{AuditSink, StoreAuditSink};
use crate::loader::PluginLoader;
use crate::registry::PluginRegistry;
use crate::resolver::WidgetHandle;
use crate::settings::{merge_settings, normalize_settings, sanitize_settings};
use crate::{PluginError, PluginResult};
use serde::Serialize;
use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storefront_core::config::PluginConfig;
use storefront_core::domain::plugins::{
    AuditAction, AuditEntry, Installation, PluginManifest, PluginStore, Settings, parse_version,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Manager behaviour knobs
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Whether a fresh installation starts out active
    pub default_active_on_install: bool,
    /// Deadline applied to every persistence call
    pub operation_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_active_on_install: false,
            operation_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&PluginConfig> for ManagerConfig {
    fn from(config: &PluginConfig) -> Self {
        Self {
            default_active_on_install: config.default_active_on_install,
            operation_timeout: config.operation_timeout(),
        }
    }
}

/// An installation together with the manifest it was installed from
#[derive(Debug, Clone, Serialize)]
pub struct InstallationDetails {
    pub installation: Installation,
    pub plugin: PluginManifest,
}

/// A resolved widget ready to render for one installation
#[derive(Debug, Clone)]
pub struct InstalledWidget {
    pub installation: Installation,
    pub plugin_key: String,
    pub component: WidgetHandle,
    /// Whether the component came from the registry cache
    pub cached: bool,
    /// Stored settings layered over the manifest defaults
    pub settings: Settings,
}

#[derive(Clone)]
pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    store: Arc<dyn PluginStore>,
    audit: Arc<dyn AuditSink>,
    loader: PluginLoader,
    config: ManagerConfig,
}

impl PluginManager {
    /// Create a manager sharing the loader's registry.
    ///
    /// Audit entries go to the same store; see [`Self::with_audit_sink`].
    pub fn new(store: Arc<dyn PluginStore>, loader: PluginLoader, config: ManagerConfig) -> Self {
        Self {
            registry: Arc::clone(loader.registry()),
            audit: Arc::new(StoreAuditSink::new(Arc::clone(&store))),
            store,
            loader,
            config,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ========== Catalogue administration ==========

    /// Validate and persist a manifest, then register it in memory.
    ///
    /// Registering an existing key updates it in place and keeps its id.
    pub async fn register_plugin(
        &self,
        mut manifest: PluginManifest,
        user_id: Option<Uuid>,
    ) -> PluginResult<PluginManifest> {
        manifest.validate()?;
        manifest.default_settings = sanitize_settings(&manifest.default_settings);

        let stored = self.persist(self.store.upsert_plugin(&manifest)).await?;
        self.registry
            .register_plugin(&stored.plugin_key, stored.clone());

        info!(
            plugin_key = %stored.plugin_key,
            version = %stored.version,
            "Registered plugin"
        );

        self.audit(
            AuditEntry::new(AuditAction::PluginRegistered, None, user_id)
                .with_plugin_key(&stored.plugin_key)
                .with_details(serde_json::json!({ "version": stored.version })),
        )
        .await;

        Ok(stored)
    }

    /// Offer or withdraw a plugin in the marketplace.
    ///
    /// Existing installations are untouched; withdrawn plugins only stop
    /// accepting new installs.
    pub async fn set_plugin_availability(
        &self,
        plugin_key: &str,
        is_active: bool,
        user_id: Option<Uuid>,
    ) -> PluginResult<PluginManifest> {
        if !self
            .persist(self.store.set_plugin_active(plugin_key, is_active))
            .await?
        {
            return Err(plugin_not_found(plugin_key));
        }

        let manifest = self
            .persist(self.store.find_plugin_by_key(plugin_key))
            .await?
            .ok_or_else(|| plugin_not_found(plugin_key))?;
        self.registry.register_plugin(plugin_key, manifest.clone());

        info!(plugin_key = %plugin_key, is_active, "Changed plugin availability");

        self.audit(
            AuditEntry::new(AuditAction::PluginAvailabilityChanged, None, user_id)
                .with_plugin_key(plugin_key)
                .with_details(serde_json::json!({ "is_active": is_active })),
        )
        .await;

        Ok(manifest)
    }

    /// Register every persisted manifest in the registry. Returns the count.
    pub async fn hydrate_registry(&self) -> PluginResult<usize> {
        let manifests = self.persist(self.store.list_plugins(false)).await?;
        let count = manifests.len();

        for manifest in manifests {
            let plugin_key = manifest.plugin_key.clone();
            self.registry.register_plugin(&plugin_key, manifest);
        }

        info!(count, "Hydrated plugin registry");
        Ok(count)
    }

    /// Plugins currently offered for installation
    pub async fn list_marketplace(&self) -> PluginResult<Vec<PluginManifest>> {
        self.persist(self.store.list_plugins(true)).await
    }

    // ========== Installation lifecycle ==========

    /// Install an offered plugin for a business.
    ///
    /// At most one installation exists per (plugin, business); a second
    /// attempt, concurrent or not, fails with `AlreadyInstalled`.
    pub async fn install_plugin(
        &self,
        plugin_key: &str,
        business_id: Uuid,
        user_id: Uuid,
    ) -> PluginResult<Installation> {
        let manifest = self
            .persist(self.store.find_active_plugin_by_key(plugin_key))
            .await?
            .ok_or_else(|| plugin_not_found(plugin_key))?;

        let installation = Installation::new(
            &manifest,
            business_id,
            Some(user_id),
            self.config.default_active_on_install,
        );

        self.persist(self.store.insert_installation(&installation))
            .await
            .map_err(|e| match e {
                PluginError::AlreadyInstalled(_) => {
                    PluginError::AlreadyInstalled(plugin_key.to_string())
                }
                other => other,
            })?;

        if !self.registry.is_registered(plugin_key) {
            self.registry.register_plugin(plugin_key, manifest.clone());
        }

        info!(
            plugin_key = %plugin_key,
            business_id = %business_id,
            installation_id = %installation.id,
            is_active = installation.is_active,
            "Installed plugin"
        );

        self.audit(
            AuditEntry::new(AuditAction::PluginInstalled, Some(business_id), Some(user_id))
                .with_installation(installation.id)
                .with_plugin_key(plugin_key)
                .with_details(serde_json::json!({ "version": installation.installed_version })),
        )
        .await;

        Ok(installation)
    }

    /// Activate an installation. Activating an active installation is a no-op.
    pub async fn activate_plugin(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        user_id: Uuid,
    ) -> PluginResult<Installation> {
        self.set_active(installation_id, business_id, user_id, true)
            .await
    }

    /// Deactivate an installation. Deactivating an inactive one is a no-op.
    pub async fn deactivate_plugin(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        user_id: Uuid,
    ) -> PluginResult<Installation> {
        self.set_active(installation_id, business_id, user_id, false)
            .await
    }

    async fn set_active(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        user_id: Uuid,
        is_active: bool,
    ) -> PluginResult<Installation> {
        let current = self
            .scoped_installation(installation_id, business_id, Some(user_id))
            .await?;

        if current.is_active == is_active {
            debug!(
                installation_id = %installation_id,
                is_active,
                "Installation already in requested state"
            );
            return Ok(current);
        }

        let updated = self
            .persist(
                self.store
                    .set_installation_active(installation_id, business_id, is_active),
            )
            .await?
            .ok_or_else(|| installation_not_found(installation_id))?;

        let action = if is_active {
            AuditAction::PluginActivated
        } else {
            AuditAction::PluginDeactivated
        };

        info!(
            installation_id = %installation_id,
            business_id = %business_id,
            action = %action,
            "Changed installation state"
        );

        self.audit(
            AuditEntry::new(action, Some(business_id), Some(user_id))
                .with_installation(installation_id),
        )
        .await;

        Ok(updated)
    }

    /// Remove an installation and its settings. Returns the removed record.
    ///
    /// Reinstalling afterwards starts from a clean slate.
    pub async fn uninstall_plugin(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        user_id: Uuid,
    ) -> PluginResult<Installation> {
        let installation = self
            .scoped_installation(installation_id, business_id, Some(user_id))
            .await?;

        if !self
            .persist(self.store.delete_installation(installation_id, business_id))
            .await?
        {
            return Err(installation_not_found(installation_id));
        }

        info!(
            installation_id = %installation_id,
            business_id = %business_id,
            "Uninstalled plugin"
        );

        self.audit(
            AuditEntry::new(AuditAction::PluginUninstalled, Some(business_id), Some(user_id))
                .with_installation(installation_id)
                .with_details(serde_json::json!({ "plugin_id": installation.plugin_id })),
        )
        .await;

        Ok(installation)
    }

    /// Move an installation to the current manifest version
    pub async fn upgrade_installation(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        user_id: Uuid,
    ) -> PluginResult<Installation> {
        let current = self
            .scoped_installation(installation_id, business_id, Some(user_id))
            .await?;
        let manifest = self.manifest_for(&current).await?;

        let installed = parse_version(&current.installed_version)?;
        let available = parse_version(&manifest.version)?;
        match available.cmp(&installed) {
            Ordering::Equal => {
                debug!(installation_id = %installation_id, "Installation already up to date");
                return Ok(current);
            }
            Ordering::Less => {
                return Err(PluginError::InvalidManifest(format!(
                    "plugin '{}' is at {}, older than installed {}; downgrades are not supported",
                    manifest.plugin_key, manifest.version, current.installed_version
                )));
            }
            Ordering::Greater => {}
        }

        let upgraded = self
            .persist(self.store.set_installed_version(
                installation_id,
                business_id,
                &manifest.version,
            ))
            .await?
            .ok_or_else(|| installation_not_found(installation_id))?;

        info!(
            installation_id = %installation_id,
            from = %current.installed_version,
            to = %manifest.version,
            "Upgraded installation"
        );

        self.audit(
            AuditEntry::new(AuditAction::PluginUpgraded, Some(business_id), Some(user_id))
                .with_installation(installation_id)
                .with_plugin_key(&manifest.plugin_key)
                .with_details(serde_json::json!({
                    "from": current.installed_version,
                    "to": manifest.version,
                })),
        )
        .await;

        Ok(upgraded)
    }

    /// A business's installations with their manifests
    pub async fn list_installations(
        &self,
        business_id: Uuid,
    ) -> PluginResult<Vec<InstallationDetails>> {
        let installations = self
            .persist(self.store.list_installations(business_id))
            .await?;

        let mut details = Vec::with_capacity(installations.len());
        for installation in installations {
            let plugin = self.manifest_for(&installation).await?;
            details.push(InstallationDetails {
                installation,
                plugin,
            });
        }
        Ok(details)
    }

    // ========== Settings ==========

    /// Deep-merge `partial` into the stored settings and persist the result.
    ///
    /// Opaque values are stripped before storage. Returns what was stored.
    pub async fn update_settings(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        partial: &Settings,
    ) -> PluginResult<Settings> {
        self.scoped_installation(installation_id, business_id, None)
            .await?;

        let current = self
            .persist(self.store.get_settings(installation_id, business_id))
            .await?
            .unwrap_or_default();
        let merged = sanitize_settings(&merge_settings(&current, partial));

        self.persist(
            self.store
                .save_settings(installation_id, business_id, &merged),
        )
        .await?;

        debug!(
            installation_id = %installation_id,
            keys = partial.len(),
            "Updated plugin settings"
        );

        self.audit(
            AuditEntry::new(AuditAction::PluginSettingsUpdated, Some(business_id), None)
                .with_installation(installation_id)
                .with_details(serde_json::json!({
                    "keys": partial.keys().collect::<Vec<_>>(),
                })),
        )
        .await;

        Ok(merged)
    }

    /// Stored settings layered over the manifest's defaults
    pub async fn get_settings(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
    ) -> PluginResult<Settings> {
        let installation = self
            .scoped_installation(installation_id, business_id, None)
            .await?;
        let manifest = self.manifest_for(&installation).await?;
        self.effective_settings(&installation, &manifest).await
    }

    // ========== Widgets ==========

    /// Resolve the public widget of an active installation.
    ///
    /// The installation is looked up under `business_id` before the loader
    /// runs, so a missing or foreign installation never reaches it.
    pub async fn load_installation_widget(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        profile_id: Uuid,
    ) -> PluginResult<InstalledWidget> {
        let installation = self
            .scoped_installation(installation_id, business_id, None)
            .await?;

        if !installation.is_active {
            return Err(PluginError::NotFound(format!(
                "installation '{}' is not active",
                installation_id
            )));
        }

        let manifest = self.manifest_for(&installation).await?;
        let plugin_key = manifest.plugin_key.clone();
        if !self.registry.is_registered(&plugin_key) {
            self.registry.register_plugin(&plugin_key, manifest.clone());
        }

        let result = self
            .loader
            .load_public_widget(&plugin_key, business_id, profile_id, installation_id)
            .await;
        let cached = result.cached;
        let component = result.into_result().map_err(|e| match e {
            PluginError::ResolutionFailed(_) => e,
            other => PluginError::ResolutionFailed(other.to_string()),
        })?;

        let settings = self.effective_settings(&installation, &manifest).await?;

        Ok(InstalledWidget {
            installation,
            plugin_key,
            component,
            cached,
            settings,
        })
    }

    // ========== Helpers ==========

    /// Await a store call under the operation deadline
    async fn persist<T>(
        &self,
        operation: impl Future<Output = storefront_core::Result<T>>,
    ) -> PluginResult<T> {
        match tokio::time::timeout(self.config.operation_timeout, operation).await {
            Ok(result) => result.map_err(PluginError::from),
            Err(_) => Err(PluginError::PersistenceFailed(format!(
                "timed out after {:?}",
                self.config.operation_timeout
            ))),
        }
    }

    /// Record an audit entry, logging rather than propagating failures
    async fn audit(&self, entry: AuditEntry) {
        match tokio::time::timeout(self.config.operation_timeout, self.audit.record(&entry)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(action = %entry.action, error = %e, "Failed to record audit entry");
            }
            Err(_) => {
                warn!(action = %entry.action, "Timed out recording audit entry");
            }
        }
    }

    /// Find an installation owned by `business_id`, telling a foreign id
    /// apart from a missing one
    async fn scoped_installation(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        user_id: Option<Uuid>,
    ) -> PluginResult<Installation> {
        if let Some(installation) = self
            .persist(self.store.find_installation(installation_id, business_id))
            .await?
        {
            return Ok(installation);
        }

        if !self
            .persist(self.store.installation_exists(installation_id))
            .await?
        {
            return Err(installation_not_found(installation_id));
        }

        warn!(
            installation_id = %installation_id,
            business_id = %business_id,
            "Cross-tenant installation access denied"
        );

        self.audit(
            AuditEntry::new(
                AuditAction::CrossTenantAccessDenied,
                Some(business_id),
                user_id,
            )
            .with_installation(installation_id),
        )
        .await;

        Err(PluginError::Forbidden(installation_id.to_string()))
    }

    async fn manifest_for(&self, installation: &Installation) -> PluginResult<PluginManifest> {
        self.persist(self.store.find_plugin_by_id(installation.plugin_id))
            .await?
            .ok_or_else(|| PluginError::NotFound(format!("plugin '{}'", installation.plugin_id)))
    }

    async fn effective_settings(
        &self,
        installation: &Installation,
        manifest: &PluginManifest,
    ) -> PluginResult<Settings> {
        let stored = self
            .persist(
                self.store
                    .get_settings(installation.id, installation.business_id),
            )
            .await?
            .unwrap_or_default();
        Ok(normalize_settings(&manifest.default_settings, &stored))
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("registry", &self.registry)
            .field("loader", &self.loader)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn plugin_not_found(plugin_key: &str) -> PluginError {
    PluginError::NotFound(format!("plugin '{}'", plugin_key))
}

fn installation_not_found(installation_id: Uuid) -> PluginError {
    PluginError::NotFound(format!("installation '{}'", installation_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::resolver::StaticResolver;
    use storefront_core::domain::plugins::{PluginType, SettingValue, SqlitePluginStore};
    use storefront_core::storage::Database;

    async fn create_manager(config: ManagerConfig) -> (PluginManager, Arc<dyn PluginStore>) {
        let db = Database::in_memory().await.expect("database");
        let store: Arc<dyn PluginStore> = Arc::new(SqlitePluginStore::new(db.pool().clone()));
        let resolver = StaticResolver::new().with_widget("loyalty-points", "LoyaltyPointsWidget");
        let loader = PluginLoader::new(Arc::new(PluginRegistry::new()), Arc::new(resolver));
        (PluginManager::new(store.clone(), loader, config), store)
    }

    fn loyalty() -> PluginManifest {
        let mut defaults = Settings::new();
        defaults.insert("threshold".into(), SettingValue::from(50));
        PluginManifest::new("loyalty-points", "Loyalty Points", "1.0.0", PluginType::Widget)
            .with_public_widget("loyalty-points/widget.js")
            .with_default_settings(defaults)
    }

    #[tokio::test]
    async fn test_register_validates_manifest() {
        let (manager, _) = create_manager(ManagerConfig::default()).await;

        let mut bad = loyalty();
        bad.plugin_key = "Not Valid".to_string();
        let err = manager.register_plugin(bad, None).await.expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(manager.registry().is_empty());

        let stored = manager.register_plugin(loyalty(), None).await.unwrap();
        assert!(manager.registry().is_registered(&stored.plugin_key));
    }

    #[tokio::test]
    async fn test_install_unknown_or_withdrawn_plugin() {
        let (manager, _) = create_manager(ManagerConfig::default()).await;
        let business = Uuid::new_v4();
        let user = Uuid::new_v4();

        let err = manager
            .install_plugin("loyalty-points", business, user)
            .await
            .expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        manager.register_plugin(loyalty(), None).await.unwrap();
        manager
            .set_plugin_availability("loyalty-points", false, None)
            .await
            .unwrap();

        let err = manager
            .install_plugin("loyalty-points", business, user)
            .await
            .expect_err("withdrawn");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(manager.list_marketplace().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_honours_default_active() {
        let (manager, _) = create_manager(ManagerConfig {
            default_active_on_install: true,
            ..Default::default()
        })
        .await;
        manager.register_plugin(loyalty(), None).await.unwrap();

        let installation = manager
            .install_plugin("loyalty-points", Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        assert!(installation.is_active);
        assert_eq!(installation.installed_version, "1.0.0");
    }

    #[tokio::test]
    async fn test_duplicate_install() {
        let (manager, _) = create_manager(ManagerConfig::default()).await;
        manager.register_plugin(loyalty(), None).await.unwrap();
        let business = Uuid::new_v4();
        let user = Uuid::new_v4();

        manager
            .install_plugin("loyalty-points", business, user)
            .await
            .unwrap();
        let err = manager
            .install_plugin("loyalty-points", business, user)
            .await
            .expect_err("duplicate");
        assert_eq!(err, PluginError::AlreadyInstalled("loyalty-points".to_string()));
    }

    #[tokio::test]
    async fn test_activation_is_idempotent() {
        let (manager, _) = create_manager(ManagerConfig::default()).await;
        manager.register_plugin(loyalty(), None).await.unwrap();
        let business = Uuid::new_v4();
        let user = Uuid::new_v4();
        let installation = manager
            .install_plugin("loyalty-points", business, user)
            .await
            .unwrap();

        let first = manager
            .activate_plugin(installation.id, business, user)
            .await
            .unwrap();
        let second = manager
            .activate_plugin(installation.id, business, user)
            .await
            .unwrap();
        assert!(first.is_active);
        assert!(second.is_active);
        assert_eq!(first.updated_at, second.updated_at);

        let off = manager
            .deactivate_plugin(installation.id, business, user)
            .await
            .unwrap();
        assert!(!off.is_active);
    }

    #[tokio::test]
    async fn test_foreign_installation_is_forbidden_and_audited() {
        let (manager, store) = create_manager(ManagerConfig::default()).await;
        manager.register_plugin(loyalty(), None).await.unwrap();
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let installation = manager
            .install_plugin("loyalty-points", owner, Uuid::new_v4())
            .await
            .unwrap();

        let err = manager
            .activate_plugin(installation.id, intruder, Uuid::new_v4())
            .await
            .expect_err("foreign");
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let denied = store.list_audit(Some(intruder), 10).await.unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].action, AuditAction::CrossTenantAccessDenied);

        let err = manager
            .activate_plugin(Uuid::new_v4(), intruder, Uuid::new_v4())
            .await
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_settings_merge_and_defaults() {
        let (manager, _) = create_manager(ManagerConfig::default()).await;
        manager.register_plugin(loyalty(), None).await.unwrap();
        let business = Uuid::new_v4();
        let installation = manager
            .install_plugin("loyalty-points", business, Uuid::new_v4())
            .await
            .unwrap();

        let defaults = manager.get_settings(installation.id, business).await.unwrap();
        assert_eq!(defaults.get("threshold"), Some(&SettingValue::from(50)));

        let mut partial = Settings::new();
        partial.insert("label".into(), SettingValue::from("Gold"));
        let stored = manager
            .update_settings(installation.id, business, &partial)
            .await
            .unwrap();
        assert_eq!(stored, partial);

        let effective = manager.get_settings(installation.id, business).await.unwrap();
        assert_eq!(effective.get("threshold"), Some(&SettingValue::from(50)));
        assert_eq!(effective.get("label"), Some(&SettingValue::from("Gold")));
    }

    #[tokio::test]
    async fn test_upgrade_installation() {
        let (manager, _) = create_manager(ManagerConfig::default()).await;
        manager.register_plugin(loyalty(), None).await.unwrap();
        let business = Uuid::new_v4();
        let user = Uuid::new_v4();
        let installation = manager
            .install_plugin("loyalty-points", business, user)
            .await
            .unwrap();

        let mut next = loyalty();
        next.version = "1.1.0".to_string();
        manager.register_plugin(next, None).await.unwrap();

        let upgraded = manager
            .upgrade_installation(installation.id, business, user)
            .await
            .unwrap();
        assert_eq!(upgraded.installed_version, "1.1.0");

        let listed = manager.list_installations(business).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].plugin.version, "1.1.0");
    }

    #[tokio::test]
    async fn test_upgrade_rejects_older_manifest() {
        let (manager, store) = create_manager(ManagerConfig::default()).await;
        let mut current = loyalty();
        current.version = "1.10.0".to_string();
        manager.register_plugin(current, None).await.unwrap();
        let business = Uuid::new_v4();
        let user = Uuid::new_v4();
        let installation = manager
            .install_plugin("loyalty-points", business, user)
            .await
            .unwrap();

        // "1.9.0" sorts after "1.10.0" as a string but is older
        let mut older = loyalty();
        older.version = "1.9.0".to_string();
        manager.register_plugin(older, None).await.unwrap();

        let err = manager
            .upgrade_installation(installation.id, business, user)
            .await
            .expect_err("downgrade");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("downgrades are not supported"));

        let stored = store
            .find_installation(installation.id, business)
            .await
            .unwrap()
            .expect("installation");
        assert_eq!(stored.installed_version, "1.10.0");
    }

    #[tokio::test]
    async fn test_upgrade_to_same_version_is_noop() {
        let (manager, _) = create_manager(ManagerConfig::default()).await;
        manager.register_plugin(loyalty(), None).await.unwrap();
        let business = Uuid::new_v4();
        let user = Uuid::new_v4();
        let installation = manager
            .install_plugin("loyalty-points", business, user)
            .await
            .unwrap();

        let same = manager
            .upgrade_installation(installation.id, business, user)
            .await
            .unwrap();
        assert_eq!(same.id, installation.id);
        assert_eq!(same.installed_version, "1.0.0");
    }

    #[tokio::test]
    async fn test_inactive_installation_widget_not_found() {
        let (manager, _) = create_manager(ManagerConfig::default()).await;
        manager.register_plugin(loyalty(), None).await.unwrap();
        let business = Uuid::new_v4();
        let installation = manager
            .install_plugin("loyalty-points", business, Uuid::new_v4())
            .await
            .unwrap();

        let err = manager
            .load_installation_widget(installation.id, business, Uuid::new_v4())
            .await
            .expect_err("inactive");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!manager.registry().is_component_cached("loyalty-points"));
    }

    #[tokio::test]
    async fn test_hydrate_registry() {
        let (manager, store) = create_manager(ManagerConfig::default()).await;
        store.upsert_plugin(&loyalty()).await.unwrap();
        assert!(manager.registry().is_empty());

        assert_eq!(manager.hydrate_registry().await.unwrap(), 1);
        assert!(manager.registry().is_registered("loyalty-points"));
    }
}
