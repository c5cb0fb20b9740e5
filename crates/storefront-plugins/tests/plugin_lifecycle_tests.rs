//! End-to-end tests for the plugin registry, loader and manager working
//! against a real SQLite store.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use storefront_core::domain::plugins::{
    AuditAction, AuditEntry, Installation, PluginManifest, PluginStore, PluginType, SettingValue,
    Settings, SqlitePluginStore,
};
use storefront_core::storage::{Database, DatabaseConfig};
use storefront_plugins::{
    AuditSink, BundleResolver, ErrorKind, ImplementationResolver, LifecycleOutcome, LoadContext,
    ManagerConfig, PluginError, PluginLoader, PluginManager, PluginRegistry, ResolveError,
    SettingsOutcome, StaticWidget, WidgetHandle, merge_settings, settings_from_json,
};
use tempfile::TempDir;
use uuid::Uuid;

/// Resolver that counts how often it is asked to resolve
#[derive(Default)]
struct CountingResolver {
    calls: AtomicUsize,
}

impl CountingResolver {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImplementationResolver for CountingResolver {
    async fn resolve(
        &self,
        manifest: &PluginManifest,
        _ctx: &LoadContext,
    ) -> Result<WidgetHandle, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StaticWidget {
            plugin_key: manifest.plugin_key.clone(),
            entry_point: format!("{}/widget.js", manifest.plugin_key),
        }))
    }
}

/// Audit sink that always fails
struct BrokenAuditSink;

#[async_trait]
impl AuditSink for BrokenAuditSink {
    async fn record(&self, _entry: &AuditEntry) -> storefront_core::Result<()> {
        Err(storefront_core::Error::Other("audit log offline".to_string()))
    }
}

/// Store whose installation and settings writes hang while `stalled` is set
struct StallingStore {
    inner: Arc<dyn PluginStore>,
    stalled: AtomicBool,
}

impl StallingStore {
    fn new(inner: Arc<dyn PluginStore>) -> Self {
        Self {
            inner,
            stalled: AtomicBool::new(false),
        }
    }

    fn stall(&self, on: bool) {
        self.stalled.store(on, Ordering::SeqCst);
    }

    async fn maybe_stall(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }
}

#[async_trait]
impl PluginStore for StallingStore {
    async fn upsert_plugin(
        &self,
        manifest: &PluginManifest,
    ) -> storefront_core::Result<PluginManifest> {
        self.inner.upsert_plugin(manifest).await
    }

    async fn find_plugin_by_key(
        &self,
        plugin_key: &str,
    ) -> storefront_core::Result<Option<PluginManifest>> {
        self.inner.find_plugin_by_key(plugin_key).await
    }

    async fn find_active_plugin_by_key(
        &self,
        plugin_key: &str,
    ) -> storefront_core::Result<Option<PluginManifest>> {
        self.inner.find_active_plugin_by_key(plugin_key).await
    }

    async fn find_plugin_by_id(
        &self,
        plugin_id: Uuid,
    ) -> storefront_core::Result<Option<PluginManifest>> {
        self.inner.find_plugin_by_id(plugin_id).await
    }

    async fn list_plugins(
        &self,
        active_only: bool,
    ) -> storefront_core::Result<Vec<PluginManifest>> {
        self.inner.list_plugins(active_only).await
    }

    async fn set_plugin_active(
        &self,
        plugin_key: &str,
        is_active: bool,
    ) -> storefront_core::Result<bool> {
        self.inner.set_plugin_active(plugin_key, is_active).await
    }

    async fn insert_installation(&self, installation: &Installation) -> storefront_core::Result<()> {
        self.maybe_stall().await;
        self.inner.insert_installation(installation).await
    }

    async fn find_installation(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
    ) -> storefront_core::Result<Option<Installation>> {
        self.inner.find_installation(installation_id, business_id).await
    }

    async fn installation_exists(&self, installation_id: Uuid) -> storefront_core::Result<bool> {
        self.inner.installation_exists(installation_id).await
    }

    async fn list_installations(
        &self,
        business_id: Uuid,
    ) -> storefront_core::Result<Vec<Installation>> {
        self.inner.list_installations(business_id).await
    }

    async fn set_installation_active(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        is_active: bool,
    ) -> storefront_core::Result<Option<Installation>> {
        self.inner
            .set_installation_active(installation_id, business_id, is_active)
            .await
    }

    async fn set_installed_version(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        version: &str,
    ) -> storefront_core::Result<Option<Installation>> {
        self.inner
            .set_installed_version(installation_id, business_id, version)
            .await
    }

    async fn delete_installation(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
    ) -> storefront_core::Result<bool> {
        self.inner.delete_installation(installation_id, business_id).await
    }

    async fn get_settings(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
    ) -> storefront_core::Result<Option<Settings>> {
        self.inner.get_settings(installation_id, business_id).await
    }

    async fn save_settings(
        &self,
        installation_id: Uuid,
        business_id: Uuid,
        settings: &Settings,
    ) -> storefront_core::Result<()> {
        self.maybe_stall().await;
        self.inner
            .save_settings(installation_id, business_id, settings)
            .await
    }

    async fn record_audit(&self, entry: &AuditEntry) -> storefront_core::Result<()> {
        self.inner.record_audit(entry).await
    }

    async fn list_audit(
        &self,
        business_id: Option<Uuid>,
        limit: i64,
    ) -> storefront_core::Result<Vec<AuditEntry>> {
        self.inner.list_audit(business_id, limit).await
    }
}

struct Harness {
    manager: PluginManager,
    store: Arc<dyn PluginStore>,
    resolver: Arc<CountingResolver>,
}

async fn harness_with(db: Database) -> Harness {
    let store: Arc<dyn PluginStore> = Arc::new(SqlitePluginStore::new(db.pool().clone()));
    let resolver = Arc::new(CountingResolver::default());
    let loader = PluginLoader::new(Arc::new(PluginRegistry::new()), resolver.clone());
    let manager = PluginManager::new(store.clone(), loader, ManagerConfig::default());

    Harness {
        manager,
        store,
        resolver,
    }
}

/// Manager over a [`StallingStore`] with a short operation deadline
async fn stalling_harness() -> (PluginManager, Arc<StallingStore>, Arc<dyn PluginStore>) {
    let db = Database::in_memory().await.expect("database");
    let store: Arc<dyn PluginStore> = Arc::new(SqlitePluginStore::new(db.pool().clone()));
    let stalling = Arc::new(StallingStore::new(store.clone()));
    let loader = PluginLoader::new(
        Arc::new(PluginRegistry::new()),
        Arc::new(CountingResolver::default()),
    );
    let manager = PluginManager::new(
        stalling.clone(),
        loader,
        ManagerConfig {
            operation_timeout: Duration::from_millis(500),
            ..Default::default()
        },
    );
    (manager, stalling, store)
}

async fn harness() -> Harness {
    harness_with(Database::in_memory().await.expect("database")).await
}

fn loyalty_points() -> PluginManifest {
    PluginManifest::new("loyalty-points", "Loyalty Points", "1.0.0", PluginType::Widget)
        .with_public_widget("loyalty-points/widget.js")
}

fn settings(value: serde_json::Value) -> Settings {
    settings_from_json(value).expect("settings object")
}

#[test]
fn test_registry_round_trip() {
    let registry = PluginRegistry::new();
    for key in ["loyalty-points", "reviews", "gift_cards-2"] {
        let manifest = PluginManifest::new(key, key, "0.1.0", PluginType::Mixed);
        registry.register_plugin(key, manifest.clone());

        assert!(registry.is_registered(key));
        assert_eq!(registry.get_plugin(key).unwrap().manifest, manifest);
    }
}

#[test]
fn test_caching_unregistered_key_is_precondition_violation() {
    let registry = PluginRegistry::new();
    let widget: WidgetHandle = Arc::new(StaticWidget {
        plugin_key: "ghost".to_string(),
        entry_point: "Ghost".to_string(),
    });

    let err = registry
        .cache_component("ghost", widget)
        .expect_err("must be rejected");
    assert_eq!(err.kind(), ErrorKind::PreconditionViolated);
    assert!(!registry.is_component_cached("ghost"));
}

#[test]
fn test_merge_laws() {
    let existing = settings(json!({"a": {"x": 1}, "b": "keep"}));
    assert_eq!(merge_settings(&existing, &Settings::new()), existing);

    let merged = merge_settings(
        &settings(json!({"a": {"x": 1}})),
        &settings(json!({"a": {"y": 2}})),
    );
    assert_eq!(merged, settings(json!({"a": {"x": 1, "y": 2}})));
}

#[tokio::test]
async fn test_activate_twice() {
    let h = harness().await;
    h.manager.register_plugin(loyalty_points(), None).await.unwrap();
    let business = Uuid::new_v4();
    let user = Uuid::new_v4();
    let installation = h
        .manager
        .install_plugin("loyalty-points", business, user)
        .await
        .unwrap();

    for _ in 0..2 {
        let activated = h
            .manager
            .activate_plugin(installation.id, business, user)
            .await
            .expect("activation is idempotent");
        assert!(activated.is_active);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_installs_conflict() {
    let dir = TempDir::new().unwrap();
    let db = Database::new(DatabaseConfig::with_path(dir.path().join("store.db")))
        .await
        .expect("file database");
    let h = harness_with(db).await;
    h.manager.register_plugin(loyalty_points(), None).await.unwrap();

    let business = Uuid::new_v4();
    let (a, b) = (h.manager.clone(), h.manager.clone());
    let (first, second) = tokio::join!(
        tokio::spawn(async move { a.install_plugin("loyalty-points", business, Uuid::new_v4()).await }),
        tokio::spawn(async move { b.install_plugin("loyalty-points", business, Uuid::new_v4()).await }),
    );
    let results = [first.unwrap(), second.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(PluginError::AlreadyInstalled(_))))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(h.store.list_installations(business).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_tenant_isolation() {
    let h = harness().await;
    h.manager.register_plugin(loyalty_points(), None).await.unwrap();
    let owner = Uuid::new_v4();
    let other = Uuid::new_v4();
    let installation = h
        .manager
        .install_plugin("loyalty-points", owner, Uuid::new_v4())
        .await
        .unwrap();

    let outcome = LifecycleOutcome::from(
        h.manager
            .activate_plugin(installation.id, other, Uuid::new_v4())
            .await,
    );
    assert!(!outcome.ok);
    assert!(matches!(
        outcome.error_kind,
        Some(ErrorKind::NotFound | ErrorKind::Forbidden)
    ));

    let outcome = SettingsOutcome::from(
        h.manager
            .update_settings(installation.id, other, &settings(json!({"x": 1})))
            .await,
    );
    assert!(!outcome.ok);
    assert!(h.store.get_settings(installation.id, owner).await.unwrap().is_none());

    // Still untouched for the owner
    let owned = h.store.find_installation(installation.id, owner).await.unwrap().unwrap();
    assert!(!owned.is_active);
    assert!(h.manager.list_installations(other).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cache_correctness() {
    let h = harness().await;
    h.manager.register_plugin(loyalty_points(), None).await.unwrap();
    let loader = h.manager.loader();

    let load = || async move {
        loader
            .load_public_widget("loyalty-points", Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
            .await
    };

    assert!(!load().await.cached);
    for _ in 0..3 {
        let result = load().await;
        assert!(result.success);
        assert!(result.cached);
    }

    h.manager.registry().clear_cache(None);
    assert!(!load().await.cached);
    assert!(load().await.cached);
    assert_eq!(h.resolver.calls(), 2);
}

#[tokio::test]
async fn test_audit_failures_are_swallowed() {
    let h = harness().await;
    let manager = h.manager.with_audit_sink(Arc::new(BrokenAuditSink));

    manager.register_plugin(loyalty_points(), None).await.unwrap();
    let business = Uuid::new_v4();
    let user = Uuid::new_v4();
    let installation = manager
        .install_plugin("loyalty-points", business, user)
        .await
        .expect("install succeeds despite audit failure");
    manager
        .uninstall_plugin(installation.id, business, user)
        .await
        .expect("uninstall succeeds despite audit failure");
}

#[tokio::test]
async fn test_lifecycle_is_audited() {
    let h = harness().await;
    h.manager.register_plugin(loyalty_points(), None).await.unwrap();
    let business = Uuid::new_v4();
    let user = Uuid::new_v4();
    let installation = h
        .manager
        .install_plugin("loyalty-points", business, user)
        .await
        .unwrap();
    h.manager
        .activate_plugin(installation.id, business, user)
        .await
        .unwrap();
    h.manager
        .uninstall_plugin(installation.id, business, user)
        .await
        .unwrap();

    let mut actions: Vec<AuditAction> = h
        .store
        .list_audit(Some(business), 10)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    actions.reverse();
    assert_eq!(
        actions,
        vec![
            AuditAction::PluginInstalled,
            AuditAction::PluginActivated,
            AuditAction::PluginUninstalled,
        ]
    );
}

#[tokio::test]
async fn test_reinstall_starts_clean() {
    let h = harness().await;
    h.manager.register_plugin(loyalty_points(), None).await.unwrap();
    let business = Uuid::new_v4();
    let user = Uuid::new_v4();

    let first = h
        .manager
        .install_plugin("loyalty-points", business, user)
        .await
        .unwrap();
    h.manager
        .update_settings(first.id, business, &settings(json!({"threshold": 100})))
        .await
        .unwrap();
    h.manager.uninstall_plugin(first.id, business, user).await.unwrap();

    let second = h
        .manager
        .install_plugin("loyalty-points", business, user)
        .await
        .unwrap();
    assert_ne!(second.id, first.id);
    assert!(!second.is_active);
    assert!(h.manager.get_settings(second.id, business).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bundle_widget_through_manager() {
    let widgets = TempDir::new().unwrap();
    std::fs::create_dir_all(widgets.path().join("loyalty-points")).unwrap();
    std::fs::write(
        widgets.path().join("loyalty-points/widget.js"),
        "export default () => null;",
    )
    .unwrap();

    let db = Database::in_memory().await.unwrap();
    let store: Arc<dyn PluginStore> = Arc::new(SqlitePluginStore::new(db.pool().clone()));
    let loader = PluginLoader::new(
        Arc::new(PluginRegistry::new()),
        Arc::new(BundleResolver::new(widgets.path(), 4096)),
    );
    let manager = PluginManager::new(
        store,
        loader,
        ManagerConfig {
            default_active_on_install: true,
            ..Default::default()
        },
    );

    manager.register_plugin(loyalty_points(), None).await.unwrap();
    let business = Uuid::new_v4();
    let installation = manager
        .install_plugin("loyalty-points", business, Uuid::new_v4())
        .await
        .unwrap();

    let widget = manager
        .load_installation_widget(installation.id, business, Uuid::new_v4())
        .await
        .expect("widget resolves");
    assert_eq!(widget.plugin_key, "loyalty-points");
    assert_eq!(widget.component.entry_point(), "loyalty-points/widget.js");
    assert_eq!(widget.component.digest().map(str::len), Some(64));
    assert!(!widget.cached);
}

#[tokio::test]
async fn test_missing_bundle_is_resolution_failure() {
    let widgets = TempDir::new().unwrap();
    let db = Database::in_memory().await.unwrap();
    let store: Arc<dyn PluginStore> = Arc::new(SqlitePluginStore::new(db.pool().clone()));
    let loader = PluginLoader::new(
        Arc::new(PluginRegistry::new()),
        Arc::new(BundleResolver::new(widgets.path(), 4096)),
    );
    let manager = PluginManager::new(
        store,
        loader,
        ManagerConfig {
            default_active_on_install: true,
            ..Default::default()
        },
    );

    manager.register_plugin(loyalty_points(), None).await.unwrap();
    let business = Uuid::new_v4();
    let installation = manager
        .install_plugin("loyalty-points", business, Uuid::new_v4())
        .await
        .unwrap();

    let err = manager
        .load_installation_widget(installation.id, business, Uuid::new_v4())
        .await
        .expect_err("bundle missing");
    assert_eq!(err.kind(), ErrorKind::ResolutionFailed);

    let entry = manager.registry().get_plugin("loyalty-points").unwrap();
    assert!(entry.error.is_some());
    assert_eq!(manager.registry().stats().errored, 1);
}

#[tokio::test]
async fn test_loyalty_points_end_to_end() {
    let h = harness().await;
    let business = Uuid::new_v4();
    let user = Uuid::new_v4();
    let profile = Uuid::new_v4();

    h.manager.register_plugin(loyalty_points(), None).await.unwrap();

    let installation = h
        .manager
        .install_plugin("loyalty-points", business, user)
        .await
        .unwrap();
    assert!(!installation.is_active);

    let activated = h
        .manager
        .activate_plugin(installation.id, business, user)
        .await
        .unwrap();
    assert!(activated.is_active);

    let stored = h
        .manager
        .update_settings(installation.id, business, &settings(json!({"threshold": 100})))
        .await
        .unwrap();
    assert_eq!(stored, settings(json!({"threshold": 100})));

    let stored = h
        .manager
        .update_settings(installation.id, business, &settings(json!({"bonus": 5})))
        .await
        .unwrap();
    assert_eq!(stored, settings(json!({"threshold": 100, "bonus": 5})));
    assert_eq!(stored.get("bonus"), Some(&SettingValue::from(5)));

    let widget = h
        .manager
        .load_installation_widget(installation.id, business, profile)
        .await
        .unwrap();
    assert_eq!(widget.settings, stored);
    assert_eq!(h.resolver.calls(), 1);

    h.manager
        .uninstall_plugin(installation.id, business, user)
        .await
        .unwrap();

    // The cached component would satisfy the loader, so the manager must
    // fail the lookup before ever reaching it.
    h.manager.registry().clear_cache(None);
    let err = h
        .manager
        .load_installation_widget(installation.id, business, profile)
        .await
        .expect_err("installation removed");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.resolver.calls(), 1);
    assert!(!h.manager.registry().is_component_cached("loyalty-points"));
    assert!(h.store.get_settings(installation.id, business).await.unwrap().is_none());
}

#[tokio::test]
async fn test_install_past_deadline_leaves_nothing_behind() {
    let (manager, stalling, store) = stalling_harness().await;
    manager.register_plugin(loyalty_points(), None).await.unwrap();
    let business = Uuid::new_v4();
    let user = Uuid::new_v4();

    stalling.stall(true);
    let err = manager
        .install_plugin("loyalty-points", business, user)
        .await
        .expect_err("deadline");
    assert_eq!(err.kind(), ErrorKind::PersistenceFailed);
    assert!(err.is_retryable());
    assert!(err.to_string().contains("timed out"));
    assert!(store.list_installations(business).await.unwrap().is_empty());

    // Retrying once the store recovers succeeds
    stalling.stall(false);
    let installation = manager
        .install_plugin("loyalty-points", business, user)
        .await
        .unwrap();
    let stored = store.list_installations(business).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, installation.id);
}

#[tokio::test]
async fn test_settings_update_past_deadline_keeps_previous_settings() {
    let (manager, stalling, store) = stalling_harness().await;
    manager.register_plugin(loyalty_points(), None).await.unwrap();
    let business = Uuid::new_v4();
    let installation = manager
        .install_plugin("loyalty-points", business, Uuid::new_v4())
        .await
        .unwrap();
    manager
        .update_settings(installation.id, business, &settings(json!({"tier": "gold"})))
        .await
        .unwrap();

    stalling.stall(true);
    let err = manager
        .update_settings(installation.id, business, &settings(json!({"bonus": 5})))
        .await
        .expect_err("deadline");
    assert_eq!(err.kind(), ErrorKind::PersistenceFailed);
    assert!(err.is_retryable());

    let stored = store
        .get_settings(installation.id, business)
        .await
        .unwrap()
        .expect("earlier settings");
    assert_eq!(stored, settings(json!({"tier": "gold"})));

    stalling.stall(false);
    let effective = manager.get_settings(installation.id, business).await.unwrap();
    assert!(!effective.contains_key("bonus"));
}

#[tokio::test]
async fn test_register_with_foreign_id_is_invalid_manifest() {
    let h = harness().await;
    let loyalty = h.manager.register_plugin(loyalty_points(), None).await.unwrap();

    let mut reviews = PluginManifest::new("reviews", "Reviews", "1.0.0", PluginType::Mixed);
    reviews.id = loyalty.id;

    let err = h
        .manager
        .register_plugin(reviews, None)
        .await
        .expect_err("id clash");
    assert!(matches!(err, PluginError::InvalidManifest(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(!h.manager.registry().is_registered("reviews"));
}
