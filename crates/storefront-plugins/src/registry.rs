//! In-memory plugin registry
//!
//! Tracks every known plugin manifest together with its resolved public
//! widget, keyed by plugin key. The registry is constructed explicitly and
//! shared as `Arc<PluginRegistry>`; it has no knowledge of tenants.

use crate::resolver::WidgetHandle;
use crate::{PluginError, PluginResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use storefront_core::domain::plugins::PluginManifest;

/// Runtime state of one registered plugin
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub manifest: PluginManifest,
    /// True only while `component` holds a resolved widget
    pub loaded: bool,
    pub component: Option<WidgetHandle>,
    pub last_loaded: Option<DateTime<Utc>>,
    /// Last load failure, cleared by a successful load
    pub error: Option<String>,
}

impl RegistryEntry {
    fn new(manifest: PluginManifest) -> Self {
        Self {
            manifest,
            loaded: false,
            component: None,
            last_loaded: None,
            error: None,
        }
    }

    fn evict(&mut self) {
        self.loaded = false;
        self.component = None;
    }
}

/// Counts over the registry contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub registered: usize,
    pub loaded: usize,
    pub errored: usize,
}

#[derive(Debug, Default)]
pub struct PluginRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic elsewhere never leaves an entry half-written, so a poisoned
    // lock still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register or replace a plugin.
    ///
    /// Replacing resets the entry: any cached widget and recorded error are
    /// dropped.
    pub fn register_plugin(&self, plugin_key: &str, manifest: PluginManifest) {
        let replaced = self
            .write()
            .insert(plugin_key.to_string(), RegistryEntry::new(manifest))
            .is_some();

        tracing::debug!(plugin_key = %plugin_key, replaced, "Registered plugin");
    }

    pub fn get_plugin(&self, plugin_key: &str) -> Option<RegistryEntry> {
        self.read().get(plugin_key).cloned()
    }

    pub fn is_registered(&self, plugin_key: &str) -> bool {
        self.read().contains_key(plugin_key)
    }

    /// Store a resolved widget for a registered plugin
    pub fn cache_component(&self, plugin_key: &str, component: WidgetHandle) -> PluginResult<()> {
        let mut entries = self.write();
        let entry = entries
            .get_mut(plugin_key)
            .ok_or_else(|| PluginError::NotRegistered(plugin_key.to_string()))?;

        entry.component = Some(component);
        entry.loaded = true;
        entry.last_loaded = Some(Utc::now());
        entry.error = None;
        Ok(())
    }

    pub fn get_cached_component(&self, plugin_key: &str) -> Option<WidgetHandle> {
        self.read()
            .get(plugin_key)
            .and_then(|entry| entry.component.clone())
    }

    pub fn is_component_cached(&self, plugin_key: &str) -> bool {
        self.read()
            .get(plugin_key)
            .is_some_and(|entry| entry.loaded && entry.component.is_some())
    }

    /// Record a load failure and evict any cached widget. The manifest stays.
    pub fn mark_error(&self, plugin_key: &str, error: impl Into<String>) -> PluginResult<()> {
        let mut entries = self.write();
        let entry = entries
            .get_mut(plugin_key)
            .ok_or_else(|| PluginError::NotRegistered(plugin_key.to_string()))?;

        entry.evict();
        entry.error = Some(error.into());
        Ok(())
    }

    /// Evict the cached widget of one plugin, or of every plugin when `None`
    pub fn clear_cache(&self, plugin_key: Option<&str>) {
        let mut entries = self.write();
        match plugin_key {
            Some(key) => {
                if let Some(entry) = entries.get_mut(key) {
                    entry.evict();
                    entry.error = None;
                }
            }
            None => {
                for entry in entries.values_mut() {
                    entry.evict();
                    entry.error = None;
                }
            }
        }
    }

    /// Snapshot of every entry, ordered by plugin key
    pub fn get_all_plugins(&self) -> Vec<RegistryEntry> {
        let mut all: Vec<RegistryEntry> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.manifest.plugin_key.cmp(&b.manifest.plugin_key));
        all
    }

    /// Remove a plugin. Returns whether an entry existed.
    pub fn unregister_plugin(&self, plugin_key: &str) -> bool {
        self.write().remove(plugin_key).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let entries = self.read();
        RegistryStats {
            registered: entries.len(),
            loaded: entries.values().filter(|e| e.loaded).count(),
            errored: entries.values().filter(|e| e.error.is_some()).count(),
        }
    }
}
