//! Widget implementation resolvers
//!
//! A resolver turns a manifest into a live widget handle. Two resolvers are
//! provided: [`StaticResolver`] for implementations compiled into the host,
//! and [`BundleResolver`] for script bundles shipped under a widget root.

use crate::loader::LoadContext;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storefront_core::config::PluginConfig;
use storefront_core::domain::plugins::PluginManifest;
use thiserror::Error;

/// A resolved public widget implementation
pub trait WidgetComponent: Send + Sync + fmt::Debug {
    /// Key of the plugin this widget belongs to
    fn plugin_key(&self) -> &str;

    /// Entry point the storefront renders (module path or component name)
    fn entry_point(&self) -> &str;

    /// Content digest, for implementations backed by a file
    fn digest(&self) -> Option<&str> {
        None
    }
}

/// Shared handle to a resolved widget
pub type WidgetHandle = Arc<dyn WidgetComponent>;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no implementation registered for plugin '{0}'")]
    NoImplementation(String),

    #[error("plugin '{0}' does not declare a public widget")]
    NoPublicWidget(String),

    #[error("invalid widget path: {0}")]
    InvalidPath(String),

    #[error("widget bundle too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("widget IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// Resolves the public widget of a plugin
#[async_trait]
pub trait ImplementationResolver: Send + Sync {
    async fn resolve(
        &self,
        manifest: &PluginManifest,
        ctx: &LoadContext,
    ) -> Result<WidgetHandle, ResolveError>;
}

// ========== Static ==========

/// Widget compiled into the host application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticWidget {
    pub plugin_key: String,
    pub entry_point: String,
}

impl WidgetComponent for StaticWidget {
    fn plugin_key(&self) -> &str {
        &self.plugin_key
    }

    fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

type WidgetFactory =
    Arc<dyn Fn(&PluginManifest, &LoadContext) -> Result<WidgetHandle, ResolveError> + Send + Sync>;

/// Resolver backed by constructors registered per plugin key
#[derive(Clone, Default)]
pub struct StaticResolver {
    factories: HashMap<String, WidgetFactory>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `plugin_key`, replacing any previous one
    pub fn with_factory<F>(mut self, plugin_key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginManifest, &LoadContext) -> Result<WidgetHandle, ResolveError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(plugin_key.into(), Arc::new(factory));
        self
    }

    /// Register a [`StaticWidget`] with a fixed entry point
    pub fn with_widget(self, plugin_key: impl Into<String>, entry_point: impl Into<String>) -> Self {
        let plugin_key = plugin_key.into();
        let widget: WidgetHandle = Arc::new(StaticWidget {
            plugin_key: plugin_key.clone(),
            entry_point: entry_point.into(),
        });
        self.with_factory(plugin_key, move |_, _| Ok(Arc::clone(&widget)))
    }

    pub fn contains(&self, plugin_key: &str) -> bool {
        self.factories.contains_key(plugin_key)
    }
}

impl fmt::Debug for StaticResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.factories.keys().collect();
        keys.sort();
        f.debug_struct("StaticResolver").field("plugins", &keys).finish()
    }
}

#[async_trait]
impl ImplementationResolver for StaticResolver {
    async fn resolve(
        &self,
        manifest: &PluginManifest,
        ctx: &LoadContext,
    ) -> Result<WidgetHandle, ResolveError> {
        let factory = self
            .factories
            .get(&manifest.plugin_key)
            .ok_or_else(|| ResolveError::NoImplementation(manifest.plugin_key.clone()))?;
        factory(manifest, ctx)
    }
}

// ========== Bundle ==========

/// Widget script bundle read from the widget root
#[derive(Debug, Clone)]
pub struct BundledWidget {
    pub plugin_key: String,
    /// Path relative to the widget root, as declared by the manifest
    pub entry_point: String,
    /// Canonical location on disk
    pub path: PathBuf,
    pub source: Arc<[u8]>,
    /// Hex-encoded SHA-256 of `source`
    pub digest: String,
}

impl WidgetComponent for BundledWidget {
    fn plugin_key(&self) -> &str {
        &self.plugin_key
    }

    fn entry_point(&self) -> &str {
        &self.entry_point
    }

    fn digest(&self) -> Option<&str> {
        Some(&self.digest)
    }
}

/// Resolver reading `public_widget_path` bundles from a root directory
#[derive(Debug, Clone)]
pub struct BundleResolver {
    root: PathBuf,
    max_bytes: u64,
}

impl BundleResolver {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn from_config(config: &PluginConfig) -> Self {
        Self::new(&config.widget_root, config.max_widget_bytes)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_bundle(&self, plugin_key: &str, relative: &str) -> Result<BundledWidget, ResolveError> {
        let path = resolve_bundle_path(&self.root, relative)?;

        let metadata = fs::metadata(&path)?;
        if metadata.len() > self.max_bytes {
            return Err(ResolveError::TooLarge {
                size: metadata.len(),
                limit: self.max_bytes,
            });
        }

        let source = fs::read(&path)?;
        let digest = hex::encode(Sha256::digest(&source));

        tracing::debug!(
            plugin_key = %plugin_key,
            path = %path.display(),
            bytes = source.len(),
            "Read widget bundle"
        );

        Ok(BundledWidget {
            plugin_key: plugin_key.to_string(),
            entry_point: relative.to_string(),
            path,
            source: source.into(),
            digest,
        })
    }
}

#[async_trait]
impl ImplementationResolver for BundleResolver {
    async fn resolve(
        &self,
        manifest: &PluginManifest,
        _ctx: &LoadContext,
    ) -> Result<WidgetHandle, ResolveError> {
        let relative = manifest
            .public_widget_path
            .clone()
            .ok_or_else(|| ResolveError::NoPublicWidget(manifest.plugin_key.clone()))?;

        let resolver = self.clone();
        let plugin_key = manifest.plugin_key.clone();
        let widget = tokio::task::spawn_blocking(move || resolver.load_bundle(&plugin_key, &relative))
            .await
            .map_err(|e| ResolveError::Failed(format!("bundle read task failed: {}", e)))??;

        Ok(Arc::new(widget))
    }
}

/// Resolve `relative` under `root`, refusing symlinks and anything that
/// lands outside the root once canonicalized.
fn resolve_bundle_path(root: &Path, relative: &str) -> Result<PathBuf, ResolveError> {
    let canonical_root = root.canonicalize().map_err(|e| {
        ResolveError::InvalidPath(format!("widget root {:?} unavailable: {}", root, e))
    })?;

    let candidate = canonical_root.join(relative);
    let metadata = fs::symlink_metadata(&candidate)?;
    if metadata.file_type().is_symlink() {
        return Err(ResolveError::InvalidPath(
            "widget paths cannot point to symlinks".to_string(),
        ));
    }

    let canonical_target = candidate.canonicalize()?;
    if !canonical_target.starts_with(&canonical_root) {
        return Err(ResolveError::InvalidPath(format!(
            "widget path {:?} must reside under {:?}",
            canonical_target, canonical_root
        )));
    }
    if !fs::metadata(&canonical_target)?.is_file() {
        return Err(ResolveError::InvalidPath(
            "widget path must be a regular file".to_string(),
        ));
    }

    Ok(canonical_target)
}
