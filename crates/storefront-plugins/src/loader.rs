//! Public widget loading
//!
//! Resolves a plugin's public widget for a tenant request, consulting the
//! registry cache first. The cache is keyed by plugin key alone: widget code
//! is the same for every tenant, and per-tenant settings are handed to the
//! widget separately by the caller.

use crate::registry::PluginRegistry;
use crate::resolver::{ImplementationResolver, WidgetHandle};
use crate::{ErrorKind, PluginError, PluginResult};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Default deadline for a single widget resolution
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Tenant context a widget is being loaded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadContext {
    pub business_id: Uuid,
    pub profile_id: Uuid,
    pub installation_id: Uuid,
}

/// Outcome of [`PluginLoader::load_public_widget`]
#[derive(Debug, Clone)]
pub struct WidgetLoadResult {
    pub success: bool,
    /// Whether the widget came from the registry cache
    pub cached: bool,
    pub component: Option<WidgetHandle>,
    pub error: Option<PluginError>,
}

impl WidgetLoadResult {
    fn hit(component: WidgetHandle) -> Self {
        Self {
            success: true,
            cached: true,
            component: Some(component),
            error: None,
        }
    }

    fn resolved(component: WidgetHandle) -> Self {
        Self {
            success: true,
            cached: false,
            component: Some(component),
            error: None,
        }
    }

    fn failed(error: PluginError) -> Self {
        Self {
            success: false,
            cached: false,
            component: None,
            error: Some(error),
        }
    }

    /// Error classification, if the load failed
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(PluginError::kind)
    }

    /// Collapse into a `Result`, for callers that prefer `?`
    pub fn into_result(self) -> PluginResult<WidgetHandle> {
        match (self.component, self.error) {
            (Some(component), _) if self.success => Ok(component),
            (_, Some(error)) => Err(error),
            _ => Err(PluginError::ResolutionFailed(
                "loader returned no component".to_string(),
            )),
        }
    }
}

impl Serialize for WidgetLoadResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Component<'a> {
            plugin_key: &'a str,
            entry_point: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            digest: Option<&'a str>,
        }

        let mut state = serializer.serialize_struct("WidgetLoadResult", 5)?;
        state.serialize_field("success", &self.success)?;
        state.serialize_field("cached", &self.cached)?;
        state.serialize_field(
            "component",
            &self.component.as_ref().map(|c| Component {
                plugin_key: c.plugin_key(),
                entry_point: c.entry_point(),
                digest: c.digest(),
            }),
        )?;
        state.serialize_field("error", &self.error.as_ref().map(ToString::to_string))?;
        state.serialize_field(
            "error_kind",
            &self.error.as_ref().map(PluginError::kind),
        )?;
        state.end()
    }
}

/// Loads public widgets through an [`ImplementationResolver`], caching them
/// in the shared [`PluginRegistry`]
#[derive(Clone)]
pub struct PluginLoader {
    registry: Arc<PluginRegistry>,
    resolver: Arc<dyn ImplementationResolver>,
    load_timeout: Duration,
}

impl PluginLoader {
    pub fn new(registry: Arc<PluginRegistry>, resolver: Arc<dyn ImplementationResolver>) -> Self {
        Self {
            registry,
            resolver,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Resolve the public widget of `plugin_key` for a tenant request.
    ///
    /// Never returns an error directly: failures are reported in the result
    /// so one tenant's broken widget cannot fail the caller's whole page.
    pub async fn load_public_widget(
        &self,
        plugin_key: &str,
        business_id: Uuid,
        profile_id: Uuid,
        installation_id: Uuid,
    ) -> WidgetLoadResult {
        if let Some(component) = self.cached(plugin_key) {
            tracing::debug!(plugin_key = %plugin_key, "Widget cache hit");
            return WidgetLoadResult::hit(component);
        }

        let Some(entry) = self.registry.get_plugin(plugin_key) else {
            tracing::debug!(plugin_key = %plugin_key, "Widget requested for unregistered plugin");
            return WidgetLoadResult::failed(PluginError::NotRegistered(plugin_key.to_string()));
        };

        let ctx = LoadContext {
            business_id,
            profile_id,
            installation_id,
        };

        let outcome = tokio::time::timeout(
            self.load_timeout,
            self.resolver.resolve(&entry.manifest, &ctx),
        )
        .await;

        let reason = match outcome {
            Ok(Ok(component)) => match self.registry.cache_component(plugin_key, component.clone()) {
                Ok(()) => {
                    tracing::info!(
                        plugin_key = %plugin_key,
                        business_id = %business_id,
                        entry_point = %component.entry_point(),
                        "Resolved public widget"
                    );
                    return WidgetLoadResult::resolved(component);
                }
                // Unregistered while resolving
                Err(e) => return WidgetLoadResult::failed(e),
            },
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.load_timeout),
        };

        tracing::warn!(
            plugin_key = %plugin_key,
            business_id = %business_id,
            error = %reason,
            "Failed to resolve public widget"
        );

        if let Err(e) = self.registry.mark_error(plugin_key, reason.clone()) {
            tracing::debug!(plugin_key = %plugin_key, error = %e, "Could not record load failure");
        }

        WidgetLoadResult::failed(PluginError::ResolutionFailed(format!(
            "{}: {}",
            plugin_key, reason
        )))
    }

    fn cached(&self, plugin_key: &str) -> Option<WidgetHandle> {
        if !self.registry.is_component_cached(plugin_key) {
            return None;
        }
        self.registry.get_cached_component(plugin_key)
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("registry", &self.registry)
            .field("load_timeout", &self.load_timeout)
            .finish_non_exhaustive()
    }
}
