//! Storefront Plugin System
//!
//! Provides multi-tenant plugin management with:
//! - Settings merging and sanitization
//! - In-memory plugin registry with a resolved-widget cache
//! - Public widget loading through pluggable resolvers
//! - Tenant-scoped install/activate/deactivate/uninstall lifecycle
//! - Audit trail of lifecycle mutations

pub mod audit;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod settings;

use serde::Serialize;
use storefront_core::domain::plugins::{Installation, Settings};
use thiserror::Error;

pub use audit::{AuditSink, StoreAuditSink, TracingAuditSink};
pub use loader::{LoadContext, PluginLoader, WidgetLoadResult};
pub use manager::{InstallationDetails, InstalledWidget, ManagerConfig, PluginManager};
pub use registry::{PluginRegistry, RegistryEntry, RegistryStats};
pub use resolver::{
    BundleResolver, BundledWidget, ImplementationResolver, ResolveError, StaticResolver,
    StaticWidget, WidgetComponent, WidgetHandle,
};
pub use settings::{
    merge_settings, normalize_settings, sanitize_settings, settings_from_json, settings_to_json,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluginError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Plugin '{0}' is already installed for this business")]
    AlreadyInstalled(String),

    #[error("Installation '{0}' belongs to another business")]
    Forbidden(String),

    #[error("Plugin '{0}' is not registered")]
    NotRegistered(String),

    #[error("Widget resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}

/// Stable classification of [`PluginError`] for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyInstalled,
    Forbidden,
    ResolutionFailed,
    PersistenceFailed,
    InvalidInput,
    PreconditionViolated,
}

impl PluginError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyInstalled(_) => ErrorKind::AlreadyInstalled,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotRegistered(_) => ErrorKind::PreconditionViolated,
            Self::ResolutionFailed(_) => ErrorKind::ResolutionFailed,
            Self::PersistenceFailed(_) => ErrorKind::PersistenceFailed,
            Self::InvalidSettings(_) | Self::InvalidManifest(_) => ErrorKind::InvalidInput,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceFailed(_))
    }
}

impl From<storefront_core::Error> for PluginError {
    fn from(err: storefront_core::Error) -> Self {
        use storefront_core::Error;

        match err {
            Error::PluginNotFound(key) => Self::NotFound(format!("plugin '{}'", key)),
            Error::InstallationNotFound(id) => Self::NotFound(format!("installation '{}'", id)),
            Error::Conflict(what) => Self::AlreadyInstalled(what),
            Error::InvalidInput(msg) => Self::InvalidManifest(msg),
            other if other.is_not_found() => Self::NotFound(other.to_string()),
            other => Self::PersistenceFailed(other.to_string()),
        }
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Result shape of lifecycle operations as handed to an API layer
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation: Option<Installation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<PluginResult<Installation>> for LifecycleOutcome {
    fn from(result: PluginResult<Installation>) -> Self {
        match result {
            Ok(installation) => Self {
                ok: true,
                installation: Some(installation),
                error_kind: None,
                error: None,
            },
            Err(e) => Self {
                ok: false,
                installation: None,
                error_kind: Some(e.kind()),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Result shape of settings operations as handed to an API layer
#[derive(Debug, Clone, Serialize)]
pub struct SettingsOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<PluginResult<Settings>> for SettingsOutcome {
    fn from(result: PluginResult<Settings>) -> Self {
        match result {
            Ok(settings) => Self {
                ok: true,
                settings: Some(settings),
                error_kind: None,
                error: None,
            },
            Err(e) => Self {
                ok: false,
                settings: None,
                error_kind: Some(e.kind()),
                error: Some(e.to_string()),
            },
        }
    }
}
