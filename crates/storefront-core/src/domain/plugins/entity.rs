//! Plugin catalogue and installation entities

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value::Settings;
use crate::error::{Error, Result};

/// Maximum length of a plugin key
pub const MAX_PLUGIN_KEY_LEN: usize = 100;

/// What capabilities a plugin ships
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    /// Public widget rendered on the storefront
    Widget,
    /// Settings panel in the business dashboard
    DashboardModule,
    /// Server-side handler
    BackendHandler,
    /// Any combination of the above
    Mixed,
}

impl PluginType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Widget => "widget",
            Self::DashboardModule => "dashboard_module",
            Self::BackendHandler => "backend_handler",
            Self::Mixed => "mixed",
        }
    }

    /// Parse from the stored string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "widget" => Some(Self::Widget),
            "dashboard_module" => Some(Self::DashboardModule),
            "backend_handler" => Some(Self::BackendHandler),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    /// Whether plugins of this type are expected to ship a public widget
    pub fn requires_public_widget(&self) -> bool {
        matches!(self, Self::Widget)
    }
}

impl std::fmt::Display for PluginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static descriptor of an installable plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub plugin_key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub version: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    #[serde(default)]
    pub public_widget_path: Option<String>,
    #[serde(default)]
    pub dashboard_settings_path: Option<String>,
    #[serde(default)]
    pub backend_handler_path: Option<String>,
    /// Configuration applied underneath each installation's stored settings
    #[serde(default)]
    pub default_settings: Settings,
    #[serde(default)]
    pub is_premium: bool,
    /// Opaque to this crate; only meaningful when `is_premium`
    #[serde(default)]
    pub price: f64,
    /// Whether the plugin is offered in the marketplace
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl PluginManifest {
    /// Create a minimal active manifest
    pub fn new(
        plugin_key: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        plugin_type: PluginType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plugin_key: plugin_key.into(),
            name: name.into(),
            description: None,
            version: version.into(),
            plugin_type,
            public_widget_path: None,
            dashboard_settings_path: None,
            backend_handler_path: None,
            default_settings: Settings::new(),
            is_premium: false,
            price: 0.0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the public widget path
    pub fn with_public_widget(mut self, path: impl Into<String>) -> Self {
        self.public_widget_path = Some(path.into());
        self
    }

    /// Set the default settings
    pub fn with_default_settings(mut self, defaults: Settings) -> Self {
        self.default_settings = defaults;
        self
    }

    /// Check the manifest's invariants
    pub fn validate(&self) -> Result<()> {
        if !is_valid_plugin_key(&self.plugin_key) {
            return Err(Error::InvalidInput(format!(
                "plugin key '{}' must match [a-z0-9_-]{{1,{}}}",
                self.plugin_key, MAX_PLUGIN_KEY_LEN
            )));
        }

        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("plugin name cannot be empty".to_string()));
        }

        parse_version(&self.version)?;

        if !self.price.is_finite() || self.price < 0.0 {
            return Err(Error::InvalidInput(
                "plugin price must be a non-negative number".to_string(),
            ));
        }

        if self.plugin_type.requires_public_widget() && self.public_widget_path.is_none() {
            return Err(Error::InvalidInput(format!(
                "{} plugins must declare a public widget",
                self.plugin_type
            )));
        }

        Ok(())
    }
}

/// Whether `key` matches `[a-z0-9_-]{1,100}`
pub fn is_valid_plugin_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_PLUGIN_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

/// Parse a plugin version as SemVer 2.0
pub fn parse_version(version: &str) -> Result<Version> {
    Version::parse(version).map_err(|e| {
        Error::InvalidInput(format!(
            "plugin version '{}' is not a semantic version: {}",
            version, e
        ))
    })
}

pub fn is_valid_version(version: &str) -> bool {
    Version::parse(version).is_ok()
}

/// A tenant's installation of a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: Uuid,
    pub plugin_id: Uuid,
    pub business_id: Uuid,
    pub is_active: bool,
    /// Manifest version at install (or last upgrade) time
    pub installed_version: String,
    pub installed_by: Option<Uuid>,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Installation {
    /// Create a new installation record for `plugin` owned by `business_id`
    pub fn new(
        plugin: &PluginManifest,
        business_id: Uuid,
        installed_by: Option<Uuid>,
        is_active: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plugin_id: plugin.id,
            business_id,
            is_active,
            installed_version: plugin.version.clone(),
            installed_by,
            installed_at: now,
            updated_at: now,
        }
    }
}
