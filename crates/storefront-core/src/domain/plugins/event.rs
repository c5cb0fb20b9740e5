//! Plugin audit events
//!
//! Records of lifecycle mutations, kept for tenant-facing activity history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of audited plugin action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PluginRegistered,
    PluginAvailabilityChanged,
    PluginInstalled,
    PluginActivated,
    PluginDeactivated,
    PluginUninstalled,
    PluginSettingsUpdated,
    PluginUpgraded,
    /// An installation id was used under a business that does not own it
    CrossTenantAccessDenied,
}

impl AuditAction {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PluginRegistered => "plugin_registered",
            Self::PluginAvailabilityChanged => "plugin_availability_changed",
            Self::PluginInstalled => "plugin_installed",
            Self::PluginActivated => "plugin_activated",
            Self::PluginDeactivated => "plugin_deactivated",
            Self::PluginUninstalled => "plugin_uninstalled",
            Self::PluginSettingsUpdated => "plugin_settings_updated",
            Self::PluginUpgraded => "plugin_upgraded",
            Self::CrossTenantAccessDenied => "cross_tenant_access_denied",
        }
    }

    /// Parse from the stored string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plugin_registered" => Some(Self::PluginRegistered),
            "plugin_availability_changed" => Some(Self::PluginAvailabilityChanged),
            "plugin_installed" => Some(Self::PluginInstalled),
            "plugin_activated" => Some(Self::PluginActivated),
            "plugin_deactivated" => Some(Self::PluginDeactivated),
            "plugin_uninstalled" => Some(Self::PluginUninstalled),
            "plugin_settings_updated" => Some(Self::PluginSettingsUpdated),
            "plugin_upgraded" => Some(Self::PluginUpgraded),
            "cross_tenant_access_denied" => Some(Self::CrossTenantAccessDenied),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    /// Tenant the action applied to; `None` for catalogue administration
    pub business_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub installation_id: Option<Uuid>,
    pub plugin_key: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a new audit entry
    pub fn new(action: AuditAction, business_id: Option<Uuid>, user_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            business_id,
            user_id,
            action,
            installation_id: None,
            plugin_key: None,
            details: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_installation(mut self, installation_id: Uuid) -> Self {
        self.installation_id = Some(installation_id);
        self
    }

    pub fn with_plugin_key(mut self, plugin_key: impl Into<String>) -> Self {
        self.plugin_key = Some(plugin_key.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
