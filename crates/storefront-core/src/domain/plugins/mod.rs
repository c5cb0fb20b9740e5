//! Plugin domain module
//!
//! Catalogue manifests, per-tenant installations, their settings and the
//! audit trail of lifecycle changes.
//!
//! # Architecture
//!
//! - **Values**: `SettingValue`, `Settings` (JSON-like trees with opaque leaves)
//! - **Entities**: `PluginManifest`, `Installation`
//! - **Events**: `AuditEntry`, `AuditAction`
//! - **Repository**: `PluginStore` trait with the `SqlitePluginStore` implementation
//!
//! # Example
//!
//! ```ignore
//! use storefront_core::domain::plugins::{PluginManifest, PluginStore, PluginType, SqlitePluginStore};
//!
//! let store = SqlitePluginStore::new(db.pool().clone());
//!
//! let manifest = PluginManifest::new("loyalty-points", "Loyalty Points", "1.0.0", PluginType::Widget)
//!     .with_public_widget("loyalty-points/widget.js");
//! store.upsert_plugin(&manifest).await?;
//!
//! let offered = store.list_plugins(true).await?;
//! ```

pub mod entity;
pub mod event;
pub mod repository;
pub mod repository_trait;
pub mod value;

// Re-export main types
pub use entity::{
    Installation, MAX_PLUGIN_KEY_LEN, PluginManifest, PluginType, is_valid_plugin_key,
    is_valid_version, parse_version,
};
pub use event::{AuditAction, AuditEntry};
pub use repository::SqlitePluginStore;
pub use repository_trait::PluginStore;
pub use value::{
    OpaqueHandle, SettingValue, Settings, settings_from_json_map, settings_to_json_map,
};
