//! Storefront Core Library
//!
//! This crate provides the persistence foundation for the storefront plugin
//! system:
//! - Configuration (TOML file + environment overrides)
//! - Storage (SQLite with versioned migrations)
//! - Plugin domain (manifests, installations, settings values, audit log)

pub mod config;
pub mod domain;
pub mod error;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::plugins::{
        Installation, PluginManifest, PluginStore, PluginType, SettingValue, Settings,
        SqlitePluginStore,
    };
    pub use crate::error::{Error, Result};
    pub use crate::storage::Database;
}
