//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Storefront configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseSettings,
    pub plugins: PluginConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Whether a fresh installation starts out active
    pub default_active_on_install: bool,
    /// Directory that public widget bundles are resolved against
    pub widget_root: PathBuf,
    pub max_widget_bytes: u64,
    pub load_timeout_secs: u64,
    pub operation_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            plugins: PluginConfig::default(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: data_dir().join("storefront.db"),
            max_connections: 5,
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            default_active_on_install: false,
            widget_root: data_dir().join("widgets"),
            max_widget_bytes: 1024 * 1024,
            load_timeout_secs: 5,
            operation_timeout_secs: 10,
        }
    }
}

impl PluginConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("storefront"))
        .unwrap_or_else(|| PathBuf::from(".storefront"))
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("STOREFRONT_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("storefront")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist.
    ///
    /// `STOREFRONT_DATABASE` and `STOREFRONT_WIDGET_ROOT` override the file.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = env::var("STOREFRONT_DATABASE") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(root) = env::var("STOREFRONT_WIDGET_ROOT") {
            self.plugins.widget_root = PathBuf::from(root);
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be at least 1"));
        }
        if self.plugins.max_widget_bytes == 0 {
            return Err(anyhow!("plugins.max_widget_bytes must be greater than zero"));
        }
        if self.plugins.load_timeout_secs == 0 || self.plugins.operation_timeout_secs == 0 {
            return Err(anyhow!("plugin timeouts must be at least one second"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "database.path" => Ok(self.database.path.display().to_string()),
            "database.max_connections" => Ok(self.database.max_connections.to_string()),
            "plugins.default_active_on_install" => {
                Ok(self.plugins.default_active_on_install.to_string())
            }
            "plugins.widget_root" => Ok(self.plugins.widget_root.display().to_string()),
            "plugins.max_widget_bytes" => Ok(self.plugins.max_widget_bytes.to_string()),
            "plugins.load_timeout_secs" => Ok(self.plugins.load_timeout_secs.to_string()),
            "plugins.operation_timeout_secs" => {
                Ok(self.plugins.operation_timeout_secs.to_string())
            }
            _ => Err(anyhow!("Unknown configuration key: {}", key)),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "database.path" => self.database.path = PathBuf::from(value),
            "database.max_connections" => {
                self.database.max_connections = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
            }
            "plugins.default_active_on_install" => {
                self.plugins.default_active_on_install = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "plugins.widget_root" => self.plugins.widget_root = PathBuf::from(value),
            "plugins.max_widget_bytes" => {
                self.plugins.max_widget_bytes = value
                    .parse()
                    .with_context(|| format!("Invalid max_widget_bytes value: {}", value))?;
            }
            "plugins.load_timeout_secs" => {
                self.plugins.load_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid load_timeout_secs value: {}", value))?;
            }
            "plugins.operation_timeout_secs" => {
                self.plugins.operation_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid operation_timeout_secs value: {}", value))?;
            }
            _ => return Err(anyhow!("Unknown configuration key: {}", key)),
        }
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.database.max_connections, 5);
        assert!(config.database.path.ends_with("storefront.db"));
        assert!(!config.plugins.default_active_on_install);
        assert_eq!(config.plugins.max_widget_bytes, 1024 * 1024);
        assert_eq!(config.plugins.load_timeout(), Duration::from_secs(5));
        assert_eq!(config.plugins.operation_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [plugins]
            default_active_on_install = true
            "#,
        )
        .expect("partial config should parse");

        assert!(config.plugins.default_active_on_install);
        assert_eq!(config.plugins.load_timeout_secs, 5);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = Config::default();
        config.plugins.widget_root = PathBuf::from("/srv/widgets");

        let serialized = toml::to_string_pretty(&config).expect("serialize");
        let parsed: Config = toml::from_str(&serialized).expect("deserialize");

        assert_eq!(parsed.plugins.widget_root, PathBuf::from("/srv/widgets"));
    }

    #[test]
    fn test_get_and_set() {
        let mut config = Config::default();

        config.set("plugins.load_timeout_secs", "30").unwrap();
        assert_eq!(config.get("plugins.load_timeout_secs").unwrap(), "30");

        config.set("plugins.default_active_on_install", "true").unwrap();
        assert!(config.plugins.default_active_on_install);

        assert!(config.set("plugins.load_timeout_secs", "abc").is_err());
        assert!(config.get("nope").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        assert!(config.set("database.max_connections", "0").is_err());

        config = Config::default();
        config.plugins.operation_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
