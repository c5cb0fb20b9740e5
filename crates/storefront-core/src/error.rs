//! Error types for Storefront

use thiserror::Error;

/// Result type alias using Storefront's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Storefront storage and configuration errors
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Plugin '{0}' not found. Run `storefront plugin list` to see registered plugins.")]
    PluginNotFound(String),

    #[error("Installation '{0}' not found for this business.")]
    InstallationNotFound(String),

    // Conflict errors (E100-E199)
    #[error("Conflict: {0}")]
    Conflict(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Failed to parse stored value: {0}")]
    Parse(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::PluginNotFound(_) => "E001",
            Self::InstallationNotFound(_) => "E002",
            Self::Conflict(_) => "E100",
            Self::DatabaseError(_) => "E400",
            Self::Parse(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::PluginNotFound(_) => Some("storefront plugin list".to_string()),
            Self::InstallationNotFound(_) => {
                Some("storefront installed --business <id>".to_string())
            }
            Self::DatabaseError(_) => Some("storefront doctor".to_string()),
            _ => None,
        }
    }

    /// Whether this error represents a missing row rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PluginNotFound(_) | Self::InstallationNotFound(_)
        ) || matches!(self, Self::DatabaseError(sqlx::Error::RowNotFound))
    }

    /// Map a sqlx error, turning unique-constraint violations into [`Error::Conflict`]
    pub fn from_write(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::Conflict(what.to_string());
            }
        }
        Self::DatabaseError(err)
    }
}
