use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to build configuration: {0}")]
    Build(#[from] config_crate::ConfigError),

    #[error("Invalid setting '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Failed to expand '{value}': {message}")]
    Expansion { value: String, message: String },
}

impl ConfigError {
    /// Create an invalid-setting error
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
