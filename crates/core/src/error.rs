//! Core error types

use thiserror::Error;

/// Core error type for the simulator
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration value rejected by validation
    #[error("Invalid config value for {field}: {reason}")]
    InvalidConfig {
        /// Offending field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
