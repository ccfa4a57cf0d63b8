//! Error types for the sidecar supervisor.
//!
//! Lifecycle errors live in [`crate::sidecar::error`]; this module holds the
//! configuration errors shared by the config layer and the normalizer, plus
//! the top-level error the binary reports.

use thiserror::Error;

use crate::sidecar::SidecarError;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sidecar error: {0}")]
    Sidecar(#[from] SidecarError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
