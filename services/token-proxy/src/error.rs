//! Service-level error types
//!
//! Per-request failures are rendered as HTTP responses by the handlers and
//! never propagate as Rust errors. What remains is startup: configuration
//! loading and validation.

use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing secret: set {env} or {file_key}")]
    MissingSecret {
        env: &'static str,
        file_key: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias for configuration loading
pub type Result<T> = std::result::Result<T, ConfigError>;
