use std::path::PathBuf;

use thiserror::Error;

use crate::templates::TemplateKind;

// -----------------------------------------------------------------------------
// Top-level taxonomy
// -----------------------------------------------------------------------------

/// Every failure a run can surface.
///
/// `Connection`, `Template` and `Config` are fatal for the whole run.
/// `RemoteCall` is recoverable at instance / VM granularity and is only
/// fatal when nothing above it absorbs it.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("remote call {method} failed: {message}")]
    RemoteCall { method: String, message: String },

    #[error("operation cancelled by user")]
    Interrupted,
}

impl FleetError {
    pub fn remote(method: &str, err: impl std::fmt::Display) -> Self {
        FleetError::RemoteCall {
            method: method.to_string(),
            message: err.to_string(),
        }
    }

    /// True for the classes that abort a run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FleetError::RemoteCall { .. })
    }
}

// -----------------------------------------------------------------------------
// Templates
// -----------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template file not found: {}", path.display())]
    NotFound { kind: TemplateKind, path: PathBuf },

    #[error("failed to read template file {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("invalid JSON in template '{kind}': {reason}")]
    Malformed { kind: TemplateKind, reason: String },

    #[error("template '{kind}' is missing")]
    Missing { kind: TemplateKind },
}

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to read configuration file {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("invalid YAML configuration: {0}")]
    Parse(String),

    /// Every problem found by validation, reported together.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("VM type '{0}' not found in configuration")]
    UnknownType(String),

    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),
}
