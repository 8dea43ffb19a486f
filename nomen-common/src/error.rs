//! Common error types for the normalization services

use thiserror::Error;

/// Common result type for normalization operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds shared by the store, the pipeline and the HTTP shell
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (bad ids, empty names, invalid strategy definitions)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session, stage, strategy or reference code does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation would violate a session/stage invariant
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External text oracle failed after exhausting its retry budget
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Underlying storage failure (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (serialization, broken invariants)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable kind, used in stage error messages and API bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::ExternalService(_) => "external_service",
            #[cfg(feature = "sqlx")]
            Error::Persistence(_) => "persistence",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON serialization failed: {}", err))
    }
}
