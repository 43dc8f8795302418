//! Error types for Davlock

use crate::domain::locking::LockError;
use thiserror::Error;

/// Result type alias using Davlock's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Davlock error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Lock errors (E300-E399)
    #[error(transparent)]
    Lock(#[from] LockError),

    // Path errors (E400-E499)
    #[error("Invalid resource path '{0}'. Paths must be absolute and must not escape the root.")]
    InvalidPath(String),

    #[error("Invalid {header} header: {value}")]
    InvalidHeader { header: String, value: String },

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
            Self::Lock(e) => e.code(),
            Self::InvalidPath(_) => "E400",
            Self::InvalidHeader { .. } => "E401",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Lock(LockError::Conflict { .. }) => {
                Some("Retry the request once the conflicting lock is released or expires".to_string())
            }
            Self::Lock(LockError::NotFound(_)) => Some("Use the `list` command to see active locks".to_string()),
            Self::ConfigError(_) => Some("davlock config list".to_string()),
            _ => None,
        }
    }

    /// Whether this error is an expected lock outcome rather than a failure
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Lock(e) if e.is_conflict())
    }
}
