//! Context error types.

use stayfx_fx::FxError;
use thiserror::Error;

/// Errors surfaced by the currency context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A conversion, selection or refresh error.
    #[error(transparent)]
    Fx(#[from] FxError),

    /// The persisted record could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The operation is not allowed in the current lifecycle state.
    #[error("Invalid lifecycle transition: {0}")]
    Lifecycle(String),
}

impl ContextError {
    /// Get error code for structured outcomes.
    pub fn error_code(&self) -> &'static str {
        match self {
            ContextError::Fx(e) => e.error_code(),
            ContextError::Persistence(_) => "PERSISTENCE_ERROR",
            ContextError::Configuration(_) => "CONFIGURATION_ERROR",
            ContextError::Lifecycle(_) => "LIFECYCLE_ERROR",
        }
    }
}

impl From<std::io::Error> for ContextError {
    fn from(error: std::io::Error) -> Self {
        ContextError::Persistence(error.to_string())
    }
}

impl From<serde_json::Error> for ContextError {
    fn from(error: serde_json::Error) -> Self {
        ContextError::Persistence(error.to_string())
    }
}

/// Result type for context operations.
pub type ContextResult<T> = Result<T, ContextError>;
