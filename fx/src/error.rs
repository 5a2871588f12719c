//! FX error types.

use std::time::Duration;

use stayfx_common::{RegistryError, Timestamp};
use thiserror::Error;

/// Errors that can occur in rate fetching, caching and conversion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FxError {
    /// The code is not registered, or has no rate in the table.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    /// Amount is negative or not finite.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The fetch could not reach the provider or was refused.
    #[error("Network error: {0}")]
    Network(String),

    /// The fetch did not complete in time.
    #[error("Rate fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered with something that is not a usable rate table.
    #[error("Malformed rate response: {0}")]
    MalformedResponse(String),

    /// A newer table was committed while this attempt was in flight.
    #[error("Fetch started at {started_at} superseded by table started at {current_started_at}")]
    Superseded {
        started_at: Timestamp,
        current_started_at: Timestamp,
    },
}

impl FxError {
    /// Check if a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FxError::Network(_) | FxError::Timeout(_) | FxError::MalformedResponse(_)
        )
    }

    /// Check if this error came from a refresh attempt rather than a caller's input.
    pub fn is_refresh_failure(&self) -> bool {
        self.is_retryable() || matches!(self, FxError::Superseded { .. })
    }

    /// Get error code for structured outcomes.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::UnknownCurrency(_) => "UNKNOWN_CURRENCY",
            FxError::InvalidAmount(_) => "INVALID_AMOUNT",
            FxError::Network(_) => "NETWORK_ERROR",
            FxError::Timeout(_) => "TIMEOUT",
            FxError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            FxError::Superseded { .. } => "SUPERSEDED",
        }
    }
}

impl From<RegistryError> for FxError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::UnknownCurrency(code) | RegistryError::InvalidCode(code) => {
                FxError::UnknownCurrency(code)
            }
            RegistryError::DuplicateCurrency(code) | RegistryError::BaseNotRegistered(code) => {
                FxError::UnknownCurrency(code.to_string())
            }
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
