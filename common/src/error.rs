//! Error types for the currency registry.

use thiserror::Error;

use crate::CurrencyCode;

/// Errors raised at the registry boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The code is well formed but not part of the registry.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    /// The code is not three ASCII letters.
    #[error("Invalid currency code: {0:?}")]
    InvalidCode(String),

    /// The same code was registered twice.
    #[error("Duplicate currency: {0}")]
    DuplicateCurrency(CurrencyCode),

    /// The base currency has no definition in the registry.
    #[error("Base currency {0} is not registered")]
    BaseNotRegistered(CurrencyCode),
}

impl RegistryError {
    /// Get error code for structured outcomes.
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::UnknownCurrency(_) => "UNKNOWN_CURRENCY",
            RegistryError::InvalidCode(_) => "INVALID_CURRENCY_CODE",
            RegistryError::DuplicateCurrency(_) => "DUPLICATE_CURRENCY",
            RegistryError::BaseNotRegistered(_) => "BASE_NOT_REGISTERED",
        }
    }
}

/// Result type alias for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
