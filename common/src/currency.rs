//! Currency codes and display metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RegistryError, RegistryResult};

/// ISO 4217 currency code.
///
/// Always three ASCII letters, stored upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parse a currency code, normalizing case and surrounding whitespace.
    pub fn parse(code: &str) -> RegistryResult<Self> {
        let trimmed = code.trim();
        if trimmed.len() != 3 || !trimmed.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(RegistryError::InvalidCode(code.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Build a code from a literal already known to be well formed.
    pub(crate) fn from_static(code: &'static str) -> Self {
        debug_assert!(code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()));
        Self(code.to_string())
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Common currencies
    pub fn usd() -> Self {
        Self::from_static("USD")
    }

    pub fn eur() -> Self {
        Self::from_static("EUR")
    }

    pub fn gbp() -> Self {
        Self::from_static("GBP")
    }

    pub fn jpy() -> Self {
        Self::from_static("JPY")
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CurrencyCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for CurrencyCode {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

/// A supported display currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// ISO 4217 code, unique within a registry.
    pub code: CurrencyCode,
    /// Human readable name.
    pub name: String,
    /// Symbol prefixed to formatted prices.
    pub symbol: String,
    /// Digits shown after the decimal separator.
    pub decimal_digits: u32,
    /// Flag glyph shown next to the currency in pickers.
    pub flag: String,
}

impl Currency {
    /// Create a new currency definition.
    pub fn new(
        code: CurrencyCode,
        name: impl Into<String>,
        symbol: impl Into<String>,
        decimal_digits: u32,
        flag: impl Into<String>,
    ) -> Self {
        Self {
            code,
            name: name.into(),
            symbol: symbol.into(),
            decimal_digits,
            flag: flag.into(),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.flag, self.code, self.name)
    }
}
