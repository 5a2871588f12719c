//! The closed catalog of currencies the application can display.

use std::collections::HashMap;

use crate::currency::{Currency, CurrencyCode};
use crate::error::{RegistryError, RegistryResult};

/// Read-only catalog of supported currencies.
///
/// Every code that enters the system is resolved here; anything not
/// registered is rejected with [`RegistryError::UnknownCurrency`].
#[derive(Debug, Clone)]
pub struct CurrencyRegistry {
    currencies: Vec<Currency>,
    index: HashMap<CurrencyCode, usize>,
    base: CurrencyCode,
}

impl CurrencyRegistry {
    /// The built-in catalog with USD as the base currency.
    pub fn builtin() -> Self {
        let base = CurrencyCode::usd();
        let mut index = HashMap::new();
        let currencies = builtin_currencies();
        for (position, currency) in currencies.iter().enumerate() {
            index.insert(currency.code.clone(), position);
        }
        Self {
            currencies,
            index,
            base,
        }
    }

    /// The built-in catalog with a different base currency.
    pub fn builtin_with_base(base: &str) -> RegistryResult<Self> {
        let base = CurrencyCode::parse(base)?;
        builtin_currencies()
            .into_iter()
            .fold(RegistryBuilder::new(base), RegistryBuilder::with)
            .build()
    }

    /// Start a custom catalog.
    pub fn builder(base: CurrencyCode) -> RegistryBuilder {
        RegistryBuilder::new(base)
    }

    /// All currencies in registration order.
    pub fn all(&self) -> &[Currency] {
        &self.currencies
    }

    /// Look up a currency by code.
    pub fn get(&self, code: &str) -> RegistryResult<&Currency> {
        CurrencyCode::parse(code)
            .ok()
            .and_then(|parsed| self.index.get(&parsed))
            .map(|&position| &self.currencies[position])
            .ok_or_else(|| RegistryError::UnknownCurrency(code.to_string()))
    }

    /// Resolve a raw code to its canonical registered form.
    pub fn resolve(&self, code: &str) -> RegistryResult<CurrencyCode> {
        self.get(code).map(|currency| currency.code.clone())
    }

    /// Check whether a code is registered.
    pub fn contains(&self, code: &str) -> bool {
        self.get(code).is_ok()
    }

    /// The canonical base currency.
    pub fn base(&self) -> &Currency {
        &self.currencies[self.index[&self.base]]
    }

    /// The canonical base currency code.
    pub fn base_code(&self) -> &CurrencyCode {
        &self.base
    }

    /// Registered codes in registration order.
    pub fn codes(&self) -> impl Iterator<Item = &CurrencyCode> {
        self.currencies.iter().map(|c| &c.code)
    }

    /// Number of registered currencies.
    pub fn len(&self) -> usize {
        self.currencies.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
    }
}

impl Default for CurrencyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Builder for custom registries.
#[derive(Debug)]
pub struct RegistryBuilder {
    base: CurrencyCode,
    currencies: Vec<Currency>,
}

impl RegistryBuilder {
    /// Create a builder for the given base currency.
    pub fn new(base: CurrencyCode) -> Self {
        Self {
            base,
            currencies: Vec::new(),
        }
    }

    /// Register a currency.
    pub fn with(mut self, currency: Currency) -> Self {
        self.currencies.push(currency);
        self
    }

    /// Build the registry.
    pub fn build(self) -> RegistryResult<CurrencyRegistry> {
        let mut index = HashMap::with_capacity(self.currencies.len());
        for (position, currency) in self.currencies.iter().enumerate() {
            if index.insert(currency.code.clone(), position).is_some() {
                return Err(RegistryError::DuplicateCurrency(currency.code.clone()));
            }
        }

        if !index.contains_key(&self.base) {
            return Err(RegistryError::BaseNotRegistered(self.base));
        }

        Ok(CurrencyRegistry {
            currencies: self.currencies,
            index,
            base: self.base,
        })
    }
}

fn builtin_currencies() -> Vec<Currency> {
    const CATALOG: &[(&str, &str, &str, u32, &str)] = &[
        ("USD", "US Dollar", "$", 2, "🇺🇸"),
        ("EUR", "Euro", "€", 2, "🇪🇺"),
        ("GBP", "British Pound", "£", 2, "🇬🇧"),
        ("JPY", "Japanese Yen", "¥", 0, "🇯🇵"),
        ("CAD", "Canadian Dollar", "C$", 2, "🇨🇦"),
        ("AUD", "Australian Dollar", "A$", 2, "🇦🇺"),
        ("CHF", "Swiss Franc", "CHF ", 2, "🇨🇭"),
        ("CNY", "Chinese Yuan", "CN¥", 2, "🇨🇳"),
        ("INR", "Indian Rupee", "₹", 2, "🇮🇳"),
        ("MXN", "Mexican Peso", "MX$", 2, "🇲🇽"),
        ("BRL", "Brazilian Real", "R$", 2, "🇧🇷"),
        ("KRW", "South Korean Won", "₩", 0, "🇰🇷"),
        ("SGD", "Singapore Dollar", "S$", 2, "🇸🇬"),
        ("AED", "UAE Dirham", "AED ", 2, "🇦🇪"),
        ("ZAR", "South African Rand", "R", 2, "🇿🇦"),
    ];

    CATALOG
        .iter()
        .map(|&(code, name, symbol, digits, flag)| {
            Currency::new(CurrencyCode::from_static(code), name, symbol, digits, flag)
        })
        .collect()
}
