//! Rate table snapshots.

use std::collections::BTreeMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stayfx_common::{epoch, is_older_than, CurrencyCode, CurrencyRegistry, Timestamp};

use crate::error::{FxError, FxResult};

/// Source tag of the all-ones table used before any fetch succeeded.
pub const BOOTSTRAP_SOURCE: &str = "bootstrap";

/// Maximum distance of the base rate from 1 accepted from a provider.
pub fn base_rate_tolerance() -> Decimal {
    Decimal::new(1, 6)
}

/// A complete snapshot of rates relative to one base currency.
///
/// Tables are replaced wholesale; nothing mutates a committed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTable {
    /// Currency every rate is expressed against.
    pub base: CurrencyCode,
    /// Units of each currency per one unit of `base`.
    pub rates: BTreeMap<CurrencyCode, Decimal>,
    /// When the table was received.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub fetched_at: Timestamp,
    /// When the fetch that produced the table began.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub fetch_started_at: Timestamp,
    /// Publication time reported by the provider, if any.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub published_at: Option<Timestamp>,
    /// Identifier of the producing source.
    pub source: String,
}

impl RateTable {
    /// A table where every registered currency trades 1:1, marked stale.
    pub fn bootstrap(registry: &CurrencyRegistry) -> Self {
        Self {
            base: registry.base_code().clone(),
            rates: registry.codes().map(|code| (code.clone(), Decimal::ONE)).collect(),
            fetched_at: epoch(),
            fetch_started_at: epoch(),
            published_at: None,
            source: BOOTSTRAP_SOURCE.to_string(),
        }
    }

    /// Build a table from raw provider quotes.
    ///
    /// Quotes for unregistered codes are dropped. Fails if the provider's
    /// base differs from the registry base, a registered currency has no
    /// positive rate, or the base rate is not 1.
    pub fn from_quotes<I>(
        registry: &CurrencyRegistry,
        base: &str,
        quotes: I,
        source: impl Into<String>,
        fetched_at: Timestamp,
    ) -> FxResult<Self>
    where
        I: IntoIterator<Item = (String, Decimal)>,
    {
        let base = CurrencyCode::parse(base)
            .map_err(|_| FxError::MalformedResponse(format!("invalid base code {base:?}")))?;

        let rates = quotes
            .into_iter()
            .filter_map(|(code, rate)| CurrencyCode::parse(&code).ok().map(|code| (code, rate)))
            .collect();

        Self {
            base,
            rates,
            fetched_at,
            fetch_started_at: fetched_at,
            published_at: None,
            source: source.into(),
        }
        .normalized(registry)
    }

    /// Attach the provider's publication time.
    pub fn with_published_at(mut self, published_at: Option<Timestamp>) -> Self {
        self.published_at = published_at;
        self
    }

    /// Check the table against the registry and restrict it to registered codes.
    pub fn normalized(mut self, registry: &CurrencyRegistry) -> FxResult<Self> {
        if &self.base != registry.base_code() {
            return Err(FxError::MalformedResponse(format!(
                "base {} does not match {}",
                self.base,
                registry.base_code()
            )));
        }

        self.rates.retain(|code, _| registry.contains(code.as_str()));

        for code in registry.codes() {
            match self.rates.get(code) {
                Some(rate) if *rate > Decimal::ZERO => {}
                Some(rate) => {
                    return Err(FxError::MalformedResponse(format!(
                        "rate for {code} is not positive: {rate}"
                    )))
                }
                None => {
                    return Err(FxError::MalformedResponse(format!("missing rate for {code}")))
                }
            }
        }

        let base_rate = self.rates[&self.base];
        if (base_rate - Decimal::ONE).abs() > base_rate_tolerance() {
            return Err(FxError::MalformedResponse(format!(
                "base rate for {} is {base_rate}, expected 1",
                self.base
            )));
        }
        self.rates.insert(self.base.clone(), Decimal::ONE);

        Ok(self)
    }

    /// Look up the canonical code and rate for a raw code.
    pub fn entry(&self, code: &str) -> FxResult<(&CurrencyCode, Decimal)> {
        CurrencyCode::parse(code)
            .ok()
            .and_then(|parsed| self.rates.get_key_value(&parsed))
            .map(|(code, rate)| (code, *rate))
            .ok_or_else(|| FxError::UnknownCurrency(code.to_string()))
    }

    /// Rate of `code` against the base.
    pub fn rate(&self, code: &str) -> FxResult<Decimal> {
        self.entry(code).map(|(_, rate)| rate)
    }

    /// Check whether this is the never-fetched placeholder table.
    pub fn is_bootstrap(&self) -> bool {
        self.source == BOOTSTRAP_SOURCE
    }

    /// Check whether the table is at least `ttl` old at `now`.
    pub fn is_stale(&self, now: Timestamp, ttl: Duration) -> bool {
        is_older_than(self.fetched_at, now, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockable::Clock;
    use rust_decimal_macros::dec;
    use stayfx_common::{Currency, ManualClock};

    fn registry() -> CurrencyRegistry {
        CurrencyRegistry::builder(CurrencyCode::usd())
            .with(Currency::new(CurrencyCode::usd(), "US Dollar", "$", 2, "🇺🇸"))
            .with(Currency::new(CurrencyCode::eur(), "Euro", "€", 2, "🇪🇺"))
            .build()
            .unwrap()
    }

    fn quotes(pairs: &[(&str, Decimal)]) -> Vec<(String, Decimal)> {
        pairs.iter().map(|(c, r)| (c.to_string(), *r)).collect()
    }

    #[test]
    fn test_bootstrap_is_stale_and_flat() {
        let registry = registry();
        let table = RateTable::bootstrap(&registry);
        let clock = ManualClock::fixed();

        assert!(table.is_bootstrap());
        assert!(table.is_stale(clock.utc(), Duration::from_secs(3600)));
        assert!(table.rates.values().all(|rate| *rate == Decimal::ONE));
        assert_eq!(table.rates.len(), 2);
    }

    #[test]
    fn test_from_quotes_drops_unregistered_codes() {
        let table = RateTable::from_quotes(
            &registry(),
            "usd",
            quotes(&[("USD", dec!(1)), ("EUR", dec!(0.92)), ("XAU", dec!(0.0004))]),
            "test",
            epoch(),
        )
        .unwrap();

        assert_eq!(table.rates.len(), 2);
        assert_eq!(table.rate("eur").unwrap(), dec!(0.92));
        assert!(matches!(table.rate("XAU"), Err(FxError::UnknownCurrency(_))));
    }

    #[test]
    fn test_missing_or_invalid_rates_are_malformed() {
        let registry = registry();

        let missing = RateTable::from_quotes(&registry, "USD", quotes(&[("USD", dec!(1))]), "t", epoch());
        assert!(matches!(missing, Err(FxError::MalformedResponse(_))));

        let zero = RateTable::from_quotes(
            &registry,
            "USD",
            quotes(&[("USD", dec!(1)), ("EUR", dec!(0))]),
            "t",
            epoch(),
        );
        assert!(matches!(zero, Err(FxError::MalformedResponse(_))));

        let wrong_base = RateTable::from_quotes(
            &registry,
            "EUR",
            quotes(&[("USD", dec!(1.08)), ("EUR", dec!(1))]),
            "t",
            epoch(),
        );
        assert!(matches!(wrong_base, Err(FxError::MalformedResponse(_))));
    }

    #[test]
    fn test_base_rate_tolerance() {
        let registry = registry();

        let close = RateTable::from_quotes(
            &registry,
            "USD",
            quotes(&[("USD", dec!(0.9999999)), ("EUR", dec!(0.92))]),
            "t",
            epoch(),
        )
        .unwrap();
        assert_eq!(close.rate("USD").unwrap(), Decimal::ONE);

        let far = RateTable::from_quotes(
            &registry,
            "USD",
            quotes(&[("USD", dec!(1.01)), ("EUR", dec!(0.92))]),
            "t",
            epoch(),
        );
        assert!(matches!(far, Err(FxError::MalformedResponse(_))));
    }

    #[test]
    fn test_json_uses_epoch_millis() {
        let table = RateTable::bootstrap(&registry());
        let json = serde_json::to_value(&table).unwrap();

        assert_eq!(json["fetched_at"], 0);
        assert_eq!(json["base"], "USD");

        let decoded: RateTable = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, table);
    }
}
