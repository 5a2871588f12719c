//! Currency conversion against a rate table.

use std::sync::Arc;

use rust_decimal::Decimal;
use stayfx_common::{Currency, CurrencyCode};

use crate::error::{FxError, FxResult};
use crate::format::PriceFormatter;
use crate::rate_table::RateTable;

/// Convert `amount` from one currency to another.
///
/// `amount * rate(to) / rate(from)`, unrounded. Both codes are checked
/// against the table first; converting a currency to itself then returns
/// `amount` unchanged.
pub fn convert(amount: Decimal, from: &str, to: &str, table: &RateTable) -> FxResult<Decimal> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(FxError::InvalidAmount(amount.to_string()));
    }

    let (from_code, from_rate) = table.entry(from)?;
    let (to_code, to_rate) = table.entry(to)?;

    if from_code == to_code {
        return Ok(amount);
    }

    amount
        .checked_mul(to_rate)
        .and_then(|scaled| scaled.checked_div(from_rate))
        .ok_or_else(|| {
            FxError::InvalidAmount(format!("{amount} {from_code} overflows in {to_code}"))
        })
}

/// Convert a host float into an amount.
///
/// Rejects NaN, infinities and negative values.
pub fn amount_from_f64(value: f64) -> FxResult<Decimal> {
    if !value.is_finite() {
        return Err(FxError::InvalidAmount(value.to_string()));
    }
    if value < 0.0 {
        return Err(FxError::InvalidAmount(value.to_string()));
    }
    Decimal::try_from(value).map_err(|e| FxError::InvalidAmount(format!("{value}: {e}")))
}

/// One rate table paired with one display currency.
///
/// Every conversion made through a view uses the same table, so a page
/// rendered from a single view never mixes rates from two refreshes.
#[derive(Debug, Clone)]
pub struct PriceView {
    table: Arc<RateTable>,
    currency: Currency,
    formatter: PriceFormatter,
}

impl PriceView {
    /// Create a view displaying prices in `currency`.
    pub fn new(table: Arc<RateTable>, currency: Currency, formatter: PriceFormatter) -> Self {
        Self {
            table,
            currency,
            formatter,
        }
    }

    /// The display currency.
    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// The table snapshot backing this view.
    pub fn table(&self) -> &Arc<RateTable> {
        &self.table
    }

    /// Convert a base-currency amount into the display currency.
    pub fn convert(&self, amount: Decimal) -> FxResult<Decimal> {
        let base = self.table.base.clone();
        self.convert_from(amount, base.as_str())
    }

    /// Convert an amount in `from` into the display currency.
    pub fn convert_from(&self, amount: Decimal, from: &str) -> FxResult<Decimal> {
        convert(amount, from, self.currency.code.as_str(), &self.table)
    }

    /// Convert a base-currency amount and format it with minor units.
    pub fn format(&self, amount: Decimal) -> FxResult<String> {
        self.format_with(amount, true)
    }

    /// Convert a base-currency amount and format it.
    pub fn format_with(&self, amount: Decimal, with_decimals: bool) -> FxResult<String> {
        let converted = self.convert(amount)?;
        Ok(self
            .formatter
            .format(converted, &self.currency, with_decimals))
    }

    /// Code of the display currency.
    pub fn code(&self) -> &CurrencyCode {
        &self.currency.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use stayfx_common::{epoch, CurrencyRegistry};

    fn market_table() -> RateTable {
        let registry = CurrencyRegistry::builtin();
        let quotes = [
            ("USD", dec!(1)),
            ("EUR", dec!(0.92)),
            ("GBP", dec!(0.79)),
            ("JPY", dec!(151.37)),
            ("CAD", dec!(1.36)),
            ("AUD", dec!(1.52)),
            ("CHF", dec!(0.88)),
            ("CNY", dec!(7.24)),
            ("INR", dec!(83.41)),
            ("MXN", dec!(16.72)),
            ("BRL", dec!(5.05)),
            ("KRW", dec!(1342.5)),
            ("SGD", dec!(1.35)),
            ("AED", dec!(3.6725)),
            ("ZAR", dec!(18.61)),
        ];
        RateTable::from_quotes(
            &registry,
            "USD",
            quotes.iter().map(|(code, rate)| (code.to_string(), *rate)),
            "test",
            epoch(),
        )
        .unwrap()
    }

    fn codes() -> Vec<String> {
        CurrencyRegistry::builtin()
            .codes()
            .map(|code| code.to_string())
            .collect()
    }

    #[test]
    fn test_convert_from_base() {
        let table = market_table();

        assert_eq!(convert(dec!(100), "USD", "EUR", &table).unwrap(), dec!(92.00));
        assert_eq!(convert(dec!(100), "USD", "USD", &table).unwrap(), dec!(100));
    }

    #[test]
    fn test_cross_conversion_goes_through_base() {
        let table = market_table();

        let gbp = convert(dec!(92), "EUR", "GBP", &table).unwrap();
        assert_eq!(gbp, dec!(79));
    }

    #[test]
    fn test_same_currency_is_untouched() {
        let table = RateTable::bootstrap(&CurrencyRegistry::builtin());
        let amount = dec!(0.123456789);

        assert_eq!(convert(amount, "jpy", "JPY", &table).unwrap(), amount);
    }

    #[test]
    fn test_rejects_unknown_codes_and_negative_amounts() {
        let table = market_table();

        assert_eq!(
            convert(dec!(1), "USD", "ZZZ", &table),
            Err(FxError::UnknownCurrency("ZZZ".into()))
        );
        assert_eq!(
            convert(dec!(1), "ZZZ", "ZZZ", &table),
            Err(FxError::UnknownCurrency("ZZZ".into()))
        );
        assert!(matches!(
            convert(dec!(-1), "USD", "EUR", &table),
            Err(FxError::InvalidAmount(_))
        ));
        assert_eq!(convert(dec!(0), "USD", "EUR", &table).unwrap(), dec!(0));
    }

    #[test]
    fn test_overflow_is_invalid_amount() {
        let table = market_table();

        assert!(matches!(
            convert(Decimal::MAX, "USD", "KRW", &table),
            Err(FxError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_amount_from_f64() {
        assert_eq!(amount_from_f64(12.5).unwrap(), dec!(12.5));
        assert!(matches!(amount_from_f64(f64::NAN), Err(FxError::InvalidAmount(_))));
        assert!(matches!(amount_from_f64(f64::INFINITY), Err(FxError::InvalidAmount(_))));
        assert!(matches!(amount_from_f64(-0.01), Err(FxError::InvalidAmount(_))));
    }

    #[test]
    fn test_price_view_uses_its_snapshot() {
        let registry = CurrencyRegistry::builtin();
        let eur = registry.get("EUR").unwrap().clone();
        let view = PriceView::new(Arc::new(market_table()), eur, PriceFormatter::default());

        assert_eq!(view.convert(dec!(100)).unwrap(), dec!(92.00));
        assert_eq!(view.convert_from(dec!(79), "GBP").unwrap(), dec!(92));
        assert_eq!(view.format(dec!(1500)).unwrap(), "€1,380.00");
        assert_eq!(view.format_with(dec!(1500), false).unwrap(), "€1,380");
        assert_eq!(view.code().as_str(), "EUR");
    }

    proptest! {
        #[test]
        fn prop_identity(cents in 0i64..10_000_000_000_000, code in prop::sample::select(codes())) {
            let amount = Decimal::new(cents, 2);
            let table = market_table();

            prop_assert_eq!(convert(amount, &code, &code, &table).unwrap(), amount);
        }

        #[test]
        fn prop_round_trip(
            cents in 0i64..10_000_000_000_000,
            from in prop::sample::select(codes()),
            to in prop::sample::select(codes()),
        ) {
            let amount = Decimal::new(cents, 2);
            let table = market_table();

            let there = convert(amount, &from, &to, &table).unwrap();
            let back = convert(there, &to, &from, &table).unwrap();

            prop_assert!((back - amount).abs() <= dec!(0.000001), "{amount} -> {there} -> {back}");
        }
    }
}
