//! Locale-invariant price formatting.

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use stayfx_common::Currency;

/// How amounts are rounded to a currency's minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundingPolicy {
    /// 2.5 → 3, -2.5 → -3.
    #[default]
    HalfAwayFromZero,
    /// Banker's rounding: 2.5 → 2, 3.5 → 4.
    HalfEven,
    /// Toward negative infinity.
    Floor,
}

impl RoundingPolicy {
    fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingPolicy::HalfAwayFromZero => RoundingStrategy::MidpointAwayFromZero,
            RoundingPolicy::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingPolicy::Floor => RoundingStrategy::ToNegativeInfinity,
        }
    }

    /// Canonical name, as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            RoundingPolicy::HalfAwayFromZero => "half-away-from-zero",
            RoundingPolicy::HalfEven => "half-even",
            RoundingPolicy::Floor => "floor",
        }
    }
}

impl fmt::Display for RoundingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "half-away-from-zero" | "half-up" => Ok(RoundingPolicy::HalfAwayFromZero),
            "half-even" | "bankers" => Ok(RoundingPolicy::HalfEven),
            "floor" => Ok(RoundingPolicy::Floor),
            other => Err(format!("unknown rounding policy: {other}")),
        }
    }
}

/// Renders amounts as `<sign><symbol><grouped integer>[.<fraction>]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceFormatter {
    rounding: RoundingPolicy,
}

impl PriceFormatter {
    /// Create a formatter with the given rounding policy.
    pub fn new(rounding: RoundingPolicy) -> Self {
        Self { rounding }
    }

    /// The rounding policy in use.
    pub fn rounding(&self) -> RoundingPolicy {
        self.rounding
    }

    /// Format `amount` in `currency`.
    ///
    /// Rounds to the currency's minor units, or to whole units when
    /// `with_decimals` is false.
    pub fn format(&self, amount: Decimal, currency: &Currency, with_decimals: bool) -> String {
        let digits = if with_decimals {
            currency.decimal_digits
        } else {
            0
        };

        let mut rounded = amount.round_dp_with_strategy(digits, self.rounding.strategy());
        rounded.rescale(digits);

        let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
            "-"
        } else {
            ""
        };

        let digits_text = rounded.abs().to_string();
        let (integer, fraction) = match digits_text.split_once('.') {
            Some((integer, fraction)) => (integer, Some(fraction)),
            None => (digits_text.as_str(), None),
        };

        let mut out = String::with_capacity(digits_text.len() + currency.symbol.len() + 8);
        out.push_str(sign);
        out.push_str(&currency.symbol);
        out.push_str(&group_thousands(integer));
        if let Some(fraction) = fraction {
            out.push('.');
            out.push_str(fraction);
        }
        out
    }
}

/// Format with the default rounding policy.
pub fn format(amount: Decimal, currency: &Currency, with_decimals: bool) -> String {
    PriceFormatter::default().format(amount, currency, with_decimals)
}

fn group_thousands(integer: &str) -> String {
    let len = integer.len();
    let mut grouped = String::with_capacity(len + len / 3);
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
