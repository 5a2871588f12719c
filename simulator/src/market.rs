//! Simulated upstream rate provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use rust_decimal::Decimal;
use stayfx_common::{CurrencyRegistry, SharedClock};
use stayfx_fx::{FxError, FxResult, RateSource, RateTable};
use tracing::debug;

/// Mid-market rates per USD the random walk starts from.
const REFERENCE_RATES: &[(&str, f64)] = &[
    ("USD", 1.0),
    ("EUR", 0.92),
    ("GBP", 0.79),
    ("JPY", 151.37),
    ("CAD", 1.36),
    ("AUD", 1.52),
    ("CHF", 0.88),
    ("CNY", 7.24),
    ("INR", 83.41),
    ("MXN", 16.72),
    ("BRL", 5.05),
    ("KRW", 1342.5),
    ("SGD", 1.35),
    ("AED", 3.6725),
    ("ZAR", 18.61),
];

/// Faults the market can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketFault {
    /// Every fetch fails with a network error.
    Outage,
    /// Every fetch answers with an incomplete table.
    Malformed,
    /// Every fetch takes this long before answering.
    Latency(Duration),
}

/// A rate provider whose rates drift by a bounded random walk.
pub struct SimulatedMarket {
    registry: Arc<CurrencyRegistry>,
    clock: SharedClock,
    rng: Mutex<StdRng>,
    rates: Mutex<Vec<(String, f64)>>,
    failure_rate: f64,
    latency: Duration,
    volatility: f64,
    fault: Mutex<Option<MarketFault>>,
}

impl SimulatedMarket {
    /// Create a market quoting every registered currency.
    pub fn new(
        registry: Arc<CurrencyRegistry>,
        clock: SharedClock,
        rng: StdRng,
        failure_rate: f64,
        latency: Duration,
    ) -> Self {
        let rates = registry
            .codes()
            .map(|code| {
                let reference = REFERENCE_RATES
                    .iter()
                    .find(|(c, _)| *c == code.as_str())
                    .map_or(1.0, |(_, rate)| *rate);
                (code.to_string(), reference)
            })
            .collect();

        Self {
            registry,
            clock,
            rng: Mutex::new(rng),
            rates: Mutex::new(rates),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
            volatility: 0.002,
            fault: Mutex::new(None),
        }
    }

    /// Force a fault until cleared.
    pub fn inject(&self, fault: MarketFault) {
        *self.fault.lock() = Some(fault);
    }

    /// Clear any injected fault.
    pub fn clear(&self) {
        *self.fault.lock() = None;
    }

    /// The injected fault, if any.
    pub fn fault(&self) -> Option<MarketFault> {
        *self.fault.lock()
    }

    /// Move every non-base rate by up to `volatility` in either direction.
    fn tick(&self) -> Vec<(String, f64)> {
        let base = self.registry.base_code().as_str();
        let mut rng = self.rng.lock();
        let mut rates = self.rates.lock();
        for (code, rate) in rates.iter_mut() {
            if code != base {
                let drift = rng.gen_range(-self.volatility..=self.volatility);
                *rate = (*rate * (1.0 + drift)).max(f64::MIN_POSITIVE);
            }
        }
        rates.clone()
    }

    fn should_fail(&self) -> bool {
        self.failure_rate > 0.0 && self.rng.lock().gen_bool(self.failure_rate)
    }

    fn latency(&self) -> Duration {
        match self.fault() {
            Some(MarketFault::Latency(latency)) => latency,
            _ => self.latency,
        }
    }
}

#[async_trait]
impl RateSource for SimulatedMarket {
    fn name(&self) -> &str {
        "simulated-market"
    }

    async fn fetch(&self) -> FxResult<RateTable> {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match self.fault() {
            Some(MarketFault::Outage) => {
                return Err(FxError::Network("simulated outage".to_string()))
            }
            Some(MarketFault::Malformed) => {
                return Err(FxError::MalformedResponse(
                    "simulated truncated payload".to_string(),
                ))
            }
            _ => {}
        }

        if self.should_fail() {
            return Err(FxError::Network("simulated connection reset".to_string()));
        }

        let quotes = self
            .tick()
            .into_iter()
            .map(|(code, rate)| {
                Decimal::try_from(rate)
                    .map(|rate| (code.clone(), rate.round_dp(6)))
                    .map_err(|e| FxError::MalformedResponse(format!("{code}: {e}")))
            })
            .collect::<FxResult<Vec<_>>>()?;

        let base = self.registry.base_code().to_string();
        let table = RateTable::from_quotes(&self.registry, &base, quotes, self.name(), self.clock.utc())?;
        debug!(rates = table.rates.len(), "Simulated market quoted");
        Ok(table)
    }
}
