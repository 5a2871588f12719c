//! Rate source trait and implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use stayfx_common::{constants, system_clock, CurrencyRegistry, SharedClock, Timestamp};
use tracing::{debug, instrument};

use crate::error::{FxError, FxResult};
use crate::rate_table::RateTable;

/// Trait for upstream rate providers.
///
/// Each call is an independent attempt; retries belong to the caller.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Fetch a complete, validated rate table.
    async fn fetch(&self) -> FxResult<RateTable>;
}

#[async_trait]
impl<T: RateSource + ?Sized> RateSource for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch(&self) -> FxResult<RateTable> {
        (**self).fetch().await
    }
}

/// Upstream payload: `{base, rates, timestamp}`.
#[derive(Debug, Deserialize)]
struct UpstreamRates {
    base: String,
    rates: HashMap<String, f64>,
    /// Publication time in seconds since the UNIX epoch.
    timestamp: i64,
}

impl UpstreamRates {
    fn into_table(
        self,
        registry: &CurrencyRegistry,
        source: &str,
        fetched_at: Timestamp,
    ) -> FxResult<RateTable> {
        let mut quotes = Vec::with_capacity(self.rates.len());
        for (code, rate) in self.rates {
            if !rate.is_finite() {
                return Err(FxError::MalformedResponse(format!(
                    "rate for {code} is not finite"
                )));
            }
            let rate = Decimal::try_from(rate).map_err(|e| {
                FxError::MalformedResponse(format!("rate for {code} is not representable: {e}"))
            })?;
            quotes.push((code, rate));
        }

        let published_at = DateTime::from_timestamp(self.timestamp, 0);
        Ok(
            RateTable::from_quotes(registry, &self.base, quotes, source, fetched_at)?
                .with_published_at(published_at),
        )
    }
}

/// Fetches rates over HTTP from a JSON endpoint.
pub struct HttpRateSource {
    client: Client,
    url: String,
    registry: Arc<CurrencyRegistry>,
    clock: SharedClock,
    timeout: Duration,
}

impl HttpRateSource {
    /// Create a source for `url` with the default timeout.
    pub fn new(url: impl Into<String>, registry: Arc<CurrencyRegistry>) -> FxResult<Self> {
        Self::with_timeout(url, registry, constants::DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a source whose requests are bounded by `timeout`.
    pub fn with_timeout(
        url: impl Into<String>,
        registry: Arc<CurrencyRegistry>,
        timeout: Duration,
    ) -> FxResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FxError::Network(format!("Cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            registry,
            clock: system_clock(),
            timeout,
        })
    }

    /// Upper bound on one request.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Use a different clock for receipt stamps.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    fn transport_error(&self, error: reqwest::Error) -> FxError {
        if error.is_timeout() {
            FxError::Timeout(self.timeout)
        } else {
            FxError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    fn name(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> FxResult<RateTable> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FxError::Network(format!("provider answered {status}")));
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let upstream: UpstreamRates = serde_json::from_str(&body)
            .map_err(|e| FxError::MalformedResponse(e.to_string()))?;

        let table = upstream.into_table(&self.registry, &self.url, self.clock.utc())?;
        debug!(rates = table.rates.len(), "Decoded upstream rates");
        Ok(table)
    }
}

/// Bounds any source with a deadline.
pub struct TimedRateSource<S> {
    inner: S,
    timeout: Duration,
}

impl<S: RateSource> TimedRateSource<S> {
    /// Wrap `inner`, failing with [`FxError::Timeout`] after `timeout`.
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<S: RateSource> RateSource for TimedRateSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(&self) -> FxResult<RateTable> {
        tokio::time::timeout(self.timeout, self.inner.fetch())
            .await
            .map_err(|_| FxError::Timeout(self.timeout))?
    }
}

/// Scripted rate source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    name: String,
    script: parking_lot::Mutex<std::collections::VecDeque<FxResult<RateTable>>>,
    fallback: parking_lot::Mutex<Option<FxResult<RateTable>>>,
    delay: parking_lot::Mutex<Duration>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    /// Create a mock with no responses.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            fallback: parking_lot::Mutex::new(None),
            delay: parking_lot::Mutex::new(Duration::ZERO),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Answer every fetch with `table` once the script is exhausted.
    pub fn with_table(self, table: RateTable) -> Self {
        *self.fallback.lock() = Some(Ok(table));
        self
    }

    /// Answer every fetch with `result` once the script is exhausted.
    pub fn set_fallback(&self, result: FxResult<RateTable>) {
        *self.fallback.lock() = Some(result);
    }

    /// Queue a one-shot response.
    pub fn push_response(&self, result: FxResult<RateTable>) {
        self.script.lock().push_back(result);
    }

    /// Delay every fetch by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Number of fetches performed.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> FxResult<RateTable> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(result) = self.script.lock().pop_front() {
            return result;
        }
        self.fallback
            .lock()
            .clone()
            .unwrap_or_else(|| Err(FxError::Network("no scripted response".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stayfx_common::{epoch, CurrencyCode};

    fn registry() -> CurrencyRegistry {
        CurrencyRegistry::builtin()
    }

    fn upstream_json(registry: &CurrencyRegistry, skip: Option<&str>) -> String {
        let rates: serde_json::Map<String, serde_json::Value> = registry
            .codes()
            .filter(|code| Some(code.as_str()) != skip)
            .map(|code| {
                let rate = if code == registry.base_code() { 1.0 } else { 1.5 };
                (code.to_string(), serde_json::json!(rate))
            })
            .collect();
        serde_json::json!({ "base": "USD", "rates": rates, "timestamp": 1_700_000_000 })
            .to_string()
    }

    #[test]
    fn test_upstream_payload_decodes() {
        let registry = registry();
        let upstream: UpstreamRates =
            serde_json::from_str(&upstream_json(&registry, None)).unwrap();

        let table = upstream.into_table(&registry, "test", epoch()).unwrap();

        assert_eq!(table.rates.len(), registry.len());
        assert_eq!(table.rate("EUR").unwrap(), dec!(1.5));
        assert_eq!(table.base, CurrencyCode::usd());
        assert_eq!(table.published_at, DateTime::from_timestamp(1_700_000_000, 0));
    }

    #[test]
    fn test_upstream_missing_currency_is_malformed() {
        let registry = registry();
        let upstream: UpstreamRates =
            serde_json::from_str(&upstream_json(&registry, Some("JPY"))).unwrap();

        let result = upstream.into_table(&registry, "test", epoch());
        assert!(matches!(result, Err(FxError::MalformedResponse(_))));
    }

    #[test]
    fn test_upstream_missing_field_fails_to_decode() {
        let result: Result<UpstreamRates, _> =
            serde_json::from_str(r#"{"base": "USD", "timestamp": 1}"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_timed_source_times_out() {
        let mock = MockRateSource::new("slow").with_table(RateTable::bootstrap(&registry()));
        mock.set_delay(Duration::from_millis(200));

        let timed = TimedRateSource::new(mock, Duration::from_millis(20));
        let result = timed.fetch().await;

        assert_eq!(result, Err(FxError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_mock_source_script_then_fallback() {
        let table = RateTable::bootstrap(&registry());
        let mock = MockRateSource::new("test").with_table(table.clone());
        mock.push_response(Err(FxError::Network("down".into())));

        assert!(matches!(mock.fetch().await, Err(FxError::Network(_))));
        assert_eq!(mock.fetch().await.unwrap(), table);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_http_source_unreachable_is_network_error() {
        let source = HttpRateSource::with_timeout(
            "http://127.0.0.1:9/latest",
            Arc::new(registry()),
            Duration::from_secs(2),
        )
        .unwrap();

        let result = source.fetch().await;
        assert!(matches!(
            result,
            Err(FxError::Network(_)) | Err(FxError::Timeout(_))
        ));
    }

    #[test]
    fn test_http_source_keeps_configured_timeout() {
        let source = HttpRateSource::with_timeout(
            "https://rates.example/latest",
            Arc::new(registry()),
            Duration::from_millis(750),
        )
        .unwrap();
        assert_eq!(source.timeout(), Duration::from_millis(750));

        let source = HttpRateSource::new("https://rates.example/latest", Arc::new(registry())).unwrap();
        assert_eq!(source.timeout(), constants::DEFAULT_FETCH_TIMEOUT);
    }
}
