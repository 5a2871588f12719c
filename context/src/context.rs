//! The currency context: selection, rate refresh and price rendering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use stayfx_common::{
    is_older_than, system_clock, Currency, CurrencyCode, CurrencyRegistry, SharedClock, Timestamp,
};
use stayfx_fx::{
    AutoRefreshHandle, FxError, FxResult, HttpRateSource, PriceFormatter, PriceView, RateCache,
    RateCacheConfig, RateSource, RateTable, RefreshObserver, RefreshOutcome, RefreshState,
    TimedRateSource,
};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::ContextConfig;
use crate::error::{ContextError, ContextResult};
use crate::metrics::{RefreshMetrics, RefreshMetricsSnapshot};
use crate::persistence::{JsonFileStore, MemoryStore, PersistedState, StateStore};
use crate::state::ContextState;

/// What subscribers observe after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    /// Selected display currency.
    pub currency: CurrencyCode,
    /// At least one `refresh_rates` caller is waiting.
    pub is_loading: bool,
    /// Receipt time of the committed table, `None` while on bootstrap rates.
    pub last_updated: Option<Timestamp>,
    /// Why the latest refresh attempt did not commit.
    pub last_error: Option<FxError>,
    /// Whether the held table is older than the TTL.
    pub stale: bool,
}

/// State shared with the cache observer.
struct ContextShared {
    registry: Arc<CurrencyRegistry>,
    store: Arc<dyn StateStore>,
    selected: RwLock<CurrencyCode>,
    loading: AtomicUsize,
    metrics: RefreshMetrics,
    snapshots: watch::Sender<ContextSnapshot>,
    clock: SharedClock,
    ttl: Duration,
}

impl ContextShared {
    fn snapshot(&self, refresh: &RefreshState) -> ContextSnapshot {
        let stale = refresh
            .last_updated
            .map_or(true, |at| is_older_than(at, self.clock.utc(), self.ttl));

        ContextSnapshot {
            currency: self.selected.read().clone(),
            is_loading: self.loading.load(Ordering::SeqCst) > 0,
            last_updated: refresh.last_updated,
            last_error: refresh.last_error.clone(),
            stale,
        }
    }

    fn publish(&self, refresh: &RefreshState) {
        self.snapshots.send_replace(self.snapshot(refresh));
    }

    /// Write the record; failures are logged and swallowed.
    fn persist(&self, table: &RateTable) {
        let state = PersistedState {
            selected_code: Some(self.selected.read().to_string()),
            last_good_table: (!table.is_bootstrap()).then(|| table.clone()),
        };

        if let Err(error) = self.store.save(&state) {
            warn!(error = %error, "Failed to persist currency state");
        }
    }
}

/// Bridges cache transitions to persistence, metrics and subscribers.
struct ContextObserver {
    shared: Arc<ContextShared>,
}

impl RefreshObserver for ContextObserver {
    fn on_refresh_started(&self, state: &RefreshState) {
        self.shared.metrics.fetch_started();
        self.shared.publish(state);
    }

    fn on_commit(&self, table: &Arc<RateTable>, state: &RefreshState) {
        self.shared.metrics.committed();
        self.shared.persist(table);
        self.shared.publish(state);
    }

    fn on_refresh_finished(&self, outcome: &RefreshOutcome, state: &RefreshState) {
        self.shared.metrics.attempt_finished(outcome);
        self.shared.publish(state);
    }
}

/// Keeps `is_loading` raised while a `refresh_rates` caller waits.
struct LoadingGuard<'a> {
    context: &'a CurrencyContext,
}

impl<'a> LoadingGuard<'a> {
    fn enter(context: &'a CurrencyContext) -> Self {
        context.shared.loading.fetch_add(1, Ordering::SeqCst);
        context.publish();
        Self { context }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.context.shared.loading.fetch_sub(1, Ordering::SeqCst);
        self.context.publish();
    }
}

/// Currency selection and price rendering backed by a live rate cache.
///
/// Created by the application's composition root; independent instances
/// do not share state.
pub struct CurrencyContext {
    shared: Arc<ContextShared>,
    cache: RateCache,
    formatter: PriceFormatter,
    auto_refresh_enabled: bool,
    state: RwLock<ContextState>,
    auto_refresh: Mutex<Option<AutoRefreshHandle>>,
}

impl CurrencyContext {
    /// Load persisted state and build the context.
    ///
    /// A persisted selection that is no longer registered falls back to the
    /// base currency; a persisted table that does not fit the registry falls
    /// back to the bootstrap table. Neither is an error.
    pub fn init(
        config: &ContextConfig,
        registry: Arc<CurrencyRegistry>,
        source: Arc<dyn RateSource>,
        store: Arc<dyn StateStore>,
        clock: SharedClock,
    ) -> ContextResult<Self> {
        config.validate()?;

        let base = CurrencyCode::parse(&config.base_currency)
            .map_err(|e| ContextError::Configuration(e.to_string()))?;
        if &base != registry.base_code() {
            return Err(ContextError::Configuration(format!(
                "Base currency {base} does not match registry base {}",
                registry.base_code()
            )));
        }

        let persisted = match store.load() {
            Ok(persisted) => persisted.unwrap_or_default(),
            Err(error) => {
                warn!(error = %error, "Ignoring unreadable persisted state");
                PersistedState::default()
            }
        };

        let selected = persisted
            .selected_code
            .as_deref()
            .and_then(|code| match registry.resolve(code) {
                Ok(code) => Some(code),
                Err(error) => {
                    warn!(code, error = %error, "Persisted currency is not registered, using base");
                    None
                }
            })
            .unwrap_or_else(|| registry.base_code().clone());

        let table = persisted
            .last_good_table
            .and_then(|table| match table.normalized(&registry) {
                Ok(table) => Some(table),
                Err(error) => {
                    warn!(error = %error, "Persisted rate table is unusable, using bootstrap rates");
                    None
                }
            })
            .unwrap_or_else(|| RateTable::bootstrap(&registry));

        info!(
            currency = %selected,
            source = %table.source,
            fetched_at = %table.fetched_at,
            "Initializing currency context"
        );

        let cache = RateCache::with_config(
            source,
            table,
            clock.clone(),
            RateCacheConfig {
                ttl: config.rate_ttl,
            },
        );

        let (snapshots, _) = watch::channel(ContextSnapshot {
            currency: selected.clone(),
            is_loading: false,
            last_updated: None,
            last_error: None,
            stale: true,
        });

        let shared = Arc::new(ContextShared {
            registry,
            store,
            selected: RwLock::new(selected),
            loading: AtomicUsize::new(0),
            metrics: RefreshMetrics::new(),
            snapshots,
            clock,
            ttl: config.rate_ttl,
        });

        cache.add_observer(Arc::new(ContextObserver {
            shared: Arc::clone(&shared),
        }));

        let context = Self {
            shared,
            cache,
            formatter: PriceFormatter::new(config.rounding),
            auto_refresh_enabled: config.auto_refresh,
            state: RwLock::new(ContextState::Initializing),
            auto_refresh: Mutex::new(None),
        };
        context.publish();

        Ok(context)
    }

    /// Build a context from configuration alone: the builtin catalog, an
    /// HTTP source bounded by the fetch timeout, and a file or memory store.
    pub fn from_config(config: &ContextConfig) -> ContextResult<Self> {
        config.validate()?;

        let url = config.provider_url.clone().ok_or_else(|| {
            ContextError::Configuration("Provider URL is required".to_string())
        })?;

        let registry = Arc::new(
            CurrencyRegistry::builtin_with_base(&config.base_currency)
                .map_err(|e| ContextError::Configuration(e.to_string()))?,
        );

        let source = TimedRateSource::new(
            HttpRateSource::with_timeout(url, registry.clone(), config.fetch_timeout)?,
            config.fetch_timeout,
        );

        let store: Arc<dyn StateStore> = match &config.state_path {
            Some(path) => Arc::new(JsonFileStore::new(path)),
            None => Arc::new(MemoryStore::new()),
        };

        Self::init(config, registry, Arc::new(source), store, system_clock())
    }

    /// Schedule auto-refresh (when enabled). Must run inside a tokio runtime.
    #[instrument(skip(self))]
    pub fn start(&self) -> ContextResult<()> {
        let mut state = self.state.write();
        match *state {
            ContextState::Running => return Ok(()),
            ContextState::Stopped => {
                return Err(ContextError::Lifecycle(
                    "Cannot start a stopped context".to_string(),
                ))
            }
            ContextState::Initializing => {}
        }

        if self.auto_refresh_enabled {
            if tokio::runtime::Handle::try_current().is_err() {
                return Err(ContextError::Lifecycle(
                    "Auto-refresh requires a tokio runtime".to_string(),
                ));
            }
            *self.auto_refresh.lock() = Some(self.cache.spawn_auto_refresh());
        }

        *state = ContextState::Running;
        info!(
            auto_refresh = self.auto_refresh_enabled,
            ttl_secs = self.cache.ttl().as_secs(),
            "Currency context started"
        );
        Ok(())
    }

    /// Cancel auto-refresh. Idempotent; the held table stays in place.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let mut state = self.state.write();
        if *state == ContextState::Stopped {
            return;
        }

        if let Some(mut handle) = self.auto_refresh.lock().take() {
            handle.cancel();
        }

        *state = ContextState::Stopped;
        info!("Currency context stopped");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContextState {
        *self.state.read()
    }

    /// Check if the auto-refresh task is scheduled and alive.
    pub fn is_auto_refreshing(&self) -> bool {
        self.auto_refresh
            .lock()
            .as_ref()
            .is_some_and(AutoRefreshHandle::is_active)
    }

    /// Registered currencies, in catalog order.
    pub fn get_currencies(&self) -> &[Currency] {
        self.shared.registry.all()
    }

    /// Code of the selected currency.
    pub fn get_current_currency(&self) -> CurrencyCode {
        self.shared.selected.read().clone()
    }

    /// Metadata of the selected currency.
    pub fn current_currency(&self) -> Currency {
        let code = self.get_current_currency();
        self.shared
            .registry
            .get(code.as_str())
            .cloned()
            .unwrap_or_else(|_| self.shared.registry.base().clone())
    }

    /// Select the display currency.
    ///
    /// An unregistered code leaves the selection untouched and fails with
    /// [`FxError::UnknownCurrency`].
    #[instrument(skip(self))]
    pub fn set_current_currency(&self, code: &str) -> FxResult<()> {
        let code = self.shared.registry.resolve(code)?;

        {
            let mut selected = self.shared.selected.write();
            if *selected == code {
                return Ok(());
            }
            *selected = code.clone();
        }

        info!(currency = %code, "Display currency changed");
        self.shared.persist(&self.cache.current().table);
        self.publish();
        Ok(())
    }

    /// Convert a base-currency amount into the selected currency.
    pub fn convert_price(&self, amount: Decimal) -> FxResult<Decimal> {
        self.price_view().convert(amount)
    }

    /// Convert an amount in `from` into the selected currency.
    pub fn convert_price_from(&self, amount: Decimal, from: &str) -> FxResult<Decimal> {
        self.price_view().convert_from(amount, from)
    }

    /// Convert a base-currency amount and format it with minor units.
    pub fn format_price(&self, amount: Decimal) -> FxResult<String> {
        self.price_view().format(amount)
    }

    /// Convert a base-currency amount and format it.
    pub fn format_price_with(&self, amount: Decimal, with_decimals: bool) -> FxResult<String> {
        self.price_view().format_with(amount, with_decimals)
    }

    /// Pin the current table and selection for a render pass.
    pub fn price_view(&self) -> PriceView {
        PriceView::new(self.cache.current().table, self.current_currency(), self.formatter)
    }

    /// Fetch fresh rates, sharing any fetch already in flight.
    ///
    /// `is_loading` stays true until this call returns. Failures keep the
    /// previous table and are reported in the outcome and in `last_error`.
    #[instrument(skip(self))]
    pub async fn refresh_rates(&self) -> RefreshOutcome {
        self.shared.metrics.refresh_requested();
        let _loading = LoadingGuard::enter(self);

        let outcome = self.cache.refresh_now().await;
        debug!(committed = outcome.is_committed(), "Refresh finished");
        outcome
    }

    /// Check if any `refresh_rates` caller is waiting.
    pub fn is_loading(&self) -> bool {
        self.shared.loading.load(Ordering::SeqCst) > 0
    }

    /// Receipt time of the committed table.
    pub fn last_updated(&self) -> Option<Timestamp> {
        self.cache.refresh_state().last_updated
    }

    /// Why the latest refresh attempt did not commit.
    pub fn last_error(&self) -> Option<FxError> {
        self.cache.refresh_state().last_error
    }

    /// Current observable state.
    pub fn snapshot(&self) -> ContextSnapshot {
        self.shared.snapshot(&self.cache.refresh_state())
    }

    /// Receive a new snapshot after every transition.
    pub fn subscribe(&self) -> watch::Receiver<ContextSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Refresh counters.
    pub fn metrics(&self) -> RefreshMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Refresh counters in Prometheus text format.
    pub fn metrics_prometheus(&self) -> String {
        self.shared.metrics.to_prometheus()
    }

    /// The underlying cache, e.g. for pushing tables from another producer.
    pub fn cache(&self) -> &RateCache {
        &self.cache
    }

    /// The currency registry.
    pub fn registry(&self) -> &Arc<CurrencyRegistry> {
        &self.shared.registry
    }

    fn publish(&self) {
        self.shared.publish(&self.cache.refresh_state());
    }
}
