//! The authoritative rate table with TTL staleness, single-flight refresh
//! and monotonic commit.
//!
//! Reads never wait on the network: [`RateCache::current`] always returns
//! the last committed table (the bootstrap table at worst) while a refresh
//! runs in the background. Concurrent [`RateCache::refresh_now`] calls share
//! one upstream fetch. A fetch may only replace the held table if it started
//! no earlier than the fetch that produced it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use stayfx_common::{constants, SharedClock, Timestamp};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::FxError;
use crate::provider::RateSource;
use crate::rate_table::RateTable;

/// Configuration for the rate cache.
#[derive(Debug, Clone)]
pub struct RateCacheConfig {
    /// Age after which the held table is stale; also the auto-refresh period.
    pub ttl: Duration,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            ttl: constants::DEFAULT_RATE_TTL,
        }
    }
}

/// Result of a synchronous read.
#[derive(Debug, Clone)]
pub struct CacheRead {
    /// The held table.
    pub table: Arc<RateTable>,
    /// Whether the table is older than the TTL.
    pub stale: bool,
}

/// Whether a refresh is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    Idle,
    Refreshing,
}

/// Refresh bookkeeping surfaced to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshState {
    pub status: RefreshStatus,
    /// Receipt time of the last committed table.
    pub last_updated: Option<Timestamp>,
    /// Why the most recent attempt did not commit.
    pub last_error: Option<FxError>,
}

impl RefreshState {
    fn idle(last_updated: Option<Timestamp>) -> Self {
        Self {
            status: RefreshStatus::Idle,
            last_updated,
            last_error: None,
        }
    }

    /// Check if a refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.status == RefreshStatus::Refreshing
    }
}

/// Result of offering a table to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The table replaced the held one.
    Committed,
    /// The held table came from a later fetch; the offer was discarded.
    Superseded { current_started_at: Timestamp },
}

/// Result of a refresh attempt, shared by every caller attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Committed { fetched_at: Timestamp },
    Superseded {
        started_at: Timestamp,
        current_started_at: Timestamp,
    },
    Failed(FxError),
}

impl RefreshOutcome {
    /// Check if the attempt replaced the held table.
    pub fn is_committed(&self) -> bool {
        matches!(self, RefreshOutcome::Committed { .. })
    }

    /// The error recorded for an attempt that did not commit.
    pub fn error(&self) -> Option<FxError> {
        match self {
            RefreshOutcome::Committed { .. } => None,
            RefreshOutcome::Superseded {
                started_at,
                current_started_at,
            } => Some(FxError::Superseded {
                started_at: *started_at,
                current_started_at: *current_started_at,
            }),
            RefreshOutcome::Failed(error) => Some(error.clone()),
        }
    }
}

/// Receives cache transitions.
///
/// Callbacks run synchronously after the transition is complete and with no
/// cache lock held, so observers may read the cache.
pub trait RefreshObserver: Send + Sync {
    /// A fetch attempt began.
    fn on_refresh_started(&self, _state: &RefreshState) {}

    /// A new table was committed, by a refresh or by a direct `commit`.
    fn on_commit(&self, _table: &Arc<RateTable>, _state: &RefreshState) {}

    /// A fetch attempt ended.
    fn on_refresh_finished(&self, _outcome: &RefreshOutcome, _state: &RefreshState) {}
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct CacheInner {
    source: Arc<dyn RateSource>,
    clock: SharedClock,
    config: RateCacheConfig,
    table: RwLock<Arc<RateTable>>,
    state: RwLock<RefreshState>,
    in_flight: Mutex<Option<SharedRefresh>>,
    observers: RwLock<Vec<Arc<dyn RefreshObserver>>>,
}

impl CacheInner {
    fn current(&self) -> CacheRead {
        let table = self.table.read().clone();
        let stale = table.is_stale(self.clock.utc(), self.config.ttl);
        CacheRead { table, stale }
    }

    /// Join the in-flight attempt or start a new one.
    fn refresh(self: &Arc<Self>) -> SharedRefresh {
        let mut in_flight = self.in_flight.lock();
        if let Some(attempt) = in_flight.as_ref() {
            debug!("Joining in-flight rate refresh");
            return attempt.clone();
        }

        // The attempt runs on its own task so it completes even when every
        // caller stops waiting. Callers only share its join handle.
        let task = tokio::spawn(Arc::clone(self).run_attempt());
        let cache = Arc::downgrade(self);
        let attempt = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(error = %error, "Rate refresh task ended abnormally");
                    if let Some(inner) = cache.upgrade() {
                        inner.abandon_attempt();
                    }
                    RefreshOutcome::Failed(FxError::Network(format!(
                        "refresh task ended: {error}"
                    )))
                }
            }
        }
        .boxed()
        .shared();
        *in_flight = Some(attempt.clone());
        attempt
    }

    /// Reset bookkeeping for an attempt whose task never finished.
    fn abandon_attempt(&self) {
        *self.in_flight.lock() = None;
        self.update_state(|state| state.status = RefreshStatus::Idle);
    }

    async fn run_attempt(self: Arc<Self>) -> RefreshOutcome {
        let attempt_id = Uuid::now_v7();
        let started_at = self.clock.utc();

        let state = self.update_state(|state| state.status = RefreshStatus::Refreshing);
        self.notify(|observer| observer.on_refresh_started(&state));

        debug!(
            attempt_id = %attempt_id,
            source = self.source.name(),
            "Fetching rates"
        );

        let outcome = match self.source.fetch().await {
            Ok(mut table) => {
                table.fetch_started_at = started_at;
                table.fetched_at = self.clock.utc();
                let fetched_at = table.fetched_at;

                match self.commit(table) {
                    CommitOutcome::Committed => RefreshOutcome::Committed { fetched_at },
                    CommitOutcome::Superseded { current_started_at } => {
                        RefreshOutcome::Superseded {
                            started_at,
                            current_started_at,
                        }
                    }
                }
            }
            Err(error) => {
                warn!(
                    attempt_id = %attempt_id,
                    error = %error,
                    "Rate fetch failed, keeping last known table"
                );
                RefreshOutcome::Failed(error)
            }
        };

        *self.in_flight.lock() = None;

        let state = self.update_state(|state| {
            state.status = RefreshStatus::Idle;
            if let Some(error) = outcome.error() {
                state.last_error = Some(error);
            }
        });
        self.notify(|observer| observer.on_refresh_finished(&outcome, &state));

        outcome
    }

    fn commit(&self, table: RateTable) -> CommitOutcome {
        let table = Arc::new(table);
        {
            let mut held = self.table.write();
            if table.fetch_started_at < held.fetch_started_at {
                debug!(
                    started_at = %table.fetch_started_at,
                    current_started_at = %held.fetch_started_at,
                    "Discarding superseded rate table"
                );
                return CommitOutcome::Superseded {
                    current_started_at: held.fetch_started_at,
                };
            }
            *held = Arc::clone(&table);
        }

        let state = self.update_state(|state| {
            state.last_updated = Some(table.fetched_at);
            state.last_error = None;
        });

        info!(
            source = %table.source,
            fetched_at = %table.fetched_at,
            rates = table.rates.len(),
            "Committed rate table"
        );
        self.notify(|observer| observer.on_commit(&table, &state));

        CommitOutcome::Committed
    }

    fn update_state(&self, apply: impl FnOnce(&mut RefreshState)) -> RefreshState {
        let mut state = self.state.write();
        apply(&mut state);
        state.clone()
    }

    fn notify(&self, event: impl Fn(&dyn RefreshObserver)) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            event(observer.as_ref());
        }
    }
}

/// Shared handle to the rate cache.
#[derive(Clone)]
pub struct RateCache {
    inner: Arc<CacheInner>,
}

impl RateCache {
    /// Create a cache holding `initial` with the default configuration.
    pub fn new(source: Arc<dyn RateSource>, initial: RateTable, clock: SharedClock) -> Self {
        Self::with_config(source, initial, clock, RateCacheConfig::default())
    }

    /// Create a cache with custom configuration.
    pub fn with_config(
        source: Arc<dyn RateSource>,
        initial: RateTable,
        clock: SharedClock,
        config: RateCacheConfig,
    ) -> Self {
        let last_updated = (!initial.is_bootstrap()).then_some(initial.fetched_at);

        Self {
            inner: Arc::new(CacheInner {
                source,
                clock,
                config,
                table: RwLock::new(Arc::new(initial)),
                state: RwLock::new(RefreshState::idle(last_updated)),
                in_flight: Mutex::new(None),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// The held table and whether it is stale. Never waits on a fetch.
    pub fn current(&self) -> CacheRead {
        self.inner.current()
    }

    /// Fetch fresh rates, or attach to the fetch already in flight.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        let attempt = self.inner.refresh();
        attempt.await
    }

    /// Offer a table produced elsewhere, subject to the monotonic-commit rule.
    pub fn commit(&self, table: RateTable) -> CommitOutcome {
        self.inner.commit(table)
    }

    /// Current refresh bookkeeping.
    pub fn refresh_state(&self) -> RefreshState {
        self.inner.state.read().clone()
    }

    /// Check if a refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// The configured TTL.
    pub fn ttl(&self) -> Duration {
        self.inner.config.ttl
    }

    /// Register an observer for cache transitions.
    pub fn add_observer(&self, observer: Arc<dyn RefreshObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Start periodic refreshing.
    ///
    /// Refreshes once immediately if the held table is stale, then every TTL.
    /// The task ends when the handle is cancelled or dropped, or when every
    /// `RateCache` handle has been dropped.
    pub fn spawn_auto_refresh(&self) -> AutoRefreshHandle {
        let cache: Weak<CacheInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.ttl.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            if let Some(inner) = cache.upgrade() {
                if inner.current().stale {
                    info!("Held rate table is stale, refreshing now");
                    inner.refresh().await;
                }
            }

            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = cache.upgrade() else {
                    debug!("Rate cache dropped, stopping auto-refresh");
                    break;
                };
                inner.refresh().await;
            }
        });

        AutoRefreshHandle { task: Some(task) }
    }
}

/// Owns the auto-refresh task; cancelling or dropping it stops the timer.
#[derive(Debug)]
pub struct AutoRefreshHandle {
    task: Option<JoinHandle<()>>,
}

impl AutoRefreshHandle {
    /// Stop the timer. An attempt already in flight still runs to completion.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Auto-refresh cancelled");
        }
    }

    /// Check if the timer is still running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for AutoRefreshHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockRateSource;
    use mockable::Clock;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use stayfx_common::{CurrencyRegistry, ManualClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> CurrencyRegistry {
        CurrencyRegistry::builtin()
    }

    fn table_with_eur(eur: Decimal) -> RateTable {
        let registry = registry();
        let quotes = registry.codes().map(|code| {
            let rate = match code.as_str() {
                "USD" => Decimal::ONE,
                "EUR" => eur,
                _ => dec!(2),
            };
            (code.to_string(), rate)
        });
        RateTable::from_quotes(&registry, "USD", quotes, "test", stayfx_common::epoch()).unwrap()
    }

    fn setup(source: Arc<MockRateSource>) -> (RateCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::fixed());
        let cache = RateCache::new(source, RateTable::bootstrap(&registry()), clock.clone());
        (cache, clock)
    }

    #[derive(Default)]
    struct CountingObserver {
        started: AtomicUsize,
        commits: AtomicUsize,
        finished: AtomicUsize,
    }

    impl RefreshObserver for CountingObserver {
        fn on_refresh_started(&self, state: &RefreshState) {
            assert!(state.is_refreshing());
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_commit(&self, _table: &Arc<RateTable>, state: &RefreshState) {
            assert!(state.last_updated.is_some());
            self.commits.fetch_add(1, Ordering::SeqCst);
        }

        fn on_refresh_finished(&self, _outcome: &RefreshOutcome, state: &RefreshState) {
            assert!(!state.is_refreshing());
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_bootstrap_read_is_stale() {
        let (cache, _) = setup(Arc::new(MockRateSource::new("test")));
        let read = cache.current();

        assert!(read.stale);
        assert!(read.table.is_bootstrap());
        assert_eq!(cache.refresh_state().last_updated, None);
    }

    #[tokio::test]
    async fn test_refresh_commits_and_stamps() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.92))));
        let (cache, clock) = setup(source);

        let outcome = cache.refresh_now().await;

        assert_eq!(outcome, RefreshOutcome::Committed { fetched_at: clock.utc() });
        let read = cache.current();
        assert!(!read.stale);
        assert_eq!(read.table.rate("EUR").unwrap(), dec!(0.92));
        assert_eq!(read.table.fetch_started_at, clock.utc());

        let state = cache.refresh_state();
        assert_eq!(state.status, RefreshStatus::Idle);
        assert_eq!(state.last_updated, Some(clock.utc()));
        assert_eq!(state.last_error, None);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_fetch() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.92))));
        source.set_delay(Duration::from_millis(50));
        let (cache, _) = setup(source.clone());

        let (first, second) = tokio::join!(cache.refresh_now(), cache.refresh_now());

        assert_eq!(source.calls(), 1);
        assert_eq!(first, second);
        assert!(first.is_committed());
        assert!(!cache.is_refreshing());
    }

    #[tokio::test]
    async fn test_sequential_refreshes_fetch_again() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.92))));
        let (cache, _) = setup(source.clone());

        cache.refresh_now().await;
        cache.refresh_now().await;

        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_table() {
        let source = Arc::new(MockRateSource::new("test"));
        source.push_response(Ok(table_with_eur(dec!(0.92))));
        source.push_response(Err(FxError::Network("connection reset".into())));
        let (cache, clock) = setup(source);

        cache.refresh_now().await;
        let committed_at = clock.utc();
        clock.advance(Duration::from_secs(60));

        let outcome = cache.refresh_now().await;

        assert_eq!(outcome, RefreshOutcome::Failed(FxError::Network("connection reset".into())));
        assert_eq!(cache.current().table.rate("EUR").unwrap(), dec!(0.92));

        let state = cache.refresh_state();
        assert_eq!(state.last_updated, Some(committed_at));
        assert!(matches!(state.last_error, Some(FxError::Network(_))));
    }

    #[tokio::test]
    async fn test_success_clears_last_error() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.92))));
        source.push_response(Err(FxError::MalformedResponse("truncated".into())));
        let (cache, _) = setup(source);

        cache.refresh_now().await;
        assert!(cache.refresh_state().last_error.is_some());

        cache.refresh_now().await;
        assert_eq!(cache.refresh_state().last_error, None);
    }

    #[test]
    fn test_older_fetch_never_replaces_newer_table() {
        let (cache, clock) = setup(Arc::new(MockRateSource::new("test")));

        let mut newer = table_with_eur(dec!(0.93));
        newer.fetch_started_at = clock.utc() + chrono::Duration::seconds(10);
        let mut older = table_with_eur(dec!(0.80));
        older.fetch_started_at = clock.utc();

        assert_eq!(cache.commit(newer.clone()), CommitOutcome::Committed);
        assert_eq!(
            cache.commit(older),
            CommitOutcome::Superseded {
                current_started_at: newer.fetch_started_at
            }
        );
        assert_eq!(cache.current().table.rate("EUR").unwrap(), dec!(0.93));

        let mut same_start = table_with_eur(dec!(0.94));
        same_start.fetch_started_at = newer.fetch_started_at;
        assert_eq!(cache.commit(same_start), CommitOutcome::Committed);
    }

    #[tokio::test]
    async fn test_slow_fetch_is_discarded_after_newer_commit() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.80))));
        source.set_delay(Duration::from_millis(50));
        let (cache, clock) = setup(source);

        let slow = tokio::spawn({
            let cache = cache.clone();
            async move { cache.refresh_now().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut pushed = table_with_eur(dec!(0.93));
        pushed.fetch_started_at = clock.utc() + chrono::Duration::seconds(1);
        assert_eq!(cache.commit(pushed), CommitOutcome::Committed);

        let outcome = slow.await.unwrap();

        assert!(matches!(outcome, RefreshOutcome::Superseded { .. }));
        assert_eq!(cache.current().table.rate("EUR").unwrap(), dec!(0.93));
        assert!(matches!(
            cache.refresh_state().last_error,
            Some(FxError::Superseded { .. })
        ));
    }

    #[tokio::test]
    async fn test_observers_see_each_transition() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.92))));
        let (cache, _) = setup(source.clone());
        let observer = Arc::new(CountingObserver::default());
        cache.add_observer(observer.clone());

        cache.refresh_now().await;
        source.set_fallback(Err(FxError::Timeout(Duration::from_secs(1))));
        cache.refresh_now().await;

        assert_eq!(observer.started.load(Ordering::SeqCst), 2);
        assert_eq!(observer.commits.load(Ordering::SeqCst), 1);
        assert_eq!(observer.finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_auto_refresh_refreshes_stale_table_on_start() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.92))));
        let (cache, _) = setup(source.clone());

        let mut handle = cache.spawn_auto_refresh();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(source.calls(), 1);
        assert!(!cache.current().stale);
        assert!(handle.is_active());

        handle.cancel();
        assert!(!handle.is_active());
    }

    #[tokio::test]
    async fn test_auto_refresh_ticks_every_ttl() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.92))));
        let clock = Arc::new(ManualClock::fixed());
        let mut fresh = table_with_eur(dec!(0.90));
        fresh.fetched_at = clock.utc();
        fresh.source = "persisted".into();

        let cache = RateCache::with_config(
            source.clone(),
            fresh,
            clock,
            RateCacheConfig {
                ttl: Duration::from_millis(30),
            },
        );

        let handle = cache.spawn_auto_refresh();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(handle);

        let calls = source.calls();
        assert!(calls >= 2, "expected periodic refreshes, got {calls}");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.calls(), calls);
    }

    #[tokio::test]
    async fn test_fresh_table_skips_cold_start_refresh() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.92))));
        let clock = Arc::new(ManualClock::fixed());
        let mut fresh = table_with_eur(dec!(0.90));
        fresh.fetched_at = clock.utc();
        fresh.fetch_started_at = clock.utc();
        fresh.source = "persisted".into();

        let cache = RateCache::with_config(
            source.clone(),
            fresh,
            clock,
            RateCacheConfig {
                ttl: Duration::from_secs(3600),
            },
        );
        assert!(!cache.current().stale);

        let handle = cache.spawn_auto_refresh();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(source.calls(), 0);
        assert!(handle.is_active());
        assert_eq!(cache.current().table.source, "persisted");
    }

    #[tokio::test]
    async fn test_refresh_completes_after_caller_gives_up() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.92))));
        source.set_delay(Duration::from_millis(60));
        let (cache, clock) = setup(source.clone());

        let waited = tokio::time::timeout(Duration::from_millis(10), cache.refresh_now()).await;
        assert!(waited.is_err());
        assert!(cache.is_refreshing());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(source.calls(), 1);
        assert!(!cache.is_refreshing());
        let state = cache.refresh_state();
        assert_eq!(state.status, RefreshStatus::Idle);
        assert_eq!(state.last_updated, Some(clock.utc()));
        assert_eq!(cache.current().table.rate("EUR").unwrap(), dec!(0.92));
    }

    #[tokio::test]
    async fn test_cancelled_auto_refresh_lets_fetch_finish() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.92))));
        source.set_delay(Duration::from_millis(60));
        let (cache, _) = setup(source.clone());

        let mut handle = cache.spawn_auto_refresh();
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(source.calls(), 1);
        assert!(!cache.is_refreshing());
        assert!(cache.refresh_state().last_updated.is_some());
        assert!(!cache.current().stale);
    }

    #[tokio::test]
    async fn test_abandoned_refresh_does_not_keep_cache_alive() {
        let source = Arc::new(MockRateSource::new("test").with_table(table_with_eur(dec!(0.92))));
        source.set_delay(Duration::from_millis(30));
        let (cache, _) = setup(source);
        let inner = Arc::downgrade(&cache.inner);

        let waited = tokio::time::timeout(Duration::from_millis(5), cache.refresh_now()).await;
        assert!(waited.is_err());
        drop(cache);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(inner.upgrade().is_none());
    }
}
