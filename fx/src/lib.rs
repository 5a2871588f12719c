//! StayFX exchange-rate engine
//!
//! Fetches exchange rates from an upstream provider, keeps the last good
//! table cached, and converts and formats prices against it.
//!
//! # Features
//!
//! - Pluggable rate sources with timeout bounding
//! - Stale-while-revalidate cache with single-flight refresh
//! - Monotonic commit: a slow, older fetch never replaces a newer table
//! - Exact decimal conversion and locale-invariant price formatting
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stayfx_common::{system_clock, CurrencyRegistry};
//! use stayfx_fx::{HttpRateSource, RateCache, RateTable};
//!
//! let registry = Arc::new(CurrencyRegistry::builtin());
//! let source = Arc::new(HttpRateSource::new("https://rates.example/latest", registry.clone())?);
//! let cache = RateCache::new(source, RateTable::bootstrap(&registry), system_clock());
//!
//! cache.refresh_now().await;
//! let eur = stayfx_fx::convert(dec!(100), "USD", "EUR", &cache.current().table)?;
//! ```

pub mod cache;
pub mod conversion;
pub mod error;
pub mod format;
pub mod provider;
pub mod rate_table;

pub use cache::{
    AutoRefreshHandle, CacheRead, CommitOutcome, RateCache, RateCacheConfig, RefreshObserver,
    RefreshOutcome, RefreshState, RefreshStatus,
};
pub use conversion::{amount_from_f64, convert, PriceView};
pub use error::{FxError, FxResult};
pub use format::{PriceFormatter, RoundingPolicy};
pub use provider::{HttpRateSource, RateSource, TimedRateSource};
pub use rate_table::RateTable;

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateSource;
