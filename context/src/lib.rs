//! StayFX Currency Context
//!
//! Owns the user's display currency and a live rate cache, and renders
//! base-currency prices in the selected currency. Selection and the last
//! good rate table survive restarts through a [`StateStore`].

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod persistence;
pub mod state;

pub use config::{ConfigEnv, ContextConfig, DefaultConfigEnv};
pub use context::{ContextSnapshot, CurrencyContext};
pub use error::{ContextError, ContextResult};
pub use metrics::{RefreshMetrics, RefreshMetricsSnapshot};
pub use persistence::{JsonFileStore, MemoryStore, PersistedState, StateStore};
pub use state::ContextState;
