//! Time utilities and constants for StayFX.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockable::Clock;

/// Timing defaults.
pub mod constants {
    use std::time::Duration;

    /// Age after which a rate table is stale (one hour).
    pub const DEFAULT_RATE_TTL: Duration = Duration::from_secs(60 * 60);

    /// Upper bound on a single upstream fetch (10 seconds).
    pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
}

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Clock shared between components.
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// The process clock.
pub fn system_clock() -> SharedClock {
    Arc::new(mockable::DefaultClock)
}

/// The UNIX epoch, used to mark tables that were never fetched.
pub fn epoch() -> Timestamp {
    DateTime::<Utc>::default()
}

/// Check whether `timestamp` is at least `ttl` old at `now`.
pub fn is_older_than(timestamp: Timestamp, now: Timestamp, ttl: Duration) -> bool {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now.signed_duration_since(timestamp) >= ttl,
        Err(_) => false,
    }
}

/// Milliseconds since the UNIX epoch.
pub fn to_millis(timestamp: Timestamp) -> i64 {
    timestamp.timestamp_millis()
}

/// Settable clock for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct ManualClock(parking_lot::Mutex<Timestamp>);

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self(parking_lot::Mutex::new(now))
    }

    /// Create a clock frozen at a fixed, arbitrary instant.
    pub fn fixed() -> Self {
        Self::new(DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_else(epoch))
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: Duration) {
        let delta = chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::zero());
        *self.0.lock() += delta;
    }

    /// Move the clock to an absolute instant.
    pub fn set(&self, now: Timestamp) {
        *self.0.lock() = now;
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for ManualClock {
    fn local(&self) -> DateTime<chrono::Local> {
        self.utc().with_timezone(&chrono::Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_older_than() {
        let clock = ManualClock::fixed();
        let fetched = clock.utc();

        clock.advance(Duration::from_secs(59 * 60));
        assert!(!is_older_than(fetched, clock.utc(), constants::DEFAULT_RATE_TTL));

        clock.advance(Duration::from_secs(60));
        assert!(is_older_than(fetched, clock.utc(), constants::DEFAULT_RATE_TTL));
    }

    #[test]
    fn test_epoch_is_always_old() {
        let clock = ManualClock::fixed();
        assert!(is_older_than(epoch(), clock.utc(), constants::DEFAULT_RATE_TTL));
        assert_eq!(to_millis(epoch()), 0);
    }
}
