//! Refresh counters for context monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use stayfx_fx::RefreshOutcome;

/// Refresh metrics.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
    /// `refresh_rates` calls.
    pub refresh_requests: AtomicU64,
    /// Upstream fetches actually started.
    pub fetch_attempts: AtomicU64,
    /// Tables committed, from any producer.
    pub commits: AtomicU64,
    /// Attempts that failed to fetch a usable table.
    pub failures: AtomicU64,
    /// Attempts discarded because a newer table was already held.
    pub superseded: AtomicU64,
}

impl RefreshMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a caller asking for a refresh.
    pub fn refresh_requested(&self) {
        self.refresh_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an upstream fetch starting.
    pub fn fetch_started(&self) {
        self.fetch_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed table.
    pub fn committed(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how an attempt ended. Commits are counted by [`Self::committed`].
    pub fn attempt_finished(&self, outcome: &RefreshOutcome) {
        match outcome {
            RefreshOutcome::Committed { .. } => {}
            RefreshOutcome::Superseded { .. } => {
                self.superseded.fetch_add(1, Ordering::Relaxed);
            }
            RefreshOutcome::Failed(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> RefreshMetricsSnapshot {
        RefreshMetricsSnapshot {
            refresh_requests: self.refresh_requests.load(Ordering::Relaxed),
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP stayfx_refresh_requests Total refresh requests
# TYPE stayfx_refresh_requests counter
stayfx_refresh_requests {}

# HELP stayfx_fetch_attempts Total upstream fetches
# TYPE stayfx_fetch_attempts counter
stayfx_fetch_attempts {}

# HELP stayfx_commits Total committed rate tables
# TYPE stayfx_commits counter
stayfx_commits {}

# HELP stayfx_failures Total failed fetches
# TYPE stayfx_failures counter
stayfx_failures {}

# HELP stayfx_superseded Total superseded fetches
# TYPE stayfx_superseded counter
stayfx_superseded {}
"#,
            snapshot.refresh_requests,
            snapshot.fetch_attempts,
            snapshot.commits,
            snapshot.failures,
            snapshot.superseded,
        )
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshMetricsSnapshot {
    pub refresh_requests: u64,
    pub fetch_attempts: u64,
    pub commits: u64,
    pub failures: u64,
    pub superseded: u64,
}

impl RefreshMetricsSnapshot {
    /// Fraction of fetch attempts that committed.
    pub fn commit_rate(&self) -> f64 {
        if self.fetch_attempts == 0 {
            return 0.0;
        }
        self.commits.min(self.fetch_attempts) as f64 / self.fetch_attempts as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stayfx_fx::FxError;

    #[test]
    fn test_outcomes_are_counted() {
        let metrics = RefreshMetrics::new();
        metrics.refresh_requested();
        metrics.fetch_started();
        metrics.fetch_started();
        metrics.committed();
        metrics.attempt_finished(&RefreshOutcome::Committed {
            fetched_at: stayfx_common::epoch(),
        });
        metrics.attempt_finished(&RefreshOutcome::Failed(FxError::Network("down".into())));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.refresh_requests, 1);
        assert_eq!(snapshot.fetch_attempts, 2);
        assert_eq!(snapshot.commits, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.superseded, 0);
        assert!((snapshot.commit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = RefreshMetrics::new();
        metrics.committed();

        let text = metrics.to_prometheus();
        assert!(text.contains("stayfx_commits 1"));
        assert!(text.contains("# TYPE stayfx_failures counter"));
    }
}
