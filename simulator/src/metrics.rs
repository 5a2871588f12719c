//! Simulation metrics.

use std::collections::VecDeque;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Refreshes requested by the simulated users.
    pub total_refreshes: u64,
    /// Refreshes that committed a new table.
    pub committed_refreshes: u64,
    /// Refreshes that failed or were superseded.
    pub failed_refreshes: u64,
    /// Prices rendered.
    pub renders: u64,
    /// Currency switches.
    pub currency_switches: u64,
    /// Refresh latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_refreshes: 0,
            committed_refreshes: 0,
            failed_refreshes: 0,
            renders: 0,
            currency_switches: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a refresh and how long the caller waited.
    pub fn record_refresh(&mut self, committed: bool, latency_ms: u64) {
        self.total_refreshes += 1;
        if committed {
            self.committed_refreshes += 1;
        } else {
            self.failed_refreshes += 1;
        }

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Record rendered prices.
    pub fn record_renders(&mut self, count: u64) {
        self.renders += count;
    }

    /// Record a currency switch.
    pub fn record_switch(&mut self) {
        self.currency_switches += 1;
    }

    /// Get average refresh latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 refresh latency.
    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Fraction of refreshes that committed.
    pub fn success_rate(&self) -> f64 {
        if self.total_refreshes == 0 {
            return 0.0;
        }

        self.committed_refreshes as f64 / self.total_refreshes as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_refresh(true, 100);
        metrics.record_refresh(true, 200);
        metrics.record_refresh(true, 150);
        metrics.record_refresh(false, 10);
        metrics.record_renders(12);

        assert_eq!(metrics.total_refreshes, 4);
        assert_eq!(metrics.committed_refreshes, 3);
        assert_eq!(metrics.failed_refreshes, 1);
        assert_eq!(metrics.renders, 12);
        assert_eq!(metrics.average_latency_ms(), 115);
        assert_eq!(metrics.p99_latency_ms(), 200);
        assert_eq!(metrics.success_rate(), 0.75);
    }
}
