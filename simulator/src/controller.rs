//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rust_decimal::Decimal;
use stayfx_context::CurrencyContext;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::market::{MarketFault, SimulatedMarket};
use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, FaultType, Scenario, ScenarioStep};

/// Sample listings with nightly prices in the base currency.
const LISTINGS: &[(&str, i64)] = &[
    ("Harbour loft", 18900),
    ("Alpine chalet", 42500),
    ("City studio", 8750),
    ("Beach villa", 129900),
];

/// Drives a currency context the way a browsing guest would.
pub struct SimulationController {
    context: Arc<CurrencyContext>,
    market: Arc<SimulatedMarket>,
    speed: f64,
    rng: Mutex<StdRng>,
    metrics: Mutex<SimulationMetrics>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(
        context: Arc<CurrencyContext>,
        market: Arc<SimulatedMarket>,
        speed: f64,
        rng: StdRng,
    ) -> Self {
        Self {
            context,
            market,
            speed: speed.max(0.01),
            rng: Mutex::new(rng),
            metrics: Mutex::new(SimulationMetrics::new()),
        }
    }

    /// Run a scenario.
    pub async fn run_scenario(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!(
            scenario = %scenario.name,
            description = %scenario.description,
            "Running scenario"
        );

        for step in &scenario.steps {
            self.execute_step(step).await?;
        }

        info!(scenario = %scenario.name, "Scenario passed");
        Ok(())
    }

    /// Run in continuous mode until `duration` elapses or Ctrl+C.
    pub async fn run(&self, duration: Option<Duration>) -> anyhow::Result<()> {
        info!("Running simulation in continuous mode");

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let stopper = async move {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "Cannot listen for Ctrl+C, stopping");
                    }
                }
            }
            let _ = stop_tx.send(true);
        };

        let driver = async {
            let delay = Duration::from_millis((1000.0 / self.speed) as u64);
            while !*stop_rx.borrow() {
                self.random_action().await;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop_rx.changed() => {}
                }
            }
        };

        tokio::join!(stopper, driver);
        Ok(())
    }

    async fn random_action(&self) {
        let (roll, concurrency, code) = {
            let mut rng = self.rng.lock();
            let code = self
                .context
                .get_currencies()
                .choose(&mut *rng)
                .map(|currency| currency.code.to_string());
            (rng.gen_range(0..10u8), rng.gen_range(1..=3usize), code)
        };

        match (roll, code) {
            (0, _) => self.refresh(concurrency).await,
            (1..=2, Some(code)) => self.select(&code),
            _ => self.render(),
        }
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                let adjusted = (*millis as f64 / self.speed) as u64;
                tokio::time::sleep(Duration::from_millis(adjusted)).await;
            }
            ScenarioStep::SelectCurrency { code } => self.select(code),
            ScenarioStep::RenderListings => self.render(),
            ScenarioStep::Refresh { concurrent } => self.refresh(*concurrent).await,
            ScenarioStep::InjectFault { fault_type } => {
                let fault = match fault_type {
                    FaultType::ProviderOutage => MarketFault::Outage,
                    FaultType::MalformedPayload => MarketFault::Malformed,
                    FaultType::NetworkLatency { delay_ms } => {
                        MarketFault::Latency(Duration::from_millis(*delay_ms))
                    }
                };
                info!(?fault, "Injecting market fault");
                self.market.inject(fault);
            }
            ScenarioStep::ClearFault => {
                info!("Clearing market fault");
                self.market.clear();
            }
            ScenarioStep::Assert { condition } => self.check(condition)?,
        }

        Ok(())
    }

    fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        let holds = match condition {
            AssertCondition::CurrentCurrency { code } => {
                self.context.get_current_currency().as_str() == code
            }
            AssertCondition::HasLiveRates => !self.context.cache().current().table.is_bootstrap(),
            AssertCondition::LastRefreshFailed => self.context.last_error().is_some(),
            AssertCondition::FetchAttemptsAtMost { count } => {
                self.context.metrics().fetch_attempts <= *count
            }
        };

        if !holds {
            anyhow::bail!("Assertion failed: {condition:?}");
        }
        info!(?condition, "Assertion held");
        Ok(())
    }

    fn select(&self, code: &str) {
        match self.context.set_current_currency(code) {
            Ok(()) => self.metrics.lock().record_switch(),
            Err(e) => warn!(code, error = %e, "Currency switch rejected"),
        }
    }

    fn render(&self) {
        let view = self.context.price_view();
        let mut rendered = 0;
        for (title, cents) in LISTINGS {
            match view.format(Decimal::new(*cents, 2)) {
                Ok(price) => {
                    info!(listing = title, price = %price, "Rendered listing");
                    rendered += 1;
                }
                Err(e) => warn!(listing = title, error = %e, "Cannot render listing"),
            }
        }
        self.metrics.lock().record_renders(rendered);
    }

    async fn refresh(&self, concurrent: usize) {
        let started = Instant::now();
        let outcomes = join_all((0..concurrent.max(1)).map(|_| self.context.refresh_rates())).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut metrics = self.metrics.lock();
        for outcome in &outcomes {
            metrics.record_refresh(outcome.is_committed(), latency_ms);
        }
        if let Some(error) = outcomes.first().and_then(|outcome| outcome.error()) {
            warn!(error = %error, "Refresh did not commit; serving last known rates");
        }
    }

    /// Get simulation metrics.
    pub fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.lock().clone()
    }
}
