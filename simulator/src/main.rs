//! StayFX Simulator
//!
//! Drives a currency context against a simulated, optionally flaky, rate
//! provider, or against a real provider when `--provider-url` is given.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use stayfx_common::{system_clock, CurrencyRegistry};
use stayfx_context::{ContextConfig, CurrencyContext, JsonFileStore, MemoryStore, StateStore};
use stayfx_fx::{RoundingPolicy, TimedRateSource};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod market;
mod metrics;
mod scenario;

use controller::SimulationController;
use market::SimulatedMarket;
use scenario::Scenario;

/// StayFX Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "StayFX browsing and rate-provider simulation environment")]
struct Args {
    /// Scenario to run
    #[arg(short, long)]
    scenario: Option<String>,

    /// Fetch from this provider instead of the simulated market
    #[arg(long)]
    provider_url: Option<String>,

    /// Probability that a simulated fetch fails (continuous mode only)
    #[arg(long, default_value = "0.1")]
    failure_rate: f64,

    /// Simulated provider latency in milliseconds
    #[arg(long, default_value = "150")]
    latency_ms: u64,

    /// Rate table TTL and auto-refresh period in seconds
    /// [default: STAYFX_RATE_TTL_SECS or 3600]
    #[arg(long)]
    ttl: Option<u64>,

    /// Upper bound on one fetch in seconds [default: STAYFX_FETCH_TIMEOUT_SECS or 10]
    #[arg(long)]
    fetch_timeout: Option<u64>,

    /// Display rounding policy (half-away-from-zero, half-even, floor)
    /// [default: STAYFX_ROUNDING or half-away-from-zero]
    #[arg(long)]
    rounding: Option<RoundingPolicy>,

    /// Persist selection and rates to this file
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Flags win over `STAYFX_*` settings only when given.
fn apply_overrides(mut config: ContextConfig, args: &Args) -> ContextConfig {
    if let Some(ttl) = args.ttl {
        config.rate_ttl = Duration::from_secs(ttl);
    }
    if let Some(timeout) = args.fetch_timeout {
        config.fetch_timeout = Duration::from_secs(timeout);
    }
    if let Some(rounding) = args.rounding {
        config.rounding = rounding;
    }
    if let Some(url) = &args.provider_url {
        config.provider_url = Some(url.clone());
    }
    if let Some(path) = &args.state_path {
        config.state_path = Some(path.clone());
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    info!("Starting StayFX Simulator");

    let config = apply_overrides(ContextConfig::from_env()?, &args);
    config.validate()?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // Scenarios inject their own faults and must not race the timer.
    let scripted = args.scenario.is_some();
    let failure_rate = if scripted { 0.0 } else { args.failure_rate };

    let registry = Arc::new(CurrencyRegistry::builtin_with_base(&config.base_currency)?);
    let market = Arc::new(SimulatedMarket::new(
        registry.clone(),
        system_clock(),
        StdRng::from_rng(&mut rng)?,
        failure_rate,
        Duration::from_millis(args.latency_ms),
    ));

    let context = if config.provider_url.is_some() {
        info!(url = ?config.provider_url, "Using live rate provider");
        CurrencyContext::from_config(&config)?
    } else {
        let store: Arc<dyn StateStore> = match &config.state_path {
            Some(path) => Arc::new(JsonFileStore::new(path)),
            None => Arc::new(MemoryStore::new()),
        };
        let source = TimedRateSource::new(market.clone(), config.fetch_timeout);
        CurrencyContext::init(&config, registry, Arc::new(source), store, system_clock())?
    };
    let context = Arc::new(context);

    if !scripted {
        context.start()?;
    }
    info!(
        ttl_secs = config.rate_ttl.as_secs(),
        failure_rate,
        speed = args.speed,
        "Simulator initialized"
    );

    let controller = SimulationController::new(context.clone(), market, args.speed, rng);

    if let Some(scenario_name) = &args.scenario {
        let scenario = Scenario::load(scenario_name)?;
        controller.run_scenario(scenario).await?;
    } else {
        info!("Running in interactive mode, press Ctrl+C to stop");
        let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));
        controller.run(duration).await?;
    }

    context.stop();

    let metrics = controller.get_metrics();
    let refresh = context.metrics();
    info!("Simulation complete");
    info!(
        refreshes = metrics.total_refreshes,
        committed = metrics.committed_refreshes,
        failed = metrics.failed_refreshes,
        success_rate = metrics.success_rate(),
        avg_latency_ms = metrics.average_latency_ms(),
        p99_latency_ms = metrics.p99_latency_ms(),
        renders = metrics.renders,
        switches = metrics.currency_switches,
        "Guest activity"
    );
    info!(
        fetch_attempts = refresh.fetch_attempts,
        commits = refresh.commits,
        failures = refresh.failures,
        superseded = refresh.superseded,
        commit_rate = refresh.commit_rate(),
        "Rate cache activity"
    );
    println!("{}", context.metrics_prometheus());

    Ok(())
}
