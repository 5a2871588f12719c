//! Context configuration.

use std::path::PathBuf;
use std::time::Duration;

use stayfx_common::{constants, CurrencyCode};
use stayfx_fx::RoundingPolicy;

use crate::error::{ContextError, ContextResult};

/// Base currency code.
pub const BASE_CURRENCY_ENV: &str = "STAYFX_BASE_CURRENCY";
/// Rate table TTL and auto-refresh period, in seconds.
pub const RATE_TTL_ENV: &str = "STAYFX_RATE_TTL_SECS";
/// Upper bound on one upstream fetch, in seconds.
pub const FETCH_TIMEOUT_ENV: &str = "STAYFX_FETCH_TIMEOUT_SECS";
/// Upstream rate endpoint.
pub const PROVIDER_URL_ENV: &str = "STAYFX_PROVIDER_URL";
/// File holding the persisted selection and last good table.
pub const STATE_PATH_ENV: &str = "STAYFX_STATE_PATH";
/// Display rounding policy.
pub const ROUNDING_ENV: &str = "STAYFX_ROUNDING";
/// Whether `start` schedules periodic refreshes.
pub const AUTO_REFRESH_ENV: &str = "STAYFX_AUTO_REFRESH";

/// Environment abstraction for configuration lookups.
///
/// Lets tests supply variables without mutating the process environment.
pub trait ConfigEnv {
    /// Fetch a string value by name.
    fn string(&self, name: &str) -> Option<String>;
}

/// Environment access backed by the real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConfigEnv;

impl ConfigEnv for DefaultConfigEnv {
    fn string(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Currency context configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    /// Currency all raw prices are expressed in.
    pub base_currency: String,
    /// Age after which the rate table is stale; also the auto-refresh period.
    pub rate_ttl: Duration,
    /// Upper bound on one upstream fetch.
    pub fetch_timeout: Duration,
    /// Upstream endpoint; required by [`crate::CurrencyContext::from_config`].
    pub provider_url: Option<String>,
    /// Persist to this file; in memory only when unset.
    pub state_path: Option<PathBuf>,
    /// Display rounding policy.
    pub rounding: RoundingPolicy,
    /// Schedule periodic refreshes on `start`.
    pub auto_refresh: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            base_currency: "USD".to_string(),
            rate_ttl: constants::DEFAULT_RATE_TTL,
            fetch_timeout: constants::DEFAULT_FETCH_TIMEOUT,
            provider_url: None,
            state_path: None,
            rounding: RoundingPolicy::default(),
            auto_refresh: true,
        }
    }
}

impl ContextConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> ContextResult<Self> {
        Self::from_env_with(&DefaultConfigEnv)
    }

    /// Load configuration from `env`, starting from the defaults.
    ///
    /// Unset or empty variables keep their default; unparsable values fail.
    pub fn from_env_with(env: &impl ConfigEnv) -> ContextResult<Self> {
        let mut config = Self::default();
        let lookup = |name: &str| {
            env.string(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(base) = lookup(BASE_CURRENCY_ENV) {
            config.base_currency = base;
        }

        if let Some(secs) = lookup(RATE_TTL_ENV) {
            config.rate_ttl = parse_secs(RATE_TTL_ENV, &secs)?;
        }

        if let Some(secs) = lookup(FETCH_TIMEOUT_ENV) {
            config.fetch_timeout = parse_secs(FETCH_TIMEOUT_ENV, &secs)?;
        }

        config.provider_url = lookup(PROVIDER_URL_ENV);
        config.state_path = lookup(STATE_PATH_ENV).map(PathBuf::from);

        if let Some(rounding) = lookup(ROUNDING_ENV) {
            config.rounding = rounding
                .parse()
                .map_err(|e: String| ContextError::Configuration(format!("{ROUNDING_ENV}: {e}")))?;
        }

        if let Some(flag) = lookup(AUTO_REFRESH_ENV) {
            config.auto_refresh = parse_bool(AUTO_REFRESH_ENV, &flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> ContextResult<()> {
        CurrencyCode::parse(&self.base_currency).map_err(|_| {
            ContextError::Configuration(format!(
                "Base currency {:?} is not a currency code",
                self.base_currency
            ))
        })?;

        if self.rate_ttl.is_zero() {
            return Err(ContextError::Configuration(
                "Rate TTL cannot be 0".to_string(),
            ));
        }

        if self.fetch_timeout.is_zero() {
            return Err(ContextError::Configuration(
                "Fetch timeout cannot be 0".to_string(),
            ));
        }

        if let Some(url) = &self.provider_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ContextError::Configuration(format!(
                    "Provider URL must be http(s): {url}"
                )));
            }
        }

        Ok(())
    }
}

fn parse_secs(name: &str, value: &str) -> ContextResult<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ContextError::Configuration(format!("{name}: expected seconds, got {value:?}")))
}

fn parse_bool(name: &str, value: &str) -> ContextResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ContextError::Configuration(format!(
            "{name}: expected a boolean, got {value:?}"
        ))),
    }
}
