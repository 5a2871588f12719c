//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Switch the display currency.
    SelectCurrency { code: String },
    /// Render the listing catalog in the selected currency.
    RenderListings,
    /// Issue overlapping refreshes.
    Refresh { concurrent: usize },
    /// Make the market misbehave.
    InjectFault { fault_type: FaultType },
    /// Restore the market.
    ClearFault,
    /// Check a condition; a failed assertion aborts the scenario.
    Assert { condition: AssertCondition },
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FaultType {
    /// Provider unreachable.
    ProviderOutage,
    /// Provider answers with an unusable payload.
    MalformedPayload,
    /// Provider answers slowly.
    NetworkLatency { delay_ms: u64 },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// The selected currency.
    CurrentCurrency { code: String },
    /// A committed table is held.
    HasLiveRates,
    /// The latest attempt recorded an error.
    LastRefreshFailed,
    /// No more than this many upstream fetches happened so far.
    FetchAttemptsAtMost { count: u64 },
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "browse" => Ok(Self::browse()),
            "flaky-provider" => Ok(Self::flaky_provider()),
            "refresh-burst" => Ok(Self::refresh_burst()),
            "invalid-selection" => Ok(Self::invalid_selection()),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// A guest browsing listings in several currencies.
    fn browse() -> Self {
        Self {
            name: "browse".to_string(),
            description: "Guest browses listings across currencies".to_string(),
            steps: vec![
                ScenarioStep::Refresh { concurrent: 1 },
                ScenarioStep::Assert {
                    condition: AssertCondition::HasLiveRates,
                },
                ScenarioStep::RenderListings,
                ScenarioStep::SelectCurrency {
                    code: "EUR".to_string(),
                },
                ScenarioStep::RenderListings,
                ScenarioStep::SelectCurrency {
                    code: "JPY".to_string(),
                },
                ScenarioStep::RenderListings,
                ScenarioStep::Assert {
                    condition: AssertCondition::CurrentCurrency {
                        code: "JPY".to_string(),
                    },
                },
            ],
        }
    }

    /// Provider goes down after the first good table.
    fn flaky_provider() -> Self {
        Self {
            name: "flaky-provider".to_string(),
            description: "Last good rates keep serving through a provider outage".to_string(),
            steps: vec![
                ScenarioStep::Refresh { concurrent: 1 },
                ScenarioStep::SelectCurrency {
                    code: "GBP".to_string(),
                },
                ScenarioStep::RenderListings,
                ScenarioStep::InjectFault {
                    fault_type: FaultType::ProviderOutage,
                },
                ScenarioStep::Refresh { concurrent: 1 },
                ScenarioStep::Assert {
                    condition: AssertCondition::LastRefreshFailed,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::HasLiveRates,
                },
                ScenarioStep::RenderListings,
                ScenarioStep::InjectFault {
                    fault_type: FaultType::MalformedPayload,
                },
                ScenarioStep::Refresh { concurrent: 1 },
                ScenarioStep::ClearFault,
                ScenarioStep::Wait { millis: 100 },
                ScenarioStep::Refresh { concurrent: 1 },
                ScenarioStep::RenderListings,
            ],
        }
    }

    /// Many components ask for fresh rates at once.
    fn refresh_burst() -> Self {
        Self {
            name: "refresh-burst".to_string(),
            description: "Overlapping refreshes share one upstream fetch".to_string(),
            steps: vec![
                ScenarioStep::InjectFault {
                    fault_type: FaultType::NetworkLatency { delay_ms: 200 },
                },
                ScenarioStep::Refresh { concurrent: 25 },
                ScenarioStep::Assert {
                    condition: AssertCondition::FetchAttemptsAtMost { count: 1 },
                },
                ScenarioStep::ClearFault,
                ScenarioStep::RenderListings,
            ],
        }
    }

    /// A stale link selects a currency that is not offered.
    fn invalid_selection() -> Self {
        Self {
            name: "invalid-selection".to_string(),
            description: "Unknown currency codes leave the selection untouched".to_string(),
            steps: vec![
                ScenarioStep::SelectCurrency {
                    code: "CAD".to_string(),
                },
                ScenarioStep::SelectCurrency {
                    code: "ZZZ".to_string(),
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::CurrentCurrency {
                        code: "CAD".to_string(),
                    },
                },
                ScenarioStep::RenderListings,
            ],
        }
    }
}
