//! Provider and model definitions
//!
//! A `Provider` is an OpenAI-compatible endpoint (cloud service or local
//! runtime); a `Model` belongs to exactly one provider and carries the
//! capability metadata routing decisions are made from.

pub mod health;
pub mod registry;

pub use health::{HealthConfig, HealthMonitor};
pub use registry::{HealthState, ModelFilter, ProviderRegistry, ProviderStats, RegistryConfig};

use crate::error::{MaestroError, MaestroResult};
use crate::types::{TokenUsage, UseCase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a provider runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Runs on the local machine (Ollama, LM Studio, llama.cpp servers)
    Local,
    /// Hosted API
    Cloud,
}

impl ProviderKind {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

/// Live health state of a provider endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Last probe succeeded
    Healthy,
    /// Responding but impaired (elevated errors or latency)
    Degraded,
    /// Last probe failed or timed out; excluded from selection
    Down,
    /// Never probed
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
            Self::Unknown => "unknown",
        }
    }

    const fn unknown() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pricing band of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Free,
    Low,
    Medium,
    High,
    Premium,
}

impl CostTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Premium => "premium",
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }

    /// Ordering rank for cost caps, cheapest first
    pub fn rank(&self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Premium => 4,
        }
    }
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-million-token input/output rates in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenRates {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl TokenRates {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub const fn free() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Cost in USD for a recorded usage
    pub fn cost_for(&self, usage: &TokenUsage) -> f64 {
        let input = (usage.prompt_tokens as f64 / 1_000_000.0) * self.input_per_million;
        let output = (usage.completion_tokens as f64 / 1_000_000.0) * self.output_per_million;
        input + output
    }

    /// Blended per-million rate used for rough cost projections
    pub fn blended_per_million(&self) -> f64 {
        (self.input_per_million + self.output_per_million) / 2.0
    }
}

/// An AI provider endpoint.
///
/// Created and edited through configuration; health fields are overlaid from
/// the registry's live probe state when listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    /// Stable identifier, referenced by models and usage records
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Base endpoint, e.g. `https://api.openai.com` or `http://localhost:11434`
    pub endpoint: String,
    /// Bearer credential; local runtimes usually have none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Inactive providers are never selected or probed
    #[serde(default = "default_true")]
    pub active: bool,
    /// Lower is preferred; ties in routing break on this
    #[serde(default)]
    pub priority: u8,
    /// Local or cloud deployment
    pub kind: ProviderKind,
    /// Last known health, maintained by the probe loop
    #[serde(default = "HealthStatus::unknown")]
    pub health: HealthStatus,
    /// When the health field was last refreshed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Provider {
    /// Create a cloud provider with defaults
    pub fn new(id: impl Into<String>, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoint: endpoint.into(),
            api_key: None,
            active: true,
            priority: 0,
            kind: ProviderKind::Cloud,
            health: HealthStatus::Unknown,
            last_health_check: None,
        }
    }

    /// Create a local provider with defaults
    pub fn local(id: impl Into<String>, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::Local,
            ..Self::new(id, name, endpoint)
        }
    }

    /// Set the bearer credential
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the selection priority (lower is preferred)
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set the activation flag
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Whether routing may consider this provider at all
    pub fn is_selectable(&self) -> bool {
        self.active && self.health != HealthStatus::Down
    }

    /// Trailing-slash-free endpoint for URL joining
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    pub fn validate(&self) -> MaestroResult<()> {
        if self.id.trim().is_empty() {
            return Err(MaestroError::invalid_input("provider id must not be empty"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(MaestroError::invalid_input(format!(
                "provider '{}' has an empty endpoint",
                self.id
            )));
        }
        Ok(())
    }
}

/// A model served by a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Identifier sent on the wire, e.g. `gpt-4o-mini`
    pub id: String,
    /// Owning provider id
    pub provider_id: String,
    /// Display name for UIs and rationales
    pub display_name: String,
    /// Context window in tokens; must be positive
    pub context_window: u32,
    /// Workload the model is tuned for
    pub use_case: UseCase,
    /// Pricing band
    pub cost_tier: CostTier,
    /// Unavailable models are skipped by routing
    #[serde(default = "default_true")]
    pub available: bool,
    /// Override rates; when absent the cost tier's defaults apply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rates: Option<TokenRates>,
}

impl Model {
    pub fn new(
        id: impl Into<String>,
        provider_id: impl Into<String>,
        context_window: u32,
    ) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            provider_id: provider_id.into(),
            context_window,
            use_case: UseCase::General,
            cost_tier: CostTier::Medium,
            available: true,
            rates: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_use_case(mut self, use_case: UseCase) -> Self {
        self.use_case = use_case;
        self
    }

    pub fn with_cost_tier(mut self, cost_tier: CostTier) -> Self {
        self.cost_tier = cost_tier;
        self
    }

    pub fn with_rates(mut self, rates: TokenRates) -> Self {
        self.rates = Some(rates);
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn validate(&self) -> MaestroResult<()> {
        if self.id.trim().is_empty() {
            return Err(MaestroError::invalid_input("model id must not be empty"));
        }
        if self.context_window == 0 {
            return Err(MaestroError::invalid_input(format!(
                "model '{}' must declare a positive context window",
                self.id
            )));
        }
        Ok(())
    }
}
