//! Provider and model routing
//!
//! Turns request constraints into a ranked routing plan. Selection is
//! deterministic for a given catalog and metrics state, with explicit
//! tie-breaking, so identical requests route identically.

pub mod metrics;
pub mod router;

pub use metrics::RouteMetrics;
pub use router::ProviderRouter;

use crate::provider::{CostTier, Model, Provider};
use crate::types::UseCase;
use serde::{Deserialize, Serialize};

/// What a request needs from a route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingConstraints {
    /// Required model use case
    pub use_case: Option<UseCase>,
    /// Minimum context window in tokens
    pub min_context: Option<u32>,
    /// Hard requirement for a local provider
    pub local_only: bool,
    /// Hard requirement for free models
    pub free_only: bool,
    /// Score bonus for local providers without excluding cloud ones
    pub prefer_local: bool,
    /// Most expensive acceptable cost tier
    pub max_cost_tier: Option<CostTier>,
    /// Estimated prompt tokens, used for cost and headroom weighting
    pub estimated_tokens: u64,
}

impl RoutingConstraints {
    pub fn for_use_case(use_case: UseCase) -> Self {
        Self {
            use_case: Some(use_case),
            ..Self::default()
        }
    }

    pub fn with_min_context(mut self, min_context: u32) -> Self {
        self.min_context = Some(min_context);
        self
    }

    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    pub fn free_only(mut self) -> Self {
        self.free_only = true;
        self
    }

    pub fn prefer_local(mut self) -> Self {
        self.prefer_local = true;
        self
    }

    pub fn with_max_cost_tier(mut self, tier: CostTier) -> Self {
        self.max_cost_tier = Some(tier);
        self
    }

    pub fn with_estimated_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = tokens;
        self
    }
}

/// One scored provider and model pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteChoice {
    pub provider: Provider,
    pub model: Model,
    /// Composite routing score, higher is better
    pub score: f64,
    /// Estimated request cost in dollars
    pub estimated_cost: f64,
    /// Expected latency in milliseconds
    pub estimated_latency_ms: u64,
    /// Human-readable reason this route ranked where it did
    pub rationale: String,
}

/// Ranked routing decision for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub primary: RouteChoice,
    /// Next route to try when the primary attempt fails
    pub fallback: Option<RouteChoice>,
    /// Third-ranked route, reported for observability only
    pub alternative: Option<RouteChoice>,
    /// Set when the hard filters matched nothing and were dropped
    pub relaxed: bool,
}

impl RoutingPlan {
    /// Routes in rank order
    pub fn ranked(&self) -> Vec<&RouteChoice> {
        let mut choices = vec![&self.primary];
        if let Some(fallback) = &self.fallback {
            choices.push(fallback);
        }
        if let Some(alternative) = &self.alternative {
            choices.push(alternative);
        }
        choices
    }
}
