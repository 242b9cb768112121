//! Token pricing
//!
//! Maps cost tiers to per-million-token USD rates, with per-model overrides.
//! Local providers and free-tier models always cost zero.

use crate::provider::{CostTier, Model, Provider, TokenRates};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pricing table consulted for cost computation and routing estimates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    /// Default rates per cost tier
    tier_rates: HashMap<CostTier, TokenRates>,
    /// Exact-model overrides, keyed by model id
    model_overrides: HashMap<String, TokenRates>,
}

impl PricingTable {
    /// Built-in tier defaults, in USD per million tokens
    pub fn with_defaults() -> Self {
        let mut tier_rates = HashMap::new();
        tier_rates.insert(CostTier::Free, TokenRates::free());
        tier_rates.insert(CostTier::Low, TokenRates::new(0.5, 1.5));
        tier_rates.insert(CostTier::Medium, TokenRates::new(3.0, 12.0));
        tier_rates.insert(CostTier::High, TokenRates::new(10.0, 40.0));
        tier_rates.insert(CostTier::Premium, TokenRates::new(25.0, 100.0));
        Self {
            tier_rates,
            model_overrides: HashMap::new(),
        }
    }

    /// Replace the rates for a tier
    pub fn with_tier_rates(mut self, tier: CostTier, rates: TokenRates) -> Self {
        self.tier_rates.insert(tier, rates);
        self
    }

    /// Add an exact-model override
    pub fn with_model_rates(mut self, model_id: impl Into<String>, rates: TokenRates) -> Self {
        self.model_overrides.insert(model_id.into(), rates);
        self
    }

    /// Effective rates for a model served by a provider.
    ///
    /// Resolution order: local provider or free tier beats everything, then
    /// the model's own declared rates, then a table override, then the tier
    /// default.
    pub fn resolve(&self, model: &Model, provider: &Provider) -> TokenRates {
        if provider.kind.is_local() || model.cost_tier.is_free() {
            return TokenRates::free();
        }
        if let Some(rates) = model.rates {
            return rates;
        }
        if let Some(rates) = self.model_overrides.get(&model.id) {
            return *rates;
        }
        self.tier_rates
            .get(&model.cost_tier)
            .copied()
            .unwrap_or_else(TokenRates::free)
    }

    /// Rough cost projection for routing decisions, proportional to the
    /// request's estimated token count. Zero for local/free models.
    pub fn estimate(&self, model: &Model, provider: &Provider, estimated_tokens: u64) -> f64 {
        let rates = self.resolve(model, provider);
        (estimated_tokens as f64 / 1_000_000.0) * rates.blended_per_million()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TokenUsage, UseCase};

    fn cloud_provider() -> Provider {
        Provider::new("openai", "OpenAI", "https://api.openai.com")
    }

    fn local_provider() -> Provider {
        Provider::local("ollama", "Ollama", "http://localhost:11434")
    }

    #[test]
    fn test_local_provider_is_always_free() {
        let table = PricingTable::with_defaults();
        let model = Model::new("llama3:8b", "ollama", 8192)
            .with_use_case(UseCase::General)
            .with_cost_tier(CostTier::Medium);

        let rates = table.resolve(&model, &local_provider());
        assert_eq!(rates, TokenRates::free());
        assert_eq!(table.estimate(&model, &local_provider(), 10_000), 0.0);
    }

    #[test]
    fn test_free_tier_is_free_on_cloud() {
        let table = PricingTable::with_defaults();
        let model = Model::new("trial-model", "openai", 16_384).with_cost_tier(CostTier::Free);
        assert_eq!(table.resolve(&model, &cloud_provider()), TokenRates::free());
    }

    #[test]
    fn test_model_declared_rates_beat_tier_defaults() {
        let table = PricingTable::with_defaults();
        let model = Model::new("gpt-4o", "openai", 128_000)
            .with_cost_tier(CostTier::High)
            .with_rates(TokenRates::new(2.5, 10.0));

        let rates = table.resolve(&model, &cloud_provider());
        assert!((rates.input_per_million - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_override_beats_tier_default() {
        let table = PricingTable::with_defaults()
            .with_model_rates("special", TokenRates::new(1.0, 2.0));
        let model = Model::new("special", "openai", 32_000).with_cost_tier(CostTier::Premium);

        let rates = table.resolve(&model, &cloud_provider());
        assert!((rates.output_per_million - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tier_default_cost() {
        let table = PricingTable::with_defaults();
        let model = Model::new("mid", "openai", 32_000).with_cost_tier(CostTier::Medium);

        let rates = table.resolve(&model, &cloud_provider());
        let usage = TokenUsage::new(1_000_000, 1_000_000);
        // Medium tier: $3/1M input + $12/1M output
        assert!((rates.cost_for(&usage) - 15.0).abs() < 0.001);
    }

    #[test]
    fn test_estimate_is_token_proportional() {
        let table = PricingTable::with_defaults();
        let model = Model::new("mid", "openai", 32_000).with_cost_tier(CostTier::Medium);
        let provider = cloud_provider();

        let small = table.estimate(&model, &provider, 1_000);
        let large = table.estimate(&model, &provider, 10_000);
        assert!(large > small);
        assert!((large / small - 10.0).abs() < 0.001);
    }
}
