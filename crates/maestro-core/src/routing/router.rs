//! Route scoring and plan construction

use crate::error::{MaestroError, MaestroResult};
use crate::provider::{HealthStatus, Model, ModelFilter, Provider, ProviderRegistry};
use crate::routing::metrics::RouteMetrics;
use crate::routing::{RouteChoice, RoutingConstraints, RoutingPlan};
use crate::usage::PricingTable;
use std::sync::Arc;

/// Weight of an exact use case match
const USE_CASE_EXACT: f64 = 30.0;
/// Weight of a general-purpose model standing in for a specific use case
const USE_CASE_GENERAL: f64 = 15.0;
/// Bonus for local providers when locality is preferred
const LOCAL_PREFERENCE: f64 = 20.0;
/// Weight of the trailing success rate
const RELIABILITY_WEIGHT: f64 = 20.0;
/// Reliability score assumed for routes with no history
const RELIABILITY_NEUTRAL: f64 = 10.0;
/// Maximum latency contribution
const LATENCY_WEIGHT: f64 = 15.0;
/// Maximum cost contribution
const COST_WEIGHT: f64 = 15.0;
/// Maximum context headroom contribution
const HEADROOM_WEIGHT: f64 = 10.0;
/// Penalty applied to degraded providers
const DEGRADED_PENALTY: f64 = 5.0;

/// Scores catalog routes against request constraints
pub struct ProviderRouter {
    registry: Arc<ProviderRegistry>,
    metrics: Arc<RouteMetrics>,
    pricing: PricingTable,
}

impl ProviderRouter {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        metrics: Arc<RouteMetrics>,
        pricing: PricingTable,
    ) -> Self {
        Self {
            registry,
            metrics,
            pricing,
        }
    }

    /// Build a ranked plan for `constraints`.
    ///
    /// Hard filters narrow the catalog first. When they match nothing the
    /// filters are dropped and the whole catalog is scored instead, so a
    /// serviceable route is preferred over a constraint-perfect failure.
    /// Ranking is fully deterministic: score, then provider priority, then
    /// model id. The three top-ranked candidates fill primary, fallback,
    /// and alternative in that order.
    pub async fn plan(&self, constraints: &RoutingConstraints) -> MaestroResult<RoutingPlan> {
        let filter = ModelFilter {
            use_case: constraints.use_case,
            min_context: constraints.min_context,
            local_only: constraints.local_only,
            free_only: constraints.free_only,
        };

        let mut candidates = self.registry.list_models(&filter).await?;
        if let Some(cap) = constraints.max_cost_tier {
            candidates.retain(|(_, model)| model.cost_tier.rank() <= cap.rank());
        }

        let relaxed = candidates.is_empty();
        if relaxed {
            tracing::warn!(
                ?constraints,
                "no catalog route satisfies constraints, relaxing filters"
            );
            candidates = self.registry.list_models(&ModelFilter::default()).await?;
        }
        if candidates.is_empty() {
            return Err(MaestroError::model_not_found("catalog has no routable models"));
        }

        let mut scored: Vec<RouteChoice> = candidates
            .into_iter()
            .map(|(provider, model)| self.score(provider, model, constraints))
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.provider.priority.cmp(&b.provider.priority))
                .then_with(|| a.model.id.cmp(&b.model.id))
        });

        let primary = scored.remove(0);
        let mut rest = scored.into_iter();
        let fallback = rest.next();
        let alternative = rest.next();

        tracing::debug!(
            primary = %primary.model.id,
            fallback = fallback.as_ref().map(|c| c.model.id.as_str()).unwrap_or("-"),
            relaxed,
            "routing plan built"
        );

        Ok(RoutingPlan {
            primary,
            fallback,
            alternative,
            relaxed,
        })
    }

    fn score(
        &self,
        provider: Provider,
        model: Model,
        constraints: &RoutingConstraints,
    ) -> RouteChoice {
        let mut score = 0.0;
        let mut reasons: Vec<String> = Vec::new();

        match constraints.use_case {
            Some(wanted) if model.use_case == wanted => {
                score += USE_CASE_EXACT;
                reasons.push(format!("{wanted} match"));
            }
            Some(_) if model.use_case == crate::types::UseCase::General => {
                score += USE_CASE_GENERAL;
                reasons.push("general purpose".to_string());
            }
            Some(_) => {}
            None => {
                score += USE_CASE_GENERAL;
            }
        }

        if constraints.prefer_local && provider.kind.is_local() {
            score += LOCAL_PREFERENCE;
            reasons.push("local".to_string());
        }

        match self.metrics.success_rate(&provider.id, &model.id) {
            Some(rate) => {
                score += rate * RELIABILITY_WEIGHT;
                reasons.push(format!("{:.0}% recent success", rate * 100.0));
            }
            None => {
                score += RELIABILITY_NEUTRAL;
                reasons.push("no history".to_string());
            }
        }

        let estimated_latency_ms = self.estimate_latency(&provider, &model);
        score += LATENCY_WEIGHT * 500.0 / (500.0 + estimated_latency_ms as f64);

        let estimated_cost =
            self.pricing
                .estimate(&model, &provider, constraints.estimated_tokens);
        score += COST_WEIGHT / (1.0 + estimated_cost * 100.0);
        if model.cost_tier.is_free() {
            reasons.push("free".to_string());
        }

        if constraints.estimated_tokens > 0 {
            let needed = (constraints.estimated_tokens * 2) as f64;
            let headroom = (model.context_window as f64 / needed).min(1.0);
            score += HEADROOM_WEIGHT * headroom;
        } else {
            score += HEADROOM_WEIGHT;
        }

        score += f64::from(10u8.saturating_sub(provider.priority));

        if provider.health == HealthStatus::Degraded {
            score -= DEGRADED_PENALTY;
            reasons.push("degraded".to_string());
        }

        let rationale = reasons.join(", ");
        RouteChoice {
            provider,
            model,
            score,
            estimated_cost,
            estimated_latency_ms,
            rationale,
        }
    }

    /// Trailing observed latency when available, otherwise a default that
    /// grows with the model's context window.
    fn estimate_latency(&self, provider: &Provider, model: &Model) -> u64 {
        if let Some(observed) = self.metrics.avg_latency_ms(&provider.id, &model.id) {
            return observed;
        }
        let base = if provider.kind.is_local() { 250 } else { 400 };
        base + u64::from(model.context_window) / 1_000
    }
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CostTier, RegistryConfig};
    use crate::store::{InMemoryStore, RecordStore};
    use crate::types::UseCase;

    async fn seeded_router() -> ProviderRouter {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        store
            .insert_provider(
                Provider::new("openai", "OpenAI", "https://api.openai.example").with_priority(1),
            )
            .await
            .unwrap();
        store
            .insert_provider(
                Provider::new("anthropic", "Anthropic", "https://api.anthropic.example")
                    .with_priority(2),
            )
            .await
            .unwrap();
        store
            .insert_provider(
                Provider::local("ollama", "Ollama", "http://localhost:11434").with_priority(5),
            )
            .await
            .unwrap();
        store
            .insert_model(
                Model::new("gpt-4", "openai", 128_000)
                    .with_use_case(UseCase::Coding)
                    .with_cost_tier(CostTier::High),
            )
            .await
            .unwrap();
        store
            .insert_model(
                Model::new("claude-3", "anthropic", 200_000)
                    .with_use_case(UseCase::General)
                    .with_cost_tier(CostTier::Medium),
            )
            .await
            .unwrap();
        store
            .insert_model(
                Model::new("llama3", "ollama", 8_192)
                    .with_use_case(UseCase::General)
                    .with_cost_tier(CostTier::Free),
            )
            .await
            .unwrap();

        let registry = Arc::new(ProviderRegistry::new(store, RegistryConfig::default()));
        ProviderRouter::new(
            registry,
            Arc::new(RouteMetrics::new()),
            PricingTable::with_defaults(),
        )
    }

    #[tokio::test]
    async fn test_use_case_match_wins() {
        let router = seeded_router().await;
        let plan = router
            .plan(&RoutingConstraints::for_use_case(UseCase::Coding))
            .await
            .unwrap();
        assert_eq!(plan.primary.model.id, "gpt-4");
        assert!(!plan.relaxed);
        assert!(plan.primary.rationale.contains("coding match"));
    }

    #[tokio::test]
    async fn test_free_constraint_routes_to_free_model() {
        let router = seeded_router().await;
        let plan = router
            .plan(&RoutingConstraints::default().free_only())
            .await
            .unwrap();
        assert_eq!(plan.primary.model.id, "llama3");
        assert_eq!(plan.primary.estimated_cost, 0.0);
    }

    #[tokio::test]
    async fn test_local_preference_boosts_local_provider() {
        let router = seeded_router().await;
        let general = RoutingConstraints::for_use_case(UseCase::General);
        let baseline = router.plan(&general).await.unwrap();
        let preferring = router.plan(&general.clone().prefer_local()).await.unwrap();

        assert_eq!(preferring.primary.provider.id, "ollama");
        let score_of = |plan: &RoutingPlan| {
            plan.ranked()
                .iter()
                .find(|c| c.provider.id == "ollama")
                .map(|c| c.score)
                .unwrap()
        };
        assert!(score_of(&preferring) > score_of(&baseline));
    }

    #[tokio::test]
    async fn test_min_context_filters_small_models() {
        let router = seeded_router().await;
        let plan = router
            .plan(&RoutingConstraints::default().with_min_context(100_000))
            .await
            .unwrap();
        for choice in plan.ranked() {
            assert!(choice.model.context_window >= 100_000);
        }
    }

    #[tokio::test]
    async fn test_unsatisfiable_filters_relax_instead_of_failing() {
        let router = seeded_router().await;
        // Nothing is both local and 100k context in the seeded catalog
        let plan = router
            .plan(
                &RoutingConstraints::default()
                    .local_only()
                    .with_min_context(100_000),
            )
            .await
            .unwrap();
        assert!(plan.relaxed);
    }

    #[tokio::test]
    async fn test_empty_catalog_is_an_error() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let registry = Arc::new(ProviderRegistry::new(store, RegistryConfig::default()));
        let router = ProviderRouter::new(
            registry,
            Arc::new(RouteMetrics::new()),
            PricingTable::with_defaults(),
        );
        let result = router.plan(&RoutingConstraints::default()).await;
        assert!(matches!(result, Err(MaestroError::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn test_plan_is_deterministic() {
        let router = seeded_router().await;
        let constraints = RoutingConstraints::for_use_case(UseCase::General);
        let first = router.plan(&constraints).await.unwrap();
        let second = router.plan(&constraints).await.unwrap();

        assert_eq!(first.primary.model.id, second.primary.model.id);
        assert_eq!(
            first.fallback.as_ref().map(|c| c.model.id.clone()),
            second.fallback.as_ref().map(|c| c.model.id.clone())
        );
        assert_eq!(
            first.alternative.as_ref().map(|c| c.model.id.clone()),
            second.alternative.as_ref().map(|c| c.model.id.clone())
        );
    }

    #[tokio::test]
    async fn test_exact_ties_break_on_priority_then_model_id() {
        // Priorities past 10 earn no score bonus, so these routes score
        // identically and only the tiebreak chain separates them.
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        store
            .insert_provider(Provider::new("late", "Late", "https://late.example").with_priority(12))
            .await
            .unwrap();
        store
            .insert_provider(
                Provider::new("later", "Later", "https://later.example").with_priority(11),
            )
            .await
            .unwrap();
        for (model, provider) in [("aa-model", "late"), ("zz-model", "later")] {
            store
                .insert_model(
                    Model::new(model, provider, 32_000)
                        .with_use_case(UseCase::General)
                        .with_cost_tier(CostTier::Low),
                )
                .await
                .unwrap();
        }
        let router = ProviderRouter::new(
            Arc::new(ProviderRegistry::new(store, RegistryConfig::default())),
            Arc::new(RouteMetrics::new()),
            PricingTable::with_defaults(),
        );

        // Priority 11 beats 12 even though zz-model sorts after aa-model
        let plan = router.plan(&RoutingConstraints::default()).await.unwrap();
        assert_eq!(plan.primary.provider.id, "later");
        assert_eq!(plan.primary.model.id, "zz-model");

        // With equal priorities the model id decides
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        for id in ["x", "y"] {
            store
                .insert_provider(
                    Provider::new(id, id, format!("https://{id}.example")).with_priority(11),
                )
                .await
                .unwrap();
        }
        store
            .insert_model(
                Model::new("beta", "x", 32_000)
                    .with_use_case(UseCase::General)
                    .with_cost_tier(CostTier::Low),
            )
            .await
            .unwrap();
        store
            .insert_model(
                Model::new("alpha", "y", 32_000)
                    .with_use_case(UseCase::General)
                    .with_cost_tier(CostTier::Low),
            )
            .await
            .unwrap();
        let router = ProviderRouter::new(
            Arc::new(ProviderRegistry::new(store, RegistryConfig::default())),
            Arc::new(RouteMetrics::new()),
            PricingTable::with_defaults(),
        );
        let plan = router.plan(&RoutingConstraints::default()).await.unwrap();
        assert_eq!(plan.primary.model.id, "alpha");
    }

    #[tokio::test]
    async fn test_failures_push_route_down() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        for id in ["p1", "p2"] {
            store
                .insert_provider(
                    Provider::new(id, id, format!("https://{id}.example")).with_priority(1),
                )
                .await
                .unwrap();
        }
        store
            .insert_model(
                Model::new("model-one", "p1", 32_000)
                    .with_use_case(UseCase::General)
                    .with_cost_tier(CostTier::Low),
            )
            .await
            .unwrap();
        store
            .insert_model(
                Model::new("model-two", "p2", 32_000)
                    .with_use_case(UseCase::General)
                    .with_cost_tier(CostTier::Low),
            )
            .await
            .unwrap();

        let metrics = Arc::new(RouteMetrics::new());
        let router = ProviderRouter::new(
            Arc::new(ProviderRegistry::new(store, RegistryConfig::default())),
            metrics.clone(),
            PricingTable::with_defaults(),
        );

        // model-one would win on the id tiebreak without history
        for _ in 0..10 {
            metrics.observe("p1", "model-one", false, 0);
        }
        let plan = router.plan(&RoutingConstraints::default()).await.unwrap();
        assert_eq!(plan.primary.model.id, "model-two");
    }

    #[tokio::test]
    async fn test_fallback_and_alternative_follow_rank() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        store
            .insert_provider(
                Provider::new("atlas", "Atlas", "https://atlas.example").with_priority(0),
            )
            .await
            .unwrap();
        store
            .insert_provider(
                Provider::new("boreal", "Boreal", "https://boreal.example").with_priority(5),
            )
            .await
            .unwrap();
        // Smaller windows estimate lower latency, so the atlas models rank
        // fast > mid > slow, all above the low-priority boreal model.
        for (model, window) in [
            ("atlas-fast", 32_000),
            ("atlas-mid", 64_000),
            ("atlas-slow", 128_000),
        ] {
            store
                .insert_model(
                    Model::new(model, "atlas", window)
                        .with_use_case(UseCase::General)
                        .with_cost_tier(CostTier::Free),
                )
                .await
                .unwrap();
        }
        store
            .insert_model(
                Model::new("boreal-base", "boreal", 32_000)
                    .with_use_case(UseCase::General)
                    .with_cost_tier(CostTier::Free),
            )
            .await
            .unwrap();

        let router = ProviderRouter::new(
            Arc::new(ProviderRegistry::new(store, RegistryConfig::default())),
            Arc::new(RouteMetrics::new()),
            PricingTable::with_defaults(),
        );
        let plan = router.plan(&RoutingConstraints::default()).await.unwrap();

        // Roles track rank even when the runners-up share the primary's
        // provider; the fourth-ranked route does not displace them.
        assert_eq!(plan.primary.model.id, "atlas-fast");
        let fallback = plan.fallback.as_ref().unwrap();
        let alternative = plan.alternative.as_ref().unwrap();
        assert_eq!(fallback.model.id, "atlas-mid");
        assert_eq!(alternative.model.id, "atlas-slow");
        assert!(plan.primary.score >= fallback.score);
        assert!(fallback.score >= alternative.score);
        assert!(plan.ranked().iter().all(|c| c.model.id != "boreal-base"));
    }

    #[tokio::test]
    async fn test_cost_tier_cap() {
        let router = seeded_router().await;
        let plan = router
            .plan(
                &RoutingConstraints::for_use_case(UseCase::Coding)
                    .with_max_cost_tier(CostTier::Medium),
            )
            .await
            .unwrap();
        // gpt-4 is High tier, so it only appears via relaxation or not at all
        if !plan.relaxed {
            for choice in plan.ranked() {
                assert!(choice.model.cost_tier.rank() <= CostTier::Medium.rank());
            }
        }
    }
}
