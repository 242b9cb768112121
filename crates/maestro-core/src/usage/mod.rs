//! Usage recording and budget tracking
//!
//! Every request attempt produces an append-only [`UsageRecord`]. Successful
//! records additively consume matching budgets; accumulation uses atomic
//! integer counters (cost in micro-dollars) so concurrent requests never lose
//! updates. Budget state is advisory: crossing a limit emits an alert and
//! flips the budget check, it never blocks a request.

pub mod pricing;

pub use pricing::PricingTable;

use crate::error::{MaestroError, MaestroResult};
use crate::provider::{Model, Provider};
use crate::types::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// How a request attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    /// Provider returned a usable response
    Success,
    /// Attempt failed; the record carries the error message
    Failed,
    /// Served from the response cache, no provider call
    Cached,
    /// Provider rejected the request for rate limiting
    RateLimited,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cached => "cached",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// Usage record for a single request attempt. Append-only; never mutated
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique identifier
    pub id: String,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
    /// Provider that was actually called
    pub provider_id: String,
    /// Model that was actually called
    pub model_id: String,
    /// Prompt tokens
    pub prompt_tokens: u64,
    /// Completion tokens
    pub completion_tokens: u64,
    /// Calculated cost (USD)
    pub cost: f64,
    /// Attempt latency in milliseconds
    pub latency_ms: u64,
    /// Outcome of the attempt
    pub outcome: RequestOutcome,
    /// Error message for failed attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Project the request was billed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl UsageRecord {
    pub fn new(
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        usage: TokenUsage,
        latency_ms: u64,
        outcome: RequestOutcome,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost: 0.0,
            latency_ms,
            outcome,
            error: None,
            project: None,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Budget accounting period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetScope {
    Daily,
    Monthly,
    PerProject,
    Total,
}

impl BudgetScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::PerProject => "per-project",
            Self::Total => "total",
        }
    }
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A spending budget. Limits are optional per metric; a budget with neither
/// limit tracks consumption without ever tripping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    /// Accounting period
    pub scope: BudgetScope,
    /// Project this budget applies to, for per-project scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Token ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_limit: Option<u64>,
    /// Tokens consumed so far
    #[serde(default)]
    pub tokens_used: u64,
    /// Cost ceiling in USD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_limit: Option<f64>,
    /// Cost consumed so far in USD
    #[serde(default)]
    pub cost_used: f64,
    /// Percentage of either limit at which an alert fires
    #[serde(default = "Budget::default_alert_threshold")]
    pub alert_threshold_pct: u8,
    /// When the external rollover last reset this budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,
}

impl Budget {
    const fn default_alert_threshold() -> u8 {
        80
    }

    pub fn new(scope: BudgetScope) -> Self {
        Self {
            scope,
            project: None,
            token_limit: None,
            tokens_used: 0,
            cost_limit: None,
            cost_used: 0.0,
            alert_threshold_pct: Self::default_alert_threshold(),
            reset_at: None,
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_token_limit(mut self, limit: u64) -> Self {
        self.token_limit = Some(limit);
        self
    }

    pub fn with_cost_limit(mut self, limit: f64) -> Self {
        self.cost_limit = Some(limit);
        self
    }

    pub fn with_alert_threshold_pct(mut self, pct: u8) -> Self {
        self.alert_threshold_pct = pct.min(100);
        self
    }

    pub fn validate(&self) -> MaestroResult<()> {
        if self.alert_threshold_pct > 100 {
            return Err(MaestroError::invalid_input(format!(
                "budget {} alert threshold must be 0-100, got {}",
                self.scope, self.alert_threshold_pct
            )));
        }
        if self.scope == BudgetScope::PerProject && self.project.is_none() {
            return Err(MaestroError::invalid_input(
                "per-project budget requires a project name",
            ));
        }
        Ok(())
    }
}

/// Which metric tripped an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMetric {
    Tokens,
    Cost,
}

/// Emitted when consumption crosses a budget's alert threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub scope: BudgetScope,
    pub project: Option<String>,
    pub metric: BudgetMetric,
    pub used: f64,
    pub limit: f64,
    pub threshold_pct: u8,
}

/// Result of a budget check. Advisory: callers decide whether to act on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetCheck {
    pub scope: BudgetScope,
    pub within_budget: bool,
    pub tokens_used: u64,
    pub token_limit: Option<u64>,
    pub cost_used: f64,
    pub cost_limit: Option<f64>,
}

impl BudgetCheck {
    /// Opt-in hard check for callers that want to refuse over-budget work.
    /// The orchestrator itself never calls this before a request.
    pub fn ensure(&self) -> MaestroResult<()> {
        if self.within_budget {
            return Ok(());
        }
        Err(MaestroError::budget_exceeded(
            self.scope.as_str(),
            format!(
                "tokens {}/{}, cost ${:.4}/{}",
                self.tokens_used,
                self.token_limit
                    .map_or_else(|| "-".to_string(), |l| l.to_string()),
                self.cost_used,
                self.cost_limit
                    .map_or_else(|| "-".to_string(), |l| format!("${l:.2}")),
            ),
        ))
    }
}

/// Live counters for one configured budget
struct BudgetState {
    budget: Budget,
    tokens_used: AtomicU64,
    cost_micros_used: AtomicU64,
}

impl BudgetState {
    fn new(budget: Budget) -> Self {
        let tokens = budget.tokens_used;
        let micros = (budget.cost_used * 1_000_000.0).round() as u64;
        Self {
            budget,
            tokens_used: AtomicU64::new(tokens),
            cost_micros_used: AtomicU64::new(micros),
        }
    }

    /// Daily/monthly/total budgets match every record; per-project budgets
    /// match on the record's project.
    fn matches_record(&self, project: Option<&str>) -> bool {
        match self.budget.scope {
            BudgetScope::PerProject => self.budget.project.as_deref() == project,
            _ => true,
        }
    }

    fn cost_used(&self) -> f64 {
        self.cost_micros_used.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    fn within(&self) -> bool {
        let tokens_ok = self
            .budget
            .token_limit
            .is_none_or(|limit| self.tokens_used.load(Ordering::Relaxed) <= limit);
        let cost_ok = self.budget.cost_limit.is_none_or(|limit| self.cost_used() <= limit);
        tokens_ok && cost_ok
    }
}

/// Percentage-threshold crossing check on atomic counters. Returns true only
/// for the add that moves consumption from below the bar to at-or-above it,
/// so exactly one caller observes the crossing.
fn crossed_threshold(prev: u64, added: u64, limit: u64, threshold_pct: u8) -> bool {
    if limit == 0 || added == 0 {
        return false;
    }
    let bar = (limit as u128 * threshold_pct as u128).div_ceil(100);
    (prev as u128) < bar && (prev as u128 + added as u128) >= bar
}

/// Records usage and enforces (advisorily) configured budgets
pub struct UsageTracker {
    pricing: PricingTable,
    budgets: Vec<BudgetState>,
    project: Option<String>,
    writer: Option<mpsc::UnboundedSender<UsageRecord>>,
    alerts: Option<mpsc::UnboundedSender<BudgetAlert>>,
}

impl UsageTracker {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            budgets: Vec::new(),
            project: None,
            writer: None,
            alerts: None,
        }
    }

    /// Register a budget
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budgets.push(BudgetState::new(budget));
        self
    }

    /// Bill all records produced by this tracker to a project
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Forward every record to a write-behind persistence channel
    pub fn with_writer(mut self, writer: mpsc::UnboundedSender<UsageRecord>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Surface budget alerts to an external consumer
    pub fn with_alert_channel(mut self, alerts: mpsc::UnboundedSender<BudgetAlert>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Record one request attempt.
    ///
    /// Computes cost from the model's effective rates, stamps the record, and
    /// on success additively consumes matching budgets. The hot path only
    /// touches atomics and an unbounded channel, never the store.
    pub fn record(
        &self,
        provider: &Provider,
        model: &Model,
        usage: TokenUsage,
        latency_ms: u64,
        outcome: RequestOutcome,
        error: Option<String>,
    ) -> UsageRecord {
        let cost = match outcome {
            RequestOutcome::Cached => 0.0,
            _ => self.pricing.resolve(model, provider).cost_for(&usage),
        };

        let mut record =
            UsageRecord::new(&provider.id, &model.id, usage, latency_ms, outcome).with_cost(cost);
        if let Some(error) = error {
            record = record.with_error(error);
        }
        if let Some(ref project) = self.project {
            record = record.with_project(project);
        }

        if outcome == RequestOutcome::Success {
            self.consume_budgets(&record);
        }

        if let Some(ref writer) = self.writer {
            if writer.send(record.clone()).is_err() {
                tracing::debug!("usage writer channel closed, dropping record persistence");
            }
        }

        tracing::debug!(
            provider = %record.provider_id,
            model = %record.model_id,
            outcome = record.outcome.as_str(),
            tokens = record.total_tokens(),
            cost = record.cost,
            latency_ms = record.latency_ms,
            "recorded usage"
        );

        record
    }

    fn consume_budgets(&self, record: &UsageRecord) {
        let tokens = record.total_tokens();
        let cost_micros = (record.cost * 1_000_000.0).round() as u64;

        for state in self
            .budgets
            .iter()
            .filter(|s| s.matches_record(record.project.as_deref()))
        {
            let prev_tokens = state.tokens_used.fetch_add(tokens, Ordering::Relaxed);
            let prev_micros = state.cost_micros_used.fetch_add(cost_micros, Ordering::Relaxed);

            if let Some(limit) = state.budget.token_limit {
                if crossed_threshold(prev_tokens, tokens, limit, state.budget.alert_threshold_pct) {
                    self.emit_alert(
                        &state.budget,
                        BudgetMetric::Tokens,
                        (prev_tokens + tokens) as f64,
                        limit as f64,
                    );
                }
            }
            if let Some(limit) = state.budget.cost_limit {
                let limit_micros = (limit * 1_000_000.0).round() as u64;
                if crossed_threshold(
                    prev_micros,
                    cost_micros,
                    limit_micros,
                    state.budget.alert_threshold_pct,
                ) {
                    self.emit_alert(&state.budget, BudgetMetric::Cost, state.cost_used(), limit);
                }
            }
        }
    }

    fn emit_alert(&self, budget: &Budget, metric: BudgetMetric, used: f64, limit: f64) {
        let alert = BudgetAlert {
            scope: budget.scope,
            project: budget.project.clone(),
            metric,
            used,
            limit,
            threshold_pct: budget.alert_threshold_pct,
        };
        tracing::warn!(
            scope = %alert.scope,
            metric = ?alert.metric,
            used = alert.used,
            limit = alert.limit,
            threshold_pct = alert.threshold_pct,
            "budget alert threshold crossed"
        );
        if let Some(ref alerts) = self.alerts {
            let _ = alerts.send(alert);
        }
    }

    /// Advisory budget check for a scope. Aggregates every configured budget
    /// with that scope; an unconfigured scope reports as within budget.
    pub fn check(&self, scope: BudgetScope) -> BudgetCheck {
        let mut check = BudgetCheck {
            scope,
            within_budget: true,
            tokens_used: 0,
            token_limit: None,
            cost_used: 0.0,
            cost_limit: None,
        };

        for state in self.budgets.iter().filter(|s| s.budget.scope == scope) {
            check.tokens_used += state.tokens_used.load(Ordering::Relaxed);
            check.cost_used += state.cost_used();
            if let Some(limit) = state.budget.token_limit {
                check.token_limit = Some(check.token_limit.unwrap_or(0) + limit);
            }
            if let Some(limit) = state.budget.cost_limit {
                check.cost_limit = Some(check.cost_limit.unwrap_or(0.0) + limit);
            }
            if !state.within() {
                check.within_budget = false;
            }
        }

        check
    }

    /// Zero the counters for a scope. Invoked by the external rollover, never
    /// by the orchestration core itself.
    pub fn reset(&self, scope: BudgetScope) {
        for state in self.budgets.iter().filter(|s| s.budget.scope == scope) {
            state.tokens_used.store(0, Ordering::Relaxed);
            state.cost_micros_used.store(0, Ordering::Relaxed);
        }
    }

    /// Current budget records with live consumption folded in, for
    /// persistence by the embedding layer.
    pub fn snapshot(&self) -> Vec<Budget> {
        self.budgets
            .iter()
            .map(|state| {
                let mut budget = state.budget.clone();
                budget.tokens_used = state.tokens_used.load(Ordering::Relaxed);
                budget.cost_used = state.cost_used();
                budget
            })
            .collect()
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(PricingTable::with_defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CostTier, Model, Provider};
    use crate::types::UseCase;
    use std::sync::Arc;

    fn cloud_provider() -> Provider {
        Provider::new("openai", "OpenAI", "https://api.openai.com")
    }

    fn cloud_model() -> Model {
        Model::new("gpt-4o", "openai", 128_000)
            .with_use_case(UseCase::Coding)
            .with_cost_tier(CostTier::Medium)
    }

    #[test]
    fn test_record_computes_cost_for_cloud_model() {
        let tracker = UsageTracker::default();
        let record = tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(1_000_000, 1_000_000),
            800,
            RequestOutcome::Success,
            None,
        );
        // Medium tier: $3 input + $12 output per 1M
        assert!((record.cost - 15.0).abs() < 0.001);
        assert_eq!(record.outcome, RequestOutcome::Success);
        assert!(!record.id.is_empty());
    }

    #[test]
    fn test_record_is_free_for_local_provider() {
        let tracker = UsageTracker::default();
        let provider = Provider::local("ollama", "Ollama", "http://localhost:11434");
        let model = Model::new("llama3:8b", "ollama", 8192).with_cost_tier(CostTier::Medium);
        let record = tracker.record(
            &provider,
            &model,
            TokenUsage::new(5000, 2000),
            120,
            RequestOutcome::Success,
            None,
        );
        assert_eq!(record.cost, 0.0);
    }

    #[test]
    fn test_cached_outcome_costs_nothing() {
        let tracker = UsageTracker::default();
        let record = tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(1000, 500),
            0,
            RequestOutcome::Cached,
            None,
        );
        assert_eq!(record.cost, 0.0);
    }

    #[test]
    fn test_budget_accumulates_only_on_success() {
        let tracker = UsageTracker::default()
            .with_budget(Budget::new(BudgetScope::Daily).with_token_limit(10_000));

        tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(100, 50),
            10,
            RequestOutcome::Failed,
            Some("boom".to_string()),
        );
        assert_eq!(tracker.check(BudgetScope::Daily).tokens_used, 0);

        tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(100, 50),
            10,
            RequestOutcome::Success,
            None,
        );
        assert_eq!(tracker.check(BudgetScope::Daily).tokens_used, 150);
    }

    #[tokio::test]
    async fn test_concurrent_accumulation_loses_no_updates() {
        let tracker = Arc::new(
            UsageTracker::default()
                .with_budget(Budget::new(BudgetScope::Total).with_token_limit(1_000_000)),
        );

        let mut handles = Vec::new();
        for _ in 0..25 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                for _ in 0..4 {
                    tracker.record(
                        &cloud_provider(),
                        &cloud_model(),
                        TokenUsage::new(30, 10),
                        5,
                        RequestOutcome::Success,
                        None,
                    );
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 25 tasks x 4 records x 40 tokens
        assert_eq!(tracker.check(BudgetScope::Total).tokens_used, 4000);
    }

    #[tokio::test]
    async fn test_alert_fires_exactly_once_per_crossing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = UsageTracker::default()
            .with_budget(
                Budget::new(BudgetScope::Daily)
                    .with_token_limit(1000)
                    .with_alert_threshold_pct(80),
            )
            .with_alert_channel(tx);

        // 700 tokens: below the 800-token bar, no alert
        tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(500, 200),
            10,
            RequestOutcome::Success,
            None,
        );
        assert!(rx.try_recv().is_err());

        // +200 crosses the bar
        tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(150, 50),
            10,
            RequestOutcome::Success,
            None,
        );
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.metric, BudgetMetric::Tokens);
        assert_eq!(alert.scope, BudgetScope::Daily);

        // further consumption stays above the bar and must not re-alert
        tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(100, 0),
            10,
            RequestOutcome::Success,
            None,
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_check_flags_exceeded_budget() {
        let tracker = UsageTracker::default()
            .with_budget(Budget::new(BudgetScope::Monthly).with_token_limit(100));

        tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(90, 20),
            10,
            RequestOutcome::Success,
            None,
        );

        let check = tracker.check(BudgetScope::Monthly);
        assert!(!check.within_budget);
        assert_eq!(check.tokens_used, 110);
        assert!(check.ensure().is_err());
    }

    #[test]
    fn test_unconfigured_scope_is_within_budget() {
        let tracker = UsageTracker::default();
        let check = tracker.check(BudgetScope::Daily);
        assert!(check.within_budget);
        assert_eq!(check.tokens_used, 0);
        assert!(check.ensure().is_ok());
    }

    #[test]
    fn test_per_project_budget_matches_on_project() {
        let tracker = UsageTracker::default()
            .with_project("apollo")
            .with_budget(
                Budget::new(BudgetScope::PerProject)
                    .with_project("apollo")
                    .with_token_limit(1000),
            )
            .with_budget(
                Budget::new(BudgetScope::PerProject)
                    .with_project("zeus")
                    .with_token_limit(1000),
            );

        tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(100, 100),
            10,
            RequestOutcome::Success,
            None,
        );

        let snapshot = tracker.snapshot();
        let apollo = snapshot
            .iter()
            .find(|b| b.project.as_deref() == Some("apollo"))
            .unwrap();
        let zeus = snapshot
            .iter()
            .find(|b| b.project.as_deref() == Some("zeus"))
            .unwrap();
        assert_eq!(apollo.tokens_used, 200);
        assert_eq!(zeus.tokens_used, 0);
    }

    #[test]
    fn test_reset_zeroes_scope_counters() {
        let tracker = UsageTracker::default()
            .with_budget(Budget::new(BudgetScope::Daily).with_token_limit(1000));

        tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(100, 100),
            10,
            RequestOutcome::Success,
            None,
        );
        assert_eq!(tracker.check(BudgetScope::Daily).tokens_used, 200);

        tracker.reset(BudgetScope::Daily);
        assert_eq!(tracker.check(BudgetScope::Daily).tokens_used, 0);
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RequestOutcome::RateLimited).unwrap(),
            "\"rate_limited\""
        );
        assert_eq!(
            serde_json::to_string(&BudgetScope::PerProject).unwrap(),
            "\"per-project\""
        );
    }

    #[test]
    fn test_writer_receives_every_record() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = UsageTracker::default().with_writer(tx);

        tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(10, 10),
            5,
            RequestOutcome::Success,
            None,
        );
        tracker.record(
            &cloud_provider(),
            &cloud_model(),
            TokenUsage::new(10, 10),
            5,
            RequestOutcome::Failed,
            Some("timeout".to_string()),
        );

        assert_eq!(rx.try_recv().unwrap().outcome, RequestOutcome::Success);
        assert_eq!(rx.try_recv().unwrap().outcome, RequestOutcome::Failed);
    }

    #[test]
    fn test_crossed_threshold_edges() {
        // bar = 80
        assert!(crossed_threshold(79, 1, 100, 80));
        assert!(crossed_threshold(0, 80, 100, 80));
        assert!(!crossed_threshold(80, 10, 100, 80));
        assert!(!crossed_threshold(0, 79, 100, 80));
        assert!(!crossed_threshold(0, 0, 100, 80));
        assert!(!crossed_threshold(0, 50, 0, 80));
    }
}
