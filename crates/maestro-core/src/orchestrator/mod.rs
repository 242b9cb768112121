//! Request orchestration
//!
//! One front door per request: classify the task, build a routing plan,
//! fit the history to the chosen model's window, consult the cache, execute
//! with a single failover hop, and account for every attempt made.

pub mod complexity;

pub use complexity::{classify, ComplexityAssessment, TaskBand};

use crate::cache::{CacheStats, ResponseCache, ResponseKey};
use crate::config::OrchestratorConfig;
use crate::context::{ContextOptimizer, OptimizedContext, TokenEstimator};
use crate::error::{MaestroError, MaestroResult};
use crate::exec::{pump, RequestExecutor, RequestParams, StreamConfig, StreamOptimizer};
use crate::provider::{HealthState, HealthStatus, Model, ProviderRegistry, ProviderStats};
use crate::routing::{ProviderRouter, RouteChoice, RouteMetrics, RoutingConstraints};
use crate::store::RecordStore;
use crate::types::{Message, MessageRole, Response, TokenUsage, UseCase};
use crate::usage::{BudgetCheck, BudgetScope, RequestOutcome, UsageTracker};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// One orchestrated request
#[derive(Debug, Clone)]
pub struct OrchestrationRequest {
    /// Conversation history, newest message last
    pub history: Vec<Message>,
    /// Workload category used for routing
    pub use_case: UseCase,
    /// Generation parameters forwarded to the provider
    pub params: RequestParams,
    /// Extra routing constraints, merged with complexity tuning
    pub constraints: RoutingConstraints,
    /// Keep system messages outside the optimization budget
    pub preserve_system: bool,
    /// External cancellation signal
    pub cancel: CancellationToken,
}

impl OrchestrationRequest {
    pub fn new(history: Vec<Message>, use_case: UseCase) -> Self {
        Self {
            history,
            use_case,
            params: RequestParams::default(),
            constraints: RoutingConstraints::default(),
            preserve_system: true,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_constraints(mut self, constraints: RoutingConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Newest user message, the basis for complexity scoring
    fn latest_user_text(&self) -> &str {
        self.history
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Coordinates routing, context fitting, caching, execution, and accounting.
///
/// Owns its components explicitly; nothing here is process-global, so tests
/// can stand up isolated instances side by side.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    router: ProviderRouter,
    executor: RequestExecutor,
    cache: Arc<ResponseCache>,
    optimizer: ContextOptimizer,
    tracker: Arc<UsageTracker>,
    metrics: Arc<RouteMetrics>,
    stream: StreamConfig,
    cache_enabled: bool,
    completion_reserve: u32,
}

impl Orchestrator {
    /// Build an orchestrator over a record store.
    ///
    /// The tracker arrives prebuilt because its budgets and channels belong
    /// to the embedding layer; everything else is assembled from the config.
    pub fn new(
        store: Arc<dyn RecordStore>,
        tracker: Arc<UsageTracker>,
        config: &OrchestratorConfig,
    ) -> MaestroResult<Self> {
        config.validate()?;
        let registry = Arc::new(ProviderRegistry::new(store, config.registry.clone()));
        let metrics = Arc::new(RouteMetrics::new());
        let router = ProviderRouter::new(
            registry.clone(),
            metrics.clone(),
            tracker.pricing().clone(),
        );
        let executor = RequestExecutor::new(config.executor.clone())?;
        let cache = Arc::new(ResponseCache::from_config(&config.cache));
        let optimizer = ContextOptimizer::new(TokenEstimator::new(), config.context.clone());

        Ok(Self {
            registry,
            router,
            executor,
            cache,
            optimizer,
            tracker,
            metrics,
            stream: config.stream.clone(),
            cache_enabled: config.cache.enabled,
            completion_reserve: config.completion_reserve_tokens,
        })
    }

    /// Run one request to a complete response.
    ///
    /// On a cache hit the stored response is returned without touching any
    /// provider. Otherwise the primary route is attempted, and on a
    /// failover-eligible error the fallback route is attempted once. Both
    /// attempts are recorded with the provider and model actually called.
    #[instrument(skip(self, request), fields(use_case = %request.use_case, history = request.history.len()))]
    pub async fn orchestrate(&self, request: OrchestrationRequest) -> MaestroResult<Response> {
        let assessment = complexity::classify(request.latest_user_text());
        debug!(
            score = assessment.score,
            band = %assessment.band,
            "classified request"
        );

        let constraints = self.build_constraints(&request, &assessment);
        let plan = self.router.plan(&constraints).await?;

        if self.cache_enabled {
            let key = ResponseKey::new(&plan.primary.model.id, &request.history);
            if let Some(response) = self.cache.get(&key).await {
                self.tracker.record(
                    &plan.primary.provider,
                    &plan.primary.model,
                    response.usage,
                    0,
                    RequestOutcome::Cached,
                    None,
                );
                return Ok(response);
            }
        }

        let mut last_error: Option<MaestroError> = None;
        for route in plan.ranked().into_iter().take(2) {
            let fitted = self.fit_history(&request, &route.model);
            let started = Instant::now();
            let result = tokio::select! {
                result = self.executor.execute(
                    &route.provider,
                    &route.model,
                    &fitted.messages,
                    &request.params,
                ) => result,
                _ = request.cancel.cancelled() => Err(MaestroError::Cancelled),
            };

            match result {
                Ok(completion) => {
                    let usage = completion.usage.unwrap_or_else(|| {
                        self.estimate_usage(&fitted.messages, &completion.content)
                    });
                    self.metrics.observe(
                        &route.provider.id,
                        &route.model.id,
                        true,
                        completion.latency_ms,
                    );
                    self.tracker.record(
                        &route.provider,
                        &route.model,
                        usage,
                        completion.latency_ms,
                        RequestOutcome::Success,
                        None,
                    );

                    let response = Response {
                        content: completion.content,
                        model_id: route.model.id.clone(),
                        provider_id: route.provider.id.clone(),
                        usage,
                        latency_ms: completion.latency_ms,
                        cached: false,
                        complete: true,
                        finish_reason: completion.finish_reason,
                    };
                    if self.cache_enabled {
                        let key = ResponseKey::new(&route.model.id, &request.history);
                        self.cache.put(key, response.clone()).await;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.note_failure(route, &fitted.messages, latency_ms, &err);
                    let eligible = err.is_failover_eligible();
                    last_error = Some(err);
                    if !eligible {
                        break;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| MaestroError::Other("no route could be attempted".to_string())))
    }

    /// Run one request as a stream of text pieces into `sink`.
    ///
    /// The cache is bypassed entirely. Failover happens only when the
    /// failed attempt delivered nothing; once the consumer has received a
    /// piece, an abnormal end returns the partial response instead.
    #[instrument(skip(self, request, sink), fields(use_case = %request.use_case, history = request.history.len()))]
    pub async fn orchestrate_streaming(
        &self,
        request: OrchestrationRequest,
        sink: mpsc::Sender<String>,
    ) -> MaestroResult<Response> {
        let assessment = complexity::classify(request.latest_user_text());
        debug!(
            score = assessment.score,
            band = %assessment.band,
            "classified streaming request"
        );

        let constraints = self.build_constraints(&request, &assessment);
        let plan = self.router.plan(&constraints).await?;

        let mut last_error: Option<MaestroError> = None;
        for route in plan.ranked().into_iter().take(2) {
            let fitted = self.fit_history(&request, &route.model);
            let started = Instant::now();

            let outcome = match self
                .open_and_pump(route, &fitted.messages, &request, sink.clone())
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.note_failure(route, &fitted.messages, latency_ms, &err);
                    let eligible = err.is_failover_eligible();
                    last_error = Some(err);
                    if !eligible {
                        break;
                    }
                    continue;
                }
            };

            let latency_ms = started.elapsed().as_millis() as u64;
            let usage = outcome
                .usage
                .unwrap_or_else(|| self.estimate_usage(&fitted.messages, &outcome.content));
            self.metrics
                .observe(&route.provider.id, &route.model.id, outcome.complete, latency_ms);
            if outcome.complete {
                self.tracker.record(
                    &route.provider,
                    &route.model,
                    usage,
                    latency_ms,
                    RequestOutcome::Success,
                    None,
                );
            } else {
                self.tracker.record(
                    &route.provider,
                    &route.model,
                    usage,
                    latency_ms,
                    RequestOutcome::Failed,
                    outcome.abort.clone(),
                );
            }

            return Ok(Response {
                content: outcome.content,
                model_id: route.model.id.clone(),
                provider_id: route.provider.id.clone(),
                usage,
                latency_ms,
                cached: false,
                complete: outcome.complete,
                finish_reason: outcome.finish_reason,
            });
        }

        Err(last_error
            .unwrap_or_else(|| MaestroError::Other("no route could be attempted".to_string())))
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn provider_stats(&self) -> MaestroResult<ProviderStats> {
        self.registry.provider_stats().await
    }

    /// Advisory budget state. Never blocks or fails a request by itself.
    pub fn check_budget(&self, scope: BudgetScope) -> BudgetCheck {
        self.tracker.check(scope)
    }

    pub fn registry(&self) -> Arc<ProviderRegistry> {
        self.registry.clone()
    }

    pub fn cache(&self) -> Arc<ResponseCache> {
        self.cache.clone()
    }

    pub fn tracker(&self) -> Arc<UsageTracker> {
        self.tracker.clone()
    }

    fn build_constraints(
        &self,
        request: &OrchestrationRequest,
        assessment: &ComplexityAssessment,
    ) -> RoutingConstraints {
        let mut constraints = request.constraints.clone();
        constraints.use_case = Some(request.use_case);
        constraints.estimated_tokens =
            self.optimizer.estimator().estimate_history(&request.history) as u64;
        assessment.band.tune_constraints(constraints)
    }

    /// Fit the request history into the model's context window, holding back
    /// room for the completion.
    fn fit_history(&self, request: &OrchestrationRequest, model: &Model) -> OptimizedContext {
        let reserve = request
            .params
            .max_tokens
            .unwrap_or(self.completion_reserve) as usize;
        let budget = (model.context_window as usize).saturating_sub(reserve).max(1);
        let fitted = self
            .optimizer
            .optimize(request.history.clone(), budget, request.preserve_system);
        if fitted.is_reduced() {
            debug!(
                model = %model.id,
                strategy = fitted.strategy.as_str(),
                tokens_removed = fitted.tokens_removed,
                "history reduced to fit context window"
            );
        }
        fitted
    }

    async fn open_and_pump(
        &self,
        route: &RouteChoice,
        messages: &[Message],
        request: &OrchestrationRequest,
        sink: mpsc::Sender<String>,
    ) -> MaestroResult<crate::exec::StreamOutcome> {
        let chunks = tokio::select! {
            result = self.executor.execute_streaming(
                &route.provider,
                &route.model,
                messages,
                &request.params,
            ) => result?,
            _ = request.cancel.cancelled() => return Err(MaestroError::Cancelled),
        };
        pump(
            chunks,
            StreamOptimizer::new(self.stream.clone()),
            sink,
            request.cancel.clone(),
        )
        .await
    }

    fn estimate_usage(&self, sent: &[Message], content: &str) -> TokenUsage {
        let estimator = self.optimizer.estimator();
        TokenUsage::new(
            estimator.estimate_history(sent) as u64,
            estimator.estimate_text(content) as u64,
        )
    }

    fn note_failure(
        &self,
        route: &RouteChoice,
        sent: &[Message],
        latency_ms: u64,
        error: &MaestroError,
    ) {
        warn!(
            provider = %route.provider.id,
            model = %route.model.id,
            error = %error,
            "attempt failed"
        );
        self.metrics
            .observe(&route.provider.id, &route.model.id, false, latency_ms);
        let prompt = self.optimizer.estimator().estimate_history(sent) as u64;
        let outcome = match error {
            MaestroError::UpstreamError { status: 429, .. } => RequestOutcome::RateLimited,
            _ => RequestOutcome::Failed,
        };
        self.tracker.record(
            &route.provider,
            &route.model,
            TokenUsage::new(prompt, 0),
            latency_ms,
            outcome,
            Some(error.to_string()),
        );
        if matches!(error, MaestroError::ProviderUnavailable { .. }) {
            self.registry.mark_health(
                &route.provider.id,
                HealthState::new(HealthStatus::Down).with_detail(error.to_string()),
            );
        }
    }
}
