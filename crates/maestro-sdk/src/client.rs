//! SDK client implementation

use maestro_core::cache::{spawn_sweeper, CacheStats};
use maestro_core::config::OrchestratorConfig;
use maestro_core::error::MaestroResult;
use maestro_core::orchestrator::{OrchestrationRequest, Orchestrator};
use maestro_core::provider::{HealthMonitor, Model, Provider, ProviderStats};
use maestro_core::store::{spawn_usage_writer, InMemoryStore, RecordStore};
use maestro_core::types::{Message, Response, UseCase};
use maestro_core::usage::{BudgetAlert, BudgetCheck, BudgetScope, PricingTable, UsageTracker};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// High-level client for the orchestration layer.
///
/// Owns the orchestrator plus its background tasks: the usage writer, the
/// cache sweeper, and the health monitor. Dropping the client aborts them.
pub struct MaestroClient {
    orchestrator: Arc<Orchestrator>,
    config: OrchestratorConfig,
    tasks: Vec<JoinHandle<()>>,
}

impl MaestroClient {
    /// Start building a client
    pub fn builder() -> MaestroBuilder {
        MaestroBuilder::default()
    }

    /// Run one request to a complete response
    pub async fn orchestrate(&self, request: OrchestrationRequest) -> MaestroResult<Response> {
        self.orchestrator.orchestrate(request).await
    }

    /// Run one request as a stream of text pieces into `sink`
    pub async fn orchestrate_streaming(
        &self,
        request: OrchestrationRequest,
        sink: mpsc::Sender<String>,
    ) -> MaestroResult<Response> {
        self.orchestrator.orchestrate_streaming(request, sink).await
    }

    /// One-shot convenience: send a single user prompt as a general request
    pub async fn complete(&self, prompt: &str) -> MaestroResult<Response> {
        let request = OrchestrationRequest::new(vec![Message::user(prompt)], UseCase::General);
        self.orchestrate(request).await
    }

    /// Register or update a provider and its models
    pub async fn add_provider(
        &self,
        provider: Provider,
        models: Vec<Model>,
    ) -> MaestroResult<()> {
        let registry = self.orchestrator.registry();
        registry.upsert_provider(provider).await?;
        for model in models {
            registry.upsert_model(model).await?;
        }
        Ok(())
    }

    /// Remove a provider and everything known about it
    pub async fn remove_provider(&self, provider_id: &str) -> MaestroResult<()> {
        self.orchestrator.registry().remove_provider(provider_id).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.orchestrator.cache_stats().await
    }

    pub async fn provider_stats(&self) -> MaestroResult<ProviderStats> {
        self.orchestrator.provider_stats().await
    }

    /// Advisory budget state for a scope
    pub fn check_budget(&self, scope: BudgetScope) -> BudgetCheck {
        self.orchestrator.check_budget(scope)
    }

    /// Configured budgets with live consumption folded in
    pub fn budget_snapshot(&self) -> Vec<maestro_core::usage::Budget> {
        self.orchestrator.tracker().snapshot()
    }

    /// Get the current configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

impl Drop for MaestroClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for MaestroClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaestroClient")
            .field("config", &self.config)
            .field("background_tasks", &self.tasks.len())
            .finish()
    }
}

/// Builder for [`MaestroClient`]
pub struct MaestroBuilder {
    config: OrchestratorConfig,
    store: Option<Arc<dyn RecordStore>>,
    pricing: Option<PricingTable>,
    providers: Vec<(Provider, Vec<Model>)>,
    alert_sender: Option<mpsc::UnboundedSender<BudgetAlert>>,
    probe_health: bool,
}

impl Default for MaestroBuilder {
    fn default() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            store: None,
            pricing: None,
            providers: Vec::new(),
            alert_sender: None,
            probe_health: true,
        }
    }
}

impl MaestroBuilder {
    /// Use a prebuilt configuration
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Load configuration from a file
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> MaestroResult<Self> {
        let path = path.as_ref();
        tracing::info!("loading client config from: {}", path.display());
        self.config = OrchestratorConfig::load_from_file(path)?;
        Ok(self)
    }

    /// Persist catalog and usage data in this store instead of memory
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the built-in pricing table
    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Seed a provider and its models at startup
    pub fn with_provider(mut self, provider: Provider, models: Vec<Model>) -> Self {
        self.providers.push((provider, models));
        self
    }

    /// Receive budget alerts on this channel
    pub fn with_alert_sender(mut self, sender: mpsc::UnboundedSender<BudgetAlert>) -> Self {
        self.alert_sender = Some(sender);
        self
    }

    /// Skip the background health monitor. Providers then keep whatever
    /// health the request path observes for them.
    pub fn without_health_probes(mut self) -> Self {
        self.probe_health = false;
        self
    }

    /// Assemble the client and start its background tasks
    pub async fn build(self) -> MaestroResult<MaestroClient> {
        let store: Arc<dyn RecordStore> = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));

        let (usage_tx, usage_rx) = mpsc::unbounded_channel();
        let mut tracker =
            UsageTracker::new(self.pricing.unwrap_or_else(PricingTable::with_defaults))
                .with_writer(usage_tx);
        for budget in self.config.budgets.clone() {
            tracker = tracker.with_budget(budget);
        }
        if let Some(project) = self.config.project.clone() {
            tracker = tracker.with_project(project);
        }
        if let Some(sender) = self.alert_sender {
            tracker = tracker.with_alert_channel(sender);
        }

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            Arc::new(tracker),
            &self.config,
        )?);

        let registry = orchestrator.registry();
        for (provider, models) in self.providers {
            registry.upsert_provider(provider).await?;
            for model in models {
                registry.upsert_model(model).await?;
            }
        }

        let mut tasks = Vec::new();
        tasks.push(spawn_usage_writer(store.clone(), usage_rx));
        if self.config.cache.enabled {
            tasks.push(spawn_sweeper(
                orchestrator.cache(),
                self.config.cache.sweep_interval(),
            ));
        }
        if self.probe_health {
            let monitor = Arc::new(HealthMonitor::new(
                orchestrator.registry(),
                self.config.health.clone(),
            )?);
            tasks.push(monitor.spawn());
        }

        Ok(MaestroClient {
            orchestrator,
            config: self.config,
            tasks,
        })
    }
}
