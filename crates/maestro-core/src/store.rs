//! Persistence boundary
//!
//! The core consumes an abstract record store over provider, model, usage,
//! and budget collections. It assumes nothing about the backing storage;
//! [`InMemoryStore`] ships as the default and embedding layers implement the
//! same trait over real storage. Usage persistence is write-behind: records
//! flow through a channel into [`spawn_usage_writer`] so the request path
//! never awaits the store.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{MaestroError, MaestroResult};
use crate::provider::{Model, Provider};
use crate::usage::{Budget, UsageRecord};

/// Abstract CRUD over the collections the orchestration core reads and emits
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_provider(&self, provider: Provider) -> MaestroResult<()>;
    async fn list_providers(&self) -> MaestroResult<Vec<Provider>>;
    async fn find_provider(&self, id: &str) -> MaestroResult<Option<Provider>>;
    async fn update_provider(&self, provider: Provider) -> MaestroResult<()>;
    async fn delete_provider(&self, id: &str) -> MaestroResult<()>;

    async fn insert_model(&self, model: Model) -> MaestroResult<()>;
    async fn list_models(&self) -> MaestroResult<Vec<Model>>;
    async fn list_models_for_provider(&self, provider_id: &str) -> MaestroResult<Vec<Model>>;
    async fn find_model(&self, id: &str) -> MaestroResult<Option<Model>>;
    async fn update_model(&self, model: Model) -> MaestroResult<()>;
    async fn delete_model(&self, id: &str) -> MaestroResult<()>;

    /// Append one usage record; records are immutable once stored
    async fn append_usage(&self, record: UsageRecord) -> MaestroResult<()>;
    /// Most recent usage records, newest first
    async fn recent_usage(&self, limit: usize) -> MaestroResult<Vec<UsageRecord>>;

    async fn upsert_budget(&self, budget: Budget) -> MaestroResult<()>;
    async fn list_budgets(&self) -> MaestroResult<Vec<Budget>>;
}

/// DashMap-backed store used for tests and embedded deployments
#[derive(Default)]
pub struct InMemoryStore {
    providers: DashMap<String, Provider>,
    models: DashMap<String, Model>,
    usage: RwLock<Vec<UsageRecord>>,
    budgets: DashMap<String, Budget>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn budget_key(budget: &Budget) -> String {
        match budget.project {
            Some(ref project) => format!("{}:{}", budget.scope, project),
            None => budget.scope.to_string(),
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_provider(&self, provider: Provider) -> MaestroResult<()> {
        provider.validate()?;
        self.providers.insert(provider.id.clone(), provider);
        Ok(())
    }

    async fn list_providers(&self) -> MaestroResult<Vec<Provider>> {
        let mut providers: Vec<Provider> =
            self.providers.iter().map(|e| e.value().clone()).collect();
        providers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(providers)
    }

    async fn find_provider(&self, id: &str) -> MaestroResult<Option<Provider>> {
        Ok(self.providers.get(id).map(|e| e.value().clone()))
    }

    async fn update_provider(&self, provider: Provider) -> MaestroResult<()> {
        provider.validate()?;
        if !self.providers.contains_key(&provider.id) {
            return Err(MaestroError::store(format!(
                "provider '{}' does not exist",
                provider.id
            )));
        }
        self.providers.insert(provider.id.clone(), provider);
        Ok(())
    }

    async fn delete_provider(&self, id: &str) -> MaestroResult<()> {
        self.providers.remove(id);
        Ok(())
    }

    async fn insert_model(&self, model: Model) -> MaestroResult<()> {
        model.validate()?;
        self.models.insert(model.id.clone(), model);
        Ok(())
    }

    async fn list_models(&self) -> MaestroResult<Vec<Model>> {
        let mut models: Vec<Model> = self.models.iter().map(|e| e.value().clone()).collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    async fn list_models_for_provider(&self, provider_id: &str) -> MaestroResult<Vec<Model>> {
        let mut models: Vec<Model> = self
            .models
            .iter()
            .filter(|e| e.value().provider_id == provider_id)
            .map(|e| e.value().clone())
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    async fn find_model(&self, id: &str) -> MaestroResult<Option<Model>> {
        Ok(self.models.get(id).map(|e| e.value().clone()))
    }

    async fn update_model(&self, model: Model) -> MaestroResult<()> {
        model.validate()?;
        if !self.models.contains_key(&model.id) {
            return Err(MaestroError::store(format!(
                "model '{}' does not exist",
                model.id
            )));
        }
        self.models.insert(model.id.clone(), model);
        Ok(())
    }

    async fn delete_model(&self, id: &str) -> MaestroResult<()> {
        self.models.remove(id);
        Ok(())
    }

    async fn append_usage(&self, record: UsageRecord) -> MaestroResult<()> {
        self.usage.write().push(record);
        Ok(())
    }

    async fn recent_usage(&self, limit: usize) -> MaestroResult<Vec<UsageRecord>> {
        let usage = self.usage.read();
        Ok(usage.iter().rev().take(limit).cloned().collect())
    }

    async fn upsert_budget(&self, budget: Budget) -> MaestroResult<()> {
        budget.validate()?;
        self.budgets.insert(Self::budget_key(&budget), budget);
        Ok(())
    }

    async fn list_budgets(&self) -> MaestroResult<Vec<Budget>> {
        Ok(self.budgets.iter().map(|e| e.value().clone()).collect())
    }
}

/// Drain usage records from the tracker's write-behind channel into the
/// store. Runs until the channel closes; persistence failures are logged and
/// never surface to request paths.
pub fn spawn_usage_writer(
    store: Arc<dyn RecordStore>,
    mut rx: mpsc::UnboundedReceiver<UsageRecord>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(error) = store.append_usage(record).await {
                tracing::warn!(%error, "failed to persist usage record");
            }
        }
        tracing::debug!("usage writer channel closed");
    })
}
