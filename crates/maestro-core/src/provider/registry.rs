//! Provider and model registry
//!
//! Serves the provider catalog from a short-lived snapshot so routing does
//! not hit the store on every request. Health state lives in its own map,
//! written by the health monitor and overlaid onto catalog reads, which keeps
//! probe results visible without invalidating the snapshot.

use crate::error::MaestroResult;
use crate::provider::{HealthStatus, Model, Provider};
use crate::store::RecordStore;
use crate::types::UseCase;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long a catalog snapshot stays fresh, in seconds
    pub snapshot_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl_secs: 30,
        }
    }
}

impl RegistryConfig {
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }
}

/// Latest probe result for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct HealthState {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    /// Failure detail for down providers, probe latency note otherwise
    pub detail: Option<String>,
}

impl HealthState {
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            checked_at: Utc::now(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Catalog query for models
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelFilter {
    /// Restrict to models declaring this use case
    pub use_case: Option<UseCase>,
    /// Minimum context window in tokens
    pub min_context: Option<u32>,
    /// Only models hosted by local providers
    pub local_only: bool,
    /// Only models on the free cost tier
    pub free_only: bool,
}

impl ModelFilter {
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

    fn matches(&self, provider: &Provider, model: &Model) -> bool {
        if let Some(use_case) = self.use_case {
            // General-purpose models can stand in for any use case; scoring
            // decides whether an exact match beats them.
            if model.use_case != use_case && model.use_case != UseCase::General {
                return false;
            }
        }
        if let Some(min_context) = self.min_context {
            if model.context_window < min_context {
                return false;
            }
        }
        if self.local_only && !provider.kind.is_local() {
            return false;
        }
        if self.free_only && !model.cost_tier.is_free() {
            return false;
        }
        true
    }
}

/// Health roll-up across the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStats {
    /// All registered providers, probed or not
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub down: usize,
}

#[derive(Debug, Clone)]
struct CatalogSnapshot {
    providers: Vec<Provider>,
    models: Vec<Model>,
    taken_at: Instant,
}

impl CatalogSnapshot {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.taken_at.elapsed() < ttl
    }
}

/// Snapshot-backed provider catalog with live health overlay
pub struct ProviderRegistry {
    store: Arc<dyn RecordStore>,
    health: DashMap<String, HealthState>,
    snapshot: RwLock<Option<CatalogSnapshot>>,
    snapshot_ttl: Duration,
}

impl ProviderRegistry {
    pub fn new(store: Arc<dyn RecordStore>, config: RegistryConfig) -> Self {
        Self {
            store,
            health: DashMap::new(),
            snapshot: RwLock::new(None),
            snapshot_ttl: config.snapshot_ttl(),
        }
    }

    /// All registered providers with current health applied
    pub async fn list_providers(&self) -> MaestroResult<Vec<Provider>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .providers
            .iter()
            .map(|p| self.overlay_health(p.clone()))
            .collect())
    }

    /// Providers that routing may use right now
    pub async fn list_active(&self) -> MaestroResult<Vec<Provider>> {
        Ok(self
            .list_providers()
            .await?
            .into_iter()
            .filter(|p| p.is_selectable())
            .collect())
    }

    /// Selectable provider and available model pairs matching `filter`
    pub async fn list_models(&self, filter: &ModelFilter) -> MaestroResult<Vec<(Provider, Model)>> {
        let snapshot = self.snapshot().await?;
        let mut pairs = Vec::new();
        for provider in &snapshot.providers {
            let provider = self.overlay_health(provider.clone());
            if !provider.is_selectable() {
                continue;
            }
            for model in &snapshot.models {
                if model.provider_id != provider.id || !model.available {
                    continue;
                }
                if filter.matches(&provider, model) {
                    pairs.push((provider.clone(), model.clone()));
                }
            }
        }
        Ok(pairs)
    }

    pub async fn find_provider(&self, id: &str) -> MaestroResult<Option<Provider>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .providers
            .iter()
            .find(|p| p.id == id)
            .map(|p| self.overlay_health(p.clone())))
    }

    /// Record a probe result. Only the health overlay changes; the catalog
    /// snapshot stays valid.
    pub fn mark_health(&self, provider_id: &str, state: HealthState) {
        let previous = self
            .health
            .get(provider_id)
            .map(|entry| entry.status)
            .unwrap_or(HealthStatus::Unknown);
        if previous != state.status {
            if state.status == HealthStatus::Down {
                tracing::warn!(
                    provider = provider_id,
                    from = %previous,
                    detail = state.detail.as_deref().unwrap_or("-"),
                    "provider went down"
                );
            } else {
                tracing::info!(
                    provider = provider_id,
                    from = %previous,
                    to = %state.status,
                    "provider health changed"
                );
            }
        }
        self.health.insert(provider_id.to_string(), state);
    }

    pub fn health_of(&self, provider_id: &str) -> Option<HealthState> {
        self.health.get(provider_id).map(|entry| entry.clone())
    }

    /// Force the next catalog read to reload from the store
    pub fn invalidate(&self) {
        *self.snapshot.write() = None;
    }

    pub async fn upsert_provider(&self, provider: Provider) -> MaestroResult<()> {
        let id = provider.id.clone();
        if self.store.find_provider(&id).await?.is_some() {
            self.store.update_provider(provider).await?;
        } else {
            self.store.insert_provider(provider).await?;
        }
        tracing::info!(provider = %id, "provider upserted");
        self.invalidate();
        Ok(())
    }

    pub async fn upsert_model(&self, model: Model) -> MaestroResult<()> {
        let id = model.id.clone();
        if self.store.find_model(&id).await?.is_some() {
            self.store.update_model(model).await?;
        } else {
            self.store.insert_model(model).await?;
        }
        tracing::info!(model = %id, "model upserted");
        self.invalidate();
        Ok(())
    }

    pub async fn remove_provider(&self, provider_id: &str) -> MaestroResult<()> {
        self.store.delete_provider(provider_id).await?;
        self.health.remove(provider_id);
        self.invalidate();
        Ok(())
    }

    /// Health roll-up. Providers that have never been probed count toward
    /// `total` only.
    pub async fn provider_stats(&self) -> MaestroResult<ProviderStats> {
        let providers = self.list_providers().await?;
        let mut stats = ProviderStats {
            total: providers.len(),
            healthy: 0,
            degraded: 0,
            down: 0,
        };
        for provider in &providers {
            match provider.health {
                HealthStatus::Healthy => stats.healthy += 1,
                HealthStatus::Degraded => stats.degraded += 1,
                HealthStatus::Down => stats.down += 1,
                HealthStatus::Unknown => {}
            }
        }
        Ok(stats)
    }

    fn overlay_health(&self, mut provider: Provider) -> Provider {
        if let Some(state) = self.health.get(&provider.id) {
            provider.health = state.status;
            provider.last_health_check = Some(state.checked_at);
        }
        provider
    }

    async fn snapshot(&self) -> MaestroResult<CatalogSnapshot> {
        {
            let guard = self.snapshot.read();
            if let Some(snapshot) = guard.as_ref() {
                if snapshot.is_fresh(self.snapshot_ttl) {
                    return Ok(snapshot.clone());
                }
            }
        }

        let providers = self.store.list_providers().await?;
        let models = self.store.list_models().await?;
        let snapshot = CatalogSnapshot {
            providers,
            models,
            taken_at: Instant::now(),
        };
        tracing::debug!(
            providers = snapshot.providers.len(),
            models = snapshot.models.len(),
            "catalog snapshot refreshed"
        );
        *self.snapshot.write() = Some(snapshot.clone());
        Ok(snapshot)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("tracked_health", &self.health.len())
            .field("snapshot_ttl", &self.snapshot_ttl)
            .finish()
    }
}
