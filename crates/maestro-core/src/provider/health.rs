//! Background provider health monitoring
//!
//! Probes every registered provider's model listing endpoint on an interval
//! and records the outcome in the registry. Probes use a dedicated short-
//! timeout client so a hung provider cannot stall request traffic.

use crate::error::{MaestroError, MaestroResult};
use crate::provider::registry::{HealthState, ProviderRegistry};
use crate::provider::{HealthStatus, Provider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between probe rounds
    pub interval_secs: u64,
    /// Per-probe timeout in seconds
    pub timeout_secs: u64,
    /// Successful probes slower than this are reported as degraded
    pub degraded_after_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 4,
            degraded_after_ms: 2_000,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> MaestroResult<()> {
        if self.interval_secs == 0 {
            return Err(MaestroError::config(
                "health interval_secs must be at least 1",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(MaestroError::config(
                "health timeout_secs must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Probes providers and feeds results into the registry
pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    client: reqwest::Client,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ProviderRegistry>, config: HealthConfig) -> MaestroResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            registry,
            client,
            config,
        })
    }

    /// Probe every registered provider concurrently and record the results.
    /// Inactive providers are skipped; down providers are re-probed so they
    /// can recover.
    pub async fn probe_all(&self) -> MaestroResult<()> {
        let providers = self.registry.list_providers().await?;
        let probes = providers
            .iter()
            .filter(|p| p.active)
            .map(|p| self.probe_and_record(p));
        futures::future::join_all(probes).await;
        Ok(())
    }

    async fn probe_and_record(&self, provider: &Provider) {
        let state = self.probe(provider).await;
        tracing::debug!(
            provider = %provider.id,
            status = %state.status,
            "health probe finished"
        );
        self.registry.mark_health(&provider.id, state);
    }

    /// Probe one provider's model listing endpoint.
    ///
    /// A 2xx within the latency bound is healthy, a slow 2xx is degraded,
    /// and anything else marks the provider down.
    pub async fn probe(&self, provider: &Provider) -> HealthState {
        let url = format!("{}/v1/models", provider.base_url());
        let mut request = self.client.get(&url);
        if let Some(key) = &provider.api_key {
            request = request.bearer_auth(key);
        }

        let started = Instant::now();
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                let latency_ms = started.elapsed().as_millis() as u64;
                if latency_ms > self.config.degraded_after_ms {
                    HealthState::new(HealthStatus::Degraded)
                        .with_detail(format!("probe took {latency_ms}ms"))
                } else {
                    HealthState::new(HealthStatus::Healthy)
                }
            }
            Ok(response) => HealthState::new(HealthStatus::Down)
                .with_detail(format!("probe returned {}", response.status())),
            Err(err) if err.is_timeout() => {
                HealthState::new(HealthStatus::Down).with_detail("probe timed out")
            }
            Err(err) => {
                HealthState::new(HealthStatus::Down).with_detail(format!("probe failed: {err}"))
            }
        }
    }

    /// Run probe rounds on the configured interval until aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.probe_all().await {
                    tracing::warn!(error = %err, "health probe round failed");
                }
            }
        })
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .finish()
    }
}
