//! Orchestrator configuration
//!
//! One top-level struct covering every tunable, loadable from JSON, TOML,
//! or YAML based on file extension. Every section has working defaults so
//! an empty file (or no file at all) yields a usable configuration.

use crate::cache::CacheConfig;
use crate::context::ContextConfig;
use crate::error::{MaestroError, MaestroResult};
use crate::exec::{ExecutorConfig, StreamConfig};
use crate::provider::{HealthConfig, RegistryConfig};
use crate::usage::Budget;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_completion_reserve() -> u32 {
    1024
}

/// Top-level configuration for an [`Orchestrator`](crate::orchestrator::Orchestrator)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Response cache settings
    pub cache: CacheConfig,
    /// Context window optimization settings
    pub context: ContextConfig,
    /// HTTP execution settings
    pub executor: ExecutorConfig,
    /// Stream batching settings
    pub stream: StreamConfig,
    /// Provider health probing settings
    pub health: HealthConfig,
    /// Provider catalog snapshot settings
    pub registry: RegistryConfig,
    /// Tokens held back from the context window for the completion when the
    /// request does not set `max_tokens`
    pub completion_reserve_tokens: u32,
    /// Budgets installed on the usage tracker at startup
    pub budgets: Vec<Budget>,
    /// Project tag applied to every usage record
    pub project: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            context: ContextConfig::default(),
            executor: ExecutorConfig::default(),
            stream: StreamConfig::default(),
            health: HealthConfig::default(),
            registry: RegistryConfig::default(),
            completion_reserve_tokens: default_completion_reserve(),
            budgets: Vec::new(),
            project: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> MaestroResult<()> {
        self.cache.validate()?;
        self.context.validate()?;
        self.executor.validate()?;
        self.stream.validate()?;
        self.health.validate()?;
        if self.completion_reserve_tokens == 0 {
            return Err(MaestroError::config(
                "completion_reserve_tokens must be at least 1",
            ));
        }
        for budget in &self.budgets {
            budget.validate()?;
        }
        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// The format is chosen by extension: `.toml`, `.yaml`/`.yml`, anything
    /// else is treated as JSON. A missing file yields the defaults.
    pub fn load_from_file(path: &Path) -> MaestroResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            MaestroError::config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| {
                MaestroError::config(format!(
                    "failed to parse TOML config '{}': {}",
                    path.display(),
                    e
                ))
            })?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
                MaestroError::config(format!(
                    "failed to parse YAML config '{}': {}",
                    path.display(),
                    e
                ))
            })?,
            _ => serde_json::from_str(&content).map_err(|e| {
                MaestroError::config(format!(
                    "failed to parse JSON config '{}': {}",
                    path.display(),
                    e
                ))
            })?,
        };

        config.validate()?;
        Ok(config)
    }
}
