//! Maestro Core Library
//!
//! This crate provides the core functionality for the Maestro request
//! orchestration layer: provider routing, context window management,
//! response caching, streaming, and usage accounting.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod orchestrator;
pub mod provider;
pub mod routing;
pub mod store;
pub mod types;
pub mod usage;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats, ResponseCache, ResponseKey};
pub use config::OrchestratorConfig;
pub use context::{ContextConfig, ContextOptimizer, OptimizationStrategy, TokenEstimator};
pub use error::{MaestroError, MaestroResult};
pub use exec::{Completion, ExecutorConfig, RequestExecutor, RequestParams, StreamConfig};
pub use orchestrator::{
    classify, ComplexityAssessment, OrchestrationRequest, Orchestrator, TaskBand,
};
pub use provider::{
    CostTier, HealthConfig, HealthMonitor, HealthStatus, Model, Provider, ProviderKind,
    ProviderRegistry, ProviderStats, RegistryConfig,
};
pub use routing::{ProviderRouter, RouteMetrics, RoutingConstraints, RoutingPlan};
pub use store::{spawn_usage_writer, InMemoryStore, RecordStore};
pub use types::*;
pub use usage::{
    Budget, BudgetAlert, BudgetCheck, BudgetScope, PricingTable, RequestOutcome, UsageRecord,
    UsageTracker,
};
