//! Maestro SDK
//!
//! This crate provides a high-level client for using the Maestro
//! orchestration layer programmatically: build a [`MaestroClient`], register
//! providers, and send requests without wiring up the core components by
//! hand.
//!
//! # Example
//!
//! ```rust,no_run
//! use maestro_sdk::{MaestroClient, Model, Provider};
//!
//! # async fn run() -> maestro_sdk::MaestroResult<()> {
//! let client = MaestroClient::builder()
//!     .with_provider(
//!         Provider::local("ollama", "Ollama", "http://localhost:11434"),
//!         vec![Model::new("llama3.1:8b", "ollama", 131_072)],
//!     )
//!     .build()
//!     .await?;
//!
//! let response = client.complete("Summarize this repository").await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;

pub use client::{MaestroBuilder, MaestroClient};

// Re-export commonly used types from core
pub use maestro_core::{
    config::OrchestratorConfig,
    error::{MaestroError, MaestroResult},
    orchestrator::{OrchestrationRequest, TaskBand},
    provider::{CostTier, HealthStatus, Model, Provider, ProviderStats},
    routing::RoutingConstraints,
    store::{InMemoryStore, RecordStore},
    types::{Message, MessageRole, Response, TokenUsage, UseCase},
    usage::{Budget, BudgetAlert, BudgetCheck, BudgetScope, RequestOutcome, UsageRecord},
};
