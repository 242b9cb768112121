//! Conversation context management
//!
//! Token estimation and history reduction so a request fits the selected
//! model's context window.

pub mod estimator;
pub mod optimizer;

pub use estimator::TokenEstimator;
pub use optimizer::{ContextConfig, ContextOptimizer, OptimizationStrategy, OptimizedContext};
