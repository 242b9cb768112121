//! Request execution against OpenAI-compatible providers
//!
//! The executor performs exactly one HTTP attempt per call. Retry and
//! failover decisions belong to the orchestrator, which can see routing
//! state; this layer only translates one request into one wire exchange.

pub mod executor;
pub mod sse;
pub mod stream;
pub mod wire;

pub use executor::{Completion, ExecutorConfig, RequestExecutor, RequestParams};
pub use sse::{SseDecoder, SseEvent};
pub use stream::{pump, StreamConfig, StreamOptimizer, StreamOutcome};

use crate::error::MaestroResult;
use crate::types::TokenUsage;
use futures::Stream;
use std::pin::Pin;

/// One unit of streamed response data
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    /// Incremental content
    pub content: Option<String>,
    /// Token accounting, usually only on the terminal chunk
    pub usage: Option<TokenUsage>,
    /// Set on the terminal chunk when the provider reported one
    pub finish_reason: Option<String>,
    /// Marks the end of the stream
    pub is_final: bool,
}

impl StreamChunk {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn terminal(usage: Option<TokenUsage>, finish_reason: Option<String>) -> Self {
        Self {
            usage,
            finish_reason,
            is_final: true,
            ..Self::default()
        }
    }
}

/// Stream of response chunks from one provider attempt
pub type ChunkStream = Pin<Box<dyn Stream<Item = MaestroResult<StreamChunk>> + Send>>;
