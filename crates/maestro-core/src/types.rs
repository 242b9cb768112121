//! Shared domain types: conversation messages, use cases, and responses

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions
    System,
    /// End-user input
    User,
    /// Model output
    Assistant,
}

impl MessageRole {
    /// String tag used on the wire and in cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single message in a conversation history.
///
/// Order within a history is semantically significant: it feeds the model
/// input verbatim and participates in the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message
    pub role: MessageRole,
    /// Text content
    pub content: String,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Whether this is a system message
    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }
}

/// Workload category a model is tuned for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseCase {
    /// Code generation and review
    Coding,
    /// Data and document analysis
    Analysis,
    /// Creative writing
    Creative,
    /// Universal fallback, acceptable for any workload
    General,
}

impl UseCase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Analysis => "analysis",
            Self::Creative => "creative",
            Self::General => "general",
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token usage reported by a provider, or estimated when absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u64,
    /// Tokens in the completion
    pub completion_tokens: u64,
    /// Total tokens
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Build usage from prompt/completion counts
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Final result of an orchestrated request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Generated text. For an abnormally ended stream this holds whatever
    /// was received before the failure.
    pub content: String,
    /// Model that produced the response
    pub model_id: String,
    /// Provider that served the request
    pub provider_id: String,
    /// Token accounting for the request
    pub usage: TokenUsage,
    /// Wall-clock latency of the winning attempt in milliseconds
    pub latency_ms: u64,
    /// Whether the response was served from the cache
    pub cached: bool,
    /// False when the stream ended before its end marker
    pub complete: bool,
    /// Provider-reported finish reason, when present
    pub finish_reason: Option<String>,
}

impl Response {
    /// Mark a response as a cache hit
    pub fn into_cached(mut self) -> Self {
        self.cached = true;
        self.latency_ms = 0;
        self
    }
}
