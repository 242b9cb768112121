//! Error types for the orchestration layer

use thiserror::Error;

/// Result type alias for orchestration operations
pub type MaestroResult<T> = Result<T, MaestroError>;

/// Main error type for the orchestration layer
#[derive(Error, Debug, Clone)]
pub enum MaestroError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider is inactive, unreachable, or marked down
    #[error("Provider unavailable: {provider}: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// Unknown model id; fatal, never retried
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Upstream did not respond within the deadline
    #[error("Request timeout after {seconds} seconds")]
    RequestTimeout { seconds: u64 },

    /// Provider answered with a non-2xx status
    #[error("Upstream error: HTTP {status}: {message}")]
    UpstreamError { status: u16, message: String },

    /// Malformed streamed payload; partial output already delivered stands
    #[error("Stream parse error: {0}")]
    StreamParseError(String),

    /// Advisory budget signal, surfaced via budget checks only
    #[error("Budget exceeded for {scope} scope: {detail}")]
    BudgetExceeded { scope: String, detail: String },

    /// Cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// Record store errors
    #[error("Store error: {0}")]
    Store(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// HTTP transport errors outside the typed cases above
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request was cancelled
    #[error("Request was cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl MaestroError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new provider-unavailable error
    pub fn provider_unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Create a new model-not-found error
    pub fn model_not_found(model_id: impl Into<String>) -> Self {
        Self::ModelNotFound(model_id.into())
    }

    /// Create a new timeout error
    pub const fn timeout(seconds: u64) -> Self {
        Self::RequestTimeout { seconds }
    }

    /// Create a new upstream error from a status code and body snippet
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::UpstreamError {
            status,
            message: message.into(),
        }
    }

    /// Create a new stream parse error
    pub fn stream_parse(message: impl Into<String>) -> Self {
        Self::StreamParseError(message.into())
    }

    /// Create a new budget-exceeded signal
    pub fn budget_exceeded(scope: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BudgetExceeded {
            scope: scope.into(),
            detail: detail.into(),
        }
    }

    /// Create a new cache error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    /// Create a new store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Whether the orchestrator may retry this failure against the fallback
    /// plan entry. Covers network faults, timeouts, and non-2xx responses;
    /// never unknown models or malformed streams.
    pub fn is_failover_eligible(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. }
                | Self::RequestTimeout { .. }
                | Self::UpstreamError { .. }
                | Self::Http(_)
        )
    }
}

impl From<std::io::Error> for MaestroError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for MaestroError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}

impl From<reqwest::Error> for MaestroError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}
