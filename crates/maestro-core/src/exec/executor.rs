//! Single-attempt HTTP execution against OpenAI-compatible endpoints

use crate::error::{MaestroError, MaestroResult};
use crate::exec::sse::{SseDecoder, SseEvent};
use crate::exec::wire::{ChatRequest, ChatResponse, StreamEvent};
use crate::exec::{ChunkStream, StreamChunk};
use crate::provider::{HealthStatus, Model, Provider};
use crate::types::{Message, TokenUsage};
use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const ERROR_BODY_LIMIT: usize = 200;

/// Executor timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Whole-request deadline for non-streaming calls
    pub request_timeout_secs: u64,
    /// Longest allowed gap between chunks of a streaming call
    pub stream_idle_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            stream_idle_timeout_secs: 30,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> MaestroResult<()> {
        if self.request_timeout_secs == 0 {
            return Err(MaestroError::config(
                "executor request_timeout_secs must be at least 1",
            ));
        }
        if self.stream_idle_timeout_secs == 0 {
            return Err(MaestroError::config(
                "executor stream_idle_timeout_secs must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Per-request generation parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Result of one non-streaming attempt
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    /// Provider-reported usage when the response carried one
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
    pub latency_ms: u64,
}

/// Issues chat completion requests, one provider attempt per call.
///
/// Retry and failover decisions live with the caller; the executor only
/// reports what a single attempt did, with typed errors that say whether
/// trying elsewhere could help.
pub struct RequestExecutor {
    client: reqwest::Client,
    config: ExecutorConfig,
}

impl RequestExecutor {
    pub fn new(config: ExecutorConfig) -> MaestroResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, config })
    }

    /// Run one non-streaming chat completion
    #[instrument(skip(self, provider, model, messages, params), fields(provider = %provider.id, model = %model.id))]
    pub async fn execute(
        &self,
        provider: &Provider,
        model: &Model,
        messages: &[Message],
        params: &RequestParams,
    ) -> MaestroResult<Completion> {
        check_ready(provider)?;
        let body = ChatRequest {
            model: &model.id,
            messages,
            stream: false,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };
        let url = format!("{}/v1/chat/completions", provider.base_url());
        debug!(provider = %provider.id, model = %model.id, "dispatching chat completion");

        let started = Instant::now();
        let response = self
            .request(provider, &url, &body)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .send()
            .await
            .map_err(|err| self.map_send_error(provider, err))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MaestroError::upstream(status.as_u16(), body_snippet(&text)));
        }

        let parsed: ChatResponse = response.json().await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(provider = %provider.id, model = %model.id, latency_ms, "chat completion finished");

        Ok(Completion {
            content: parsed.content(),
            usage: parsed.usage.map(Into::into),
            finish_reason: parsed.finish_reason(),
            latency_ms,
        })
    }

    /// Open one streaming chat completion, decoded into typed chunks.
    ///
    /// The stream yields content deltas and ends with a terminal chunk.
    /// A gap between chunks longer than the idle timeout surfaces as a
    /// timeout item on the stream.
    #[instrument(skip(self, provider, model, messages, params), fields(provider = %provider.id, model = %model.id))]
    pub async fn execute_streaming(
        &self,
        provider: &Provider,
        model: &Model,
        messages: &[Message],
        params: &RequestParams,
    ) -> MaestroResult<ChunkStream> {
        check_ready(provider)?;
        let body = ChatRequest {
            model: &model.id,
            messages,
            stream: true,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };
        let url = format!("{}/v1/chat/completions", provider.base_url());
        debug!(provider = %provider.id, model = %model.id, "dispatching streaming chat completion");

        // The idle clock also covers the wait for response headers.
        let idle_secs = self.config.stream_idle_timeout_secs;
        let response = tokio::time::timeout(
            Duration::from_secs(idle_secs),
            self.request(provider, &url, &body).send(),
        )
        .await
        .map_err(|_| MaestroError::timeout(idle_secs))?
        .map_err(|err| self.map_send_error(provider, err))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MaestroError::upstream(status.as_u16(), body_snippet(&text)));
        }
        let chunks = response
            .bytes_stream()
            .scan(SseDecoder::new(), move |decoder, result| {
                let items: Vec<MaestroResult<StreamChunk>> = match result {
                    Ok(bytes) => decoder
                        .feed(&bytes)
                        .into_iter()
                        .filter_map(event_to_chunk)
                        .collect(),
                    Err(err) => vec![Err(map_transport_error(err, idle_secs))],
                };
                future::ready(Some(items))
            })
            .flat_map(stream::iter);
        let timed = tokio_stream::StreamExt::timeout(chunks, Duration::from_secs(idle_secs));

        Ok(Box::pin(timed.map(move |item| match item {
            Ok(inner) => inner,
            Err(_) => Err(MaestroError::timeout(idle_secs)),
        })))
    }

    fn request(
        &self,
        provider: &Provider,
        url: &str,
        body: &ChatRequest<'_>,
    ) -> reqwest::RequestBuilder {
        let mut request = self.client.post(url).json(body);
        if let Some(api_key) = &provider.api_key {
            request = request.bearer_auth(api_key);
        }
        request
    }

    fn map_send_error(&self, provider: &Provider, error: reqwest::Error) -> MaestroError {
        if error.is_timeout() {
            MaestroError::timeout(self.config.request_timeout_secs)
        } else if error.is_connect() {
            MaestroError::provider_unavailable(&provider.id, format!("connection failed: {error}"))
        } else {
            MaestroError::from(error)
        }
    }
}

fn check_ready(provider: &Provider) -> MaestroResult<()> {
    if !provider.active {
        return Err(MaestroError::provider_unavailable(
            &provider.id,
            "provider is inactive",
        ));
    }
    if provider.health == HealthStatus::Down {
        return Err(MaestroError::provider_unavailable(
            &provider.id,
            "provider is marked down",
        ));
    }
    Ok(())
}

fn event_to_chunk(event: SseEvent) -> Option<MaestroResult<StreamChunk>> {
    if event.is_done() {
        return Some(Ok(StreamChunk::terminal(None, None)));
    }
    match serde_json::from_str::<StreamEvent>(&event.data) {
        Ok(parsed) => {
            let chunk = StreamChunk {
                content: parsed
                    .delta_content()
                    .filter(|text| !text.is_empty())
                    .map(str::to_string),
                usage: parsed.usage.map(Into::into),
                finish_reason: parsed.finish_reason().map(str::to_string),
                is_final: false,
            };
            // Role-only deltas and keepalives carry nothing worth forwarding
            if chunk.content.is_none() && chunk.usage.is_none() && chunk.finish_reason.is_none() {
                None
            } else {
                Some(Ok(chunk))
            }
        }
        Err(err) => Some(Err(MaestroError::stream_parse(format!(
            "bad stream event: {err}: {}",
            body_snippet(&event.data)
        )))),
    }
}

fn map_transport_error(error: reqwest::Error, idle_secs: u64) -> MaestroError {
    if error.is_timeout() {
        MaestroError::timeout(idle_secs)
    } else {
        MaestroError::from(error)
    }
}

fn body_snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= ERROR_BODY_LIMIT {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(ERROR_BODY_LIMIT).collect();
        format!("{cut}...")
    }
}
