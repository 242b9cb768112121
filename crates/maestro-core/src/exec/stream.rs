//! Streamed output batching
//!
//! Raw provider deltas arrive as tiny fragments, often a token at a time.
//! The optimizer coalesces them into readable pieces, flushing on natural
//! text boundaries once a minimum size is reached, on a hard buffer cap,
//! or after a short age deadline so output never feels stalled.

use crate::error::{MaestroError, MaestroResult};
use crate::exec::{ChunkStream, StreamChunk};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Characters that end a natural flush point
const BOUNDARY_CHARS: [char; 8] = ['.', '!', '?', '\n', ',', ';', ':', ')'];

/// Stream batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Flush unconditionally at this many buffered characters
    pub max_buffer_chars: usize,
    /// Smallest piece worth flushing on a boundary character
    pub min_flush_chars: usize,
    /// Longest a buffered fragment may wait before a forced flush
    pub max_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_buffer_chars: 50,
            min_flush_chars: 8,
            max_delay_ms: 16,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> MaestroResult<()> {
        if self.max_buffer_chars == 0 {
            return Err(MaestroError::config(
                "stream max_buffer_chars must be at least 1",
            ));
        }
        if self.min_flush_chars > self.max_buffer_chars {
            return Err(MaestroError::config(
                "stream min_flush_chars cannot exceed max_buffer_chars",
            ));
        }
        Ok(())
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Coalesces delta fragments into boundary-aligned pieces
#[derive(Debug)]
pub struct StreamOptimizer {
    config: StreamConfig,
    buffer: String,
    buffered_chars: usize,
    oldest: Option<Instant>,
}

impl Default for StreamOptimizer {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl StreamOptimizer {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            buffered_chars: 0,
            oldest: None,
        }
    }

    /// Add a fragment, returning a piece when a flush condition is met
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if fragment.is_empty() {
            return None;
        }
        if self.buffer.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.buffer.push_str(fragment);
        self.buffered_chars += fragment.chars().count();

        if self.buffered_chars >= self.config.max_buffer_chars {
            return self.take();
        }
        if self.buffered_chars >= self.config.min_flush_chars
            && self
                .buffer
                .chars()
                .next_back()
                .is_some_and(|c| BOUNDARY_CHARS.contains(&c))
        {
            return self.take();
        }
        None
    }

    /// Flush whatever is buffered regardless of boundaries
    pub fn force_flush(&mut self) -> Option<String> {
        self.take()
    }

    /// When the age-based flush should fire. None while empty.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.oldest.map(|at| at + self.config.max_delay())
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn take(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        self.buffered_chars = 0;
        self.oldest = None;
        Some(std::mem::take(&mut self.buffer))
    }
}

/// What a fully pumped stream produced
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Full concatenated content, delivered or not
    pub content: String,
    /// Provider-reported usage when the stream carried one
    pub usage: Option<crate::types::TokenUsage>,
    pub finish_reason: Option<String>,
    /// False when the stream broke before its terminal event
    pub complete: bool,
    /// Pieces actually handed to the consumer
    pub delivered: usize,
    /// Why the stream ended early, when it did
    pub abort: Option<String>,
}

enum Step {
    Chunk(Option<MaestroResult<StreamChunk>>),
    DeadlineFlush,
    Abort(MaestroError),
}

/// Drive a chunk stream through an optimizer into a consumer channel.
///
/// An upstream error or cancellation before anything was delivered
/// propagates, so the caller can still fail over. After delivery has started
/// the same events end the stream with `complete: false` instead; the
/// consumer keeps every piece it already received. A closed consumer cancels
/// the pump.
pub async fn pump(
    mut chunks: ChunkStream,
    mut optimizer: StreamOptimizer,
    sender: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> MaestroResult<StreamOutcome> {
    let mut outcome = StreamOutcome {
        content: String::new(),
        usage: None,
        finish_reason: None,
        complete: false,
        delivered: 0,
        abort: None,
    };

    loop {
        let deadline = optimizer.next_deadline();
        let step = tokio::select! {
            maybe = chunks.next() => Step::Chunk(maybe),
            _ = sleep_until_or_far(deadline), if deadline.is_some() => Step::DeadlineFlush,
            _ = cancel.cancelled() => Step::Abort(MaestroError::Cancelled),
        };

        match step {
            Step::DeadlineFlush => {
                if let Some(piece) = optimizer.force_flush() {
                    deliver(&sender, piece, &mut outcome).await?;
                }
            }
            Step::Chunk(None) => break,
            Step::Chunk(Some(Ok(chunk))) => {
                if let Some(text) = &chunk.content {
                    outcome.content.push_str(text);
                    if let Some(piece) = optimizer.push(text) {
                        deliver(&sender, piece, &mut outcome).await?;
                    }
                }
                if chunk.usage.is_some() {
                    outcome.usage = chunk.usage;
                }
                if chunk.finish_reason.is_some() {
                    outcome.finish_reason = chunk.finish_reason;
                }
                if chunk.is_final {
                    outcome.complete = true;
                    break;
                }
            }
            Step::Chunk(Some(Err(err))) | Step::Abort(err) => {
                if outcome.delivered == 0 {
                    return Err(err);
                }
                tracing::warn!(error = %err, delivered = outcome.delivered, "stream broke mid-delivery");
                outcome.abort = Some(err.to_string());
                if let Some(piece) = optimizer.force_flush() {
                    deliver(&sender, piece, &mut outcome).await?;
                }
                return Ok(outcome);
            }
        }
    }

    if let Some(piece) = optimizer.force_flush() {
        deliver(&sender, piece, &mut outcome).await?;
    }
    // A finish reason without a terminal sentinel still counts as a clean end
    if outcome.finish_reason.is_some() {
        outcome.complete = true;
    }
    Ok(outcome)
}

async fn sleep_until_or_far(deadline: Option<Instant>) {
    // Disabled branches still build their future; give them a harmless one
    let at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
    tokio::time::sleep_until(at.into()).await;
}

async fn deliver(
    sender: &mpsc::Sender<String>,
    piece: String,
    outcome: &mut StreamOutcome,
) -> MaestroResult<()> {
    sender
        .send(piece)
        .await
        .map_err(|_| MaestroError::Cancelled)?;
    outcome.delivered += 1;
    Ok(())
}
