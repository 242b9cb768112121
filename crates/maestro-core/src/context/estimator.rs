//! Token estimation for conversation messages
//!
//! Exact tokenization varies by provider, so estimates use a characters-per-
//! token ratio. Good enough for budgeting decisions; never used as a
//! provider-side hard limit.

use crate::types::Message;
use serde::{Deserialize, Serialize};

/// Character-ratio token estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEstimator {
    /// Characters per token (average for English text)
    chars_per_token: f32,
    /// Overhead tokens per message (role tag, framing)
    message_overhead: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self {
            chars_per_token: 4.0,
            message_overhead: 4,
        }
    }

    /// Override the character ratio, clamped away from zero
    pub fn with_chars_per_token(mut self, chars_per_token: f32) -> Self {
        self.chars_per_token = chars_per_token.max(0.1);
        self
    }

    /// Estimate tokens for a plain string
    pub fn estimate_text(&self, text: &str) -> usize {
        (text.len() as f32 / self.chars_per_token).ceil() as usize
    }

    /// Estimate tokens for a single message, including framing overhead
    pub fn estimate_message(&self, message: &Message) -> usize {
        self.estimate_text(&message.content) + self.message_overhead
    }

    /// Estimate tokens for a whole history
    pub fn estimate_history(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    /// Longest content (in bytes) that fits a token budget for one message.
    /// Used when a lone message must be hard-truncated.
    pub fn max_content_len(&self, token_budget: usize) -> usize {
        let content_budget = token_budget.saturating_sub(self.message_overhead);
        (content_budget as f32 * self.chars_per_token).floor() as usize
    }
}
