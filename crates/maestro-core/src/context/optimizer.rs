//! Context window optimization
//!
//! Trims conversation history to fit a model's context window before a
//! request goes out. The strategy is chosen from how much history there is:
//! long conversations keep a sliding window of recent messages, mid-length
//! conversations also retain earlier messages that look important, and short
//! conversations drop oldest-first. Retained messages always keep their
//! original relative order.

use crate::context::estimator::TokenEstimator;
use crate::types::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Non-system message count above which the sliding window strategy applies
const SLIDING_WINDOW_THRESHOLD: usize = 20;
/// Non-system message count at or above which selective retention applies
const SELECTIVE_RETENTION_THRESHOLD: usize = 10;

/// How a history was reduced to fit a token budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizationStrategy {
    /// History already fit, nothing removed
    NoOptimization,
    /// Oldest messages dropped until the rest fit
    Truncation,
    /// Recent messages plus important earlier messages retained
    SelectiveRetention,
    /// Only the most recent window of messages retained
    SlidingWindow,
}

impl OptimizationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoOptimization => "no-optimization",
            Self::Truncation => "truncation",
            Self::SelectiveRetention => "selective-retention",
            Self::SlidingWindow => "sliding-window",
        }
    }
}

impl fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of optimizing a history against a token budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedContext {
    /// Retained messages, in original order
    pub messages: Vec<Message>,
    /// Estimated tokens removed from the original history
    pub tokens_removed: usize,
    /// Strategy that produced this result
    pub strategy: OptimizationStrategy,
}

impl OptimizedContext {
    pub fn is_reduced(&self) -> bool {
        self.tokens_removed > 0
    }
}

/// Tuning for the optimizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Messages kept by the sliding window strategy
    pub sliding_window_size: usize,
    /// Fraction of recent messages always kept by selective retention
    pub recent_fraction: f64,
    /// Keywords that mark an earlier message as worth retaining
    pub importance_keywords: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            sliding_window_size: 20,
            recent_fraction: 0.5,
            importance_keywords: default_importance_keywords(),
        }
    }
}

fn default_importance_keywords() -> Vec<String> {
    [
        "error",
        "bug",
        "fail",
        "architecture",
        "api",
        "database",
        "schema",
        "security",
        "requirement",
        "decision",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

impl ContextConfig {
    pub fn validate(&self) -> crate::error::MaestroResult<()> {
        if self.sliding_window_size == 0 {
            return Err(crate::error::MaestroError::config(
                "sliding_window_size must be at least 1",
            ));
        }
        if !(self.recent_fraction > 0.0 && self.recent_fraction <= 1.0) {
            return Err(crate::error::MaestroError::config(
                "recent_fraction must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// Fits conversation histories into model context windows
#[derive(Debug, Clone)]
pub struct ContextOptimizer {
    estimator: TokenEstimator,
    config: ContextConfig,
}

impl Default for ContextOptimizer {
    fn default() -> Self {
        Self::new(TokenEstimator::new(), ContextConfig::default())
    }
}

impl ContextOptimizer {
    pub fn new(estimator: TokenEstimator, config: ContextConfig) -> Self {
        Self { estimator, config }
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Reduce `history` until it fits `max_tokens`.
    ///
    /// When `preserve_system` is set, system messages are always retained and
    /// do not count against the budget. The returned messages keep their
    /// original relative order, and running the result through `optimize`
    /// again is a no-op.
    pub fn optimize(
        &self,
        history: Vec<Message>,
        max_tokens: usize,
        preserve_system: bool,
    ) -> OptimizedContext {
        let tokens_before = self.estimator.estimate_history(&history);

        // Indices that may be removed. Pinned system messages never appear here.
        let candidates: Vec<usize> = history
            .iter()
            .enumerate()
            .filter(|(_, m)| !(preserve_system && m.is_system()))
            .map(|(i, _)| i)
            .collect();

        let candidate_tokens: usize = candidates
            .iter()
            .map(|&i| self.estimator.estimate_message(&history[i]))
            .sum();

        if candidate_tokens <= max_tokens {
            return OptimizedContext {
                messages: history,
                tokens_removed: 0,
                strategy: OptimizationStrategy::NoOptimization,
            };
        }

        let conversational = history.iter().filter(|m| !m.is_system()).count();
        let (strategy, mut kept) = if conversational > SLIDING_WINDOW_THRESHOLD {
            (
                OptimizationStrategy::SlidingWindow,
                self.sliding_window(&history, &candidates, max_tokens),
            )
        } else if conversational >= SELECTIVE_RETENTION_THRESHOLD {
            (
                OptimizationStrategy::SelectiveRetention,
                self.selective_retention(&history, &candidates, max_tokens),
            )
        } else {
            (
                OptimizationStrategy::Truncation,
                self.truncate_oldest(&history, &candidates, max_tokens),
            )
        };

        // A single retained message can still exceed the budget on its own.
        if let [only] = kept.as_slice() {
            let message = &history[*only];
            if self.estimator.estimate_message(message) > max_tokens {
                let truncated = hard_truncate(
                    &message.content,
                    self.estimator.max_content_len(max_tokens),
                );
                let mut messages = Vec::new();
                let mut replaced = false;
                for (i, m) in history.iter().enumerate() {
                    if preserve_system && m.is_system() {
                        messages.push(m.clone());
                    } else if i == *only {
                        messages.push(Message {
                            role: m.role,
                            content: truncated.clone(),
                        });
                        replaced = true;
                    }
                }
                debug_assert!(replaced);
                let tokens_after = self.estimator.estimate_history(&messages);
                return OptimizedContext {
                    messages,
                    tokens_removed: tokens_before.saturating_sub(tokens_after),
                    strategy,
                };
            }
        }

        kept.sort_unstable();
        let messages: Vec<Message> = history
            .iter()
            .enumerate()
            .filter(|(i, m)| (preserve_system && m.is_system()) || kept.binary_search(i).is_ok())
            .map(|(_, m)| m.clone())
            .collect();

        let tokens_after = self.estimator.estimate_history(&messages);
        let removed = tokens_before.saturating_sub(tokens_after);
        tracing::debug!(
            strategy = %strategy,
            tokens_before,
            tokens_after,
            kept = messages.len(),
            dropped = history.len() - messages.len(),
            "optimized context"
        );

        OptimizedContext {
            messages,
            tokens_removed: removed,
            strategy,
        }
    }

    /// Keep the longest suffix of candidates that fits the budget.
    /// Always keeps at least the newest candidate.
    fn truncate_oldest(
        &self,
        history: &[Message],
        candidates: &[usize],
        max_tokens: usize,
    ) -> Vec<usize> {
        let mut kept = Vec::new();
        let mut used = 0usize;
        // The newest message stays even when it alone blows the budget; the
        // caller hard-truncates that case.
        for &i in candidates.iter().rev() {
            let cost = self.estimator.estimate_message(&history[i]);
            if !kept.is_empty() && used + cost > max_tokens {
                break;
            }
            used += cost;
            kept.push(i);
        }
        kept
    }

    /// Keep the most recent `sliding_window_size` candidates, then shrink the
    /// window from the front until the budget holds.
    fn sliding_window(
        &self,
        history: &[Message],
        candidates: &[usize],
        max_tokens: usize,
    ) -> Vec<usize> {
        let window = self.config.sliding_window_size.max(1);
        let start = candidates.len().saturating_sub(window);
        let mut kept: Vec<usize> = candidates[start..].to_vec();
        self.shrink_front(history, &mut kept, max_tokens);
        kept
    }

    /// Keep the recent fraction of candidates plus earlier messages whose
    /// content matches an importance keyword, then shrink from the front if
    /// the budget still does not hold.
    fn selective_retention(
        &self,
        history: &[Message],
        candidates: &[usize],
        max_tokens: usize,
    ) -> Vec<usize> {
        let recent = ((candidates.len() as f64 * self.config.recent_fraction).ceil() as usize)
            .clamp(1, candidates.len());
        let split = candidates.len() - recent;

        let mut kept: Vec<usize> = candidates[..split]
            .iter()
            .copied()
            .filter(|&i| self.is_important(&history[i].content))
            .collect();
        kept.extend_from_slice(&candidates[split..]);
        self.shrink_front(history, &mut kept, max_tokens);
        kept
    }

    fn is_important(&self, content: &str) -> bool {
        let lowered = content.to_lowercase();
        self.config
            .importance_keywords
            .iter()
            .any(|k| contains_word(&lowered, k))
    }

    /// Drop from the front of `kept` until the retained set fits, leaving at
    /// least one message.
    fn shrink_front(&self, history: &[Message], kept: &mut Vec<usize>, max_tokens: usize) {
        let mut used: usize = kept
            .iter()
            .map(|&i| self.estimator.estimate_message(&history[i]))
            .sum();
        let mut drop = 0;
        while used > max_tokens && drop + 1 < kept.len() {
            used -= self.estimator.estimate_message(&history[kept[drop]]);
            drop += 1;
        }
        kept.drain(..drop);
    }
}

/// Whole-word, case-insensitive match. `text` must already be lowercased.
fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}

/// Cut `content` to at most `max_len` bytes on a char boundary, marking the
/// cut with an ellipsis.
fn hard_truncate(content: &str, max_len: usize) -> String {
    if content.len() <= max_len {
        return content.to_string();
    }
    let reserved = max_len.saturating_sub('…'.len_utf8());
    let mut cut = reserved;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &content[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;

    fn conversation(count: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("You are a helpful assistant.")];
        for i in 0..count {
            if i % 2 == 0 {
                messages.push(Message::user(format!("User message number {i}")));
            } else {
                messages.push(Message::assistant(format!("Assistant reply number {i}")));
            }
        }
        messages
    }

    fn optimizer() -> ContextOptimizer {
        ContextOptimizer::default()
    }

    #[test]
    fn test_fitting_history_is_untouched() {
        let history = conversation(4);
        let result = optimizer().optimize(history.clone(), 10_000, true);
        assert_eq!(result.strategy, OptimizationStrategy::NoOptimization);
        assert_eq!(result.tokens_removed, 0);
        assert_eq!(result.messages.len(), history.len());
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let opt = optimizer();
        let first = opt.optimize(conversation(30), 120, true);
        assert!(first.is_reduced());
        let second = opt.optimize(first.messages.clone(), 120, true);
        assert_eq!(second.strategy, OptimizationStrategy::NoOptimization);
        assert_eq!(second.tokens_removed, 0);
        assert_eq!(second.messages.len(), first.messages.len());
    }

    #[test]
    fn test_long_history_uses_sliding_window() {
        let history = conversation(25);
        let result = optimizer().optimize(history.clone(), 150, true);
        assert_eq!(result.strategy, OptimizationStrategy::SlidingWindow);
        assert!(result.is_reduced());
        // Most recent message survives
        let last = history.last().cloned().into_iter().next();
        assert_eq!(result.messages.last().cloned(), last);
    }

    #[test]
    fn test_mid_history_uses_selective_retention() {
        let history = conversation(14);
        let result = optimizer().optimize(history, 100, true);
        assert_eq!(result.strategy, OptimizationStrategy::SelectiveRetention);
        assert!(result.is_reduced());
    }

    #[test]
    fn test_selective_retention_keeps_important_early_message() {
        let mut history = vec![Message::system("You are a helpful assistant.")];
        history.push(Message::user(
            "The database schema uses a composite key on (tenant, id).",
        ));
        for i in 0..13 {
            history.push(Message::user(format!("Chatter about nothing much, {i}")));
        }
        let config = ContextConfig {
            recent_fraction: 0.3,
            ..ContextConfig::default()
        };
        let opt = ContextOptimizer::new(TokenEstimator::new(), config);
        let result = opt.optimize(history, 120, true);
        assert_eq!(result.strategy, OptimizationStrategy::SelectiveRetention);
        assert!(
            result
                .messages
                .iter()
                .any(|m| m.content.contains("composite key")),
            "keyword-bearing message was dropped"
        );
    }

    #[test]
    fn test_keyword_match_is_whole_word() {
        assert!(contains_word("the api returned 500", "api"));
        assert!(contains_word("an api-level concern", "api"));
        assert!(!contains_word("growth was rapid last year", "api"));
        assert!(!contains_word("debugging the capital case", "api"));
    }

    #[test]
    fn test_short_history_truncates_oldest_first() {
        let history = conversation(6);
        let result = optimizer().optimize(history.clone(), 40, true);
        assert_eq!(result.strategy, OptimizationStrategy::Truncation);
        // Survivors are a suffix of the original conversation
        let tail: Vec<&Message> = history
            .iter()
            .filter(|m| !m.is_system())
            .rev()
            .take(result.messages.iter().filter(|m| !m.is_system()).count())
            .collect();
        for kept in result.messages.iter().filter(|m| !m.is_system()) {
            assert!(tail.iter().any(|m| m.content == kept.content));
        }
    }

    #[test]
    fn test_lone_oversized_message_is_hard_truncated() {
        let history = vec![
            Message::system("You are a helpful assistant."),
            Message::user("x".repeat(4_000)),
        ];
        let opt = optimizer();
        let result = opt.optimize(history, 50, true);
        assert_eq!(result.strategy, OptimizationStrategy::Truncation);
        let user = result
            .messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .unwrap();
        assert!(user.content.ends_with('…'));
        assert!(opt.estimator().estimate_message(user) <= 50);
    }

    #[test]
    fn test_hard_truncate_respects_char_boundaries() {
        let content = "日本語のテキストです。".repeat(40);
        let cut = hard_truncate(&content, 100);
        assert!(cut.len() <= 100);
        assert!(cut.ends_with('…'));
        // Would panic on a bad boundary; also verify it is valid UTF-8 end to end
        assert!(cut.chars().count() > 0);
    }

    #[test]
    fn test_system_messages_survive_tiny_budget() {
        let history = conversation(12);
        let result = optimizer().optimize(history, 20, true);
        assert!(result.messages.iter().any(|m| m.is_system()));
    }

    #[test]
    fn test_system_counts_against_budget_when_not_preserved() {
        let mut history = vec![Message::system("x".repeat(2_000))];
        history.push(Message::user("short question"));
        let result = optimizer().optimize(history, 50, false);
        // The huge system prompt is droppable here
        assert!(!result.messages.iter().any(|m| m.is_system()));
        assert!(result.messages.iter().any(|m| m.content == "short question"));
    }

    #[test]
    fn test_retained_order_matches_original() {
        let history = conversation(26);
        let result = optimizer().optimize(history.clone(), 200, true);
        let original_order: Vec<String> = history.iter().map(|m| m.content.clone()).collect();
        let mut last_pos = 0;
        for kept in &result.messages {
            let pos = original_order
                .iter()
                .position(|c| *c == kept.content)
                .unwrap();
            assert!(pos >= last_pos, "retained messages out of order");
            last_pos = pos;
        }
    }

    #[test]
    fn test_config_validation() {
        let bad = ContextConfig {
            sliding_window_size: 0,
            ..ContextConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = ContextConfig {
            recent_fraction: 1.5,
            ..ContextConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(ContextConfig::default().validate().is_ok());
    }
}
