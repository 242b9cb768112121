//! Trailing per-route performance metrics
//!
//! Keeps a bounded window of recent attempts per provider and model pair.
//! Routing reads these to weight reliability and latency; the window makes
//! old incidents age out instead of haunting a provider forever.

use dashmap::DashMap;
use std::collections::VecDeque;

/// Attempts remembered per route
const WINDOW_SIZE: usize = 20;

#[derive(Debug, Clone, Copy)]
struct Attempt {
    success: bool,
    latency_ms: u64,
}

#[derive(Debug, Default)]
struct AttemptWindow {
    attempts: VecDeque<Attempt>,
}

impl AttemptWindow {
    fn push(&mut self, attempt: Attempt) {
        if self.attempts.len() == WINDOW_SIZE {
            self.attempts.pop_front();
        }
        self.attempts.push_back(attempt);
    }

    fn success_rate(&self) -> Option<f64> {
        if self.attempts.is_empty() {
            return None;
        }
        let successes = self.attempts.iter().filter(|a| a.success).count();
        Some(successes as f64 / self.attempts.len() as f64)
    }

    fn avg_latency_ms(&self) -> Option<u64> {
        let successful: Vec<u64> = self
            .attempts
            .iter()
            .filter(|a| a.success)
            .map(|a| a.latency_ms)
            .collect();
        if successful.is_empty() {
            return None;
        }
        Some(successful.iter().sum::<u64>() / successful.len() as u64)
    }
}

/// Concurrent route metrics keyed by provider and model
#[derive(Debug, Default)]
pub struct RouteMetrics {
    windows: DashMap<(String, String), AttemptWindow>,
}

impl RouteMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt against a route
    pub fn observe(&self, provider_id: &str, model_id: &str, success: bool, latency_ms: u64) {
        let key = (provider_id.to_string(), model_id.to_string());
        self.windows.entry(key).or_default().push(Attempt {
            success,
            latency_ms,
        });
    }

    /// Fraction of recent attempts that succeeded. None without history.
    pub fn success_rate(&self, provider_id: &str, model_id: &str) -> Option<f64> {
        self.windows
            .get(&(provider_id.to_string(), model_id.to_string()))
            .and_then(|window| window.success_rate())
    }

    /// Mean latency of recent successful attempts. None without a success.
    pub fn avg_latency_ms(&self, provider_id: &str, model_id: &str) -> Option<u64> {
        self.windows
            .get(&(provider_id.to_string(), model_id.to_string()))
            .and_then(|window| window.avg_latency_ms())
    }
}
