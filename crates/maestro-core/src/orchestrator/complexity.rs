//! Task complexity scoring
//!
//! Classifies the newest user message into a band that tunes routing.
//! Scoring is additive over cheap lexical signals; it is a heuristic for
//! picking a model class, not a judgment of the task itself.

use crate::provider::CostTier;
use crate::routing::RoutingConstraints;
use serde::{Deserialize, Serialize};
use std::fmt;

const LENGTH_DIVISOR: usize = 60;
const LENGTH_CAP: i32 = 20;
const COMPLEX_TERM_WEIGHT: i32 = 15;
const COMPLEX_TERM_CAP: i32 = 30;
const CODE_FENCE_WEIGHT: i32 = 20;
const ACTION_VERB_WEIGHT: i32 = 10;
const SIMPLE_TERM_WEIGHT: i32 = 15;

const COMPLEX_TERMS: [&str; 10] = [
    "architecture",
    "optimize",
    "scalable",
    "microservice",
    "distributed",
    "concurrency",
    "refactor",
    "performance",
    "algorithm",
    "security",
];

const ACTION_VERBS: [&str; 6] = [
    "implement",
    "build",
    "create",
    "design",
    "develop",
    "integrate",
];

const SIMPLE_TERMS: [&str; 5] = ["fix", "typo", "rename", "tweak", "bump"];

/// Complexity band of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskBand {
    Simple,
    Moderate,
    Complex,
    Expert,
}

impl TaskBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=24 => Self::Simple,
            25..=49 => Self::Moderate,
            50..=74 => Self::Complex,
            _ => Self::Expert,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::Expert => "expert",
        }
    }

    /// Tighten routing constraints to suit this band.
    ///
    /// Caller constraints are only ever narrowed: cost caps can drop and
    /// the context floor can rise, never the reverse.
    pub fn tune_constraints(&self, mut constraints: RoutingConstraints) -> RoutingConstraints {
        match self {
            Self::Simple => {
                constraints.max_cost_tier =
                    Some(cap_tier(constraints.max_cost_tier, CostTier::Low));
                constraints.prefer_local = true;
            }
            Self::Moderate => {
                constraints.max_cost_tier =
                    Some(cap_tier(constraints.max_cost_tier, CostTier::Medium));
            }
            Self::Complex => {
                constraints.min_context = Some(constraints.min_context.unwrap_or(0).max(16_384));
            }
            Self::Expert => {
                constraints.min_context = Some(constraints.min_context.unwrap_or(0).max(32_768));
            }
        }
        constraints
    }
}

impl fmt::Display for TaskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Score, band, and the signals that produced them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityAssessment {
    /// Clamped to 0..=100
    pub score: u8,
    pub band: TaskBand,
    /// Human-readable score contributions, for logs and rationales
    pub signals: Vec<String>,
}

/// Score a message and map it to a band
pub fn classify(message: &str) -> ComplexityAssessment {
    let mut score: i32 = 0;
    let mut signals = Vec::new();

    let length_points = ((message.chars().count() / LENGTH_DIVISOR) as i32).min(LENGTH_CAP);
    if length_points > 0 {
        score += length_points;
        signals.push(format!("length +{length_points}"));
    }

    let tokens: Vec<String> = message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect();

    let complex_hits = count_terms(&tokens, &COMPLEX_TERMS);
    if complex_hits > 0 {
        let points = (complex_hits as i32 * COMPLEX_TERM_WEIGHT).min(COMPLEX_TERM_CAP);
        score += points;
        signals.push(format!("complex vocabulary +{points}"));
    }

    if message.contains("```") {
        score += CODE_FENCE_WEIGHT;
        signals.push(format!("code fence +{CODE_FENCE_WEIGHT}"));
    }

    if count_terms(&tokens, &ACTION_VERBS) > 0 {
        score += ACTION_VERB_WEIGHT;
        signals.push(format!("action verb +{ACTION_VERB_WEIGHT}"));
    }

    let simple_hits = count_terms(&tokens, &SIMPLE_TERMS);
    if simple_hits > 0 {
        let points = simple_hits as i32 * SIMPLE_TERM_WEIGHT;
        score -= points;
        signals.push(format!("simple vocabulary -{points}"));
    }

    let score = score.clamp(0, 100) as u8;
    ComplexityAssessment {
        score,
        band: TaskBand::from_score(score),
        signals,
    }
}

/// Count how many terms appear in the token list, each at most once.
/// Prefix matching keeps plurals and verb forms in scope.
fn count_terms(tokens: &[String], terms: &[&str]) -> usize {
    terms
        .iter()
        .filter(|term| tokens.iter().any(|token| token.starts_with(*term)))
        .count()
}

fn cap_tier(current: Option<CostTier>, cap: CostTier) -> CostTier {
    match current {
        Some(tier) if tier.rank() <= cap.rank() => tier,
        _ => cap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UseCase;

    #[test]
    fn test_trivial_request_is_simple() {
        let assessment = classify("fix typo in README");
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.band, TaskBand::Simple);
    }

    #[test]
    fn test_design_request_is_complex() {
        let mut message = String::from(
            "Please design a scalable microservice architecture for our order \
             pipeline. Here is the current handler:\n```\nfn handle(order: Order) {\n    \
             queue.push(order);\n}\n```\nIt should survive regional outages and keep \
             per-order latency under 50ms at peak load.",
        );
        while message.chars().count() < 600 {
            message.push_str(" Consider how each service discovers its peers.");
        }

        let assessment = classify(&message);
        assert!(assessment.score >= 50, "score was {}", assessment.score);
        assert!(matches!(
            assessment.band,
            TaskBand::Complex | TaskBand::Expert
        ));
    }

    #[test]
    fn test_score_clamps_to_range() {
        let assessment = classify("fix typo rename tweak bump");
        assert_eq!(assessment.score, 0);

        let loaded = "implement build create design develop integrate \
                      architecture optimize scalable microservice distributed \
                      concurrency refactor performance algorithm security ```code```"
            .repeat(20);
        let assessment = classify(&loaded);
        assert!(assessment.score <= 100);
        assert_eq!(assessment.band, TaskBand::Expert);
    }

    #[test]
    fn test_prefix_matching_covers_plurals() {
        let assessment = classify("we are building microservices with distributed queues");
        assert!(assessment
            .signals
            .iter()
            .any(|signal| signal.starts_with("complex vocabulary")));
        assert!(assessment
            .signals
            .iter()
            .any(|signal| signal.starts_with("action verb")));
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(TaskBand::from_score(0), TaskBand::Simple);
        assert_eq!(TaskBand::from_score(24), TaskBand::Simple);
        assert_eq!(TaskBand::from_score(25), TaskBand::Moderate);
        assert_eq!(TaskBand::from_score(49), TaskBand::Moderate);
        assert_eq!(TaskBand::from_score(50), TaskBand::Complex);
        assert_eq!(TaskBand::from_score(74), TaskBand::Complex);
        assert_eq!(TaskBand::from_score(75), TaskBand::Expert);
        assert_eq!(TaskBand::from_score(100), TaskBand::Expert);
    }

    #[test]
    fn test_simple_band_caps_cost_and_prefers_local() {
        let tuned = TaskBand::Simple.tune_constraints(RoutingConstraints::default());
        assert_eq!(tuned.max_cost_tier, Some(CostTier::Low));
        assert!(tuned.prefer_local);
    }

    #[test]
    fn test_expert_band_raises_context_floor() {
        let tuned = TaskBand::Expert.tune_constraints(RoutingConstraints::for_use_case(
            UseCase::Coding,
        ));
        assert_eq!(tuned.min_context, Some(32_768));
    }

    #[test]
    fn test_tuning_never_loosens_caller_constraints() {
        let strict = RoutingConstraints::default()
            .with_max_cost_tier(CostTier::Free)
            .with_min_context(100_000);

        let tuned = TaskBand::Simple.tune_constraints(strict.clone());
        assert_eq!(tuned.max_cost_tier, Some(CostTier::Free));

        let tuned = TaskBand::Expert.tune_constraints(strict);
        assert_eq!(tuned.min_context, Some(100_000));
    }
}
