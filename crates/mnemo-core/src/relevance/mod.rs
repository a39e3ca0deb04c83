//! Relevance Calculator
//!
//! Pure scoring function behind both consolidation decay and retrieval
//! ranking. No I/O here; callers gather the inputs and persist the outputs.
//!
//! The score combines:
//! 1. exponential recency decay (half-life, default 7 days)
//! 2. access-recency decay (falls back to recency when never accessed)
//! 3. a per-kind base multiplier
//! 4. a concept boost from the weighted concept table, clipped to [0, 1]
//! 5. log-scaled relation and retrieval boosts
//! 6. a signed feedback boost

use crate::config::RelevanceConfig;
use crate::memory::{Observation, ObservationKind};

// ============================================================================
// INPUT
// ============================================================================

/// Inputs to one relevance computation
#[derive(Debug, Clone, Default)]
pub struct RelevanceInput {
    /// Age of the observation in days
    pub age_days: f64,
    /// Days since last retrieval; `None` when never retrieved
    pub access_recency_days: Option<f64>,
    /// Edges touching the observation
    pub relation_count: i64,
    /// Mean confidence over those edges
    pub avg_relation_confidence: f64,
    /// Current importance score
    pub importance_score: f64,
    /// Explicit user feedback: -1, 0, or +1
    pub user_feedback: i32,
    /// Times retrieval returned this observation
    pub retrieval_count: i64,
    /// Concept tags
    pub concepts: Vec<String>,
    /// Session-event classification
    pub kind: ObservationKind,
}

impl RelevanceInput {
    /// Gather inputs from a stored observation at the given time
    pub fn from_observation(
        obs: &Observation,
        now: chrono::DateTime<chrono::Utc>,
        relation_count: i64,
        avg_relation_confidence: f64,
    ) -> Self {
        Self {
            age_days: obs.age_days(now),
            access_recency_days: obs.access_recency_days(now),
            relation_count,
            avg_relation_confidence,
            importance_score: obs.importance_score,
            user_feedback: obs.user_feedback,
            retrieval_count: obs.retrieval_count,
            concepts: obs.concepts.clone(),
            kind: obs.kind,
        }
    }
}

// ============================================================================
// CALCULATION
// ============================================================================

/// Compute a relevance score.
///
/// The result is clamped into `[config.min_score, config.max_score]`.
/// Holding everything else fixed the score is strictly monotonic in
/// `importance_score`, anti-monotonic in `age_days`, and symmetric under the
/// sign of `user_feedback`.
pub fn relevance(input: &RelevanceInput, config: &RelevanceConfig) -> f64 {
    let recency = half_life_decay(input.age_days, config.half_life_days);
    let access = match input.access_recency_days {
        Some(days) => half_life_decay(days, config.half_life_days),
        None => recency,
    };

    let type_base = input.kind.base_score();
    let concept_boost = concept_boost(&input.concepts).clamp(0.0, 1.0);

    let relation_boost = (1.0 + input.relation_count.max(0) as f64).ln()
        * input.avg_relation_confidence.clamp(0.0, 1.0)
        * config.relation_weight;
    let feedback_boost = f64::from(input.user_feedback) * config.feedback_weight;
    let retrieval_boost =
        (1.0 + input.retrieval_count.max(0) as f64).ln() * config.retrieval_weight;

    let core = type_base
        * input.importance_score
        * ((recency + access) / 2.0)
        * (1.0 + concept_boost);

    (core + relation_boost + feedback_boost + retrieval_boost)
        .clamp(config.min_score, config.max_score)
}

/// `0.5 ^ (days / half_life)`
fn half_life_decay(days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(days.max(0.0) / half_life_days)
}

/// Sum of table weights over the observation's concepts
fn concept_boost(concepts: &[String]) -> f64 {
    let weights = RelevanceConfig::concept_weights();
    concepts
        .iter()
        .filter_map(|c| weights.get(c.as_str()))
        .sum()
}

// ============================================================================
// TESTS
// ============================================================================
