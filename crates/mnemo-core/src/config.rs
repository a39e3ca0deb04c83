//! Engine Configuration
//!
//! Every tunable constant lives here as a config struct with a `Default`
//! impl. Components take their own config so tests can override one knob
//! without touching the rest.

use std::collections::HashMap;

// ============================================================================
// CONCEPT TABLES
// ============================================================================

/// Default per-concept importance weights
pub const CONCEPT_WEIGHTS: &[(&str, f64)] = &[
    ("security", 0.30),
    ("gotcha", 0.25),
    ("best-practice", 0.20),
    ("anti-pattern", 0.20),
    ("architecture", 0.15),
    ("performance", 0.15),
    ("error-handling", 0.15),
    ("pattern", 0.10),
    ("testing", 0.10),
    ("debugging", 0.10),
    ("problem-solution", 0.10),
    ("trade-off", 0.10),
    ("workflow", 0.05),
    ("tooling", 0.05),
    ("how-it-works", 0.05),
    ("why-it-exists", 0.05),
    ("what-changed", 0.05),
];

/// Concepts that lift an observation from project scope to global scope
pub const GLOBALIZABLE_CONCEPTS: &[&str] = &[
    "best-practice",
    "pattern",
    "anti-pattern",
    "architecture",
    "security",
    "performance",
    "testing",
    "debugging",
    "workflow",
    "tooling",
];

/// Concepts that make a relation more valuable when shared by both endpoints
pub const HIGH_VALUE_CONCEPTS: &[&str] = &[
    "security",
    "architecture",
    "gotcha",
    "anti-pattern",
    "best-practice",
    "error-handling",
];

// ============================================================================
// STORE CONFIG
// ============================================================================

/// Observation store limits
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Newest observations kept per project; older rows are cleaned up
    pub max_observations_per_project: usize,
    /// Superseded observations are deleted after this many days
    pub superseded_retention_days: i64,
    /// Deadline for each detached ingest fan-out task
    pub fanout_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_observations_per_project: 100,
            superseded_retention_days: 3,
            fanout_timeout_secs: 10,
        }
    }
}

// ============================================================================
// RELEVANCE CONFIG
// ============================================================================

/// Coefficients for the relevance calculator
#[derive(Debug, Clone)]
pub struct RelevanceConfig {
    /// Half-life in days for both recency and access decay
    pub half_life_days: f64,
    /// Weight applied to the relation-count boost
    pub relation_weight: f64,
    /// Weight applied to explicit user feedback
    pub feedback_weight: f64,
    /// Weight applied to the retrieval-count boost
    pub retrieval_weight: f64,
    /// Scores never fall below this floor
    pub min_score: f64,
    /// Scores never rise above this ceiling
    pub max_score: f64,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            half_life_days: 7.0,
            relation_weight: 0.20,
            feedback_weight: 0.30,
            retrieval_weight: 0.15,
            min_score: 0.01,
            max_score: 2.0,
        }
    }
}

impl RelevanceConfig {
    /// Concept weight table as a map
    pub fn concept_weights() -> HashMap<&'static str, f64> {
        CONCEPT_WEIGHTS.iter().copied().collect()
    }
}

// ============================================================================
// DETECTOR CONFIG
// ============================================================================

/// Relation detector thresholds
#[derive(Debug, Clone)]
pub struct RelationConfig {
    /// Results below this confidence are dropped
    pub min_confidence: f64,
    /// Window for the temporal-proximity detector
    pub temporal_window_secs: i64,
    /// How many recent observations are considered as candidate pairs
    pub candidate_limit: usize,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.4,
            temporal_window_secs: 5 * 60,
            candidate_limit: 50,
        }
    }
}

/// Pattern detector knobs
#[derive(Debug, Clone)]
pub struct PatternConfig {
    /// Candidate map bound; least-recently-seen candidates are evicted
    pub max_candidates: usize,
    /// Jaccard score required to match an existing pattern
    pub min_match_score: f64,
    /// Candidate frequency at which a pattern is promoted
    pub min_frequency_for_pattern: u32,
    /// Background analysis cadence
    pub analysis_interval_secs: u64,
    /// Candidates unseen for this long are evicted by the background loop
    pub candidate_ttl_days: i64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            max_candidates: 500,
            min_match_score: 0.3,
            min_frequency_for_pattern: 2,
            analysis_interval_secs: 5 * 60,
            candidate_ttl_days: 7,
        }
    }
}

// ============================================================================
// SCHEDULER CONFIG
// ============================================================================

/// Consolidation scheduler cadences and forgetting policy
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Decay task interval
    pub decay_interval_secs: u64,
    /// Creative-association task interval
    pub association_interval_secs: u64,
    /// Forgetting task interval
    pub forget_interval_secs: u64,
    /// Whether the forgetting task runs at all
    pub forget_enabled: bool,
    /// Observations below this importance are candidates for archival
    pub forget_threshold: f64,
    /// Observations at or above this importance are never archived
    pub forget_protect_score: f64,
    /// Observations younger than this are never archived
    pub forget_protect_age_days: i64,
    /// Observations sampled per association run
    pub association_sample_size: usize,
    /// Minimum seconds between forgetting runs (rate-limit guard)
    pub forget_cooldown_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            decay_interval_secs: 24 * 3600,
            association_interval_secs: 168 * 3600,
            forget_interval_secs: 2160 * 3600,
            forget_enabled: false,
            forget_threshold: 0.01,
            forget_protect_score: 0.7,
            forget_protect_age_days: 90,
            association_sample_size: 20,
            forget_cooldown_secs: 3600,
        }
    }
}

// ============================================================================
// VECTOR CONFIG
// ============================================================================

/// How the hybrid vector store decides which embeddings to persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageStrategy {
    /// Persist every embedding
    Always,
    /// Persist only hub documents (access count over threshold)
    #[default]
    Hub,
    /// Persist nothing; recompute on every query
    OnDemand,
}

/// Hybrid vector store configuration
#[derive(Debug, Clone)]
pub struct VectorConfig {
    /// Selective-storage strategy
    pub strategy: StorageStrategy,
    /// Access count at which a document becomes a hub
    pub hub_threshold: u32,
    /// Hard floor for the auto-tuned hub threshold
    pub min_hub_threshold: u32,
    /// Hard ceiling for the auto-tuned hub threshold
    pub max_hub_threshold: u32,
    /// Embedding dimension the store accepts
    pub dimensions: usize,
    /// Auto-tuner latency target
    pub target_latency_ms: f64,
    /// Auto-tuner adjustment period
    pub adjust_period_secs: u64,
    /// Query-embedding LRU cache capacity
    pub query_cache_capacity: usize,
    /// Stored user-prompt documents are capped at this many rows
    pub max_user_prompts: usize,
    /// Minimum seconds between stale-vector rebuilds (rate-limit guard)
    pub rebuild_cooldown_secs: u64,
    /// Whether query results are expanded through the relation graph
    pub graph_expansion: bool,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            strategy: StorageStrategy::Hub,
            hub_threshold: 5,
            min_hub_threshold: 2,
            max_hub_threshold: 20,
            dimensions: 384,
            target_latency_ms: 50.0,
            adjust_period_secs: 5 * 60,
            query_cache_capacity: 100,
            max_user_prompts: 500,
            rebuild_cooldown_secs: 3600,
            graph_expansion: false,
        }
    }
}

/// Graph-expansion traversal limits
#[derive(Debug, Clone)]
pub struct GraphExpansionConfig {
    /// Maximum BFS depth from a seed result
    pub max_hops: u32,
    /// Edges followed per node
    pub branch_factor: usize,
    /// Edges below this confidence are not traversed
    pub min_edge_weight: f64,
    /// Propagated relevance decay per hop
    pub hop_decay: f64,
    /// Final-score degree boost ceiling
    pub max_degree_boost: f64,
}

impl Default for GraphExpansionConfig {
    fn default() -> Self {
        Self {
            max_hops: 2,
            branch_factor: 5,
            min_edge_weight: 0.3,
            hop_decay: 0.7,
            max_degree_boost: 1.1,
        }
    }
}

// ============================================================================
// RETRIEVAL CONFIG
// ============================================================================

/// Context-injection assembly limits
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Total observations returned by `inject`
    pub max_context_entries: usize,
    /// Entries rendered with full detail; the rest are condensed
    pub max_full_detail: usize,
    /// Cluster similarity threshold
    pub cluster_threshold: f64,
    /// Above this input size, clustering uses the signature pre-filter
    pub cluster_exact_limit: usize,
    /// Signature bits that must match before a pair is compared
    pub min_signature_bits: u32,
    /// Results fetched from each leg before merging
    pub per_leg_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_context_entries: 100,
            max_full_detail: 25,
            cluster_threshold: 0.4,
            cluster_exact_limit: 50,
            min_signature_bits: 32,
            per_leg_limit: 50,
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Aggregated engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Observation store limits
    pub store: StoreConfig,
    /// Relevance coefficients
    pub relevance: RelevanceConfig,
    /// Relation detector thresholds
    pub relation: RelationConfig,
    /// Pattern detector knobs
    pub pattern: PatternConfig,
    /// Scheduler cadences
    pub scheduler: SchedulerConfig,
    /// Vector store configuration
    pub vector: VectorConfig,
    /// Graph expansion limits
    pub graph: GraphExpansionConfig,
    /// Context assembly limits
    pub retrieval: RetrievalConfig,
}

// ============================================================================
// TESTS
// ============================================================================
