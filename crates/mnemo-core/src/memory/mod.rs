//! Memory module - Core types and data structures
//!
//! Entities of the memory model:
//! - Observations (unit of extracted knowledge) with derived scope and
//!   memory type
//! - Relations (directed typed edges)
//! - Conflicts (detected inconsistencies, may supersede)
//! - Patterns (promoted recurring signatures)

mod conflict;
mod observation;
mod pattern;
mod relation;

pub use conflict::{Conflict, ConflictType, NewConflict, Resolution};
pub use observation::{MemoryKind, Observation, ObservationKind, ParsedObservation, Scope};
pub use pattern::{NewPattern, Pattern, PatternStatus, PatternType};
pub use relation::{DetectionSource, NewRelation, Relation, RelationType};

use serde::{Deserialize, Serialize};

// ============================================================================
// ENGINE STATISTICS
// ============================================================================

/// Read-only counters for the statusline hook
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// All stored observations
    pub total_observations: i64,
    /// Observations that are neither superseded nor archived
    pub active_observations: i64,
    /// Superseded observations awaiting retention cleanup
    pub superseded_observations: i64,
    /// Observations archived by the forgetting task
    pub archived_observations: i64,
    /// Stored relation edges
    pub total_relations: i64,
    /// Conflicts not yet resolved
    pub unresolved_conflicts: i64,
    /// Patterns in active status
    pub active_patterns: i64,
    /// Persisted vector documents
    pub vector_documents: i64,
    /// Oldest observation, epoch millis
    pub oldest_observation_epoch: Option<i64>,
    /// Newest observation, epoch millis
    pub newest_observation_epoch: Option<i64>,
}

// ============================================================================
// SORT ORDER
// ============================================================================

/// Ordering for multi-row observation reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationOrder {
    /// Highest importance first (default)
    #[default]
    Importance,
    /// Newest first
    DateDesc,
    /// Oldest first
    DateAsc,
}

impl ObservationOrder {
    /// ORDER BY clause for this ordering
    pub fn sql(&self) -> &'static str {
        match self {
            ObservationOrder::Importance => {
                "importance_score DESC, created_at_epoch DESC"
            }
            ObservationOrder::DateDesc => "created_at_epoch DESC",
            ObservationOrder::DateAsc => "created_at_epoch ASC",
        }
    }
}
