//! Consolidation
//!
//! Long-running maintenance over the observation store:
//! - decay: recompute importance scores for every observation
//! - creative association: find relations between recent observations by
//!   embedding similarity and type pairing
//! - forgetting: archive observations whose importance collapsed
//!   (disabled by default; archives, never deletes)

mod scheduler;

pub use scheduler::ConsolidationScheduler;

use serde::{Deserialize, Serialize};

// ============================================================================
// RUN REPORTS
// ============================================================================

/// Result of one decay pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayReport {
    /// Observations whose score was recomputed
    pub observations_processed: i64,
    /// Processing duration in milliseconds
    pub duration_ms: i64,
}

/// Result of one creative-association pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationReport {
    /// Observations sampled
    pub sampled: i64,
    /// Pairs compared
    pub pairs_checked: i64,
    /// Relations written (duplicates excluded)
    pub relations_created: i64,
}

/// Result of one forgetting pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgetReport {
    /// Observations examined
    pub examined: i64,
    /// Observations archived
    pub archived: i64,
    /// Observations spared by a protection rule
    pub protected: i64,
}
