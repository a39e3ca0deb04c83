//! Conflicts - Records of detected inconsistencies between observations

use serde::{Deserialize, Serialize};

// ============================================================================
// CONFLICT TYPE
// ============================================================================

/// What kind of inconsistency was detected
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// The newer observation makes the older obsolete
    Superseded,
    /// The two observations cannot both hold
    Contradicts,
    /// The older observation encodes a pattern that no longer applies
    OutdatedPattern,
}

impl ConflictType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Superseded => "superseded",
            ConflictType::Contradicts => "contradicts",
            ConflictType::OutdatedPattern => "outdated_pattern",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "superseded" => Some(ConflictType::Superseded),
            "contradicts" => Some(ConflictType::Contradicts),
            "outdated_pattern" => Some(ConflictType::OutdatedPattern),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// How a conflict is resolved
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The newer observation wins; the older is marked superseded
    PreferNewer,
    /// The older observation stands
    PreferOlder,
    /// A human has to decide
    Manual,
}

impl Resolution {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::PreferNewer => "prefer_newer",
            Resolution::PreferOlder => "prefer_older",
            Resolution::Manual => "manual",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "prefer_newer" => Some(Resolution::PreferNewer),
            "prefer_older" => Some(Resolution::PreferOlder),
            "manual" => Some(Resolution::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CONFLICT
// ============================================================================

/// A stored conflict record
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Row id
    pub id: i64,
    /// The more recent observation
    pub newer_obs_id: i64,
    /// The observation it conflicts with
    pub older_obs_id: i64,
    /// Inconsistency classification
    pub conflict_type: ConflictType,
    /// How the conflict resolves
    pub resolution: Resolution,
    /// Which rule fired, human-readable
    pub reason: String,
    /// Detection time, epoch millis
    pub detected_at_epoch: i64,
    /// Whether the conflict has been acted on
    pub resolved: bool,
    /// Resolution time, RFC3339, when resolved
    pub resolved_at: Option<String>,
}

/// A conflict before it is persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewConflict {
    /// The more recent observation
    pub newer_obs_id: i64,
    /// The observation it conflicts with
    pub older_obs_id: i64,
    /// Inconsistency classification
    pub conflict_type: ConflictType,
    /// How the conflict resolves
    pub resolution: Resolution,
    /// Which rule fired, human-readable
    pub reason: String,
}

// ============================================================================
// TESTS
// ============================================================================
