//! Relations - Directed typed edges between observations

use serde::{Deserialize, Serialize};

// ============================================================================
// RELATION TYPE
// ============================================================================

/// Type of relationship between two observations
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Source caused target
    Causes,
    /// Source fixes the problem target describes
    Fixes,
    /// Source replaces target
    Supersedes,
    /// Source depends on target
    DependsOn,
    /// Generic association
    RelatesTo,
    /// Source grew out of target
    EvolvesFrom,
    /// Source and target cannot both hold
    Contradicts,
    /// Source and target share a theme
    SharesTheme,
    /// Source explains target
    Explains,
    /// Captured in the same working context
    ParallelContext,
}

impl RelationType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Causes => "causes",
            RelationType::Fixes => "fixes",
            RelationType::Supersedes => "supersedes",
            RelationType::DependsOn => "depends_on",
            RelationType::RelatesTo => "relates_to",
            RelationType::EvolvesFrom => "evolves_from",
            RelationType::Contradicts => "contradicts",
            RelationType::SharesTheme => "shares_theme",
            RelationType::Explains => "explains",
            RelationType::ParallelContext => "parallel_context",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "causes" => Some(RelationType::Causes),
            "fixes" => Some(RelationType::Fixes),
            "supersedes" => Some(RelationType::Supersedes),
            "depends_on" => Some(RelationType::DependsOn),
            "relates_to" => Some(RelationType::RelatesTo),
            "evolves_from" => Some(RelationType::EvolvesFrom),
            "contradicts" => Some(RelationType::Contradicts),
            "shares_theme" => Some(RelationType::SharesTheme),
            "explains" => Some(RelationType::Explains),
            "parallel_context" => Some(RelationType::ParallelContext),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// DETECTION SOURCE
// ============================================================================

/// Which detector produced a relation
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    /// Shared file sets
    FileOverlap,
    /// Vector similarity at ingest
    EmbeddingSimilarity,
    /// Close in time within one session
    TemporalProximity,
    /// Phrase found in the narrative
    NarrativeMention,
    /// Shared concept sets
    ConceptOverlap,
    /// Kind-to-kind progression
    TypeProgression,
    /// Found by the periodic association task
    CreativeAssociation,
}

impl DetectionSource {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::FileOverlap => "file_overlap",
            DetectionSource::EmbeddingSimilarity => "embedding_similarity",
            DetectionSource::TemporalProximity => "temporal_proximity",
            DetectionSource::NarrativeMention => "narrative_mention",
            DetectionSource::ConceptOverlap => "concept_overlap",
            DetectionSource::TypeProgression => "type_progression",
            DetectionSource::CreativeAssociation => "creative_association",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "file_overlap" => Some(DetectionSource::FileOverlap),
            "embedding_similarity" => Some(DetectionSource::EmbeddingSimilarity),
            "temporal_proximity" => Some(DetectionSource::TemporalProximity),
            "narrative_mention" => Some(DetectionSource::NarrativeMention),
            "concept_overlap" => Some(DetectionSource::ConceptOverlap),
            "type_progression" => Some(DetectionSource::TypeProgression),
            "creative_association" => Some(DetectionSource::CreativeAssociation),
            _ => None,
        }
    }
}

impl std::fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RELATION
// ============================================================================

/// A stored directed edge
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// Row id
    pub id: i64,
    /// Source observation
    pub source_id: i64,
    /// Target observation
    pub target_id: i64,
    /// Edge type
    pub relation_type: RelationType,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// Which detector produced the edge
    pub detection_source: DetectionSource,
    /// Human-readable reason
    pub reason: String,
    /// Creation time, epoch millis
    pub created_at_epoch: i64,
}

/// A relation before it is persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelation {
    /// Source observation
    pub source_id: i64,
    /// Target observation
    pub target_id: i64,
    /// Edge type
    pub relation_type: RelationType,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// Which detector produced the edge
    pub detection_source: DetectionSource,
    /// Human-readable reason
    pub reason: String,
}

impl NewRelation {
    /// Validate edge invariants before insert
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.source_id == self.target_id {
            return Err(crate::error::EngineError::Validation(format!(
                "relation is a self-loop on observation {}",
                self.source_id
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(crate::error::EngineError::Validation(format!(
                "relation confidence {} out of [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_type_roundtrip() {
        for rt in [
            RelationType::Causes,
            RelationType::Fixes,
            RelationType::Supersedes,
            RelationType::DependsOn,
            RelationType::RelatesTo,
            RelationType::EvolvesFrom,
            RelationType::Contradicts,
            RelationType::SharesTheme,
            RelationType::Explains,
            RelationType::ParallelContext,
        ] {
            assert_eq!(RelationType::parse_name(rt.as_str()), Some(rt));
        }
        assert_eq!(RelationType::parse_name("unknown"), None);
    }

    #[test]
    fn test_detection_source_roundtrip() {
        for src in [
            DetectionSource::FileOverlap,
            DetectionSource::EmbeddingSimilarity,
            DetectionSource::TemporalProximity,
            DetectionSource::NarrativeMention,
            DetectionSource::ConceptOverlap,
            DetectionSource::TypeProgression,
            DetectionSource::CreativeAssociation,
        ] {
            assert_eq!(DetectionSource::parse_name(src.as_str()), Some(src));
        }
    }

    #[test]
    fn test_new_relation_validation() {
        let ok = NewRelation {
            source_id: 2,
            target_id: 1,
            relation_type: RelationType::Fixes,
            confidence: 0.7,
            detection_source: DetectionSource::FileOverlap,
            reason: "shared files".into(),
        };
        assert!(ok.validate().is_ok());

        let self_loop = NewRelation {
            source_id: 1,
            target_id: 1,
            ..ok.clone()
        };
        assert!(self_loop.validate().is_err());

        let bad_confidence = NewRelation {
            confidence: 1.5,
            ..ok
        };
        assert!(bad_confidence.validate().is_err());
    }
}
