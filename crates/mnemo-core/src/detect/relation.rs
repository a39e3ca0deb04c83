//! Relation Detector
//!
//! Five rule-based detectors over candidate observation pairs. Detectors run
//! in a fixed order and a later result replaces an earlier one only with
//! strictly greater confidence, so ties favour the first-run detector.
//! Temporal proximity is the weakest signal and only runs when no other
//! detector matched the pair. Results under the configured confidence floor
//! are dropped.

use crate::config::{HIGH_VALUE_CONCEPTS, RelationConfig};
use crate::memory::{DetectionSource, NewRelation, Observation, ObservationKind, RelationType};
use crate::text::{jaccard, overlap_count, significant_words};

// ============================================================================
// RELATION DETECTOR
// ============================================================================

/// Rule-based relation detector
#[derive(Debug, Clone, Default)]
pub struct RelationDetector {
    config: RelationConfig,
}

impl RelationDetector {
    /// Create a detector with the given thresholds
    pub fn new(config: RelationConfig) -> Self {
        Self { config }
    }

    /// Detect relations from `newer` to each candidate, best result per pair
    pub fn detect_all(&self, newer: &Observation, candidates: &[Observation]) -> Vec<NewRelation> {
        candidates
            .iter()
            .filter(|older| older.id != newer.id)
            .filter_map(|older| self.detect_pair(newer, older))
            .collect()
    }

    /// Best relation for one pair, after the confidence floor
    pub fn detect_pair(&self, newer: &Observation, older: &Observation) -> Option<NewRelation> {
        let mut best: Option<NewRelation> = None;

        let detectors = [
            Self::file_overlap,
            Self::concept_overlap,
            Self::type_progression,
            Self::narrative_mention,
        ];
        for detect in detectors {
            if let Some(found) = detect(self, newer, older) {
                // strictly greater: ties keep the earlier detector
                let replace = best
                    .as_ref()
                    .map(|b| found.confidence > b.confidence)
                    .unwrap_or(true);
                if replace {
                    best = Some(found);
                }
            }
        }

        // Weakest signal, only without any stronger detector match
        if best.is_none() {
            best = self.temporal_proximity(newer, older);
        }

        best.filter(|r| r.confidence >= self.config.min_confidence)
    }

    // ------------------------------------------------------------------
    // 1. File overlap
    // ------------------------------------------------------------------

    fn file_overlap(&self, newer: &Observation, older: &Observation) -> Option<NewRelation> {
        let newer_files = all_files(newer);
        let older_files = all_files(older);
        let overlap = overlap_count(&newer_files, &older_files);
        if overlap == 0 {
            return None;
        }

        let shared_modified = overlap_count(&newer.files_modified, &older.files_modified) > 0;
        let base = 0.5 + 0.1 * overlap as f64;

        let (relation_type, boost) = match (newer.kind, older.kind) {
            (ObservationKind::Bugfix, ObservationKind::Decision | ObservationKind::Feature) => {
                (RelationType::Fixes, 0.2)
            }
            (ObservationKind::Refactor, ObservationKind::Discovery) => {
                (RelationType::EvolvesFrom, 0.15)
            }
            (a, b) if a == b && shared_modified => (RelationType::Supersedes, 0.1),
            (ObservationKind::Feature, ObservationKind::Decision) => {
                (RelationType::DependsOn, 0.15)
            }
            _ => (RelationType::RelatesTo, 0.0),
        };

        Some(NewRelation {
            source_id: newer.id,
            target_id: older.id,
            relation_type,
            confidence: (base + boost).min(1.0),
            detection_source: DetectionSource::FileOverlap,
            reason: format!("{overlap} shared file(s)"),
        })
    }

    // ------------------------------------------------------------------
    // 2. Concept overlap
    // ------------------------------------------------------------------

    fn concept_overlap(&self, newer: &Observation, older: &Observation) -> Option<NewRelation> {
        let shared = overlap_count(&newer.concepts, &older.concepts);
        if shared == 0 {
            return None;
        }

        let ratio = jaccard(&newer.concepts, &older.concepts);
        let high_value = newer
            .concepts
            .iter()
            .filter(|c| {
                HIGH_VALUE_CONCEPTS.contains(&c.as_str())
                    && older.concepts.iter().any(|o| o == *c)
            })
            .count();

        let confidence = (0.3 + ratio * 0.5 + 0.1 * high_value as f64).min(1.0);

        Some(NewRelation {
            source_id: newer.id,
            target_id: older.id,
            relation_type: RelationType::SharesTheme,
            confidence,
            detection_source: DetectionSource::ConceptOverlap,
            reason: format!("{shared} shared concept(s), {high_value} high-value"),
        })
    }

    // ------------------------------------------------------------------
    // 3. Type progression
    // ------------------------------------------------------------------

    fn type_progression(&self, newer: &Observation, older: &Observation) -> Option<NewRelation> {
        let (relation_type, confidence) = match (newer.kind, older.kind) {
            (ObservationKind::Bugfix, ObservationKind::Discovery | ObservationKind::Feature) => {
                (RelationType::Fixes, 0.5)
            }
            (ObservationKind::Bugfix, ObservationKind::Decision) => (RelationType::Fixes, 0.45),
            (ObservationKind::Refactor, ObservationKind::Bugfix) => {
                (RelationType::EvolvesFrom, 0.5)
            }
            (ObservationKind::Refactor, ObservationKind::Decision) => {
                (RelationType::DependsOn, 0.45)
            }
            (ObservationKind::Feature, ObservationKind::Decision) => {
                (RelationType::DependsOn, 0.5)
            }
            (ObservationKind::Feature, ObservationKind::Discovery) => {
                (RelationType::DependsOn, 0.45)
            }
            (ObservationKind::Decision, ObservationKind::Discovery) => {
                (RelationType::EvolvesFrom, 0.45)
            }
            _ => return None,
        };

        Some(NewRelation {
            source_id: newer.id,
            target_id: older.id,
            relation_type,
            confidence,
            detection_source: DetectionSource::TypeProgression,
            reason: format!("{} follows {}", newer.kind, older.kind),
        })
    }

    // ------------------------------------------------------------------
    // 4. Temporal proximity (fallback)
    // ------------------------------------------------------------------

    fn temporal_proximity(&self, newer: &Observation, older: &Observation) -> Option<NewRelation> {
        if newer.session_id != older.session_id {
            return None;
        }
        let window_ms = self.config.temporal_window_secs * 1000;
        let delta = (newer.created_at_epoch - older.created_at_epoch).abs();
        if delta > window_ms {
            return None;
        }

        let closeness = 1.0 - delta as f64 / window_ms as f64;
        let confidence = 0.3 + closeness * 0.4;

        Some(NewRelation {
            source_id: newer.id,
            target_id: older.id,
            relation_type: RelationType::ParallelContext,
            confidence,
            detection_source: DetectionSource::TemporalProximity,
            reason: format!("same session, {}s apart", delta / 1000),
        })
    }

    // ------------------------------------------------------------------
    // 5. Narrative mention
    // ------------------------------------------------------------------

    fn narrative_mention(&self, newer: &Observation, older: &Observation) -> Option<NewRelation> {
        const PHRASES: &[(&str, RelationType, f64)] = &[
            ("caused", RelationType::Causes, 0.2),
            ("fixes", RelationType::Fixes, 0.25),
            ("fixed", RelationType::Fixes, 0.25),
            ("depends on", RelationType::DependsOn, 0.2),
            ("replaces", RelationType::Supersedes, 0.3),
            ("supersedes", RelationType::Supersedes, 0.3),
            ("evolved from", RelationType::EvolvesFrom, 0.2),
            ("contradicts", RelationType::Contradicts, 0.3),
            ("explains", RelationType::Explains, 0.2),
            ("related to", RelationType::RelatesTo, 0.1),
        ];

        let narrative = newer.narrative.as_deref()?.to_lowercase();

        // A phrase alone connects nothing; it must be anchored to the older
        // observation through a shared file, shared concept, or title token.
        if !self.mention_anchored(&narrative, newer, older) {
            return None;
        }

        for (phrase, relation_type, boost) in PHRASES {
            if narrative.contains(phrase) {
                return Some(NewRelation {
                    source_id: newer.id,
                    target_id: older.id,
                    relation_type: *relation_type,
                    confidence: 0.4 + boost,
                    detection_source: DetectionSource::NarrativeMention,
                    reason: format!("narrative mentions \"{phrase}\""),
                });
            }
        }
        None
    }

    fn mention_anchored(&self, narrative: &str, newer: &Observation, older: &Observation) -> bool {
        if overlap_count(&all_files(newer), &all_files(older)) > 0 {
            return true;
        }
        if overlap_count(&newer.concepts, &older.concepts) > 0 {
            return true;
        }
        older
            .title
            .as_deref()
            .map(|title| {
                significant_words(title)
                    .iter()
                    .any(|word| narrative.contains(word.as_str()))
            })
            .unwrap_or(false)
    }
}

/// Read and modified files as one set
fn all_files(obs: &Observation) -> Vec<String> {
    let mut files = obs.files_read.clone();
    for f in &obs.files_modified {
        if !files.contains(f) {
            files.push(f.clone());
        }
    }
    files
}

// ============================================================================
// TESTS
// ============================================================================
