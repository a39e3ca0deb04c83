//! Conflict Detector
//!
//! Rule set producing conflict records between a new observation and
//! existing ones. Rules run in order and the first match wins per pair:
//!
//! 1. explicit correction language in the newer title or narrative
//! 2. opposing verbs over a shared modified file
//! 3. concept overlap combined with modified-file overlap

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::RegexSet;

use crate::memory::{ConflictType, NewConflict, Observation, Resolution, Scope};
use crate::text::overlap_count;

// ============================================================================
// RULE TABLES
// ============================================================================

/// Correction phrases; any hit means the newer observation retracts something
static CORRECTION_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)actually\b.*\bwas wrong",
        r"(?i)correction:",
        r"(?i)ignore (the )?previous",
        r"(?i)disregard (the )?earlier",
        r"(?i)was (wrong|incorrect|mistaken)",
        r"(?i)(supersedes|replaces|overrides) (the )?previous",
        r"(?i)no longer (valid|applicable|correct|recommended)",
        r"(?i)deprecated (approach|method|pattern|way)",
        r"(?i)better (approach|way|method|solution) is",
    ])
    .expect("correction patterns are valid regexes")
});

/// Verb pairs that point in opposite directions when applied to the same file
const OPPOSING_VERBS: &[(&str, &str)] = &[
    ("add", "remove"),
    ("added", "removed"),
    ("create", "delete"),
    ("enable", "disable"),
    ("include", "exclude"),
    ("allow", "deny"),
    ("permit", "block"),
];

// ============================================================================
// CONFLICT DETECTOR
// ============================================================================

/// Stateless conflict rule set
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    /// Create a detector
    pub fn new() -> Self {
        Self
    }

    /// Run the rules over every candidate pair.
    ///
    /// Pairs are considered when the projects match or either side is
    /// global-scoped. Each resulting `prefer_newer` conflict is expected to
    /// mark the older observation superseded when persisted.
    pub fn detect_all(&self, newer: &Observation, candidates: &[Observation]) -> Vec<NewConflict> {
        candidates
            .iter()
            .filter(|older| older.id != newer.id)
            .filter(|older| Self::scopes_touch(newer, older))
            .filter_map(|older| self.detect_pair(newer, older))
            .collect()
    }

    fn scopes_touch(newer: &Observation, older: &Observation) -> bool {
        newer.project == older.project
            || newer.scope == Scope::Global
            || older.scope == Scope::Global
    }

    /// First matching rule for one pair, if any
    pub fn detect_pair(&self, newer: &Observation, older: &Observation) -> Option<NewConflict> {
        if let Some(reason) = self.explicit_correction(newer) {
            return Some(NewConflict {
                newer_obs_id: newer.id,
                older_obs_id: older.id,
                conflict_type: ConflictType::Contradicts,
                resolution: Resolution::PreferNewer,
                reason,
            });
        }

        if let Some(reason) = self.opposing_file_changes(newer, older) {
            return Some(NewConflict {
                newer_obs_id: newer.id,
                older_obs_id: older.id,
                conflict_type: ConflictType::Superseded,
                resolution: Resolution::PreferNewer,
                reason,
            });
        }

        if let Some(reason) = self.concept_file_overlap(newer, older) {
            return Some(NewConflict {
                newer_obs_id: newer.id,
                older_obs_id: older.id,
                conflict_type: ConflictType::Superseded,
                resolution: Resolution::PreferNewer,
                reason,
            });
        }

        None
    }

    fn explicit_correction(&self, newer: &Observation) -> Option<String> {
        for text in [newer.narrative.as_deref(), newer.title.as_deref()]
            .into_iter()
            .flatten()
        {
            let matches = CORRECTION_PATTERNS.matches(text);
            if let Some(index) = matches.iter().next() {
                return Some(format!(
                    "explicit correction language (pattern {index}): {}",
                    truncate(text, 80)
                ));
            }
        }
        None
    }

    fn opposing_file_changes(&self, newer: &Observation, older: &Observation) -> Option<String> {
        if overlap_count(&newer.files_modified, &older.files_modified) == 0 {
            return None;
        }

        let newer_words = text_words(newer);
        let older_words = text_words(older);

        for (a, b) in OPPOSING_VERBS {
            let forward = newer_words.contains(*a) && older_words.contains(*b);
            let backward = newer_words.contains(*b) && older_words.contains(*a);
            if forward || backward {
                return Some(format!(
                    "opposing changes ({a}/{b}) to shared modified files"
                ));
            }
        }
        None
    }

    fn concept_file_overlap(&self, newer: &Observation, older: &Observation) -> Option<String> {
        let concepts = overlap_count(&newer.concepts, &older.concepts);
        let files = overlap_count(&newer.files_modified, &older.files_modified);
        if concepts > 0 && files > 0 {
            return Some(format!(
                "{concepts} shared concept(s) and {files} shared modified file(s)"
            ));
        }
        None
    }
}

/// Lowercased word set over title + narrative
fn text_words(obs: &Observation) -> HashSet<String> {
    let mut text = String::new();
    if let Some(t) = obs.title.as_deref() {
        text.push_str(t);
        text.push(' ');
    }
    if let Some(n) = obs.narrative.as_deref() {
        text.push_str(n);
    }
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============================================================================
// TESTS
// ============================================================================
