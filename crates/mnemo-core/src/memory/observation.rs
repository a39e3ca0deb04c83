//! Observation - The unit of extracted knowledge
//!
//! Each observation captures what one assistant session learned or did:
//! a classification, free-text narrative, facts, concepts, and the files it
//! touched. Scope and memory type are derived from the concept set.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GLOBALIZABLE_CONCEPTS;

// ============================================================================
// OBSERVATION KIND
// ============================================================================

/// What kind of session event an observation records
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    /// An architectural or implementation decision
    Decision,
    /// A bug and its fix
    Bugfix,
    /// A feature added or extended
    Feature,
    /// A restructuring without behavior change
    Refactor,
    /// Something learned about the code base
    Discovery,
    /// A generic change
    #[default]
    Change,
}

impl ObservationKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationKind::Decision => "decision",
            ObservationKind::Bugfix => "bugfix",
            ObservationKind::Feature => "feature",
            ObservationKind::Refactor => "refactor",
            ObservationKind::Discovery => "discovery",
            ObservationKind::Change => "change",
        }
    }

    /// Parse from string name; unknown names fall back to `Change`
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "decision" => ObservationKind::Decision,
            "bugfix" => ObservationKind::Bugfix,
            "feature" => ObservationKind::Feature,
            "refactor" => ObservationKind::Refactor,
            "discovery" => ObservationKind::Discovery,
            _ => ObservationKind::Change,
        }
    }

    /// Base importance multiplier for this kind
    pub fn base_score(&self) -> f64 {
        match self {
            ObservationKind::Bugfix => 1.3,
            ObservationKind::Feature => 1.2,
            ObservationKind::Discovery | ObservationKind::Decision => 1.1,
            ObservationKind::Refactor => 1.0,
            ObservationKind::Change => 0.9,
        }
    }
}

impl std::fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY KIND
// ============================================================================

/// Long-term classification derived from the concept set
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Records a choice and its reasoning
    Decision,
    /// A recurring structure worth recognizing
    Pattern,
    /// Something the user wants done a certain way
    Preference,
    /// Code style conventions
    Style,
    /// Workflow and tooling habits
    Habit,
    /// A non-obvious fact about how things work
    Insight,
    /// Everything else
    #[default]
    Context,
}

impl MemoryKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Decision => "decision",
            MemoryKind::Pattern => "pattern",
            MemoryKind::Preference => "preference",
            MemoryKind::Style => "style",
            MemoryKind::Habit => "habit",
            MemoryKind::Insight => "insight",
            MemoryKind::Context => "context",
        }
    }

    /// Parse from string name; unknown names fall back to `Context`
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "decision" => MemoryKind::Decision,
            "pattern" => MemoryKind::Pattern,
            "preference" => MemoryKind::Preference,
            "style" => MemoryKind::Style,
            "habit" => MemoryKind::Habit,
            "insight" => MemoryKind::Insight,
            _ => MemoryKind::Context,
        }
    }

    /// Derive the memory kind from an observation's concepts
    pub fn from_concepts(concepts: &[String]) -> Self {
        let has = |name: &str| concepts.iter().any(|c| c == name);

        if has("decision") || has("trade-off") {
            MemoryKind::Decision
        } else if has("pattern") || has("anti-pattern") || has("best-practice") {
            MemoryKind::Pattern
        } else if has("preference") {
            MemoryKind::Preference
        } else if has("style") {
            MemoryKind::Style
        } else if has("workflow") || has("tooling") || has("habit") {
            MemoryKind::Habit
        } else if has("gotcha") || has("how-it-works") || has("why-it-exists") || has("debugging")
        {
            MemoryKind::Insight
        } else {
            MemoryKind::Context
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SCOPE
// ============================================================================

/// Visibility of an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Visible only within the project it was captured in
    #[default]
    Project,
    /// Visible across projects (cross-cutting knowledge)
    Global,
}

impl Scope {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Project => "project",
            Scope::Global => "global",
        }
    }

    /// Parse from string name; unknown names fall back to `Project`
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "global" => Scope::Global,
            _ => Scope::Project,
        }
    }

    /// An observation is global iff any concept is in the globalizable set
    pub fn from_concepts(concepts: &[String]) -> Self {
        let global = concepts
            .iter()
            .any(|c| GLOBALIZABLE_CONCEPTS.contains(&c.as_str()));
        if global { Scope::Global } else { Scope::Project }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// OBSERVATION
// ============================================================================

/// A stored observation
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Monotonic integer id, stable for life
    pub id: i64,
    /// Session that produced the observation
    pub session_id: String,
    /// Project the session ran in
    pub project: String,
    /// Project-local or global visibility
    pub scope: Scope,
    /// Session-event classification
    #[serde(rename = "type")]
    pub kind: ObservationKind,
    /// Long-term classification derived from concepts
    pub memory_type: MemoryKind,
    /// Short heading
    pub title: Option<String>,
    /// Secondary heading
    pub subtitle: Option<String>,
    /// Free-text account of what happened
    pub narrative: Option<String>,
    /// Ordered discrete facts
    pub facts: Vec<String>,
    /// Concept tags
    pub concepts: Vec<String>,
    /// Files the session read
    pub files_read: Vec<String>,
    /// Files the session modified
    pub files_modified: Vec<String>,
    /// Modification times of tracked files at capture, epoch millis
    pub file_mtimes: HashMap<String, i64>,
    /// Which prompt within the session produced this
    pub prompt_number: Option<i64>,
    /// Informational token count from extraction
    pub discovery_tokens: i64,
    /// Creation time, RFC3339
    pub created_at: String,
    /// Creation time, epoch millis
    pub created_at_epoch: i64,
    /// Current importance score
    pub importance_score: f64,
    /// Explicit user feedback: -1, 0, or +1
    pub user_feedback: i32,
    /// How many times retrieval returned this observation
    pub retrieval_count: i64,
    /// Last retrieval time, epoch millis
    pub last_retrieved_at_epoch: Option<i64>,
    /// Last consolidation pass over this row, epoch millis
    pub score_updated_at_epoch: Option<i64>,
    /// Whether a newer observation superseded this one
    pub is_superseded: bool,
    /// Whether the forgetting task archived this row
    pub archived: bool,
}

impl Observation {
    /// Age in whole days at the given time
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let age_ms = (now.timestamp_millis() - self.created_at_epoch).max(0);
        age_ms as f64 / (1000.0 * 86_400.0)
    }

    /// Days since last retrieval, if ever retrieved
    pub fn access_recency_days(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_retrieved_at_epoch.map(|at| {
            let ms = (now.timestamp_millis() - at).max(0);
            ms as f64 / (1000.0 * 86_400.0)
        })
    }

    /// Title, subtitle and narrative concatenated for text analysis
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(t) = self.title.as_deref() {
            parts.push(t);
        }
        if let Some(s) = self.subtitle.as_deref() {
            parts.push(s);
        }
        if let Some(n) = self.narrative.as_deref() {
            parts.push(n);
        }
        parts.join(" ")
    }
}

// ============================================================================
// PARSED INPUT
// ============================================================================

/// Parsed observation delivered by the ingest driver.
///
/// Uses `deny_unknown_fields` to prevent field injection from hook payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ParsedObservation {
    /// Session-event classification
    #[serde(rename = "type", default)]
    pub kind: ObservationKind,
    /// Short heading
    pub title: Option<String>,
    /// Secondary heading
    pub subtitle: Option<String>,
    /// Free-text account of what happened
    pub narrative: Option<String>,
    /// Ordered discrete facts
    #[serde(default)]
    pub facts: Vec<String>,
    /// Concept tags
    #[serde(default)]
    pub concepts: Vec<String>,
    /// Files the session read
    #[serde(default)]
    pub files_read: Vec<String>,
    /// Files the session modified
    #[serde(default)]
    pub files_modified: Vec<String>,
    /// Modification times of tracked files, epoch millis
    #[serde(default)]
    pub file_mtimes: HashMap<String, i64>,
    /// Explicit scope override; auto-derived from concepts when absent
    pub scope: Option<Scope>,
}

impl ParsedObservation {
    /// Effective scope: explicit override, otherwise derived from concepts
    pub fn effective_scope(&self) -> Scope {
        self.scope.unwrap_or_else(|| Scope::from_concepts(&self.concepts))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            ObservationKind::Decision,
            ObservationKind::Bugfix,
            ObservationKind::Feature,
            ObservationKind::Refactor,
            ObservationKind::Discovery,
            ObservationKind::Change,
        ] {
            assert_eq!(ObservationKind::parse_name(kind.as_str()), kind);
        }
        assert_eq!(ObservationKind::parse_name("???"), ObservationKind::Change);
    }

    #[test]
    fn test_kind_base_scores() {
        assert_eq!(ObservationKind::Bugfix.base_score(), 1.3);
        assert_eq!(ObservationKind::Feature.base_score(), 1.2);
        assert_eq!(ObservationKind::Discovery.base_score(), 1.1);
        assert_eq!(ObservationKind::Decision.base_score(), 1.1);
        assert_eq!(ObservationKind::Refactor.base_score(), 1.0);
        assert_eq!(ObservationKind::Change.base_score(), 0.9);
    }

    #[test]
    fn test_scope_from_concepts() {
        let project = vec!["problem-solution".to_string(), "gotcha".to_string()];
        assert_eq!(Scope::from_concepts(&project), Scope::Project);

        let global = vec!["gotcha".to_string(), "security".to_string()];
        assert_eq!(Scope::from_concepts(&global), Scope::Global);

        assert_eq!(Scope::from_concepts(&[]), Scope::Project);
    }

    #[test]
    fn test_memory_kind_from_concepts() {
        let cases: &[(&[&str], MemoryKind)] = &[
            (&["trade-off"], MemoryKind::Decision),
            (&["anti-pattern"], MemoryKind::Pattern),
            (&["preference"], MemoryKind::Preference),
            (&["style"], MemoryKind::Style),
            (&["tooling"], MemoryKind::Habit),
            (&["gotcha"], MemoryKind::Insight),
            (&["something-else"], MemoryKind::Context),
            (&[], MemoryKind::Context),
        ];
        for (concepts, expected) in cases {
            let concepts: Vec<String> = concepts.iter().map(|s| s.to_string()).collect();
            assert_eq!(MemoryKind::from_concepts(&concepts), *expected);
        }
    }

    #[test]
    fn test_memory_kind_precedence_decision_first() {
        let concepts = vec!["pattern".to_string(), "decision".to_string()];
        assert_eq!(MemoryKind::from_concepts(&concepts), MemoryKind::Decision);
    }

    #[test]
    fn test_effective_scope_override_wins() {
        let parsed = ParsedObservation {
            concepts: vec!["security".to_string()],
            scope: Some(Scope::Project),
            ..Default::default()
        };
        assert_eq!(parsed.effective_scope(), Scope::Project);

        let auto = ParsedObservation {
            concepts: vec!["security".to_string()],
            ..Default::default()
        };
        assert_eq!(auto.effective_scope(), Scope::Global);
    }

    #[test]
    fn test_parsed_observation_deny_unknown_fields() {
        let ok = r#"{"type": "bugfix", "title": "t", "concepts": []}"#;
        assert!(serde_json::from_str::<ParsedObservation>(ok).is_ok());

        let bad = r#"{"type": "bugfix", "surprise": 1}"#;
        assert!(serde_json::from_str::<ParsedObservation>(bad).is_err());
    }

    #[test]
    fn test_searchable_text_skips_missing_fields() {
        let obs = Observation {
            id: 1,
            session_id: "s".into(),
            project: "p".into(),
            scope: Scope::Project,
            kind: ObservationKind::Change,
            memory_type: MemoryKind::Context,
            title: Some("Title".into()),
            subtitle: None,
            narrative: Some("narrative".into()),
            facts: vec![],
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            file_mtimes: HashMap::new(),
            prompt_number: None,
            discovery_tokens: 0,
            created_at: String::new(),
            created_at_epoch: 0,
            importance_score: 1.0,
            user_feedback: 0,
            retrieval_count: 0,
            last_retrieved_at_epoch: None,
            score_updated_at_epoch: None,
            is_superseded: false,
            archived: false,
        };
        assert_eq!(obs.searchable_text(), "Title narrative");
    }
}
