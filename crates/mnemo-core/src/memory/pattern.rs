//! Patterns - Recurring observation signatures promoted to named records

use serde::{Deserialize, Serialize};

// ============================================================================
// PATTERN TYPE
// ============================================================================

/// Classification of a promoted pattern
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternType {
    /// Recurring bug shape
    Bug,
    /// Recurring refactoring move
    Refactor,
    /// Recurring structural choice
    Architecture,
    /// Something to avoid
    AntiPattern,
    /// Something to repeat
    BestPractice,
}

impl PatternType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Bug => "bug",
            PatternType::Refactor => "refactor",
            PatternType::Architecture => "architecture",
            PatternType::AntiPattern => "anti-pattern",
            PatternType::BestPractice => "best-practice",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bug" => Some(PatternType::Bug),
            "refactor" => Some(PatternType::Refactor),
            "architecture" => Some(PatternType::Architecture),
            "anti-pattern" => Some(PatternType::AntiPattern),
            "best-practice" => Some(PatternType::BestPractice),
            _ => None,
        }
    }

    /// Display prefix used when deriving a pattern name
    pub fn name_prefix(&self) -> &'static str {
        match self {
            PatternType::Bug => "Bug Pattern",
            PatternType::Refactor => "Refactor Pattern",
            PatternType::Architecture => "Architecture Pattern",
            PatternType::AntiPattern => "Anti-Pattern",
            PatternType::BestPractice => "Best Practice",
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PATTERN STATUS
// ============================================================================

/// Lifecycle state of a pattern
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PatternStatus {
    /// In use; frequency may grow
    #[default]
    Active,
    /// Kept for history, no longer matched
    Deprecated,
    /// Folded into another pattern
    Merged,
}

impl PatternStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternStatus::Active => "active",
            PatternStatus::Deprecated => "deprecated",
            PatternStatus::Merged => "merged",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(PatternStatus::Active),
            "deprecated" => Some(PatternStatus::Deprecated),
            "merged" => Some(PatternStatus::Merged),
            _ => None,
        }
    }
}

impl std::fmt::Display for PatternStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PATTERN
// ============================================================================

/// A stored pattern
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    /// Row id
    pub id: i64,
    /// Derived display name
    pub name: String,
    /// Classification
    pub pattern_type: PatternType,
    /// Free-text description
    pub description: Option<String>,
    /// Ordered signature tokens
    pub signature: Vec<String>,
    /// Suggested follow-up when the pattern matches
    pub recommendation: Option<String>,
    /// How many observations matched; non-decreasing while active
    pub frequency: u32,
    /// Projects the pattern was seen in
    pub projects: Vec<String>,
    /// Observations that contributed
    pub observation_ids: Vec<i64>,
    /// Lifecycle state
    pub status: PatternStatus,
    /// Target pattern when status is `Merged`
    pub merged_into_id: Option<i64>,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// Last time an observation matched, epoch millis
    pub last_seen_at_epoch: i64,
    /// Creation time, epoch millis
    pub created_at_epoch: i64,
}

/// A pattern before it is persisted
#[derive(Debug, Clone)]
pub struct NewPattern {
    /// Derived display name
    pub name: String,
    /// Classification
    pub pattern_type: PatternType,
    /// Free-text description
    pub description: Option<String>,
    /// Ordered signature tokens
    pub signature: Vec<String>,
    /// Suggested follow-up when the pattern matches
    pub recommendation: Option<String>,
    /// Initial frequency (promotion threshold at creation)
    pub frequency: u32,
    /// Projects the pattern was seen in
    pub projects: Vec<String>,
    /// Observations that contributed
    pub observation_ids: Vec<i64>,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
}

// ============================================================================
// TESTS
// ============================================================================
