//! Detectors
//!
//! Rule-based reasoning over the observation stream:
//! - conflicts (corrections, opposing changes, overlap supersession)
//! - relations (typed edges from five detectors with fixed precedence)
//! - patterns (online signature clustering with promotion)

pub mod conflict;
pub mod pattern;
pub mod relation;

pub use conflict::ConflictDetector;
pub use pattern::{PatternAnalysis, PatternDetector, PatternSyncCallback};
pub use relation::RelationDetector;
