//! Engine Error Types
//!
//! One engine-wide error enum. Durable-write errors propagate to the caller;
//! fan-out side effects log and swallow theirs (see the engine facade).

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors surfaced by the memory engine
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Lookup for an id that does not exist (distinct from an empty result set)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad input: invalid project name, unknown enum value, out-of-range confidence
    #[error("Validation error: {0}")]
    Validation(String),

    /// Underlying database error, propagated with the original reason
    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Stored vectors no longer match the current embedding model version
    #[error("Stale vectors: stored model {stored} != current model {current}")]
    Stale {
        /// Model version found on the stored rows
        stored: String,
        /// Model version the embedder reports now
        current: String,
    },

    /// Embedding service failed or timed out; non-fatal for ingest
    #[error("Embedding unavailable: {0}")]
    Unavailable(String),

    /// An expensive operation was rejected because its cooldown has not elapsed
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

/// Validate a project name before it reaches SQL or the filesystem.
///
/// Rejects empty names, traversal sequences, separators, and anything outside
/// `[A-Za-z0-9._-]`. The empty string is allowed nowhere; callers that mean
/// "all projects" pass an explicit option instead.
pub fn validate_project(project: &str) -> Result<()> {
    if project.is_empty() {
        return Err(EngineError::Validation("project name is empty".into()));
    }
    if project.len() > 128 {
        return Err(EngineError::Validation(format!(
            "project name too long ({} chars)",
            project.len()
        )));
    }
    if project.contains("..") {
        return Err(EngineError::Validation(format!(
            "project name contains traversal sequence: {project}"
        )));
    }
    if let Some(bad) = project
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(EngineError::Validation(format!(
            "project name contains disallowed character {bad:?}: {project}"
        )));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_project_accepts_typical_names() {
        for name in ["my-app", "backend_v2", "repo.worktree", "a"] {
            assert!(validate_project(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_validate_project_rejects_traversal_and_separators() {
        for name in ["", "../etc", "a/b", "a\\b", "name with space", "tab\there"] {
            assert!(validate_project(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_validate_project_rejects_overlong() {
        let name = "x".repeat(129);
        assert!(validate_project(&name).is_err());
    }
}
