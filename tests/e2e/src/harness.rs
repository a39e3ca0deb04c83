//! Test Engine Harness
//!
//! Builds a fully wired engine on a temporary database with a pinned clock
//! and an instrumented embedder. Each harness is isolated; the temp
//! directory is deleted when the harness drops.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use mnemo_core::{
    CountingEmbedder, EngineConfig, FixedClock, HashingEmbedder, MemoryEngine, ObservationKind,
    ParsedObservation,
};
use tempfile::TempDir;

/// Embedding dimension used across the e2e suite (small for speed)
pub const TEST_DIMENSIONS: usize = 64;

/// A wired engine over a throwaway database
pub struct TestEngine {
    /// The engine under test
    pub engine: Arc<MemoryEngine>,
    /// Pinned clock; advance it to simulate the passage of time
    pub clock: Arc<FixedClock>,
    /// Counts every embed call the engine makes
    pub embedder: Arc<CountingEmbedder<HashingEmbedder>>,
    _dir: TempDir,
}

impl TestEngine {
    /// Engine with default configuration (hub strategy, forgetting off)
    pub fn new() -> Self {
        let mut config = EngineConfig::default();
        config.vector.dimensions = TEST_DIMENSIONS;
        Self::with_config(config)
    }

    /// Engine with custom configuration
    pub fn with_config(config: EngineConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let embedder = Arc::new(CountingEmbedder::new(HashingEmbedder::new(
            TEST_DIMENSIONS,
        )));
        let engine = MemoryEngine::open(
            Some(dir.path().join("e2e.db")),
            embedder.clone(),
            clock.clone(),
            config,
        )
        .expect("engine open");

        Self {
            engine: Arc::new(engine),
            clock,
            embedder,
            _dir: dir,
        }
    }

    /// Store an observation and wait for its fan-out to finish
    pub async fn store_and_settle(
        &self,
        session: &str,
        project: &str,
        parsed: &ParsedObservation,
    ) -> i64 {
        let (id, _) = self
            .engine
            .store(session, project, parsed, None, 0)
            .await
            .expect("store");
        self.engine.flush_ingest().await;
        id
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// A bugfix observation touching the given file
pub fn bugfix(title: &str, narrative: &str, file: &str) -> ParsedObservation {
    ParsedObservation {
        kind: ObservationKind::Bugfix,
        title: Some(title.to_string()),
        narrative: Some(narrative.to_string()),
        files_modified: vec![file.to_string()],
        ..Default::default()
    }
}

/// A decision observation touching the given file
pub fn decision(title: &str, narrative: &str, file: &str) -> ParsedObservation {
    ParsedObservation {
        kind: ObservationKind::Decision,
        title: Some(title.to_string()),
        narrative: Some(narrative.to_string()),
        files_modified: vec![file.to_string()],
        ..Default::default()
    }
}

/// A discovery observation with concepts only
pub fn discovery(title: &str, concepts: &[&str]) -> ParsedObservation {
    ParsedObservation {
        kind: ObservationKind::Discovery,
        title: Some(title.to_string()),
        narrative: Some(format!("{title} - session notes")),
        concepts: concepts.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}
