//! Memory Engine Facade
//!
//! Wires the stores, detectors, vector index, and consolidation scheduler
//! into one handle the hosting worker shares as `Arc<MemoryEngine>`.
//!
//! `store` returns as soon as the row insert commits; everything downstream
//! (cleanup, conflict detection, relation detection, pattern analysis,
//! vector indexing) runs as detached tasks with a deadline each. A failing
//! fan-out task logs a warning and is otherwise invisible to the caller.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::consolidation::ConsolidationScheduler;
use crate::detect::{ConflictDetector, PatternDetector, RelationDetector};
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::memory::{EngineStats, Observation, ParsedObservation};
use crate::retrieval::{ContextAssembler, InjectRequest, InjectResult};
use crate::storage::{
    ConflictStore, Database, ObservationStore, PatternStore, RelationStore,
};
use crate::vector::{DocType, VectorDocInput, VectorStore};

// ============================================================================
// MEMORY ENGINE
// ============================================================================

/// The assembled memory engine
pub struct MemoryEngine {
    config: EngineConfig,
    clock: SharedClock,
    observations: Arc<ObservationStore>,
    relations: Arc<RelationStore>,
    conflicts: Arc<ConflictStore>,
    patterns: Arc<PatternStore>,
    vectors: Arc<VectorStore>,
    conflict_detector: ConflictDetector,
    relation_detector: RelationDetector,
    pattern_detector: Arc<PatternDetector>,
    assembler: ContextAssembler,
    embedder: Arc<dyn Embedder>,
    cancel: CancellationToken,
    pattern_stop: tokio::sync::watch::Sender<bool>,
    pending_fanout: Mutex<Vec<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    scheduler: Mutex<Option<Arc<ConsolidationScheduler>>>,
}

impl MemoryEngine {
    /// Open (or create) the engine over the database at `db_path`.
    ///
    /// The embedder is the only collaborator the engine cannot provide for
    /// itself; pass `HashingEmbedder` when no model runtime is available.
    pub fn open(
        db_path: Option<PathBuf>,
        embedder: Arc<dyn Embedder>,
        clock: SharedClock,
        config: EngineConfig,
    ) -> Result<Self> {
        let db = Arc::new(Database::open(db_path)?);

        let observations = Arc::new(ObservationStore::new(
            db.clone(),
            clock.clone(),
            config.store.clone(),
        ));
        let relations = Arc::new(RelationStore::new(db.clone(), clock.clone()));
        let conflicts = Arc::new(ConflictStore::new(db.clone(), clock.clone()));
        let patterns = Arc::new(PatternStore::new(db.clone(), clock.clone()));
        let vectors = Arc::new(VectorStore::new(
            db,
            embedder.clone(),
            clock.clone(),
            config.vector.clone(),
        ));

        // Single registered cleanup interface: deleted observations purge
        // their vector documents without a store-to-vector back-reference
        {
            let vectors = vectors.clone();
            observations.set_cleanup_hook(Arc::new(move |ids: &[i64]| {
                if let Err(err) = vectors.delete_for_observations(ids) {
                    tracing::warn!("vector cleanup for {ids:?} failed: {err}");
                }
            }));
        }

        let pattern_detector = Arc::new(PatternDetector::new(
            patterns.clone(),
            clock.clone(),
            config.pattern.clone(),
        ));
        let assembler = ContextAssembler::new(
            observations.clone(),
            vectors.clone(),
            relations.clone(),
            config.retrieval.clone(),
            config.graph.clone(),
            config.vector.graph_expansion,
        );

        Ok(Self {
            conflict_detector: ConflictDetector::new(),
            relation_detector: RelationDetector::new(config.relation.clone()),
            config,
            clock,
            observations,
            relations,
            conflicts,
            patterns,
            vectors,
            pattern_detector,
            assembler,
            embedder,
            cancel: CancellationToken::new(),
            pattern_stop: tokio::sync::watch::channel(false).0,
            pending_fanout: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
            scheduler: Mutex::new(None),
        })
    }

    // ------------------------------------------------------------------
    // Store access
    // ------------------------------------------------------------------

    /// Observation store
    pub fn observations(&self) -> &Arc<ObservationStore> {
        &self.observations
    }

    /// Relation store
    pub fn relations(&self) -> &Arc<RelationStore> {
        &self.relations
    }

    /// Conflict store
    pub fn conflicts(&self) -> &Arc<ConflictStore> {
        &self.conflicts
    }

    /// Pattern store
    pub fn patterns(&self) -> &Arc<PatternStore> {
        &self.patterns
    }

    /// Vector store
    pub fn vectors(&self) -> &Arc<VectorStore> {
        &self.vectors
    }

    /// Pattern detector
    pub fn pattern_detector(&self) -> &Arc<PatternDetector> {
        &self.pattern_detector
    }

    // ------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------

    /// Store one parsed observation and fan out the follow-up work.
    ///
    /// Returns `(id, created_at_epoch)` as soon as the insert commits; the
    /// fan-out (cleanup, conflicts, relations, patterns, vectors) runs as a
    /// detached task with a deadline and never fails the ingest.
    pub async fn store(
        self: &Arc<Self>,
        session_id: &str,
        project: &str,
        parsed: &ParsedObservation,
        prompt_number: Option<i64>,
        discovery_tokens: i64,
    ) -> Result<(i64, i64)> {
        let (id, epoch) = self
            .observations
            .store(session_id, project, parsed, prompt_number, discovery_tokens)?;

        let engine = self.clone();
        let project = project.to_string();
        let deadline = std::time::Duration::from_secs(self.config.store.fanout_timeout_secs);
        let cancel = self.cancel.child_token();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(obs_id = id, "ingest fan-out cancelled");
                }
                result = tokio::time::timeout(deadline, engine.run_ingest_fanout(id, project)) => {
                    if result.is_err() {
                        tracing::warn!(obs_id = id, "ingest fan-out hit its deadline");
                    }
                }
            }
        });

        if let Ok(mut pending) = self.pending_fanout.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }

        Ok((id, epoch))
    }

    /// The fan-out body. Each step logs and swallows its own failure.
    async fn run_ingest_fanout(self: Arc<Self>, id: i64, project: String) {
        let observation = match self.observations.get_by_id(id) {
            Ok(obs) => obs,
            Err(err) => {
                tracing::warn!(obs_id = id, "fan-out could not load observation: {err}");
                return;
            }
        };

        // Candidates once, shared by the conflict and relation detectors
        let candidates = match self
            .observations
            .get_active(&project, self.config.relation.candidate_limit)
        {
            Ok(mut rows) => {
                rows.retain(|o| o.id != id);
                rows
            }
            Err(err) => {
                tracing::warn!(obs_id = id, "fan-out could not load candidates: {err}");
                Vec::new()
            }
        };

        // Per-project cap and superseded-retention cleanup
        if let Err(err) = self.observations.cleanup_old_observations(&project) {
            tracing::warn!(project = %project, "observation cleanup failed: {err}");
        }
        if let Err(err) = self.conflicts.cleanup_superseded(
            &self.observations,
            &project,
            self.config.store.superseded_retention_days,
        ) {
            tracing::warn!(project = %project, "superseded cleanup failed: {err}");
        }

        // Conflict detection; prefer_newer inserts mark the older superseded
        for conflict in self.conflict_detector.detect_all(&observation, &candidates) {
            if let Err(err) = self.conflicts.insert(&conflict) {
                tracing::warn!(obs_id = id, "conflict insert failed: {err}");
            }
        }

        // Relation detection
        let relations = self.relation_detector.detect_all(&observation, &candidates);
        if let Err(err) = self.relations.insert_batch(&relations) {
            tracing::warn!(obs_id = id, "relation insert failed: {err}");
        }

        // Pattern analysis
        if let Err(err) = self.pattern_detector.analyze_observation(&observation) {
            tracing::warn!(obs_id = id, "pattern analysis failed: {err}");
        }

        // Vector indexing
        let docs = vector_docs_for(&observation);
        if let Err(err) = self.vectors.add_documents(&docs) {
            tracing::warn!(obs_id = id, "vector indexing failed: {err}");
        }
    }

    /// Wait for every outstanding ingest fan-out task. Tests and orderly
    /// shutdown use this; normal operation never blocks on it.
    pub async fn flush_ingest(&self) {
        let handles: Vec<JoinHandle<()>> = match self.pending_fanout.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Run the ingest follow-up pipeline for one observation synchronously.
    ///
    /// The ingest driver's backfill path uses this; regular ingest goes
    /// through `store`. `NotFound` surfaces when the id does not exist.
    pub async fn process_pending(self: &Arc<Self>, id: i64, project: &str) -> Result<()> {
        self.observations.get_by_id(id)?;
        self.clone()
            .run_ingest_fanout(id, project.to_string())
            .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    /// Assemble the context for a starting session and stamp retrieval
    /// counters on everything returned.
    pub fn inject(&self, request: &InjectRequest) -> Result<InjectResult> {
        let result = self.assembler.inject(request)?;
        let ids: Vec<i64> = result
            .observations
            .iter()
            .map(|entry| entry.observation.id)
            .collect();
        self.observations.increment_retrieval_count(&ids)?;
        Ok(result)
    }

    /// Record user feedback on one observation
    pub fn record_feedback(&self, id: i64, value: i32) -> Result<()> {
        self.observations.update_feedback(id, value)
    }

    /// Read-only counters for the statusline hook
    pub fn stats(&self) -> Result<EngineStats> {
        let counts = self.observations.counts()?;
        Ok(EngineStats {
            total_observations: counts.total,
            active_observations: counts.active,
            superseded_observations: counts.superseded,
            archived_observations: counts.archived,
            total_relations: self.relations.count()?,
            unresolved_conflicts: self.conflicts.count_unresolved()?,
            active_patterns: self.patterns.count_active()?,
            vector_documents: self.vectors.count()?,
            oldest_observation_epoch: counts.oldest_epoch,
            newest_observation_epoch: counts.newest_epoch,
        })
    }

    // ------------------------------------------------------------------
    // Background workers
    // ------------------------------------------------------------------

    /// Start the consolidation scheduler and the pattern detector's
    /// background loop for one project. Idempotent per engine: a second
    /// call replaces nothing and returns the running scheduler.
    pub fn start_background(self: &Arc<Self>, project: &str) -> Arc<ConsolidationScheduler> {
        let mut guard = match self.scheduler.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = guard.as_ref() {
            return existing.clone();
        }

        let scheduler = Arc::new(ConsolidationScheduler::new(
            self.observations.clone(),
            self.relations.clone(),
            self.embedder.clone(),
            self.clock.clone(),
            self.config.relevance.clone(),
            self.config.scheduler.clone(),
            project,
        ));
        *guard = Some(scheduler.clone());
        drop(guard);

        let scheduler_handle = tokio::spawn(scheduler.clone().run(self.cancel.child_token()));
        let pattern_handle = tokio::spawn(self.pattern_detector.clone().run_background_loop(
            Some(self.observations.clone()),
            self.cancel.child_token(),
            self.pattern_stop.subscribe(),
        ));

        if let Ok(mut workers) = self.workers.lock() {
            workers.push(scheduler_handle);
            workers.push(pattern_handle);
        }

        scheduler
    }

    /// Cancel every worker and outstanding fan-out, then wait for them
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.pattern_stop.send_replace(true);
        if let Some(scheduler) = self.scheduler.lock().ok().and_then(|g| g.clone()) {
            scheduler.stop();
        }

        self.flush_ingest().await;
        let workers: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => return,
        };
        for handle in workers {
            let _ = handle.await;
        }
    }
}

/// Embedding-addressable fragments for one observation
fn vector_docs_for(observation: &Observation) -> Vec<VectorDocInput> {
    let mut docs = Vec::new();
    let mut push = |field: &str, content: String| {
        if content.trim().is_empty() {
            return;
        }
        docs.push(VectorDocInput {
            doc_id: format!("obs-{}-{field}", observation.id),
            sqlite_id: observation.id,
            doc_type: DocType::Observation,
            field_type: field.to_string(),
            project: observation.project.clone(),
            scope: observation.scope,
            content,
        });
    };

    let mut heading = observation.title.clone().unwrap_or_default();
    if let Some(subtitle) = observation.subtitle.as_deref() {
        heading.push(' ');
        heading.push_str(subtitle);
    }
    push("title", heading);
    push(
        "narrative",
        observation.narrative.clone().unwrap_or_default(),
    );
    push("facts", observation.facts.join("\n"));
    docs
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::embeddings::HashingEmbedder;
    use crate::memory::ObservationKind;
    use chrono::{TimeZone, Utc};

    fn engine() -> (Arc<MemoryEngine>, Arc<FixedClock>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let mut config = EngineConfig::default();
        config.vector.dimensions = 64;
        let engine = MemoryEngine::open(
            Some(dir.path().join("engine.db")),
            Arc::new(HashingEmbedder::new(64)),
            clock.clone(),
            config,
        )
        .unwrap();
        (Arc::new(engine), clock, dir)
    }

    fn parsed(kind: ObservationKind, title: &str, narrative: &str) -> ParsedObservation {
        ParsedObservation {
            kind,
            title: Some(title.to_string()),
            narrative: Some(narrative.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_store_returns_before_fanout_and_fanout_indexes() {
        let (engine, _clock, _dir) = engine();
        let (id, epoch) = engine
            .store(
                "sess",
                "proj",
                &parsed(ObservationKind::Discovery, "Queue drains slowly", "the queue backs up"),
                Some(1),
                10,
            )
            .await
            .unwrap();
        assert!(id > 0);
        assert!(epoch > 0);

        engine.flush_ingest().await;

        // Vector docs exist in the content cache and serve queries
        let request = InjectRequest {
            project: "proj".into(),
            query: Some("queue drains".into()),
            ..Default::default()
        };
        let result = engine.inject(&request).unwrap();
        assert!(result.observations.iter().any(|o| o.observation.id == id));
    }

    #[tokio::test]
    async fn test_correction_supersedes_end_to_end() {
        let (engine, clock, _dir) = engine();

        let mut first = parsed(
            ObservationKind::Decision,
            "Use library X",
            "library X will handle retries",
        );
        first.files_modified = vec!["src/retry.rs".into()];
        let (older, _) = engine.store("sess", "proj", &first, Some(1), 0).await.unwrap();
        engine.flush_ingest().await;

        clock.advance(chrono::Duration::minutes(10));
        let mut second = parsed(
            ObservationKind::Decision,
            "Actually, that was wrong - use Y",
            "X cannot stream, switching to Y",
        );
        second.files_modified = vec!["src/retry.rs".into()];
        let (newer, _) = engine.store("sess", "proj", &second, Some(2), 0).await.unwrap();
        engine.flush_ingest().await;

        // Exactly one contradicts/prefer_newer conflict
        let conflicts = engine.conflicts().get_for_observation(older).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].conflict_type,
            crate::memory::ConflictType::Contradicts
        );
        assert_eq!(
            conflicts[0].resolution,
            crate::memory::Resolution::PreferNewer
        );

        // Only the newer observation remains active
        let active = engine.observations().get_active("proj", 10).unwrap();
        let ids: Vec<i64> = active.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![newer]);
        assert!(engine.observations().get_by_id(older).unwrap().is_superseded);
    }

    #[tokio::test]
    async fn test_fanout_creates_relations() {
        let (engine, clock, _dir) = engine();

        let mut feature = parsed(ObservationKind::Feature, "Add request batching", "batching");
        feature.files_modified = vec!["src/batch.rs".into()];
        let (feature_id, _) = engine.store("sess", "proj", &feature, None, 0).await.unwrap();
        engine.flush_ingest().await;

        clock.advance(chrono::Duration::minutes(20));
        let mut fix = parsed(ObservationKind::Bugfix, "Fix batching overflow", "overflow fixed");
        fix.files_modified = vec!["src/batch.rs".into()];
        let (fix_id, _) = engine.store("sess", "proj", &fix, None, 0).await.unwrap();
        engine.flush_ingest().await;

        let edges = engine.relations().get_for_observation(fix_id).unwrap();
        assert!(!edges.is_empty());
        assert!(edges.iter().any(|e| {
            e.source_id == fix_id
                && e.target_id == feature_id
                && e.relation_type == crate::memory::RelationType::Fixes
        }));
    }

    #[tokio::test]
    async fn test_cleanup_hook_purges_vectors() {
        let (engine, _clock, _dir) = engine();
        let (id, _) = engine
            .store(
                "sess",
                "proj",
                &parsed(ObservationKind::Change, "Victim", "will be deleted"),
                None,
                0,
            )
            .await
            .unwrap();
        engine.flush_ingest().await;

        engine.observations().delete_many(&[id]).unwrap();

        // The vector leg no longer returns the deleted observation
        let request = InjectRequest {
            project: "proj".into(),
            query: Some("victim deleted".into()),
            ..Default::default()
        };
        let result = engine.inject(&request).unwrap();
        assert!(result.observations.iter().all(|o| o.observation.id != id));
    }

    #[tokio::test]
    async fn test_inject_bumps_retrieval_counters() {
        let (engine, _clock, _dir) = engine();
        let (id, _) = engine
            .store(
                "sess",
                "proj",
                &parsed(ObservationKind::Discovery, "Counter check", "count me"),
                None,
                0,
            )
            .await
            .unwrap();
        engine.flush_ingest().await;

        engine
            .inject(&InjectRequest {
                project: "proj".into(),
                ..Default::default()
            })
            .unwrap();

        let obs = engine.observations().get_by_id(id).unwrap();
        assert_eq!(obs.retrieval_count, 1);
        assert!(obs.last_retrieved_at_epoch.is_some());
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let (engine, _clock, _dir) = engine();
        for i in 0..3 {
            engine
                .store(
                    "sess",
                    "proj",
                    &parsed(ObservationKind::Change, &format!("topic{i} alpha{i}"), "x"),
                    None,
                    0,
                )
                .await
                .unwrap();
        }
        engine.flush_ingest().await;

        let stats = engine.stats().unwrap();
        assert_eq!(stats.total_observations, 3);
        assert_eq!(stats.active_observations, 3);
        assert!(stats.oldest_observation_epoch.is_some());
    }

    #[tokio::test]
    async fn test_feedback_roundtrip() {
        let (engine, _clock, _dir) = engine();
        let (id, _) = engine
            .store(
                "sess",
                "proj",
                &parsed(ObservationKind::Change, "Rated", "x"),
                None,
                0,
            )
            .await
            .unwrap();
        engine.record_feedback(id, 1).unwrap();
        assert_eq!(engine.observations().get_by_id(id).unwrap().user_feedback, 1);
        assert!(engine.record_feedback(id, 5).is_err());
    }

    #[tokio::test]
    async fn test_background_workers_shutdown_cleanly() {
        let (engine, _clock, _dir) = engine();
        let scheduler = engine.start_background("proj");
        // Second call returns the same scheduler
        let again = engine.start_background("proj");
        assert!(Arc::ptr_eq(&scheduler, &again));

        tokio::time::timeout(std::time::Duration::from_secs(2), engine.shutdown())
            .await
            .expect("shutdown should complete promptly");
    }

    #[tokio::test]
    async fn test_per_project_cap_enforced_via_fanout() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let mut config = EngineConfig::default();
        config.vector.dimensions = 64;
        config.store.max_observations_per_project = 2;
        let engine = Arc::new(
            MemoryEngine::open(
                Some(dir.path().join("engine.db")),
                Arc::new(HashingEmbedder::new(64)),
                clock.clone(),
                config,
            )
            .unwrap(),
        );

        for i in 0..4 {
            engine
                .store(
                    "sess",
                    "proj",
                    &parsed(ObservationKind::Change, &format!("unique{i} topic{i}"), "x"),
                    None,
                    0,
                )
                .await
                .unwrap();
            engine.flush_ingest().await;
            clock.advance(chrono::Duration::minutes(1));
        }

        let counts = engine.observations().counts().unwrap();
        assert_eq!(counts.total, 2);
    }
}
