//! Pattern Detector
//!
//! Online signature clustering. Every observation derives a signature from
//! its concepts and significant title words; repeat signatures accumulate in
//! a bounded candidate map until they reach the promotion threshold and
//! become persisted patterns. Matching against already-promoted patterns
//! uses Jaccard over signatures.
//!
//! A failure to persist a promoted pattern leaves the candidate in place so
//! the next matching observation retries the promotion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::config::PatternConfig;
use crate::error::Result;
use crate::memory::{NewPattern, Observation, ObservationKind, Pattern, PatternType};
use crate::storage::{ObservationStore, PatternStore};
use crate::text::{jaccard, significant_words};

// ============================================================================
// ANALYSIS RESULT
// ============================================================================

/// Outcome of analyzing one observation
#[derive(Debug, Clone, Default)]
pub struct PatternAnalysis {
    /// The matched or newly promoted pattern, if any
    pub matched: Option<Pattern>,
    /// Whether the pattern was promoted by this call
    pub is_new: bool,
    /// Signature match score against the pattern (1.0 for promotions)
    pub score: f64,
    /// Pattern frequency after this call
    pub frequency: u32,
}

/// Callback invoked when a pattern is promoted
pub type PatternSyncCallback = Arc<dyn Fn(&Pattern) + Send + Sync>;

// ============================================================================
// CANDIDATE MAP
// ============================================================================

#[derive(Debug, Clone)]
struct Candidate {
    signature: Vec<String>,
    obs_ids: Vec<i64>,
    projects: Vec<String>,
    kind: ObservationKind,
    title: String,
    last_seen_epoch: i64,
}

fn candidate_key(signature: &[String]) -> String {
    let mut key = signature.join("|");
    key.push('|');
    key
}

// ============================================================================
// PATTERN DETECTOR
// ============================================================================

/// Online pattern detector over the observation stream
pub struct PatternDetector {
    store: Arc<PatternStore>,
    clock: SharedClock,
    config: PatternConfig,
    candidates: Mutex<HashMap<String, Candidate>>,
    // Serializes candidate update + promotion; the map mutex alone is never
    // held across a database call
    analysis_lock: Mutex<()>,
    sync_callback: Mutex<Option<PatternSyncCallback>>,
}

impl PatternDetector {
    /// Create a detector over the pattern store
    pub fn new(store: Arc<PatternStore>, clock: SharedClock, config: PatternConfig) -> Self {
        Self {
            store,
            clock,
            config,
            candidates: Mutex::new(HashMap::new()),
            analysis_lock: Mutex::new(()),
            sync_callback: Mutex::new(None),
        }
    }

    /// Register the promotion callback
    pub fn set_sync_callback(&self, callback: PatternSyncCallback) {
        if let Ok(mut guard) = self.sync_callback.lock() {
            *guard = Some(callback);
        }
    }

    /// Signature for an observation: concepts plus significant title words,
    /// deduplicated preserving first occurrence
    pub fn signature_for(obs: &Observation) -> Vec<String> {
        let mut signature: Vec<String> = Vec::new();
        for concept in &obs.concepts {
            let lowered = concept.to_lowercase();
            if !signature.contains(&lowered) {
                signature.push(lowered);
            }
        }
        if let Some(title) = obs.title.as_deref() {
            for word in significant_words(title) {
                if !signature.contains(&word) {
                    signature.push(word);
                }
            }
        }
        signature
    }

    /// Analyze one observation: match an existing pattern, grow a candidate,
    /// or promote a candidate that reached the frequency threshold.
    pub fn analyze_observation(&self, obs: &Observation) -> Result<PatternAnalysis> {
        let signature = Self::signature_for(obs);
        if signature.is_empty() {
            return Ok(PatternAnalysis::default());
        }

        let _serial = self
            .analysis_lock
            .lock()
            .map_err(|_| crate::error::EngineError::Init("analysis lock poisoned".into()))?;

        // 1. Try existing active patterns first
        if let Some((pattern, score)) = self.best_active_match(&signature)? {
            let updated = self.store.record_match(pattern.id, obs.id, &obs.project)?;
            let frequency = updated.frequency;
            return Ok(PatternAnalysis {
                matched: Some(updated),
                is_new: false,
                score,
                frequency,
            });
        }

        // 2. Grow the candidate for this signature
        let key = candidate_key(&signature);
        let now = self.clock.now_epoch_ms();
        let candidate = {
            let mut map = self
                .candidates
                .lock()
                .map_err(|_| crate::error::EngineError::Init("candidate map poisoned".into()))?;

            let entry = map.entry(key.clone()).or_insert_with(|| Candidate {
                signature: signature.clone(),
                obs_ids: Vec::new(),
                projects: Vec::new(),
                kind: obs.kind,
                title: obs.title.clone().unwrap_or_default(),
                last_seen_epoch: now,
            });
            if !entry.obs_ids.contains(&obs.id) {
                entry.obs_ids.push(obs.id);
            }
            if !entry.projects.iter().any(|p| p == &obs.project) {
                entry.projects.push(obs.project.clone());
            }
            entry.last_seen_epoch = now;
            let snapshot = entry.clone();

            Self::enforce_bound(&mut map, self.config.max_candidates, &key);
            snapshot
        };

        // 3. Promote when the threshold is reached
        if candidate.obs_ids.len() as u32 >= self.config.min_frequency_for_pattern {
            let pattern = self.promote(&candidate)?;
            {
                let mut map = self.candidates.lock().map_err(|_| {
                    crate::error::EngineError::Init("candidate map poisoned".into())
                })?;
                map.remove(&key);
            }

            let callback = self.sync_callback.lock().ok().and_then(|g| g.clone());
            if let Some(callback) = callback {
                callback(&pattern);
            }

            let frequency = pattern.frequency;
            return Ok(PatternAnalysis {
                matched: Some(pattern),
                is_new: true,
                score: 1.0,
                frequency,
            });
        }

        Ok(PatternAnalysis::default())
    }

    fn best_active_match(&self, signature: &[String]) -> Result<Option<(Pattern, f64)>> {
        let active = self.store.get_active(200)?;
        let mut best: Option<(Pattern, f64)> = None;
        for pattern in active {
            let score = jaccard(signature, &pattern.signature);
            if score >= self.config.min_match_score {
                let better = best.as_ref().map(|(_, s)| score > *s).unwrap_or(true);
                if better {
                    best = Some((pattern, score));
                }
            }
        }
        Ok(best)
    }

    fn promote(&self, candidate: &Candidate) -> Result<Pattern> {
        let pattern_type = derive_pattern_type(candidate.kind, &candidate.signature);
        let name = derive_pattern_name(pattern_type, &candidate.signature, &candidate.title);
        let frequency = candidate.obs_ids.len() as u32;

        // Confidence grows with repetition, capped well under certainty
        let confidence = (0.4 + 0.1 * frequency as f64).min(0.9);

        let id = self.store.insert(&NewPattern {
            name,
            pattern_type,
            description: None,
            signature: candidate.signature.clone(),
            recommendation: None,
            frequency,
            projects: candidate.projects.clone(),
            observation_ids: candidate.obs_ids.clone(),
            confidence,
        })?;

        self.store.get_by_id(id)
    }

    fn enforce_bound(map: &mut HashMap<String, Candidate>, max: usize, keep: &str) {
        while map.len() > max {
            let oldest = map
                .iter()
                .filter(|(k, _)| k.as_str() != keep)
                .min_by_key(|(_, c)| c.last_seen_epoch)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    map.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Drop candidates unseen for longer than the configured TTL
    pub fn evict_stale_candidates(&self) {
        let cutoff = self.clock.now_epoch_ms() - self.config.candidate_ttl_days * 86_400_000;
        if let Ok(mut map) = self.candidates.lock() {
            map.retain(|_, c| c.last_seen_epoch >= cutoff);
        }
    }

    /// Current candidate count (for tests and stats)
    pub fn candidate_count(&self) -> usize {
        self.candidates.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Background loop: evict stale candidates every analysis interval and
    /// re-analyze the latest observations. Exits on cancellation or stop.
    pub async fn run_background_loop(
        self: Arc<Self>,
        observations: Option<Arc<ObservationStore>>,
        cancel: CancellationToken,
        mut stop: tokio::sync::watch::Receiver<bool>,
    ) {
        let period = std::time::Duration::from_secs(self.config.analysis_interval_secs);
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it
        tick.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = stop.changed() => {
                    if result.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    self.evict_stale_candidates();
                    if let Some(store) = observations.as_ref() {
                        match store.get_latest(20) {
                            Ok(recent) => {
                                for obs in &recent {
                                    if let Err(err) = self.analyze_observation(obs) {
                                        tracing::warn!(
                                            obs_id = obs.id,
                                            "background pattern analysis failed: {err}"
                                        );
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::warn!("could not load recent observations: {err}");
                            }
                        }
                    }
                }
            }
        }
        tracing::debug!("pattern detector background loop exited");
    }
}

// ============================================================================
// NAME DERIVATION
// ============================================================================

fn derive_pattern_type(kind: ObservationKind, signature: &[String]) -> PatternType {
    let has = |name: &str| signature.iter().any(|s| s == name);
    match kind {
        ObservationKind::Bugfix => PatternType::Bug,
        ObservationKind::Refactor => PatternType::Refactor,
        _ if has("anti-pattern") => PatternType::AntiPattern,
        _ if has("best-practice") => PatternType::BestPractice,
        _ => PatternType::Architecture,
    }
}

fn derive_pattern_name(pattern_type: PatternType, signature: &[String], title: &str) -> String {
    // Architecture is the fallback bucket; a short raw title names it better
    // than generic signature tokens
    if pattern_type == PatternType::Architecture && !title.is_empty() && title.len() <= 60 {
        return title.to_string();
    }
    let head = signature
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    format!("{}: {head}", pattern_type.name_prefix())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::StoreConfig;
    use crate::memory::{MemoryKind, ParsedObservation, Scope};
    use crate::storage::testutil::temp_db;
    use chrono::{TimeZone, Utc};

    fn setup() -> (
        Arc<PatternDetector>,
        Arc<PatternStore>,
        Arc<FixedClock>,
        tempfile::TempDir,
    ) {
        let (db, dir) = temp_db();
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(PatternStore::new(db, clock.clone()));
        let detector = Arc::new(PatternDetector::new(
            store.clone(),
            clock.clone(),
            PatternConfig::default(),
        ));
        (detector, store, clock, dir)
    }

    fn obs(id: i64, kind: ObservationKind, title: &str, concepts: &[&str]) -> Observation {
        Observation {
            id,
            session_id: "s".into(),
            project: "proj".into(),
            scope: Scope::Project,
            kind,
            memory_type: MemoryKind::Context,
            title: Some(title.to_string()),
            subtitle: None,
            narrative: None,
            facts: vec![],
            concepts: concepts.iter().map(|s| s.to_string()).collect(),
            files_read: vec![],
            files_modified: vec![],
            file_mtimes: std::collections::HashMap::new(),
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
        }
    }

    #[test]
    fn test_signature_concepts_then_title_words() {
        let o = obs(
            1,
            ObservationKind::Bugfix,
            "Nil deref in error path",
            &["error-handling", "nil"],
        );
        assert_eq!(
            PatternDetector::signature_for(&o),
            vec!["error-handling", "nil", "deref", "error", "path"]
        );
    }

    #[test]
    fn test_empty_signature_returns_empty_analysis() {
        let (detector, _store, _clock, _dir) = setup();
        let o = obs(1, ObservationKind::Change, "a of", &[]);
        let analysis = detector.analyze_observation(&o).unwrap();
        assert!(analysis.matched.is_none());
        assert!(!analysis.is_new);
        assert_eq!(detector.candidate_count(), 0);
    }

    #[test]
    fn test_promotion_at_threshold() {
        let (detector, store, _clock, _dir) = setup();

        let first = obs(1, ObservationKind::Bugfix, "Nil map write", &["nil", "error-handling"]);
        let analysis = detector.analyze_observation(&first).unwrap();
        assert!(analysis.matched.is_none());
        assert_eq!(detector.candidate_count(), 1);

        let second = obs(2, ObservationKind::Bugfix, "Nil map write", &["nil", "error-handling"]);
        let analysis = detector.analyze_observation(&second).unwrap();
        assert!(analysis.is_new);
        assert_eq!(analysis.frequency, 2);
        let pattern = analysis.matched.unwrap();
        assert!(pattern.name.starts_with("Bug Pattern:"), "name = {}", pattern.name);
        assert_eq!(pattern.observation_ids, vec![1, 2]);

        // The candidate was consumed by the promotion
        assert_eq!(detector.candidate_count(), 0);
        assert_eq!(store.count_active().unwrap(), 1);
    }

    #[test]
    fn test_promotion_idempotent_frequency_counts_matches() {
        let (detector, store, _clock, _dir) = setup();

        for id in 1..=4 {
            let o = obs(id, ObservationKind::Bugfix, "Nil map write", &["nil", "error-handling"]);
            detector.analyze_observation(&o).unwrap();
        }

        // Exactly one pattern; two pre-promotion observations plus two
        // post-promotion matches
        assert_eq!(store.count_active().unwrap(), 1);
        let patterns = store.get_active(10).unwrap();
        assert_eq!(patterns[0].frequency, 4);
        assert_eq!(patterns[0].observation_ids.len(), 4);
    }

    #[test]
    fn test_existing_pattern_matches_similar_signature() {
        let (detector, _store, _clock, _dir) = setup();

        for id in 1..=2 {
            let o = obs(id, ObservationKind::Bugfix, "Nil map write", &["nil", "error-handling"]);
            detector.analyze_observation(&o).unwrap();
        }

        // Overlapping but not identical signature still matches via Jaccard
        let similar = obs(3, ObservationKind::Bugfix, "Nil map read", &["nil", "error-handling"]);
        let analysis = detector.analyze_observation(&similar).unwrap();
        assert!(!analysis.is_new);
        assert!(analysis.matched.is_some());
        assert!(analysis.score >= 0.3);
        assert_eq!(analysis.frequency, 3);
    }

    #[test]
    fn test_sync_callback_fires_on_promotion() {
        let (detector, _store, _clock, _dir) = setup();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let fired = fired.clone();
            detector.set_sync_callback(Arc::new(move |_p| {
                fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }

        for id in 1..=2 {
            let o = obs(id, ObservationKind::Bugfix, "Leak in watcher", &["debugging"]);
            detector.analyze_observation(&o).unwrap();
        }
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_candidate_bound_evicts_least_recent() {
        let (db, _dir) = temp_db();
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(PatternStore::new(db, clock.clone()));
        let config = PatternConfig {
            max_candidates: 2,
            ..Default::default()
        };
        let detector = PatternDetector::new(store, clock.clone(), config);

        for (id, title) in [(1, "alpha thing"), (2, "beta thing"), (3, "gamma thing")] {
            let o = obs(id, ObservationKind::Discovery, title, &[]);
            detector.analyze_observation(&o).unwrap();
            clock.advance(chrono::Duration::minutes(1));
        }

        assert_eq!(detector.candidate_count(), 2);
    }

    #[test]
    fn test_evict_stale_candidates() {
        let (detector, _store, clock, _dir) = setup();
        let o = obs(1, ObservationKind::Discovery, "orphan signature", &[]);
        detector.analyze_observation(&o).unwrap();
        assert_eq!(detector.candidate_count(), 1);

        clock.advance(chrono::Duration::days(8));
        detector.evict_stale_candidates();
        assert_eq!(detector.candidate_count(), 0);
    }

    #[test]
    fn test_derive_names() {
        assert_eq!(
            derive_pattern_name(
                PatternType::Bug,
                &["nil".into(), "error-handling".into(), "deref".into(), "path".into()],
                "whatever"
            ),
            "Bug Pattern: nil error-handling deref"
        );
        assert_eq!(
            derive_pattern_name(PatternType::Architecture, &["layered".into()], "Hexagonal core"),
            "Hexagonal core"
        );
        let long_title = "x".repeat(61);
        assert_eq!(
            derive_pattern_name(PatternType::Architecture, &["layered".into()], &long_title),
            "Architecture Pattern: layered"
        );
    }

    #[tokio::test]
    async fn test_background_loop_stops_on_cancel() {
        let (detector, _store, _clock, _dir) = setup();
        let cancel = CancellationToken::new();
        let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);

        let handle = tokio::spawn(detector.clone().run_background_loop(
            None,
            cancel.clone(),
            stop_rx,
        ));

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("loop should exit promptly")
            .unwrap();
    }
}
