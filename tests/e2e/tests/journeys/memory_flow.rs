//! Ingest journey: store, detect, supersede, clean up
//!
//! Walks an observation from ingest through conflict supersession, pattern
//! promotion, and retention cleanup, asserting the invariants a session
//! would rely on.

use chrono::Duration;
use mnemo_e2e_tests::harness::{bugfix, decision, discovery};
use mnemo_e2e_tests::TestEngine;
use mnemo_core::{ConflictType, EngineConfig, ObservationKind, ParsedObservation, Resolution};

#[tokio::test]
async fn correction_supersedes_older_observation() {
    let t = TestEngine::new();

    let older = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &decision("Use library X", "X will own retry handling", "src/retry.rs"),
        )
        .await;

    t.clock.advance(Duration::minutes(15));
    let newer = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &decision(
                "Actually, that was wrong - use Y",
                "X cannot stream responses, switching to Y",
                "src/retry.rs",
            ),
        )
        .await;

    // Exactly one conflict: contradicts, prefer_newer
    let conflicts = t.engine.conflicts().get_for_observation(older).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::Contradicts);
    assert_eq!(conflicts[0].resolution, Resolution::PreferNewer);
    assert_eq!(conflicts[0].newer_obs_id, newer);

    // Only the correction stays active
    let active = t.engine.observations().get_active("webapp", 10).unwrap();
    let ids: Vec<i64> = active.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![newer]);

    // is_superseded holds exactly when a prefer_newer conflict exists
    assert!(t.engine.observations().get_by_id(older).unwrap().is_superseded);
    assert!(t.engine.conflicts().is_superseded_by_conflict(older).unwrap());
    assert!(!t.engine.conflicts().is_superseded_by_conflict(newer).unwrap());
}

#[tokio::test]
async fn repeated_bug_signature_promotes_pattern() {
    let t = TestEngine::new();

    t.store_and_settle(
        "sess-1",
        "webapp",
        &ParsedObservation {
            kind: ObservationKind::Bugfix,
            title: Some("Nil map write in handler".into()),
            narrative: Some("writing to an uninitialized map".into()),
            concepts: vec!["nil".into(), "error-handling".into()],
            ..Default::default()
        },
    )
    .await;

    t.clock.advance(Duration::hours(1));
    t.store_and_settle(
        "sess-2",
        "webapp",
        &ParsedObservation {
            kind: ObservationKind::Bugfix,
            title: Some("Nil map write in handler".into()),
            narrative: Some("same shape, different handler".into()),
            concepts: vec!["nil".into(), "error-handling".into()],
            ..Default::default()
        },
    )
    .await;

    // Exactly one promoted pattern with the bug prefix and both observations
    let patterns = t.engine.patterns().get_active(10).unwrap();
    assert_eq!(patterns.len(), 1);
    let pattern = &patterns[0];
    assert!(
        pattern.name.starts_with("Bug Pattern:"),
        "unexpected name {}",
        pattern.name
    );
    assert_eq!(pattern.frequency, 2);
    assert_eq!(pattern.observation_ids.len(), 2);
    assert!(pattern.projects.contains(&"webapp".to_string()));
}

#[tokio::test]
async fn delete_purges_row_edges_and_vectors() {
    let t = TestEngine::new();

    let keeper = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &bugfix("Fix pagination off-by-one", "cursor math fixed", "src/page.rs"),
        )
        .await;
    t.clock.advance(Duration::minutes(1));
    let victim = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &bugfix("Fix pagination overflow", "cursor overflow fixed", "src/page.rs"),
        )
        .await;

    // The pair is related through shared files
    assert!(!t.engine.relations().get_for_observation(victim).unwrap().is_empty());

    let deleted = t.engine.observations().delete_many(&[victim]).unwrap();
    assert_eq!(deleted, 1);

    // Row gone, edges gone, vector leg silent about it
    assert!(t.engine.observations().get_by_id(victim).is_err());
    assert!(t.engine.relations().get_for_observation(victim).unwrap().is_empty());
    assert!(t.engine.observations().get_by_id(keeper).is_ok());

    let request = mnemo_core::InjectRequest {
        project: "webapp".into(),
        query: Some("pagination overflow".into()),
        ..Default::default()
    };
    let result = t.engine.inject(&request).unwrap();
    assert!(result
        .observations
        .iter()
        .all(|entry| entry.observation.id != victim));
}

#[tokio::test]
async fn superseded_rows_are_cleaned_up_after_retention() {
    let t = TestEngine::new();

    let older = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &decision("Enable the cache", "cache on for reads", "src/cache.rs"),
        )
        .await;
    t.clock.advance(Duration::minutes(5));
    t.store_and_settle(
        "sess-1",
        "webapp",
        &decision("Disable the cache", "stale reads, cache off", "src/cache.rs"),
    )
    .await;

    assert!(t.engine.observations().get_by_id(older).unwrap().is_superseded);

    // Within retention the row survives cleanup
    let removed = t
        .engine
        .conflicts()
        .cleanup_superseded(t.engine.observations(), "webapp", 3)
        .unwrap();
    assert!(removed.is_empty());

    // Past retention it is deleted, and the cleanup is idempotent
    t.clock.advance(Duration::days(4));
    let removed = t
        .engine
        .conflicts()
        .cleanup_superseded(t.engine.observations(), "webapp", 3)
        .unwrap();
    assert_eq!(removed, vec![older]);
    assert!(t.engine.observations().get_by_id(older).is_err());

    let removed = t
        .engine
        .conflicts()
        .cleanup_superseded(t.engine.observations(), "webapp", 3)
        .unwrap();
    assert!(removed.is_empty());
}

#[tokio::test]
async fn per_project_cap_trims_oldest() {
    let mut config = EngineConfig::default();
    config.vector.dimensions = mnemo_e2e_tests::harness::TEST_DIMENSIONS;
    config.store.max_observations_per_project = 3;
    let t = TestEngine::with_config(config);

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            t.store_and_settle(
                "sess-1",
                "webapp",
                &discovery(&format!("subsystem{i} note{i}"), &[]),
            )
            .await,
        );
        t.clock.advance(Duration::minutes(1));
    }

    let counts = t.engine.observations().counts().unwrap();
    assert_eq!(counts.total, 3);
    assert!(t.engine.observations().get_by_id(ids[0]).is_err());
    assert!(t.engine.observations().get_by_id(ids[4]).is_ok());
}

#[tokio::test]
async fn global_scope_crosses_projects() {
    let t = TestEngine::new();

    // "security" is globalizable: visible from any project
    t.store_and_settle(
        "sess-1",
        "backend",
        &discovery("Never log bearer tokens", &["security"]),
    )
    .await;
    t.store_and_settle("sess-2", "frontend", &discovery("Component naming", &[]))
        .await;

    let from_frontend = t.engine.observations().get_active("frontend", 10).unwrap();
    assert_eq!(from_frontend.len(), 2);

    let strict = t
        .engine
        .observations()
        .get_by_project_strict("frontend", 10)
        .unwrap();
    assert_eq!(strict.len(), 1);
}
