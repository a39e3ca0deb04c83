//! Consolidation journey: decay, association, forgetting
//!
//! Runs the scheduler's task bodies against a real engine with a pinned
//! clock and checks the documented score math and protection rules.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use mnemo_core::{
    Clock, ConsolidationScheduler, EngineConfig, EngineError, ObservationKind, ParsedObservation,
    RelevanceConfig, SchedulerConfig,
};
use mnemo_e2e_tests::TestEngine;
use mnemo_e2e_tests::harness::{TEST_DIMENSIONS, decision, discovery};
use tokio_util::sync::CancellationToken;

fn scheduler_for(t: &TestEngine, config: SchedulerConfig) -> Arc<ConsolidationScheduler> {
    Arc::new(ConsolidationScheduler::new(
        t.engine.observations().clone(),
        t.engine.relations().clone(),
        t.embedder.clone(),
        t.clock.clone(),
        RelevanceConfig::default(),
        config,
        "webapp",
    ))
}

fn config_with_forgetting() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.vector.dimensions = TEST_DIMENSIONS;
    config.scheduler.forget_enabled = true;
    config
}

#[tokio::test]
async fn fourteen_day_old_bugfix_decays_to_documented_score() {
    let t = TestEngine::new();
    let id = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &ParsedObservation {
                kind: ObservationKind::Bugfix,
                title: Some("Fix race in flush".into()),
                narrative: Some("double flush raced the writer".into()),
                ..Default::default()
            },
        )
        .await;

    t.clock.advance(Duration::days(14));
    let scheduler = scheduler_for(&t, SchedulerConfig::default());
    let report = scheduler.run_decay().unwrap();
    assert_eq!(report.observations_processed, 1);

    // 1.3 (bugfix) * 0.5^(14/7) * (1 + 0) = 0.325
    let obs = t.engine.observations().get_by_id(id).unwrap();
    assert!(
        (obs.importance_score - 0.325).abs() < 1e-3,
        "importance {}",
        obs.importance_score
    );
}

#[tokio::test]
async fn decay_stamps_score_updated_for_every_row() {
    let t = TestEngine::new();
    for i in 0..4 {
        t.store_and_settle("sess-1", "webapp", &discovery(&format!("topic{i} area{i}"), &[]))
            .await;
        t.clock.advance(Duration::minutes(1));
    }

    t.clock.advance(Duration::days(1));
    let invocation = t.clock.now_epoch_ms();
    let scheduler = scheduler_for(&t, SchedulerConfig::default());
    scheduler.run_decay().unwrap();

    for obs in t.engine.observations().get_all().unwrap() {
        assert!(obs.score_updated_at_epoch.unwrap() >= invocation);
    }
}

#[tokio::test]
async fn association_pass_links_similar_recent_observations() {
    let t = TestEngine::new();
    let a = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &discovery("worker queue drains slowly", &[]),
        )
        .await;
    t.clock.advance(Duration::minutes(5));
    let b = t
        .store_and_settle(
            "sess-2",
            "webapp",
            &discovery("worker queue drains slowly again", &[]),
        )
        .await;

    let scheduler = scheduler_for(&t, SchedulerConfig::default());
    let report = scheduler.run_associations().unwrap();
    assert_eq!(report.sampled, 2);
    assert!(report.pairs_checked >= 1);

    // The creative edge exists between the pair (possibly alongside edges
    // the ingest detectors already wrote)
    let edges = t.engine.relations().get_for_observation(b).unwrap();
    assert!(edges.iter().any(|e| {
        e.detection_source == mnemo_core::DetectionSource::CreativeAssociation
            && (e.target_id == a || e.source_id == a)
    }));
}

#[tokio::test]
async fn forgetting_archives_faint_rows_but_protects_decisions() {
    let config = config_with_forgetting();
    let t = TestEngine::with_config(config.clone());

    let keep = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &decision("Keep the monolith", "for now", "docs/adr-1.md"),
        )
        .await;
    t.clock.advance(Duration::minutes(1));
    let faint = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &discovery("ephemeral detail nobody needs", &[]),
        )
        .await;

    let mut scores = HashMap::new();
    scores.insert(keep, 0.005);
    scores.insert(faint, 0.005);
    t.engine.observations().update_importance_scores(&scores).unwrap();

    t.clock.advance(Duration::days(100));
    let scheduler = scheduler_for(&t, config.scheduler.clone());
    let report = scheduler.run_forgetting().unwrap();
    assert_eq!(report.archived, 1);
    assert_eq!(report.protected, 1);

    // The decision survives; nothing was deleted, only archived
    assert!(!t.engine.observations().get_by_id(keep).unwrap().archived);
    assert!(t.engine.observations().get_by_id(faint).unwrap().archived);

    let active = t.engine.observations().get_active("webapp", 10).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, keep);
}

#[tokio::test]
async fn forgetting_is_rate_limited_between_runs() {
    let config = config_with_forgetting();
    let t = TestEngine::with_config(config.clone());

    let scheduler = scheduler_for(&t, config.scheduler.clone());
    scheduler.run_forgetting().unwrap();

    t.clock.advance(Duration::minutes(10));
    match scheduler.run_forgetting() {
        Err(EngineError::RateLimited(_)) => {}
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn scheduler_stops_cleanly_and_double_stop_is_noop() {
    let t = TestEngine::new();
    let scheduler = scheduler_for(&t, SchedulerConfig::default());
    let handle = tokio::spawn(scheduler.clone().run(CancellationToken::new()));

    scheduler.stop();
    scheduler.stop();

    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("scheduler should exit promptly")
        .unwrap();
}
