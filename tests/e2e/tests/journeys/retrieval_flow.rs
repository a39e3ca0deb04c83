//! Retrieval journey: search, hub promotion, context injection
//!
//! Exercises the read side end to end: keyword extraction, the hybrid
//! vector store's hub behavior, and the assembled session-start context.

use std::collections::HashMap;

use chrono::Duration;
use mnemo_core::text::extract_keywords;
use mnemo_core::{
    DocType, EngineConfig, InjectRequest, ObservationKind, ParsedObservation, StorageStrategy,
    VectorFilter, format_context,
};
use mnemo_e2e_tests::TestEngine;
use mnemo_e2e_tests::harness::{TEST_DIMENSIONS, discovery};

#[test]
fn keyword_extraction_drops_stop_and_short_words() {
    assert_eq!(
        extract_keywords("What is the authentication flow?"),
        vec!["authentication".to_string(), "flow".to_string()]
    );
}

#[tokio::test]
async fn hub_promotion_serves_third_query_from_storage() {
    let mut config = EngineConfig::default();
    config.vector.dimensions = TEST_DIMENSIONS;
    config.vector.strategy = StorageStrategy::Hub;
    config.vector.hub_threshold = 2;
    let t = TestEngine::with_config(config);

    t.store_and_settle(
        "sess-1",
        "webapp",
        &ParsedObservation {
            kind: ObservationKind::Discovery,
            title: Some("Connection pool tuning".into()),
            narrative: Some("pool exhaustion under sustained load".into()),
            ..Default::default()
        },
    )
    .await;

    // Nothing persisted at ingest in hub mode
    assert_eq!(t.engine.vectors().count().unwrap(), 0);

    let filter = VectorFilter {
        project: Some("webapp".into()),
        doc_type: Some(DocType::Observation),
    };

    // Two queries recompute and push the access count to the threshold;
    // promotion reuses the recomputed vectors
    t.engine.vectors().query("pool exhaustion", &filter, 5).unwrap();
    assert_eq!(t.engine.vectors().count().unwrap(), 0);
    t.engine.vectors().query("pool exhaustion", &filter, 5).unwrap();
    assert!(t.engine.vectors().count().unwrap() > 0);

    // Third query: stored hubs serve the result and no content embedding
    // happens (the query text itself is in the LRU cache)
    let calls_before = t.embedder.call_count();
    let hits = t.engine.vectors().query("pool exhaustion", &filter, 5).unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].from_hub);
    assert_eq!(t.embedder.call_count(), calls_before);
}

#[tokio::test]
async fn vector_queries_are_bounded_and_sorted() {
    let t = TestEngine::new();
    for i in 0..8 {
        t.store_and_settle(
            "sess-1",
            "webapp",
            &ParsedObservation {
                kind: ObservationKind::Discovery,
                title: Some(format!("caching note {i}")),
                narrative: Some(format!("cache behavior variant {i}")),
                ..Default::default()
            },
        )
        .await;
        t.clock.advance(Duration::seconds(1));
    }

    let filter = VectorFilter {
        project: Some("webapp".into()),
        doc_type: Some(DocType::Observation),
    };
    let hits = t.engine.vectors().query("cache behavior", &filter, 3).unwrap();
    assert!(hits.len() <= 3);
    for window in hits.windows(2) {
        assert!(window[0].similarity >= window[1].similarity);
    }
    for hit in &hits {
        assert!((0.0..=1.0).contains(&hit.similarity));
    }
}

#[tokio::test]
async fn inject_returns_ranked_context_and_bumps_counters() {
    let t = TestEngine::new();
    let relevant = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &ParsedObservation {
                kind: ObservationKind::Bugfix,
                title: Some("Retry budget exhaustion".into()),
                narrative: Some("retries consumed the whole budget".into()),
                ..Default::default()
            },
        )
        .await;
    t.clock.advance(Duration::minutes(1));
    t.store_and_settle("sess-1", "webapp", &discovery("Unrelated styling note", &[]))
        .await;

    let result = t
        .engine
        .inject(&InjectRequest {
            project: "webapp".into(),
            query: Some("retry budget".into()),
            ..Default::default()
        })
        .unwrap();

    assert!(
        result
            .observations
            .iter()
            .any(|entry| entry.observation.id == relevant)
    );
    assert!(result.full_count <= 25);
    assert_eq!(
        result.full_count,
        result.observations.len().min(25)
    );

    // Retrieval counters moved for everything returned
    for entry in &result.observations {
        let obs = t.engine.observations().get_by_id(entry.observation.id).unwrap();
        assert_eq!(obs.retrieval_count, 1);
        assert!(obs.last_retrieved_at_epoch.is_some());
    }

    // The formatter renders full detail for leading entries
    let rendered = format_context(&result);
    assert!(rendered.contains("# Memory from previous sessions"));
    assert!(rendered.contains("Retry budget exhaustion"));
}

#[tokio::test]
async fn inject_marks_stale_observations() {
    let t = TestEngine::new();
    let id = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &ParsedObservation {
                kind: ObservationKind::Discovery,
                title: Some("Parser rewrite notes".into()),
                narrative: Some("tracks src/parser.rs".into()),
                file_mtimes: HashMap::from([("src/parser.rs".to_string(), 10_000i64)]),
                ..Default::default()
            },
        )
        .await;

    // The tracked file changed since capture
    let result = t
        .engine
        .inject(&InjectRequest {
            project: "webapp".into(),
            current_file_mtimes: HashMap::from([("src/parser.rs".to_string(), 20_000i64)]),
            ..Default::default()
        })
        .unwrap();
    let entry = result
        .observations
        .iter()
        .find(|e| e.observation.id == id)
        .unwrap();
    assert!(entry.is_stale);
    assert!(format_context(&result).contains("[stale]"));
}

#[tokio::test]
async fn inject_excludes_superseded_rows() {
    let t = TestEngine::new();
    let older = t
        .store_and_settle(
            "sess-1",
            "webapp",
            &ParsedObservation {
                kind: ObservationKind::Decision,
                title: Some("Enable response caching".into()),
                narrative: Some("cache everything".into()),
                files_modified: vec!["src/cache.rs".into()],
                ..Default::default()
            },
        )
        .await;
    t.clock.advance(Duration::minutes(2));
    t.store_and_settle(
        "sess-1",
        "webapp",
        &ParsedObservation {
            kind: ObservationKind::Decision,
            title: Some("Disable response caching".into()),
            narrative: Some("stale responses in production".into()),
            files_modified: vec!["src/cache.rs".into()],
            ..Default::default()
        },
    )
    .await;

    let result = t
        .engine
        .inject(&InjectRequest {
            project: "webapp".into(),
            query: Some("response caching".into()),
            ..Default::default()
        })
        .unwrap();
    assert!(
        result
            .observations
            .iter()
            .all(|entry| entry.observation.id != older)
    );
}
