//! Relation Store
//!
//! Durable graph of typed edges between observations. Inserts are idempotent
//! on `(source, target, type)`; the k-hop neighborhood query is a BFS with a
//! visited set, deduplicating by edge id.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use rusqlite::{Row, params, params_from_iter};

use crate::clock::SharedClock;
use crate::error::Result;
use crate::memory::{DetectionSource, NewRelation, Relation, RelationType};
use crate::storage::Database;

const REL_COLUMNS: &str = "id, source_id, target_id, relation_type, confidence, \
                           detection_source, reason, created_at_epoch";

// ============================================================================
// RELATION STORE
// ============================================================================

/// Durable store for observation relations
pub struct RelationStore {
    db: Arc<Database>,
    clock: SharedClock,
}

/// Per-observation relation aggregates used by the relevance calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationStats {
    /// Edges touching the observation
    pub count: i64,
    /// Mean confidence over those edges
    pub avg_confidence: f64,
}

impl RelationStore {
    /// Create a store over an open database
    pub fn new(db: Arc<Database>, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    fn row_to_relation(row: &Row<'_>) -> rusqlite::Result<Relation> {
        let relation_type: String = row.get(3)?;
        let detection_source: String = row.get(5)?;
        Ok(Relation {
            id: row.get(0)?,
            source_id: row.get(1)?,
            target_id: row.get(2)?,
            relation_type: RelationType::parse_name(&relation_type)
                .unwrap_or(RelationType::RelatesTo),
            confidence: row.get(4)?,
            detection_source: DetectionSource::parse_name(&detection_source)
                .unwrap_or(DetectionSource::FileOverlap),
            reason: row.get(6)?,
            created_at_epoch: row.get(7)?,
        })
    }

    /// Insert one edge; duplicates on `(source, target, type)` are ignored.
    /// Returns whether a row was actually written.
    pub fn insert(&self, relation: &NewRelation) -> Result<bool> {
        relation.validate()?;
        let now = self.clock.now_epoch_ms();
        let writer = self.db.writer()?;
        let changed = writer.execute(
            "INSERT OR IGNORE INTO observation_relations
             (source_id, target_id, relation_type, confidence, detection_source, reason,
              created_at_epoch)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                relation.source_id,
                relation.target_id,
                relation.relation_type.as_str(),
                relation.confidence,
                relation.detection_source.as_str(),
                relation.reason,
                now,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Insert a batch of edges in one transaction, ignoring duplicates.
    /// Returns how many rows were written.
    pub fn insert_batch(&self, relations: &[NewRelation]) -> Result<usize> {
        if relations.is_empty() {
            return Ok(0);
        }
        for relation in relations {
            relation.validate()?;
        }

        let now = self.clock.now_epoch_ms();
        let mut writer = self.db.writer()?;
        let tx = writer.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO observation_relations
                 (source_id, target_id, relation_type, confidence, detection_source, reason,
                  created_at_epoch)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for relation in relations {
                inserted += stmt.execute(params![
                    relation.source_id,
                    relation.target_id,
                    relation.relation_type.as_str(),
                    relation.confidence,
                    relation.detection_source.as_str(),
                    relation.reason,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Every edge touching the observation, either direction
    pub fn get_for_observation(&self, obs_id: i64) -> Result<Vec<Relation>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {REL_COLUMNS} FROM observation_relations
             WHERE source_id = ?1 OR target_id = ?1
             ORDER BY confidence DESC, id ASC"
        ))?;
        let rows = stmt.query_map(params![obs_id], Self::row_to_relation)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Edges of one type
    pub fn get_by_type(&self, relation_type: RelationType, limit: usize) -> Result<Vec<Relation>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {REL_COLUMNS} FROM observation_relations
             WHERE relation_type = ?1
             ORDER BY confidence DESC, id ASC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            params![relation_type.as_str(), limit as i64],
            Self::row_to_relation,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Edges at or above a confidence threshold
    pub fn get_by_min_confidence(&self, min: f64, limit: usize) -> Result<Vec<Relation>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {REL_COLUMNS} FROM observation_relations
             WHERE confidence >= ?1
             ORDER BY confidence DESC, id ASC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![min, limit as i64], Self::row_to_relation)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// BFS the k-hop neighborhood around `center`, deduplicating edges by id.
    ///
    /// Edges below `min_confidence` are not traversed. The result contains
    /// each reachable edge once, closest hops first.
    pub fn get_graph(
        &self,
        center: i64,
        max_hops: u32,
        min_confidence: f64,
    ) -> Result<Vec<Relation>> {
        let mut visited: HashSet<i64> = HashSet::from([center]);
        let mut seen_edges: HashSet<i64> = HashSet::new();
        let mut result = Vec::new();
        let mut frontier = VecDeque::from([(center, 0u32)]);

        while let Some((node, depth)) = frontier.pop_front() {
            if depth >= max_hops {
                continue;
            }
            for edge in self.get_for_observation(node)? {
                if edge.confidence < min_confidence {
                    continue;
                }
                if seen_edges.insert(edge.id) {
                    result.push(edge.clone());
                }
                let neighbor = if edge.source_id == node {
                    edge.target_id
                } else {
                    edge.source_id
                };
                if visited.insert(neighbor) {
                    frontier.push_back((neighbor, depth + 1));
                }
            }
        }

        Ok(result)
    }

    /// Neighbors of a node ordered by edge confidence, for graph expansion
    pub fn get_neighbors(&self, obs_id: i64, min_confidence: f64, limit: usize) -> Result<Vec<(i64, f64)>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT CASE WHEN source_id = ?1 THEN target_id ELSE source_id END, confidence
             FROM observation_relations
             WHERE (source_id = ?1 OR target_id = ?1) AND confidence >= ?2
             ORDER BY confidence DESC, id ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![obs_id, min_confidence, limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Edge count per observation for a set of ids (degree, for boosts)
    pub fn degrees(&self, ids: &[i64]) -> Result<HashMap<i64, i64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let reader = self.db.reader()?;
        let marks = (1..=ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT obs, COUNT(*) FROM (
                 SELECT source_id AS obs FROM observation_relations WHERE source_id IN ({marks})
                 UNION ALL
                 SELECT target_id AS obs FROM observation_relations WHERE target_id IN ({marks})
             ) GROUP BY obs"
        ))?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<rusqlite::Result<HashMap<_, _>>>()
            .map_err(Into::into)
    }

    /// Count and mean confidence per observation, one query pass
    pub fn stats_for(&self, ids: &[i64]) -> Result<HashMap<i64, RelationStats>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let reader = self.db.reader()?;
        let marks = (1..=ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT obs, COUNT(*), AVG(confidence) FROM (
                 SELECT source_id AS obs, confidence FROM observation_relations
                 WHERE source_id IN ({marks})
                 UNION ALL
                 SELECT target_id AS obs, confidence FROM observation_relations
                 WHERE target_id IN ({marks})
             ) GROUP BY obs"
        ))?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                RelationStats {
                    count: row.get(1)?,
                    avg_confidence: row.get(2)?,
                },
            ))
        })?;
        rows.collect::<rusqlite::Result<HashMap<_, _>>>()
            .map_err(Into::into)
    }

    /// Total stored edges
    pub fn count(&self) -> Result<i64> {
        let reader = self.db.reader()?;
        reader
            .query_row("SELECT COUNT(*) FROM observation_relations", [], |row| {
                row.get(0)
            })
            .map_err(Into::into)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::StoreConfig;
    use crate::memory::ParsedObservation;
    use crate::storage::ObservationStore;
    use crate::storage::testutil::temp_db;
    use chrono::{TimeZone, Utc};

    fn setup() -> (ObservationStore, RelationStore, tempfile::TempDir) {
        let (db, dir) = temp_db();
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let obs = ObservationStore::new(db.clone(), clock.clone(), StoreConfig::default());
        let rel = RelationStore::new(db, clock);
        (obs, rel, dir)
    }

    fn seed_observations(obs: &ObservationStore, n: usize) -> Vec<i64> {
        (0..n)
            .map(|i| {
                let parsed = ParsedObservation {
                    title: Some(format!("obs {i}")),
                    ..Default::default()
                };
                obs.store("s", "proj", &parsed, None, 0).unwrap().0
            })
            .collect()
    }

    fn edge(source: i64, target: i64, rt: RelationType, confidence: f64) -> NewRelation {
        NewRelation {
            source_id: source,
            target_id: target,
            relation_type: rt,
            confidence,
            detection_source: DetectionSource::FileOverlap,
            reason: "test".into(),
        }
    }

    #[test]
    fn test_insert_idempotent() {
        let (obs, rel, _dir) = setup();
        let ids = seed_observations(&obs, 2);

        let e = edge(ids[1], ids[0], RelationType::Fixes, 0.7);
        assert!(rel.insert(&e).unwrap());
        assert!(!rel.insert(&e).unwrap());
        assert_eq!(rel.count().unwrap(), 1);

        // Same endpoints, different type is a distinct edge
        let e2 = edge(ids[1], ids[0], RelationType::RelatesTo, 0.5);
        assert!(rel.insert(&e2).unwrap());
        assert_eq!(rel.count().unwrap(), 2);
    }

    #[test]
    fn test_insert_batch_skips_duplicates() {
        let (obs, rel, _dir) = setup();
        let ids = seed_observations(&obs, 3);

        let batch = vec![
            edge(ids[1], ids[0], RelationType::Fixes, 0.7),
            edge(ids[2], ids[0], RelationType::RelatesTo, 0.5),
            edge(ids[1], ids[0], RelationType::Fixes, 0.9),
        ];
        let inserted = rel.insert_batch(&batch).unwrap();
        assert_eq!(inserted, 2);
    }

    #[test]
    fn test_query_by_observation_type_confidence() {
        let (obs, rel, _dir) = setup();
        let ids = seed_observations(&obs, 3);

        rel.insert(&edge(ids[1], ids[0], RelationType::Fixes, 0.8)).unwrap();
        rel.insert(&edge(ids[2], ids[1], RelationType::DependsOn, 0.45)).unwrap();

        let touching_mid = rel.get_for_observation(ids[1]).unwrap();
        assert_eq!(touching_mid.len(), 2);
        assert!(touching_mid[0].confidence >= touching_mid[1].confidence);

        let fixes = rel.get_by_type(RelationType::Fixes, 10).unwrap();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].source_id, ids[1]);

        let confident = rel.get_by_min_confidence(0.5, 10).unwrap();
        assert_eq!(confident.len(), 1);
    }

    #[test]
    fn test_get_graph_bfs_dedup() {
        let (obs, rel, _dir) = setup();
        let ids = seed_observations(&obs, 4);

        // Chain 0-1-2-3 plus a triangle edge 0-2
        rel.insert(&edge(ids[0], ids[1], RelationType::RelatesTo, 0.6)).unwrap();
        rel.insert(&edge(ids[1], ids[2], RelationType::RelatesTo, 0.6)).unwrap();
        rel.insert(&edge(ids[2], ids[3], RelationType::RelatesTo, 0.6)).unwrap();
        rel.insert(&edge(ids[0], ids[2], RelationType::SharesTheme, 0.6)).unwrap();

        let one_hop = rel.get_graph(ids[0], 1, 0.0).unwrap();
        assert_eq!(one_hop.len(), 2);

        let two_hops = rel.get_graph(ids[0], 2, 0.0).unwrap();
        // All but the 2-3 edge is reachable within one hop of expansion;
        // 2-3 comes in at depth 2
        assert_eq!(two_hops.len(), 4);

        // Edge ids are unique in the result
        let mut edge_ids: Vec<i64> = two_hops.iter().map(|e| e.id).collect();
        edge_ids.sort_unstable();
        edge_ids.dedup();
        assert_eq!(edge_ids.len(), 4);
    }

    #[test]
    fn test_get_graph_respects_confidence_floor() {
        let (obs, rel, _dir) = setup();
        let ids = seed_observations(&obs, 3);

        rel.insert(&edge(ids[0], ids[1], RelationType::RelatesTo, 0.9)).unwrap();
        rel.insert(&edge(ids[1], ids[2], RelationType::RelatesTo, 0.2)).unwrap();

        let graph = rel.get_graph(ids[0], 3, 0.3).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_stats_for_and_degrees() {
        let (obs, rel, _dir) = setup();
        let ids = seed_observations(&obs, 3);

        rel.insert(&edge(ids[0], ids[1], RelationType::RelatesTo, 0.4)).unwrap();
        rel.insert(&edge(ids[2], ids[0], RelationType::Causes, 0.8)).unwrap();

        let stats = rel.stats_for(&ids).unwrap();
        let s0 = stats.get(&ids[0]).copied().unwrap_or_default();
        assert_eq!(s0.count, 2);
        assert!((s0.avg_confidence - 0.6).abs() < 1e-9);
        assert_eq!(stats.get(&ids[1]).unwrap().count, 1);

        let degrees = rel.degrees(&ids).unwrap();
        assert_eq!(degrees.get(&ids[0]), Some(&2));
        assert_eq!(degrees.get(&ids[2]), Some(&1));
    }

    #[test]
    fn test_self_loop_rejected() {
        let (obs, rel, _dir) = setup();
        let ids = seed_observations(&obs, 1);
        let e = edge(ids[0], ids[0], RelationType::RelatesTo, 0.5);
        assert!(rel.insert(&e).is_err());
    }
}
