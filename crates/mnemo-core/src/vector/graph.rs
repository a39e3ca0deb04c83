//! Graph-Expanded Vector Queries
//!
//! A depth-limited BFS from the top results walks the relation graph and
//! pulls in observations that are structurally close even when their text
//! is not. Expanded candidates are recomputed like any non-hub document;
//! final scores get a small capped boost for well-connected nodes.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::GraphExpansionConfig;
use crate::error::Result;
use crate::storage::RelationStore;
use crate::text::cosine_similarity;
use crate::vector::store::{DocType, VectorFilter, VectorMatch, VectorStore, sort_matches};

impl VectorStore {
    /// Query, then expand through the relation graph.
    ///
    /// Seeds are the base results' observations. The BFS follows at most
    /// `branch_factor` edges per node over edges with confidence at least
    /// `min_edge_weight`, up to `max_hops` deep, with propagated relevance
    /// decaying by `hop_decay` each hop. Newly reached observations are
    /// scored by recomputed similarity; every final score is multiplied by
    /// a degree boost capped at `max_degree_boost` and clamped into [0, 1].
    pub fn query_expanded(
        &self,
        query_text: &str,
        filter: &VectorFilter,
        limit: usize,
        relations: &RelationStore,
        config: &GraphExpansionConfig,
    ) -> Result<Vec<VectorMatch>> {
        let base = self.query(query_text, filter, limit)?;
        if base.is_empty() {
            return Ok(base);
        }

        let query_vec = self.embed_query(query_text)?;

        // BFS over observation ids reachable from the seeds
        let seed_ids: Vec<(i64, f32)> = base
            .iter()
            .filter(|m| m.doc_type == DocType::Observation)
            .map(|m| (m.sqlite_id, m.similarity))
            .collect();
        let mut visited: HashSet<i64> = seed_ids.iter().map(|(id, _)| *id).collect();
        let mut propagated: HashMap<i64, f64> = HashMap::new();
        let mut frontier: VecDeque<(i64, f64, u32)> = seed_ids
            .iter()
            .map(|(id, sim)| (*id, f64::from(*sim), 0u32))
            .collect();

        while let Some((node, relevance, depth)) = frontier.pop_front() {
            if depth >= config.max_hops {
                continue;
            }
            let neighbors =
                relations.get_neighbors(node, config.min_edge_weight, config.branch_factor)?;
            for (neighbor, _confidence) in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let carried = relevance * config.hop_decay;
                propagated.insert(neighbor, carried);
                frontier.push_back((neighbor, carried, depth + 1));
            }
        }

        // Recompute similarity for expanded candidates that have cached
        // content and are not already in the result set
        let mut expanded: Vec<VectorMatch> = Vec::new();
        if !propagated.is_empty() {
            let mut ordered: Vec<i64> = propagated.keys().copied().collect();
            ordered.sort_unstable();

            let candidates = self.cached_docs_for(&ordered, filter);
            if !candidates.is_empty() {
                let texts: Vec<String> = candidates.iter().map(|c| c.2.clone()).collect();
                match self.embedder_batch(&texts) {
                    Ok(vectors) => {
                        for ((sqlite_id, doc_id, _content, doc_type), vector) in
                            candidates.into_iter().zip(vectors)
                        {
                            let similarity =
                                cosine_similarity(&query_vec, &vector).clamp(0.0, 1.0);
                            expanded.push(VectorMatch {
                                doc_id,
                                sqlite_id,
                                doc_type,
                                similarity,
                                distance: 1.0 - similarity,
                                from_hub: false,
                            });
                        }
                    }
                    Err(err) => {
                        tracing::warn!("graph expansion embed failed, skipped: {err}");
                    }
                }
            }
        }

        // Merge and apply the degree boost
        let mut matches = base;
        let known: HashSet<String> = matches.iter().map(|m| m.doc_id.clone()).collect();
        matches.extend(expanded.into_iter().filter(|m| !known.contains(&m.doc_id)));

        let all_ids: Vec<i64> = matches
            .iter()
            .filter(|m| m.doc_type == DocType::Observation)
            .map(|m| m.sqlite_id)
            .collect();
        let degrees = relations.degrees(&all_ids)?;
        for m in &mut matches {
            let degree = degrees.get(&m.sqlite_id).copied().unwrap_or(0);
            let boost = (1.0 + 0.02 * degree as f64).min(config.max_degree_boost);
            m.similarity = ((f64::from(m.similarity) * boost) as f32).clamp(0.0, 1.0);
            m.distance = 1.0 - m.similarity;
        }

        sort_matches(&mut matches);
        matches.truncate(limit);
        Ok(matches)
    }
}

// ============================================================================
// TESTS
// ============================================================================
