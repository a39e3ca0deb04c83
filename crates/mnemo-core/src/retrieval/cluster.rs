//! Similarity Clustering
//!
//! Near-duplicate collapsing for context assembly. Greedy single-pass
//! clustering over keyword sets: an observation joins the first cluster
//! whose representative is similar enough, otherwise it starts a new one.
//! The first observation in each cluster is the one that is kept.
//!
//! Small inputs are compared pairwise; past `exact_limit` a signature
//! pre-filter skips pairs whose 64-bit term signatures share too few bits.
//! Signatures only skip comparisons, they never decide similarity.

use crate::memory::Observation;
use crate::text::{extract_keywords, jaccard, matching_bits, term_signature};

/// Keyword set and signature for one observation
struct ClusterKey {
    keywords: Vec<String>,
    signature: u64,
}

impl ClusterKey {
    fn for_observation(obs: &Observation) -> Self {
        let mut keywords = extract_keywords(&obs.searchable_text());
        for concept in &obs.concepts {
            let lowered = concept.to_lowercase();
            if !keywords.contains(&lowered) {
                keywords.push(lowered);
            }
        }
        let signature = term_signature(&keywords);
        Self { keywords, signature }
    }
}

/// Cluster observations by text similarity; returns index clusters in input
/// order, each led by its representative.
pub fn cluster_observations(
    observations: &[Observation],
    threshold: f64,
    exact_limit: usize,
    min_signature_bits: u32,
) -> Vec<Vec<usize>> {
    if observations.is_empty() {
        return Vec::new();
    }

    let keys: Vec<ClusterKey> = observations.iter().map(ClusterKey::for_observation).collect();
    let use_prefilter = observations.len() > exact_limit;

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for (index, key) in keys.iter().enumerate() {
        let mut joined = false;
        for cluster in &mut clusters {
            let representative = &keys[cluster[0]];

            if use_prefilter
                && matching_bits(key.signature, representative.signature) < min_signature_bits
            {
                continue;
            }
            if jaccard(&key.keywords, &representative.keywords) >= threshold {
                cluster.push(index);
                joined = true;
                break;
            }
        }
        if !joined {
            clusters.push(vec![index]);
        }
    }

    clusters
}

/// Keep the first observation of each cluster, preserving input order
pub fn cluster_representatives(
    observations: Vec<Observation>,
    threshold: f64,
    exact_limit: usize,
    min_signature_bits: u32,
) -> Vec<Observation> {
    let clusters =
        cluster_observations(&observations, threshold, exact_limit, min_signature_bits);
    let keep: std::collections::HashSet<usize> =
        clusters.iter().map(|cluster| cluster[0]).collect();
    observations
        .into_iter()
        .enumerate()
        .filter(|(index, _)| keep.contains(index))
        .map(|(_, obs)| obs)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryKind, ObservationKind, Scope};
    use std::collections::HashMap;

    fn obs(id: i64, title: &str) -> Observation {
        Observation {
            id,
            session_id: "s".into(),
            project: "proj".into(),
            scope: Scope::Project,
            kind: ObservationKind::Change,
            memory_type: MemoryKind::Context,
            title: Some(title.to_string()),
            subtitle: None,
            narrative: None,
            facts: vec![],
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            file_mtimes: HashMap::new(),
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
    fn test_near_duplicates_collapse() {
        let observations = vec![
            obs(1, "database connection pool exhausted under load"),
            obs(2, "database connection pool exhausted under heavy load"),
            obs(3, "css grid alignment quirk"),
        ];
        let clusters = cluster_observations(&observations, 0.4, 50, 32);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0][0], 0);
        assert!(clusters[0].contains(&1));
        assert_eq!(clusters[1], vec![2]);
    }

    #[test]
    fn test_representatives_keep_first() {
        let observations = vec![
            obs(1, "database connection pool exhausted under load"),
            obs(2, "database connection pool exhausted under heavy load"),
            obs(3, "css grid alignment quirk"),
        ];
        let kept = cluster_representatives(observations, 0.4, 50, 32);
        let ids: Vec<i64> = kept.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_all_distinct_stay() {
        let observations = vec![
            obs(1, "async runtime shutdown ordering"),
            obs(2, "template rendering whitespace"),
            obs(3, "migration checksum mismatch"),
        ];
        let kept = cluster_representatives(observations, 0.4, 50, 32);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster_observations(&[], 0.4, 50, 32).is_empty());
    }

    #[test]
    fn test_prefilter_agrees_with_exact_on_duplicates() {
        // 60 observations: 30 duplicated titles -> prefilter path (n > 50)
        // must still collapse exact duplicates
        let mut observations = Vec::new();
        for i in 0..30 {
            observations.push(obs(i, &format!("topic{i} subsystem{i} alpha{i}")));
            observations.push(obs(100 + i, &format!("topic{i} subsystem{i} alpha{i}")));
        }
        assert!(observations.len() > 50);
        let kept = cluster_representatives(observations, 0.4, 50, 32);
        assert_eq!(kept.len(), 30);
    }

    #[test]
    fn test_identical_signatures_have_64_matching_bits() {
        let a = obs(1, "exact same words here");
        let b = obs(2, "exact same words here");
        let ka = ClusterKey::for_observation(&a);
        let kb = ClusterKey::for_observation(&b);
        assert_eq!(matching_bits(ka.signature, kb.signature), 64);
    }

    #[test]
    fn test_observations_without_text_form_one_cluster() {
        let mut a = obs(1, "");
        a.title = None;
        let mut b = obs(2, "");
        b.title = None;
        // Empty keyword sets are jaccard-identical
        let kept = cluster_representatives(vec![a, b], 0.4, 50, 32);
        assert_eq!(kept.len(), 1);
    }
}
