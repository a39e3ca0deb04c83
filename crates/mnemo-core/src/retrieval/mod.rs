//! Retrieval / Context Assembler
//!
//! Builds the observation set handed to the session-start hook: a keyword
//! leg over FTS and a semantic leg over the vector store, deduplicated,
//! staleness-enriched, clustered, and capped. The caller supplies current
//! file modification times; the engine never touches the filesystem here.

pub mod cluster;

pub use cluster::{cluster_observations, cluster_representatives};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{GraphExpansionConfig, RetrievalConfig};
use crate::error::{Result, validate_project};
use crate::memory::{Observation, ObservationOrder};
use crate::storage::{ObservationStore, RelationStore};
use crate::vector::{DocType, VectorFilter, VectorStore};

// ============================================================================
// REQUEST / RESULT TYPES
// ============================================================================

/// A context-injection request from the session-start hook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InjectRequest {
    /// Project the session is starting in
    pub project: String,
    /// Working directory of the session
    #[serde(default)]
    pub cwd: PathBuf,
    /// Optional query derived from the first prompt
    pub query: Option<String>,
    /// Current modification times of tracked files, epoch millis
    #[serde(default)]
    pub current_file_mtimes: HashMap<String, i64>,
}

/// One observation prepared for injection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextObservation {
    /// The observation
    pub observation: Observation,
    /// True when a tracked file changed since the observation was captured
    pub is_stale: bool,
    /// Whether this entry is rendered with full detail
    pub full_detail: bool,
}

/// The assembled context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectResult {
    /// Ranked, deduplicated, clustered observations
    pub observations: Vec<ContextObservation>,
    /// How many leading entries carry full detail
    pub full_count: usize,
}

// ============================================================================
// CONTEXT ASSEMBLER
// ============================================================================

/// Hybrid retrieval and context assembly
pub struct ContextAssembler {
    observations: Arc<ObservationStore>,
    vectors: Arc<VectorStore>,
    relations: Arc<RelationStore>,
    config: RetrievalConfig,
    graph_config: GraphExpansionConfig,
    graph_expansion: bool,
}

impl ContextAssembler {
    /// Create an assembler over the stores
    pub fn new(
        observations: Arc<ObservationStore>,
        vectors: Arc<VectorStore>,
        relations: Arc<RelationStore>,
        config: RetrievalConfig,
        graph_config: GraphExpansionConfig,
        graph_expansion: bool,
    ) -> Self {
        Self {
            observations,
            vectors,
            relations,
            config,
            graph_config,
            graph_expansion,
        }
    }

    /// Assemble the injection context for a starting session
    pub fn inject(&self, request: &InjectRequest) -> Result<InjectResult> {
        validate_project(&request.project)?;

        // Keyword leg: query-driven FTS, or recent active rows without one
        let keyword_leg = match request.query.as_deref() {
            Some(query) if !query.trim().is_empty() => {
                self.observations
                    .search_fts(query, &request.project, self.config.per_leg_limit)?
            }
            _ => self
                .observations
                .get_active(&request.project, self.config.per_leg_limit)?,
        };

        // Semantic leg: seeded by the query, falling back to cwd + project
        let seed = self.semantic_seed(request);
        let vector_leg = match seed {
            Some(seed) => self.vector_leg(&seed, &request.project)?,
            None => Vec::new(),
        };

        // Merge, keyword leg first, dedupe by id
        let mut seen: HashSet<i64> = HashSet::new();
        let mut merged: Vec<Observation> = Vec::new();
        for obs in keyword_leg.into_iter().chain(vector_leg.into_iter()) {
            if obs.is_superseded || obs.archived {
                continue;
            }
            if seen.insert(obs.id) {
                merged.push(obs);
            }
        }

        // Collapse near-duplicates; the cluster representative survives
        let merged = cluster_representatives(
            merged,
            self.config.cluster_threshold,
            self.config.cluster_exact_limit,
            self.config.min_signature_bits,
        );

        let full_cutoff = self.config.max_full_detail;
        let observations: Vec<ContextObservation> = merged
            .into_iter()
            .take(self.config.max_context_entries)
            .enumerate()
            .map(|(index, observation)| ContextObservation {
                is_stale: is_stale(&observation, &request.current_file_mtimes),
                full_detail: index < full_cutoff,
                observation,
            })
            .collect();

        let full_count = observations.len().min(full_cutoff);
        Ok(InjectResult {
            observations,
            full_count,
        })
    }

    fn semantic_seed(&self, request: &InjectRequest) -> Option<String> {
        if let Some(query) = request.query.as_deref() {
            if !query.trim().is_empty() {
                return Some(query.to_string());
            }
        }
        let dir = request
            .cwd
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let seed = format!("{} {dir}", request.project);
        let seed = seed.trim().to_string();
        if seed.is_empty() { None } else { Some(seed) }
    }

    fn vector_leg(&self, seed: &str, project: &str) -> Result<Vec<Observation>> {
        let filter = VectorFilter {
            project: Some(project.to_string()),
            doc_type: Some(DocType::Observation),
        };

        let matches = if self.graph_expansion {
            self.vectors.query_expanded(
                seed,
                &filter,
                self.config.per_leg_limit,
                &self.relations,
                &self.graph_config,
            )
        } else {
            self.vectors.query(seed, &filter, self.config.per_leg_limit)
        };

        let matches = match matches {
            Ok(matches) => matches,
            Err(err) => {
                // The semantic leg is best-effort; keyword results stand alone
                tracing::warn!("vector leg failed, continuing keyword-only: {err}");
                return Ok(Vec::new());
            }
        };

        let mut ids: Vec<i64> = Vec::new();
        for m in matches {
            if !ids.contains(&m.sqlite_id) {
                ids.push(m.sqlite_id);
            }
        }
        self.observations
            .get_by_ids(&ids, ObservationOrder::Importance, self.config.per_leg_limit)
    }
}

/// An observation is stale when any tracked file has a current mtime newer
/// than the one recorded at capture time
fn is_stale(observation: &Observation, current: &HashMap<String, i64>) -> bool {
    observation.file_mtimes.iter().any(|(path, recorded)| {
        current
            .get(path)
            .map(|now| now > recorded)
            .unwrap_or(false)
    })
}

// ============================================================================
// FORMATTER
// ============================================================================

/// Render the assembled context as the text block the session-start hook
/// injects. Full-detail entries carry narrative and facts; condensed entries
/// are one line each.
pub fn format_context(result: &InjectResult) -> String {
    if result.observations.is_empty() {
        return String::new();
    }

    let mut out = String::from("# Memory from previous sessions\n");
    for entry in &result.observations {
        let obs = &entry.observation;
        let title = obs.title.as_deref().unwrap_or("(untitled)");
        let stale_marker = if entry.is_stale { " [stale]" } else { "" };

        if entry.full_detail {
            out.push_str(&format!(
                "\n## {title}{stale_marker} ({}, {})\n",
                obs.kind, obs.created_at
            ));
            if let Some(subtitle) = obs.subtitle.as_deref() {
                out.push_str(&format!("{subtitle}\n"));
            }
            if let Some(narrative) = obs.narrative.as_deref() {
                out.push_str(&format!("{narrative}\n"));
            }
            for fact in &obs.facts {
                out.push_str(&format!("- {fact}\n"));
            }
        } else {
            out.push_str(&format!("- {title}{stale_marker} ({})\n", obs.kind));
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
