//! Hybrid Vector Store
//!
//! Selective-storage embedding index over the `vectors` table. Three
//! strategies share one surface:
//!
//! - `always`: every document's embedding is persisted at add time
//! - `hub` (default): only frequently-queried documents are persisted;
//!   everything else is recomputed from the content cache on demand
//! - `on_demand`: nothing is persisted; every query recomputes
//!
//! Access counts, the content cache, and the query-embedding cache each sit
//! behind their own mutex, and no lock is held across an embedding or
//! database call. Non-hub candidates traverse the cache in ascending
//! `(sqlite_id, doc_id)` order so results are reproducible.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lru::LruCache;
use rusqlite::{OptionalExtension, params, params_from_iter};

use crate::clock::SharedClock;
use crate::config::{StorageStrategy, VectorConfig};
use crate::embeddings::{Embedder, Embedding};
use crate::error::{EngineError, Result};
use crate::memory::Scope;
use crate::storage::Database;
use crate::text::cosine_similarity;
use crate::vector::tuner::LatencyTuner;

/// Bound on cached document contents across all doc types
const MAX_CACHED_DOCS: usize = 2000;

// ============================================================================
// DOC TYPES
// ============================================================================

/// What kind of entity a vector document indexes
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    /// An observation fragment (`obs-<id>-<field>`)
    Observation,
    /// A whole-session summary
    SessionSummary,
    /// A captured user prompt
    UserPrompt,
}

impl DocType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Observation => "observation",
            DocType::SessionSummary => "session_summary",
            DocType::UserPrompt => "user_prompt",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "observation" => Some(DocType::Observation),
            "session_summary" => Some(DocType::SessionSummary),
            "user_prompt" => Some(DocType::UserPrompt),
            _ => None,
        }
    }
}

// ============================================================================
// INPUT / OUTPUT TYPES
// ============================================================================

/// A document offered to the vector store
#[derive(Debug, Clone)]
pub struct VectorDocInput {
    /// Stable document id, e.g. `obs-12-narrative`
    pub doc_id: String,
    /// Foreign key to the owning entity
    pub sqlite_id: i64,
    /// Entity kind
    pub doc_type: DocType,
    /// Which field the content came from
    pub field_type: String,
    /// Owning project
    pub project: String,
    /// Visibility
    pub scope: Scope,
    /// Text to embed
    pub content: String,
}

/// Filter over vector queries
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    /// Restrict to one project (global-scoped docs always pass)
    pub project: Option<String>,
    /// Restrict to one doc type
    pub doc_type: Option<DocType>,
}

impl VectorFilter {
    fn accepts(&self, project: &str, scope: Scope, doc_type: DocType) -> bool {
        if let Some(want) = self.doc_type {
            if want != doc_type {
                return false;
            }
        }
        if let Some(want) = self.project.as_deref() {
            if project != want && scope != Scope::Global {
                return false;
            }
        }
        true
    }
}

/// One vector query hit
#[derive(Debug, Clone)]
pub struct VectorMatch {
    /// Document id
    pub doc_id: String,
    /// Owning entity id
    pub sqlite_id: i64,
    /// Entity kind
    pub doc_type: DocType,
    /// Cosine similarity clamped into [0, 1]
    pub similarity: f32,
    /// `1 - similarity`
    pub distance: f32,
    /// Whether the embedding came from storage rather than recomputation
    pub from_hub: bool,
}

#[derive(Debug, Clone)]
struct CachedDoc {
    doc_type: DocType,
    field_type: String,
    project: String,
    scope: Scope,
    content: String,
}

struct StoredVector {
    doc_id: String,
    sqlite_id: i64,
    doc_type: DocType,
    embedding: Vec<f32>,
}

// ============================================================================
// VECTOR STORE
// ============================================================================

/// Hybrid vector store with selective embedding persistence
pub struct VectorStore {
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
    clock: SharedClock,
    config: VectorConfig,
    hub_threshold: AtomicU32,
    access_counts: Mutex<HashMap<String, u64>>,
    content_cache: Mutex<BTreeMap<(i64, String), CachedDoc>>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    tuner: Mutex<LatencyTuner>,
    last_rebuild_epoch_ms: Mutex<Option<i64>>,
}

impl VectorStore {
    /// Create a store over an open database
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn Embedder>,
        clock: SharedClock,
        config: VectorConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.query_cache_capacity.max(1))
            .expect("max(1) is non-zero");
        let tuner = LatencyTuner::new(
            config.target_latency_ms,
            config.adjust_period_secs,
            config.min_hub_threshold,
            config.max_hub_threshold,
            clock.now_epoch_ms(),
        );
        Self {
            hub_threshold: AtomicU32::new(config.hub_threshold),
            db,
            embedder,
            clock,
            config,
            access_counts: Mutex::new(HashMap::new()),
            content_cache: Mutex::new(BTreeMap::new()),
            query_cache: Mutex::new(LruCache::new(capacity)),
            tuner: Mutex::new(tuner),
            last_rebuild_epoch_ms: Mutex::new(None),
        }
    }

    /// Current model version tag
    pub fn model_version(&self) -> &str {
        self.embedder.model_version()
    }

    /// Current (possibly auto-tuned) hub threshold
    pub fn hub_threshold(&self) -> u32 {
        self.hub_threshold.load(Ordering::Relaxed)
    }

    /// Persisted vector rows
    pub fn count(&self) -> Result<i64> {
        let reader = self.db.reader()?;
        reader
            .query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))
            .map_err(Into::into)
    }

    // ------------------------------------------------------------------
    // Add / delete
    // ------------------------------------------------------------------

    /// Offer documents to the index. Depending on the strategy, embeddings
    /// are persisted now, cached for recomputation, or both. Returns how
    /// many embeddings were persisted.
    pub fn add_documents(&self, docs: &[VectorDocInput]) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }

        let mut persisted = 0;
        match self.config.strategy {
            StorageStrategy::Always => {
                for doc in docs {
                    match self.embedder.embed(&doc.content) {
                        Ok(vector) => {
                            self.persist_embedding(doc, &vector)?;
                            persisted += 1;
                        }
                        Err(err) => {
                            tracing::warn!(doc_id = %doc.doc_id, "embedding failed, skipped: {err}");
                        }
                    }
                }
            }
            StorageStrategy::Hub | StorageStrategy::OnDemand => {
                let mut cache = self
                    .content_cache
                    .lock()
                    .map_err(|_| EngineError::Init("content cache poisoned".into()))?;
                for doc in docs {
                    cache.insert(
                        (doc.sqlite_id, doc.doc_id.clone()),
                        CachedDoc {
                            doc_type: doc.doc_type,
                            field_type: doc.field_type.clone(),
                            project: doc.project.clone(),
                            scope: doc.scope,
                            content: doc.content.clone(),
                        },
                    );
                }
                // Oldest entities first; ids are monotonic
                while cache.len() > MAX_CACHED_DOCS {
                    let oldest = cache.keys().next().cloned();
                    match oldest {
                        Some(key) => {
                            cache.remove(&key);
                        }
                        None => break,
                    }
                }
            }
        }

        if docs.iter().any(|d| d.doc_type == DocType::UserPrompt) {
            self.enforce_prompt_cap()?;
        }

        Ok(persisted)
    }

    fn persist_embedding(&self, doc: &VectorDocInput, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(EngineError::Validation(format!(
                "embedding dimension {} != configured {}",
                vector.len(),
                self.config.dimensions
            )));
        }
        let bytes = Embedding::new(vector.to_vec()).to_bytes();
        let now = self.clock.now_epoch_ms();
        let writer = self.db.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO vectors
             (doc_id, embedding, dimensions, sqlite_id, doc_type, field_type, project, scope,
              model_version, created_at_epoch)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                doc.doc_id,
                bytes,
                vector.len() as i64,
                doc.sqlite_id,
                doc.doc_type.as_str(),
                doc.field_type,
                doc.project,
                doc.scope.as_str(),
                self.embedder.model_version(),
                now,
            ],
        )?;
        Ok(())
    }

    /// Oldest stored user prompts beyond the global cap are evicted
    fn enforce_prompt_cap(&self) -> Result<()> {
        let writer = self.db.writer()?;
        writer.execute(
            "DELETE FROM vectors
             WHERE doc_type = 'user_prompt'
               AND doc_id NOT IN (
                   SELECT doc_id FROM vectors
                   WHERE doc_type = 'user_prompt'
                   ORDER BY created_at_epoch DESC, doc_id DESC
                   LIMIT ?1
               )",
            params![self.config.max_user_prompts as i64],
        )?;
        Ok(())
    }

    /// Purge every vector document owned by the given observations.
    ///
    /// This is the cleanup-hook target: the observation store calls it with
    /// deleted ids.
    pub fn delete_for_observations(&self, obs_ids: &[i64]) -> Result<usize> {
        if obs_ids.is_empty() {
            return Ok(0);
        }

        let removed = {
            let writer = self.db.writer()?;
            let marks = (1..=obs_ids.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            writer.execute(
                &format!(
                    "DELETE FROM vectors
                     WHERE doc_type = 'observation' AND sqlite_id IN ({marks})"
                ),
                params_from_iter(obs_ids.iter()),
            )?
        };

        let id_set: HashSet<i64> = obs_ids.iter().copied().collect();
        if let Ok(mut cache) = self.content_cache.lock() {
            cache.retain(|(sqlite_id, _), doc| {
                !(doc.doc_type == DocType::Observation && id_set.contains(sqlite_id))
            });
        }
        if let Ok(mut counts) = self.access_counts.lock() {
            for id in obs_ids {
                let prefix = format!("obs-{id}-");
                counts.retain(|doc_id, _| !doc_id.starts_with(&prefix));
            }
        }

        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Access tracking
    // ------------------------------------------------------------------

    /// Bump the access counter for each document
    pub fn track_access(&self, doc_ids: &[String]) {
        if let Ok(mut counts) = self.access_counts.lock() {
            for doc_id in doc_ids {
                *counts.entry(doc_id.clone()).or_insert(0) += 1;
            }
        }
    }

    /// Access count for one document
    pub fn access_count(&self, doc_id: &str) -> u64 {
        self.access_counts
            .lock()
            .ok()
            .and_then(|c| c.get(doc_id).copied())
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------

    /// Query for the `limit` most similar documents.
    ///
    /// In `hub` mode the stored-hub leg and the recomputed leg each produce
    /// up to `2 * limit` candidates before the merge; results are sorted by
    /// similarity descending and all similarities are clamped into [0, 1].
    pub fn query(
        &self,
        query_text: &str,
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<VectorMatch>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let started = Instant::now();

        let query_vec = self.embed_query(query_text)?;
        let candidate_limit = limit * 2;

        // Stored leg
        let mut matches: Vec<VectorMatch> = Vec::new();
        if self.config.strategy != StorageStrategy::OnDemand {
            let stored = self.load_stored(filter)?;
            let mut stored_matches: Vec<VectorMatch> = stored
                .iter()
                .map(|row| {
                    let similarity =
                        cosine_similarity(&query_vec, &row.embedding).clamp(0.0, 1.0);
                    VectorMatch {
                        doc_id: row.doc_id.clone(),
                        sqlite_id: row.sqlite_id,
                        doc_type: row.doc_type,
                        similarity,
                        distance: 1.0 - similarity,
                        from_hub: true,
                    }
                })
                .collect();
            sort_matches(&mut stored_matches);
            stored_matches.truncate(candidate_limit);
            matches = stored_matches;
        }

        // Recomputed leg
        if self.config.strategy != StorageStrategy::Always {
            let known: HashSet<String> = matches.iter().map(|m| m.doc_id.clone()).collect();
            let stored_ids = self.stored_doc_ids()?;
            let candidates = self.cached_candidates(filter, &known, &stored_ids, candidate_limit);

            if !candidates.is_empty() {
                let texts: Vec<String> =
                    candidates.iter().map(|(_, _, doc)| doc.content.clone()).collect();
                match self.embedder.embed_batch(&texts) {
                    Ok(vectors) => {
                        let mut recomputed = Vec::new();
                        for ((sqlite_id, doc_id, doc), vector) in
                            candidates.into_iter().zip(vectors.into_iter())
                        {
                            let similarity =
                                cosine_similarity(&query_vec, &vector).clamp(0.0, 1.0);
                            recomputed.push((
                                VectorMatch {
                                    doc_id,
                                    sqlite_id,
                                    doc_type: doc.doc_type,
                                    similarity,
                                    distance: 1.0 - similarity,
                                    from_hub: false,
                                },
                                doc,
                                vector,
                            ));
                        }

                        // Track access on everything surfaced this query, then
                        // promote cache entries that just crossed the threshold,
                        // reusing the vectors computed above.
                        let accessed: Vec<String> =
                            recomputed.iter().map(|(m, _, _)| m.doc_id.clone()).collect();
                        self.track_access(&accessed);
                        if self.config.strategy == StorageStrategy::Hub {
                            if let Err(err) = self.promote_hubs(&recomputed) {
                                tracing::warn!("hub promotion failed: {err}");
                            }
                        }

                        matches.extend(recomputed.into_iter().map(|(m, _, _)| m));
                    }
                    Err(err) => {
                        tracing::warn!("batch embedding failed, recompute leg skipped: {err}");
                    }
                }
            }
        }

        let hub_ids: Vec<String> = matches
            .iter()
            .filter(|m| m.from_hub)
            .map(|m| m.doc_id.clone())
            .collect();
        self.track_access(&hub_ids);

        sort_matches(&mut matches);
        matches.dedup_by(|a, b| a.doc_id == b.doc_id);
        matches.truncate(limit);

        self.record_latency(started.elapsed().as_secs_f64() * 1000.0);
        Ok(matches)
    }

    /// Embed a query, via the LRU cache
    pub(crate) fn embed_query(&self, query_text: &str) -> Result<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(hit) = cache.get(query_text) {
                return Ok(hit.clone());
            }
        }
        let vector = self
            .embedder
            .embed(query_text)
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query_text.to_string(), vector.clone());
        }
        Ok(vector)
    }

    fn load_stored(&self, filter: &VectorFilter) -> Result<Vec<StoredVector>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT doc_id, sqlite_id, doc_type, project, scope, embedding, model_version
             FROM vectors
             ORDER BY sqlite_id ASC, doc_id ASC",
        )?;
        let current = self.embedder.model_version();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Vec<u8>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut stored = Vec::new();
        for row in rows {
            let (doc_id, sqlite_id, doc_type, project, scope, bytes, version) = row?;
            if version != current {
                // Stale vectors never serve queries
                continue;
            }
            let Some(doc_type) = DocType::parse_name(&doc_type) else {
                continue;
            };
            if !filter.accepts(&project, Scope::parse_name(&scope), doc_type) {
                continue;
            }
            let Some(embedding) = Embedding::from_bytes(&bytes) else {
                continue;
            };
            if embedding.dimensions != self.config.dimensions {
                continue;
            }
            stored.push(StoredVector {
                doc_id,
                sqlite_id,
                doc_type,
                embedding: embedding.vector,
            });
        }
        Ok(stored)
    }

    fn stored_doc_ids(&self) -> Result<HashSet<String>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached("SELECT doc_id FROM vectors")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<HashSet<_>>>()
            .map_err(Into::into)
    }

    /// Cache entries passing the filter, ascending `(sqlite_id, doc_id)`,
    /// excluding anything already stored or already matched
    fn cached_candidates(
        &self,
        filter: &VectorFilter,
        known: &HashSet<String>,
        stored: &HashSet<String>,
        limit: usize,
    ) -> Vec<(i64, String, CachedDoc)> {
        let Ok(cache) = self.content_cache.lock() else {
            return Vec::new();
        };
        cache
            .iter()
            .filter(|((_, doc_id), doc)| {
                !known.contains(doc_id.as_str())
                    && !stored.contains(doc_id.as_str())
                    && filter.accepts(&doc.project, doc.scope, doc.doc_type)
            })
            .take(limit)
            .map(|((sqlite_id, doc_id), doc)| (*sqlite_id, doc_id.clone(), doc.clone()))
            .collect()
    }

    /// Persist embeddings for cached docs whose access count reached the hub
    /// threshold, reusing vectors already computed this query
    fn promote_hubs(&self, recomputed: &[(VectorMatch, CachedDoc, Vec<f32>)]) -> Result<()> {
        let threshold = u64::from(self.hub_threshold());
        for (m, doc, vector) in recomputed {
            if self.access_count(&m.doc_id) >= threshold {
                let input = VectorDocInput {
                    doc_id: m.doc_id.clone(),
                    sqlite_id: m.sqlite_id,
                    doc_type: doc.doc_type,
                    field_type: doc.field_type.clone(),
                    project: doc.project.clone(),
                    scope: doc.scope,
                    content: doc.content.clone(),
                };
                self.persist_embedding(&input, vector)?;
                tracing::debug!(doc_id = %m.doc_id, "promoted to hub");
            }
        }
        Ok(())
    }

    /// Batch-embed arbitrary texts with the store's embedder
    pub(crate) fn embedder_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, crate::embeddings::EmbeddingError> {
        self.embedder.embed_batch(texts)
    }

    /// Cached docs owned by the given entities, ascending `(sqlite_id, doc_id)`
    pub(crate) fn cached_docs_for(
        &self,
        sqlite_ids: &[i64],
        filter: &VectorFilter,
    ) -> Vec<(i64, String, String, DocType)> {
        let Ok(cache) = self.content_cache.lock() else {
            return Vec::new();
        };
        let wanted: HashSet<i64> = sqlite_ids.iter().copied().collect();
        cache
            .iter()
            .filter(|((sqlite_id, _), doc)| {
                wanted.contains(sqlite_id)
                    && filter.accepts(&doc.project, doc.scope, doc.doc_type)
            })
            .map(|((sqlite_id, doc_id), doc)| {
                (*sqlite_id, doc_id.clone(), doc.content.clone(), doc.doc_type)
            })
            .collect()
    }

    fn record_latency(&self, latency_ms: f64) {
        let now = self.clock.now_epoch_ms();
        let current = self.hub_threshold();
        let adjusted = self
            .tuner
            .lock()
            .ok()
            .and_then(|mut t| t.record(latency_ms, now, current));
        if let Some(new_threshold) = adjusted {
            self.hub_threshold.store(new_threshold, Ordering::Relaxed);
        }
    }

    // ------------------------------------------------------------------
    // Model staleness
    // ------------------------------------------------------------------

    /// Whether any stored vector was produced by a different model version
    pub fn needs_rebuild(&self) -> Result<bool> {
        let reader = self.db.reader()?;
        reader
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM vectors WHERE model_version != ?1)",
                params![self.embedder.model_version()],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Error with `Stale` when any stored vector no longer matches the
    /// current model; the worker surfaces this before serving vector reads
    /// it wants exact
    pub fn check_model_version(&self) -> Result<()> {
        let reader = self.db.reader()?;
        let mismatched: Option<String> = reader
            .query_row(
                "SELECT model_version FROM vectors WHERE model_version != ?1 LIMIT 1",
                params![self.embedder.model_version()],
                |row| row.get(0),
            )
            .optional()?;
        match mismatched {
            Some(stored) => Err(EngineError::Stale {
                stored,
                current: self.embedder.model_version().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Doc ids whose stored vector is stale
    pub fn get_stale_vectors(&self) -> Result<Vec<String>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT doc_id FROM vectors WHERE model_version != ?1 ORDER BY doc_id",
        )?;
        let rows = stmt.query_map(params![self.embedder.model_version()], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Re-embed stale vectors from cached content, purging rows whose
    /// content is no longer available. Guarded by a cooldown window.
    pub fn rebuild_stale(&self) -> Result<usize> {
        let now = self.clock.now_epoch_ms();
        {
            let mut gate = self
                .last_rebuild_epoch_ms
                .lock()
                .map_err(|_| EngineError::Init("rebuild gate poisoned".into()))?;
            if let Some(last) = *gate {
                let cooldown_ms = self.config.rebuild_cooldown_secs as i64 * 1000;
                if now - last < cooldown_ms {
                    return Err(EngineError::RateLimited(format!(
                        "vector rebuild ran {}s ago, cooldown is {}s",
                        (now - last) / 1000,
                        self.config.rebuild_cooldown_secs
                    )));
                }
            }
            *gate = Some(now);
        }

        let stale = self.get_stale_vectors()?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut rebuilt = 0;
        for doc_id in stale {
            let cached = {
                let Ok(cache) = self.content_cache.lock() else {
                    break;
                };
                cache
                    .iter()
                    .find(|((_, id), _)| id == &doc_id)
                    .map(|((sqlite_id, id), doc)| (*sqlite_id, id.clone(), doc.clone()))
            };

            match cached {
                Some((sqlite_id, doc_id, doc)) => match self.embedder.embed(&doc.content) {
                    Ok(vector) => {
                        let input = VectorDocInput {
                            doc_id,
                            sqlite_id,
                            doc_type: doc.doc_type,
                            field_type: doc.field_type,
                            project: doc.project,
                            scope: doc.scope,
                            content: doc.content,
                        };
                        self.persist_embedding(&input, &vector)?;
                        rebuilt += 1;
                    }
                    Err(err) => {
                        tracing::warn!(doc_id = %doc_id, "rebuild embed failed: {err}");
                    }
                },
                None => {
                    // No content to re-embed: purge the stale row
                    let writer = self.db.writer()?;
                    writer.execute(
                        "DELETE FROM vectors WHERE doc_id = ?1",
                        params![doc_id],
                    )?;
                }
            }
        }
        Ok(rebuilt)
    }
}

pub(crate) fn sort_matches(matches: &mut [VectorMatch]) {
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}

// ============================================================================
// TESTS
// ============================================================================
