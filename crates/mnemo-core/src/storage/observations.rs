//! Observation Store
//!
//! Durable CRUD and full-text search over observations. Reads always see
//! project-scoped rows plus globals unless a strict variant is used. Writes
//! are synchronous and propagate storage errors; the async fan-out around
//! `store` lives in the engine facade, not here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Row, params, params_from_iter};

use crate::clock::SharedClock;
use crate::config::StoreConfig;
use crate::error::{EngineError, Result, validate_project};
use crate::memory::{
    MemoryKind, Observation, ObservationKind, ObservationOrder, ParsedObservation, Scope,
};
use crate::storage::{Database, from_json_array, from_json_map, to_json_array, to_json_map};
use crate::text::extract_keywords;

// ============================================================================
// CLEANUP HOOK
// ============================================================================

/// Callback fired after observations are deleted, with the deleted ids.
///
/// The vector store registers one of these at construction so it can purge
/// embeddings without the observation store holding a back-reference.
pub type CleanupHook = Arc<dyn Fn(&[i64]) + Send + Sync>;

// ============================================================================
// COLUMNS
// ============================================================================

const OBS_COLUMN_NAMES: &[&str] = &[
    "id",
    "session_id",
    "project",
    "scope",
    "type",
    "memory_type",
    "title",
    "subtitle",
    "narrative",
    "facts",
    "concepts",
    "files_read",
    "files_modified",
    "file_mtimes",
    "prompt_number",
    "discovery_tokens",
    "created_at",
    "created_at_epoch",
    "importance_score",
    "user_feedback",
    "retrieval_count",
    "last_retrieved_at_epoch",
    "score_updated_at_epoch",
    "is_superseded",
    // Tolerate pre-archival schemas
    "COALESCE(archived, 0)",
];

/// Select list with an optional table prefix
fn obs_columns(prefix: &str) -> String {
    OBS_COLUMN_NAMES
        .iter()
        .map(|c| {
            if c.starts_with("COALESCE") {
                c.replace("archived", &format!("{prefix}archived"))
            } else {
                format!("{prefix}{c}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// SQL placeholder list `?1, ?2, …` for an id set
fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// OBSERVATION STORE
// ============================================================================

/// Durable store for observations
pub struct ObservationStore {
    db: Arc<Database>,
    clock: SharedClock,
    config: StoreConfig,
    cleanup_hook: Mutex<Option<CleanupHook>>,
}

impl ObservationStore {
    /// Create a store over an open database
    pub fn new(db: Arc<Database>, clock: SharedClock, config: StoreConfig) -> Self {
        Self {
            db,
            clock,
            config,
            cleanup_hook: Mutex::new(None),
        }
    }

    /// Register the single cleanup-notification hook.
    ///
    /// Called once at engine construction; a later registration replaces the
    /// earlier one.
    pub fn set_cleanup_hook(&self, hook: CleanupHook) {
        if let Ok(mut guard) = self.cleanup_hook.lock() {
            *guard = Some(hook);
        }
    }

    fn fire_cleanup_hook(&self, deleted: &[i64]) {
        if deleted.is_empty() {
            return;
        }
        let hook = self
            .cleanup_hook
            .lock()
            .ok()
            .and_then(|guard| guard.clone());
        if let Some(hook) = hook {
            hook(deleted);
        }
    }

    fn row_to_observation(row: &Row<'_>) -> rusqlite::Result<Observation> {
        let scope: String = row.get(3)?;
        let kind: String = row.get(4)?;
        let memory_type: String = row.get(5)?;
        let facts: String = row.get(9)?;
        let concepts: String = row.get(10)?;
        let files_read: String = row.get(11)?;
        let files_modified: String = row.get(12)?;
        let file_mtimes: String = row.get(13)?;

        Ok(Observation {
            id: row.get(0)?,
            session_id: row.get(1)?,
            project: row.get(2)?,
            scope: Scope::parse_name(&scope),
            kind: ObservationKind::parse_name(&kind),
            memory_type: MemoryKind::parse_name(&memory_type),
            title: row.get(6)?,
            subtitle: row.get(7)?,
            narrative: row.get(8)?,
            facts: from_json_array(&facts),
            concepts: from_json_array(&concepts),
            files_read: from_json_array(&files_read),
            files_modified: from_json_array(&files_modified),
            file_mtimes: from_json_map(&file_mtimes),
            prompt_number: row.get(14)?,
            discovery_tokens: row.get(15)?,
            created_at: row.get(16)?,
            created_at_epoch: row.get(17)?,
            importance_score: row.get(18)?,
            user_feedback: row.get(19)?,
            retrieval_count: row.get(20)?,
            last_retrieved_at_epoch: row.get(21)?,
            score_updated_at_epoch: row.get(22)?,
            is_superseded: row.get::<_, i64>(23)? != 0,
            archived: row.get::<_, i64>(24)? != 0,
        })
    }

    fn query_rows(
        conn: &Connection,
        sql: &str,
        query_params: impl rusqlite::Params,
    ) -> Result<Vec<Observation>> {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(query_params, Self::row_to_observation)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert a parsed observation and return `(id, created_at_epoch)`.
    ///
    /// Scope is the parsed override when present, otherwise derived from the
    /// concepts; memory type is always derived. The caller is responsible for
    /// running the ingest fan-out afterwards.
    pub fn store(
        &self,
        session_id: &str,
        project: &str,
        parsed: &ParsedObservation,
        prompt_number: Option<i64>,
        discovery_tokens: i64,
    ) -> Result<(i64, i64)> {
        validate_project(project)?;
        if session_id.is_empty() {
            return Err(EngineError::Validation("session id is empty".into()));
        }

        let now = self.clock.now();
        let created_at = now.to_rfc3339();
        let epoch = now.timestamp_millis();
        let scope = parsed.effective_scope();
        let memory_type = MemoryKind::from_concepts(&parsed.concepts);

        let writer = self.db.writer()?;
        writer.execute(
            "INSERT INTO observations (
                session_id, project, scope, type, memory_type,
                title, subtitle, narrative, facts, concepts,
                files_read, files_modified, file_mtimes,
                prompt_number, discovery_tokens, created_at, created_at_epoch
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13,
                ?14, ?15, ?16, ?17
            )",
            params![
                session_id,
                project,
                scope.as_str(),
                parsed.kind.as_str(),
                memory_type.as_str(),
                parsed.title,
                parsed.subtitle,
                parsed.narrative,
                to_json_array(&parsed.facts),
                to_json_array(&parsed.concepts),
                to_json_array(&parsed.files_read),
                to_json_array(&parsed.files_modified),
                to_json_map(&parsed.file_mtimes),
                prompt_number,
                discovery_tokens,
                created_at,
                epoch,
            ],
        )?;

        Ok((writer.last_insert_rowid(), epoch))
    }

    /// Delete observations by id, edges and conflicts first, in one
    /// transaction. Returns how many observations were removed; the cleanup
    /// hook fires with exactly the removed ids after commit.
    pub fn delete_many(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let existing: Vec<i64>;
        {
            let mut writer = self.db.writer()?;
            let tx = writer.transaction()?;
            let marks = placeholders(ids.len());

            existing = {
                let mut stmt = tx.prepare_cached(&format!(
                    "SELECT id FROM observations WHERE id IN ({marks})"
                ))?;
                let rows = stmt.query_map(params_from_iter(ids.iter()), |row| row.get(0))?;
                rows.collect::<rusqlite::Result<Vec<i64>>>()?
            };

            if !existing.is_empty() {
                // FK order: edges, then conflicts, then the rows themselves
                tx.execute(
                    &format!(
                        "DELETE FROM observation_relations
                         WHERE source_id IN ({marks}) OR target_id IN ({marks})"
                    ),
                    params_from_iter(ids.iter()),
                )?;
                tx.execute(
                    &format!(
                        "DELETE FROM observation_conflicts
                         WHERE newer_obs_id IN ({marks}) OR older_obs_id IN ({marks})"
                    ),
                    params_from_iter(ids.iter()),
                )?;
                tx.execute(
                    &format!("DELETE FROM observations WHERE id IN ({marks})"),
                    params_from_iter(ids.iter()),
                )?;
            }

            tx.commit()?;
        }

        self.fire_cleanup_hook(&existing);
        Ok(existing.len())
    }

    /// Delete everything older than the most recent
    /// `max_observations_per_project` rows for the project. Returns the
    /// deleted ids (already reported to the cleanup hook).
    pub fn cleanup_old_observations(&self, project: &str) -> Result<Vec<i64>> {
        validate_project(project)?;

        let stale: Vec<i64> = {
            let reader = self.db.reader()?;
            let mut stmt = reader.prepare_cached(
                "SELECT id FROM observations
                 WHERE project = ?1
                 ORDER BY created_at_epoch DESC, id DESC
                 LIMIT -1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(
                params![project, self.config.max_observations_per_project as i64],
                |row| row.get(0),
            )?;
            rows.collect::<rusqlite::Result<Vec<i64>>>()?
        };

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        self.delete_many(&stale)?;
        Ok(stale)
    }

    /// Transactional bulk importance update; stamps `score_updated_at_epoch`
    pub fn update_importance_scores(&self, scores: &HashMap<i64, f64>) -> Result<()> {
        if scores.is_empty() {
            return Ok(());
        }

        let now = self.clock.now_epoch_ms();
        let mut writer = self.db.writer()?;
        let tx = writer.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE observations
                 SET importance_score = ?1, score_updated_at_epoch = ?2
                 WHERE id = ?3",
            )?;
            for (id, score) in scores {
                stmt.execute(params![score, now, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Record explicit user feedback on one observation
    pub fn update_feedback(&self, id: i64, value: i32) -> Result<()> {
        if !(-1..=1).contains(&value) {
            return Err(EngineError::Validation(format!(
                "feedback must be -1, 0, or 1, got {value}"
            )));
        }

        let writer = self.db.writer()?;
        let changed = writer.execute(
            "UPDATE observations SET user_feedback = ?1 WHERE id = ?2",
            params![value, id],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("observation {id}")));
        }
        Ok(())
    }

    /// Bump retrieval counters and stamp the last-retrieved time
    pub fn increment_retrieval_count(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = self.clock.now_epoch_ms();
        let writer = self.db.writer()?;
        let marks = placeholders(ids.len());
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = ids
            .iter()
            .map(|id| Box::new(*id) as Box<dyn rusqlite::ToSql>)
            .collect();
        sql_params.push(Box::new(now));
        writer.execute(
            &format!(
                "UPDATE observations
                 SET retrieval_count = retrieval_count + 1,
                     last_retrieved_at_epoch = ?{}
                 WHERE id IN ({marks})",
                ids.len() + 1
            ),
            params_from_iter(sql_params.iter().map(|p| p.as_ref())),
        )?;
        Ok(())
    }

    /// Mark observations superseded
    pub fn mark_superseded(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let writer = self.db.writer()?;
        let marks = placeholders(ids.len());
        writer.execute(
            &format!("UPDATE observations SET is_superseded = 1 WHERE id IN ({marks})"),
            params_from_iter(ids.iter()),
        )?;
        Ok(())
    }

    /// Archive observations (the forgetting task never deletes)
    pub fn mark_archived(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let writer = self.db.writer()?;
        let marks = placeholders(ids.len());
        writer.execute(
            &format!("UPDATE observations SET archived = 1 WHERE id IN ({marks})"),
            params_from_iter(ids.iter()),
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch one observation; `NotFound` when the id does not exist
    pub fn get_by_id(&self, id: i64) -> Result<Observation> {
        let reader = self.db.reader()?;
        let sql = format!(
            "SELECT {} FROM observations WHERE id = ?1",
            obs_columns("")
        );
        let mut stmt = reader.prepare_cached(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::row_to_observation)?;
        match rows.next() {
            Some(row) => Ok(row?),
            None => Err(EngineError::NotFound(format!("observation {id}"))),
        }
    }

    /// Fetch a set of observations in the requested order
    pub fn get_by_ids(
        &self,
        ids: &[i64],
        order: ObservationOrder,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.db.reader()?;
        let marks = placeholders(ids.len());
        let sql = format!(
            "SELECT {} FROM observations WHERE id IN ({marks}) ORDER BY {} LIMIT {limit}",
            obs_columns(""),
            order.sql(),
        );
        Self::query_rows(&reader, &sql, params_from_iter(ids.iter()))
    }

    /// Project-scoped plus global observations, most important first
    pub fn get_recent(&self, project: &str, limit: usize) -> Result<Vec<Observation>> {
        validate_project(project)?;
        let reader = self.db.reader()?;
        let sql = format!(
            "SELECT {} FROM observations
             WHERE (project = ?1 OR scope = 'global')
             ORDER BY importance_score DESC, created_at_epoch DESC
             LIMIT ?2",
            obs_columns("")
        );
        Self::query_rows(&reader, &sql, params![project, limit as i64])
    }

    /// As `get_recent`, excluding superseded and archived rows
    pub fn get_active(&self, project: &str, limit: usize) -> Result<Vec<Observation>> {
        validate_project(project)?;
        let reader = self.db.reader()?;
        let sql = format!(
            "SELECT {} FROM observations
             WHERE (project = ?1 OR scope = 'global')
               AND is_superseded = 0 AND COALESCE(archived, 0) = 0
             ORDER BY importance_score DESC, created_at_epoch DESC
             LIMIT ?2",
            obs_columns("")
        );
        Self::query_rows(&reader, &sql, params![project, limit as i64])
    }

    /// Project rows only, globals excluded; for dashboards
    pub fn get_by_project_strict(&self, project: &str, limit: usize) -> Result<Vec<Observation>> {
        validate_project(project)?;
        let reader = self.db.reader()?;
        let sql = format!(
            "SELECT {} FROM observations
             WHERE project = ?1
             ORDER BY importance_score DESC, created_at_epoch DESC
             LIMIT ?2",
            obs_columns("")
        );
        Self::query_rows(&reader, &sql, params![project, limit as i64])
    }

    /// Date-descending page older than `before_epoch`
    pub fn get_timeline(
        &self,
        project: &str,
        before_epoch: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        validate_project(project)?;
        let reader = self.db.reader()?;
        let before = before_epoch.unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT {} FROM observations
             WHERE (project = ?1 OR scope = 'global') AND created_at_epoch < ?2
             ORDER BY created_at_epoch DESC
             LIMIT ?3",
            obs_columns("")
        );
        Self::query_rows(&reader, &sql, params![project, before, limit as i64])
    }

    /// Newest observations across every project; the pattern detector's
    /// background loop re-analyzes these
    pub fn get_latest(&self, limit: usize) -> Result<Vec<Observation>> {
        let reader = self.db.reader()?;
        let sql = format!(
            "SELECT {} FROM observations
             ORDER BY created_at_epoch DESC, id DESC
             LIMIT ?1",
            obs_columns("")
        );
        Self::query_rows(&reader, &sql, params![limit as i64])
    }

    /// Every stored observation; the consolidation decay pass uses this
    pub fn get_all(&self) -> Result<Vec<Observation>> {
        let reader = self.db.reader()?;
        let sql = format!(
            "SELECT {} FROM observations ORDER BY id ASC",
            obs_columns("")
        );
        Self::query_rows(&reader, &sql, [])
    }

    /// Observations whose score has never been updated, or not since
    /// `threshold_ms` before now
    pub fn get_needing_score_update(
        &self,
        threshold_ms: i64,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let cutoff = self.clock.now_epoch_ms() - threshold_ms;
        let reader = self.db.reader()?;
        let sql = format!(
            "SELECT {} FROM observations
             WHERE score_updated_at_epoch IS NULL OR score_updated_at_epoch < ?1
             ORDER BY created_at_epoch ASC
             LIMIT ?2",
            obs_columns("")
        );
        Self::query_rows(&reader, &sql, params![cutoff, limit as i64])
    }

    /// Full-text search over title, subtitle and narrative.
    ///
    /// The query is reduced to keywords and matched disjunctively; empty or
    /// all-stop-word queries return nothing. When FTS fails or finds nothing,
    /// falls back to per-keyword LIKE.
    pub fn search_fts(&self, query: &str, project: &str, limit: usize) -> Result<Vec<Observation>> {
        validate_project(project)?;
        let keywords = extract_keywords(query);
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let match_expr = keywords
            .iter()
            .map(|k| format!("\"{k}\""))
            .collect::<Vec<_>>()
            .join(" OR ");

        let fts_result = self.search_fts_inner(&match_expr, project, limit);
        match fts_result {
            Ok(rows) if !rows.is_empty() => Ok(rows),
            Ok(_) => self.search_like(&keywords, project, limit),
            Err(err) => {
                tracing::warn!("FTS query failed, falling back to LIKE: {err}");
                self.search_like(&keywords, project, limit)
            }
        }
    }

    fn search_fts_inner(
        &self,
        match_expr: &str,
        project: &str,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let reader = self.db.reader()?;
        let sql = format!(
            "SELECT {} FROM observations o
             JOIN observations_fts fts ON o.id = fts.rowid
             WHERE observations_fts MATCH ?1
               AND (o.project = ?2 OR o.scope = 'global')
               AND o.is_superseded = 0 AND COALESCE(o.archived, 0) = 0
             ORDER BY rank, o.importance_score DESC
             LIMIT ?3",
            obs_columns("o.")
        );
        Self::query_rows(&reader, &sql, params![match_expr, project, limit as i64])
    }

    fn search_like(
        &self,
        keywords: &[String],
        project: &str,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let reader = self.db.reader()?;

        let mut clauses = Vec::new();
        let mut like_params: Vec<String> = Vec::new();
        for (i, keyword) in keywords.iter().enumerate() {
            // ?1 is project, keyword params start at ?2
            let p = i + 2;
            clauses.push(format!(
                "(title LIKE ?{p} OR subtitle LIKE ?{p} OR narrative LIKE ?{p})"
            ));
            like_params.push(format!("%{keyword}%"));
        }

        let sql = format!(
            "SELECT {} FROM observations
             WHERE (project = ?1 OR scope = 'global')
               AND is_superseded = 0 AND COALESCE(archived, 0) = 0
               AND ({})
             ORDER BY importance_score DESC, created_at_epoch DESC
             LIMIT {limit}",
            obs_columns(""),
            clauses.join(" OR "),
        );

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(project.to_string()) as Box<dyn rusqlite::ToSql>];
        for p in like_params {
            all_params.push(Box::new(p));
        }

        Self::query_rows(
            &reader,
            &sql,
            params_from_iter(all_params.iter().map(|p| p.as_ref())),
        )
    }

    /// Counters for the statusline hook
    pub fn counts(&self) -> Result<ObservationCounts> {
        let reader = self.db.reader()?;
        reader
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN is_superseded = 0 AND COALESCE(archived,0) = 0
                                          THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(is_superseded), 0),
                        COALESCE(SUM(COALESCE(archived, 0)), 0),
                        MIN(created_at_epoch),
                        MAX(created_at_epoch)
                 FROM observations",
                [],
                |row| {
                    Ok(ObservationCounts {
                        total: row.get(0)?,
                        active: row.get(1)?,
                        superseded: row.get(2)?,
                        archived: row.get(3)?,
                        oldest_epoch: row.get(4)?,
                        newest_epoch: row.get(5)?,
                    })
                },
            )
            .map_err(Into::into)
    }
}

/// Aggregate counters over the observations table
#[derive(Debug, Clone, Default)]
pub struct ObservationCounts {
    /// All rows
    pub total: i64,
    /// Rows that are neither superseded nor archived
    pub active: i64,
    /// Superseded rows
    pub superseded: i64,
    /// Archived rows
    pub archived: i64,
    /// Oldest creation epoch
    pub oldest_epoch: Option<i64>,
    /// Newest creation epoch
    pub newest_epoch: Option<i64>,
}

// ============================================================================
// TESTS
// ============================================================================
