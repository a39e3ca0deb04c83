//! Pattern Store
//!
//! Durable store for promoted patterns: find, update, merge, and atomic
//! frequency increments. Merging folds the source into an active target;
//! merge targets must be active so chains of merged patterns cannot form.

use std::sync::Arc;

use rusqlite::{OptionalExtension, Row, params};

use crate::clock::SharedClock;
use crate::error::{EngineError, Result};
use crate::memory::{NewPattern, Pattern, PatternStatus, PatternType};
use crate::storage::{Database, from_json_array, to_json_array};

const PATTERN_COLUMNS: &str = "id, name, type, description, signature, recommendation, \
                               frequency, projects, observation_ids, status, merged_into_id, \
                               confidence, last_seen_at_epoch, created_at_epoch";

// ============================================================================
// PATTERN STORE
// ============================================================================

/// Durable store for patterns
pub struct PatternStore {
    db: Arc<Database>,
    clock: SharedClock,
}

impl PatternStore {
    /// Create a store over an open database
    pub fn new(db: Arc<Database>, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    fn row_to_pattern(row: &Row<'_>) -> rusqlite::Result<Pattern> {
        let pattern_type: String = row.get(2)?;
        let signature: String = row.get(4)?;
        let status: String = row.get(9)?;
        let projects: String = row.get(7)?;
        let observation_ids: String = row.get(8)?;
        Ok(Pattern {
            id: row.get(0)?,
            name: row.get(1)?,
            pattern_type: PatternType::parse_name(&pattern_type).unwrap_or(PatternType::Bug),
            description: row.get(3)?,
            signature: from_json_array(&signature),
            recommendation: row.get(5)?,
            frequency: row.get(6)?,
            projects: from_json_array(&projects),
            observation_ids: from_json_array(&observation_ids),
            status: PatternStatus::parse_name(&status).unwrap_or(PatternStatus::Active),
            merged_into_id: row.get(10)?,
            confidence: row.get(11)?,
            last_seen_at_epoch: row.get(12)?,
            created_at_epoch: row.get(13)?,
        })
    }

    /// Persist a newly promoted pattern
    pub fn insert(&self, pattern: &NewPattern) -> Result<i64> {
        if !(0.0..=1.0).contains(&pattern.confidence) {
            return Err(EngineError::Validation(format!(
                "pattern confidence {} out of [0, 1]",
                pattern.confidence
            )));
        }
        let now = self.clock.now_epoch_ms();
        let writer = self.db.writer()?;
        writer.execute(
            "INSERT INTO patterns
             (name, type, description, signature, recommendation, frequency, projects,
              observation_ids, status, confidence, last_seen_at_epoch, created_at_epoch)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9, ?10, ?10)",
            params![
                pattern.name,
                pattern.pattern_type.as_str(),
                pattern.description,
                to_json_array(&pattern.signature),
                pattern.recommendation,
                pattern.frequency,
                to_json_array(&pattern.projects),
                to_json_array(&pattern.observation_ids),
                pattern.confidence,
                now,
            ],
        )?;
        Ok(writer.last_insert_rowid())
    }

    /// Fetch one pattern; `NotFound` when the id does not exist
    pub fn get_by_id(&self, id: i64) -> Result<Pattern> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns WHERE id = ?1"
        ))?;
        stmt.query_row(params![id], Self::row_to_pattern)
            .optional()?
            .ok_or_else(|| EngineError::NotFound(format!("pattern {id}")))
    }

    /// Find by exact name
    pub fn find_by_name(&self, name: &str) -> Result<Option<Pattern>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns WHERE name = ?1 LIMIT 1"
        ))?;
        stmt.query_row(params![name], Self::row_to_pattern)
            .optional()
            .map_err(Into::into)
    }

    /// Active patterns of one type
    pub fn find_by_type(&self, pattern_type: PatternType, limit: usize) -> Result<Vec<Pattern>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns
             WHERE type = ?1 AND status = 'active'
             ORDER BY frequency DESC, id ASC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            params![pattern_type.as_str(), limit as i64],
            Self::row_to_pattern,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Active patterns seen in a project (substring match over the JSON list)
    pub fn find_by_project(&self, project: &str, limit: usize) -> Result<Vec<Pattern>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns
             WHERE status = 'active' AND projects LIKE ?1
             ORDER BY frequency DESC, id ASC
             LIMIT ?2"
        ))?;
        let needle = format!("%\"{project}\"%");
        let rows = stmt.query_map(params![needle, limit as i64], Self::row_to_pattern)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Every active pattern, most frequent first
    pub fn get_active(&self, limit: usize) -> Result<Vec<Pattern>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns
             WHERE status = 'active'
             ORDER BY frequency DESC, id ASC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_pattern)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Record an observation matching this pattern. Frequency grows once
    /// per distinct observation, so re-analyzing the same rows (as the
    /// background loop does) never inflates it; frequency is non-decreasing
    /// for active patterns.
    pub fn record_match(&self, id: i64, obs_id: i64, project: &str) -> Result<Pattern> {
        let existing = self.get_by_id(id)?;
        if existing.status != PatternStatus::Active {
            return Err(EngineError::Validation(format!(
                "pattern {id} is not active"
            )));
        }

        if existing.observation_ids.contains(&obs_id) {
            return Ok(existing);
        }

        let mut projects = existing.projects.clone();
        if !projects.iter().any(|p| p == project) {
            projects.push(project.to_string());
        }
        let mut observation_ids = existing.observation_ids.clone();
        observation_ids.push(obs_id);

        let now = self.clock.now_epoch_ms();
        let writer = self.db.writer()?;
        writer.execute(
            "UPDATE patterns
             SET frequency = frequency + 1,
                 projects = ?1,
                 observation_ids = ?2,
                 last_seen_at_epoch = ?3
             WHERE id = ?4",
            params![
                to_json_array(&projects),
                to_json_array(&observation_ids),
                now,
                id
            ],
        )?;
        drop(writer);

        self.get_by_id(id)
    }

    /// Deprecate a pattern (kept for history, no longer matched)
    pub fn deprecate(&self, id: i64) -> Result<()> {
        let writer = self.db.writer()?;
        let changed = writer.execute(
            "UPDATE patterns SET status = 'deprecated' WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("pattern {id}")));
        }
        Ok(())
    }

    /// Delete a pattern outright
    pub fn delete(&self, id: i64) -> Result<()> {
        let writer = self.db.writer()?;
        let changed = writer.execute("DELETE FROM patterns WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("pattern {id}")));
        }
        Ok(())
    }

    /// Merge `source_id` into `target_id`: frequencies add, project and
    /// observation sets union into the target, the source is marked merged.
    ///
    /// The target must be active; merging into a merged or deprecated
    /// pattern is rejected, which also rules out merge cycles.
    pub fn merge_into(&self, source_id: i64, target_id: i64) -> Result<Pattern> {
        if source_id == target_id {
            return Err(EngineError::Validation(
                "cannot merge a pattern into itself".into(),
            ));
        }
        let source = self.get_by_id(source_id)?;
        let target = self.get_by_id(target_id)?;

        if target.status != PatternStatus::Active {
            return Err(EngineError::Validation(format!(
                "merge target {target_id} is not active"
            )));
        }
        if source.status == PatternStatus::Merged {
            return Err(EngineError::Validation(format!(
                "pattern {source_id} is already merged"
            )));
        }

        let mut projects = target.projects.clone();
        for p in &source.projects {
            if !projects.contains(p) {
                projects.push(p.clone());
            }
        }
        let mut observation_ids = target.observation_ids.clone();
        for id in &source.observation_ids {
            if !observation_ids.contains(id) {
                observation_ids.push(*id);
            }
        }

        let now = self.clock.now_epoch_ms();
        let mut writer = self.db.writer()?;
        let tx = writer.transaction()?;
        tx.execute(
            "UPDATE patterns
             SET frequency = frequency + ?1,
                 projects = ?2,
                 observation_ids = ?3,
                 last_seen_at_epoch = ?4
             WHERE id = ?5",
            params![
                source.frequency,
                to_json_array(&projects),
                to_json_array(&observation_ids),
                now,
                target_id
            ],
        )?;
        tx.execute(
            "UPDATE patterns SET status = 'merged', merged_into_id = ?1 WHERE id = ?2",
            params![target_id, source_id],
        )?;
        tx.commit()?;
        drop(writer);

        self.get_by_id(target_id)
    }

    /// Count of active patterns
    pub fn count_active(&self) -> Result<i64> {
        let reader = self.db.reader()?;
        reader
            .query_row(
                "SELECT COUNT(*) FROM patterns WHERE status = 'active'",
                [],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }
}

// ============================================================================
// TESTS
// ============================================================================
