//! Conflict Store
//!
//! Durable records of detected inconsistencies. Inserting a `prefer_newer`
//! conflict marks the older observation superseded in the same transaction,
//! so the supersession invariant holds even if the process dies between the
//! two writes. Retention cleanup routes through the observation store so the
//! cleanup hook fires exactly once per deleted id.

use std::sync::Arc;

use rusqlite::{Row, params};

use crate::clock::SharedClock;
use crate::error::{Result, validate_project};
use crate::memory::{Conflict, ConflictType, NewConflict, Resolution};
use crate::storage::{Database, ObservationStore};

const CONFLICT_COLUMNS: &str = "id, newer_obs_id, older_obs_id, conflict_type, resolution, \
                                reason, detected_at_epoch, resolved, resolved_at";

// ============================================================================
// CONFLICT STORE
// ============================================================================

/// Durable store for observation conflicts
pub struct ConflictStore {
    db: Arc<Database>,
    clock: SharedClock,
}

impl ConflictStore {
    /// Create a store over an open database
    pub fn new(db: Arc<Database>, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    fn row_to_conflict(row: &Row<'_>) -> rusqlite::Result<Conflict> {
        let conflict_type: String = row.get(3)?;
        let resolution: String = row.get(4)?;
        Ok(Conflict {
            id: row.get(0)?,
            newer_obs_id: row.get(1)?,
            older_obs_id: row.get(2)?,
            conflict_type: ConflictType::parse_name(&conflict_type)
                .unwrap_or(ConflictType::Contradicts),
            resolution: Resolution::parse_name(&resolution).unwrap_or(Resolution::Manual),
            reason: row.get(5)?,
            detected_at_epoch: row.get(6)?,
            resolved: row.get::<_, i64>(7)? != 0,
            resolved_at: row.get(8)?,
        })
    }

    /// Insert a conflict; with `prefer_newer` resolution the older
    /// observation is marked superseded in the same transaction.
    pub fn insert(&self, conflict: &NewConflict) -> Result<i64> {
        let now = self.clock.now_epoch_ms();
        let mut writer = self.db.writer()?;
        let tx = writer.transaction()?;

        tx.execute(
            "INSERT INTO observation_conflicts
             (newer_obs_id, older_obs_id, conflict_type, resolution, reason, detected_at_epoch)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                conflict.newer_obs_id,
                conflict.older_obs_id,
                conflict.conflict_type.as_str(),
                conflict.resolution.as_str(),
                conflict.reason,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();

        if conflict.resolution == Resolution::PreferNewer {
            tx.execute(
                "UPDATE observations SET is_superseded = 1 WHERE id = ?1",
                params![conflict.older_obs_id],
            )?;
        }

        tx.commit()?;
        Ok(id)
    }

    /// Conflicts where the observation appears on either side
    pub fn get_for_observation(&self, obs_id: i64) -> Result<Vec<Conflict>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM observation_conflicts
             WHERE newer_obs_id = ?1 OR older_obs_id = ?1
             ORDER BY detected_at_epoch DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![obs_id], Self::row_to_conflict)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Unresolved conflicts, newest first
    pub fn get_unresolved(&self, limit: usize) -> Result<Vec<Conflict>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM observation_conflicts
             WHERE resolved = 0
             ORDER BY detected_at_epoch DESC, id DESC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_conflict)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Mark a conflict handled
    pub fn mark_resolved(&self, id: i64) -> Result<()> {
        let now = self.clock.now().to_rfc3339();
        let writer = self.db.writer()?;
        let changed = writer.execute(
            "UPDATE observation_conflicts SET resolved = 1, resolved_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        if changed == 0 {
            return Err(crate::error::EngineError::NotFound(format!("conflict {id}")));
        }
        Ok(())
    }

    /// Whether a stored `prefer_newer` conflict supersedes this observation
    pub fn is_superseded_by_conflict(&self, obs_id: i64) -> Result<bool> {
        let reader = self.db.reader()?;
        reader
            .query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM observation_conflicts
                     WHERE older_obs_id = ?1 AND resolution = 'prefer_newer'
                 )",
                params![obs_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Count of unresolved conflicts
    pub fn count_unresolved(&self) -> Result<i64> {
        let reader = self.db.reader()?;
        reader
            .query_row(
                "SELECT COUNT(*) FROM observation_conflicts WHERE resolved = 0",
                [],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Delete observations superseded longer ago than `retention_days`.
    ///
    /// Deletion goes through the observation store, which removes edges and
    /// conflict rows first and fires the cleanup hook for the vector store.
    /// Idempotent: a second run over the same window deletes nothing.
    pub fn cleanup_superseded(
        &self,
        observations: &ObservationStore,
        project: &str,
        retention_days: i64,
    ) -> Result<Vec<i64>> {
        validate_project(project)?;
        let cutoff = self.clock.now_epoch_ms() - retention_days * 86_400_000;

        let expired: Vec<i64> = {
            let reader = self.db.reader()?;
            let mut stmt = reader.prepare_cached(
                "SELECT c.older_obs_id FROM observation_conflicts c
                 JOIN observations o ON o.id = c.older_obs_id
                 WHERE c.resolution = 'prefer_newer'
                   AND o.is_superseded = 1
                   AND o.project = ?1
                 GROUP BY c.older_obs_id
                 HAVING MAX(c.detected_at_epoch) < ?2",
            )?;
            let rows = stmt.query_map(params![project, cutoff], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<i64>>>()?
        };

        if expired.is_empty() {
            return Ok(Vec::new());
        }

        observations.delete_many(&expired)?;
        Ok(expired)
    }
}

// ============================================================================
// TESTS
// ============================================================================
