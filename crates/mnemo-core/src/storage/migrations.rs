//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: observations, relations, conflicts, patterns, vectors",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Archival flag for the forgetting task",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "FTS5 porter tokenizer and vector model-version index",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    project TEXT NOT NULL,
    scope TEXT NOT NULL DEFAULT 'project',
    type TEXT NOT NULL DEFAULT 'change',
    memory_type TEXT NOT NULL DEFAULT 'context',
    title TEXT,
    subtitle TEXT,
    narrative TEXT,
    facts TEXT NOT NULL DEFAULT '[]',
    concepts TEXT NOT NULL DEFAULT '[]',
    files_read TEXT NOT NULL DEFAULT '[]',
    files_modified TEXT NOT NULL DEFAULT '[]',
    file_mtimes TEXT NOT NULL DEFAULT '{}',
    prompt_number INTEGER,
    discovery_tokens INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    created_at_epoch INTEGER NOT NULL,
    importance_score REAL NOT NULL DEFAULT 1.0,
    user_feedback INTEGER NOT NULL DEFAULT 0,
    retrieval_count INTEGER NOT NULL DEFAULT 0,
    last_retrieved_at_epoch INTEGER,
    score_updated_at_epoch INTEGER,
    is_superseded INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_obs_project ON observations(project);
CREATE INDEX IF NOT EXISTS idx_obs_created_epoch ON observations(created_at_epoch);
CREATE INDEX IF NOT EXISTS idx_obs_importance ON observations(importance_score);
CREATE INDEX IF NOT EXISTS idx_obs_superseded ON observations(is_superseded);
CREATE INDEX IF NOT EXISTS idx_obs_score_updated ON observations(score_updated_at_epoch);

-- FTS5 virtual table for full-text search over the text fields
CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
    title,
    subtitle,
    narrative,
    content='observations',
    content_rowid='id'
);

-- Triggers to keep FTS in sync
CREATE TRIGGER IF NOT EXISTS observations_ai AFTER INSERT ON observations BEGIN
    INSERT INTO observations_fts(rowid, title, subtitle, narrative)
    VALUES (NEW.id, NEW.title, NEW.subtitle, NEW.narrative);
END;

CREATE TRIGGER IF NOT EXISTS observations_ad AFTER DELETE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative)
    VALUES ('delete', OLD.id, OLD.title, OLD.subtitle, OLD.narrative);
END;

CREATE TRIGGER IF NOT EXISTS observations_au AFTER UPDATE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative)
    VALUES ('delete', OLD.id, OLD.title, OLD.subtitle, OLD.narrative);
    INSERT INTO observations_fts(rowid, title, subtitle, narrative)
    VALUES (NEW.id, NEW.title, NEW.subtitle, NEW.narrative);
END;

-- Typed edges between observations
CREATE TABLE IF NOT EXISTS observation_relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES observations(id),
    target_id INTEGER NOT NULL REFERENCES observations(id),
    relation_type TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.5,
    detection_source TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    created_at_epoch INTEGER NOT NULL,
    UNIQUE(source_id, target_id, relation_type)
);

CREATE INDEX IF NOT EXISTS idx_rel_source ON observation_relations(source_id);
CREATE INDEX IF NOT EXISTS idx_rel_target ON observation_relations(target_id);
CREATE INDEX IF NOT EXISTS idx_rel_type ON observation_relations(relation_type);

-- Detected inconsistencies
CREATE TABLE IF NOT EXISTS observation_conflicts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    newer_obs_id INTEGER NOT NULL REFERENCES observations(id),
    older_obs_id INTEGER NOT NULL REFERENCES observations(id),
    conflict_type TEXT NOT NULL,
    resolution TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    detected_at_epoch INTEGER NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_conf_newer ON observation_conflicts(newer_obs_id);
CREATE INDEX IF NOT EXISTS idx_conf_older ON observation_conflicts(older_obs_id);

-- Promoted recurring signatures
CREATE TABLE IF NOT EXISTS patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    description TEXT,
    signature TEXT NOT NULL DEFAULT '[]',
    recommendation TEXT,
    frequency INTEGER NOT NULL DEFAULT 1,
    projects TEXT NOT NULL DEFAULT '[]',
    observation_ids TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'active',
    merged_into_id INTEGER,
    confidence REAL NOT NULL DEFAULT 0.5,
    last_seen_at_epoch INTEGER NOT NULL,
    created_at_epoch INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pat_name ON patterns(name);
CREATE INDEX IF NOT EXISTS idx_pat_status ON patterns(status);

-- Embedding-addressable fragments (binary blob for efficiency)
CREATE TABLE IF NOT EXISTS vectors (
    doc_id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL DEFAULT 384,
    sqlite_id INTEGER NOT NULL,
    doc_type TEXT NOT NULL,
    field_type TEXT NOT NULL DEFAULT '',
    project TEXT NOT NULL DEFAULT '',
    scope TEXT NOT NULL DEFAULT 'project',
    model_version TEXT NOT NULL,
    created_at_epoch INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vec_sqlite_id ON vectors(sqlite_id);
CREATE INDEX IF NOT EXISTS idx_vec_doc_type ON vectors(doc_type);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Forgetting never deletes, it archives
const MIGRATION_V2_UP: &str = r#"
ALTER TABLE observations ADD COLUMN archived INTEGER NOT NULL DEFAULT 0;
CREATE INDEX IF NOT EXISTS idx_obs_archived ON observations(archived);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: Porter stemming for keyword recall; model-version index for staleness scans
const MIGRATION_V3_UP: &str = r#"
DROP TRIGGER IF EXISTS observations_ai;
DROP TRIGGER IF EXISTS observations_ad;
DROP TRIGGER IF EXISTS observations_au;
DROP TABLE IF EXISTS observations_fts;

CREATE VIRTUAL TABLE observations_fts USING fts5(
    title, subtitle, narrative,
    content='observations',
    content_rowid='id',
    tokenize='porter unicode61'
);

-- Rebuild FTS index from existing data with the new tokenizer
INSERT INTO observations_fts(observations_fts) VALUES('rebuild');

-- Re-create sync triggers
CREATE TRIGGER observations_ai AFTER INSERT ON observations BEGIN
    INSERT INTO observations_fts(rowid, title, subtitle, narrative)
    VALUES (NEW.id, NEW.title, NEW.subtitle, NEW.narrative);
END;

CREATE TRIGGER observations_ad AFTER DELETE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative)
    VALUES ('delete', OLD.id, OLD.title, OLD.subtitle, OLD.narrative);
END;

CREATE TRIGGER observations_au AFTER UPDATE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative)
    VALUES ('delete', OLD.id, OLD.title, OLD.subtitle, OLD.narrative);
    INSERT INTO observations_fts(rowid, title, subtitle, narrative)
    VALUES (NEW.id, NEW.title, NEW.subtitle, NEW.narrative);
END;

CREATE INDEX IF NOT EXISTS idx_vec_model_version ON vectors(model_version);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Read the current schema version, 0 when the database is fresh
fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let table_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !table_exists {
        return Ok(0);
    }

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Apply all pending migrations, returning how many ran
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles multi-statement SQL including triggers
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

// ============================================================================
// TESTS
// ============================================================================
