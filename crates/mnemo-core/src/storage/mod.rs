//! Storage Layer
//!
//! SQLite-backed stores for observations, relations, conflicts, patterns,
//! and vectors. One `Database` owns a writer and a reader connection; all
//! stores share it through an `Arc` and take `&self`, so the engine can hand
//! out `Arc<ObservationStore>` without an outer mutex.

pub mod conflicts;
pub mod migrations;
pub mod observations;
pub mod patterns;
pub mod relations;

pub use conflicts::ConflictStore;
pub use observations::{CleanupHook, ObservationStore};
pub use patterns::PatternStore;
pub use relations::RelationStore;

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::{EngineError, Result};

// ============================================================================
// DATABASE
// ============================================================================

/// Shared database handle with separate reader/writer connections.
///
/// All methods take `&self`; interior mutability comes from per-connection
/// mutexes. Statement reuse goes through rusqlite's per-connection prepared
/// statement cache (`prepare_cached`), which closes each statement exactly
/// once when the connection drops.
pub struct Database {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Database {
    /// Apply performance and integrity PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the database at `db_path`, applying migrations.
    ///
    /// With no path, the platform data directory is used.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = directories::ProjectDirs::from("dev", "mnemo", "core")
                    .ok_or_else(|| {
                        EngineError::Init("Could not determine project directories".to_string())
                    })?;

                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                // Restrict directory permissions to owner-only on Unix
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = std::fs::Permissions::from_mode(0o700);
                    let _ = std::fs::set_permissions(data_dir, perms);
                }
                data_dir.join("mnemo.db")
            }
        };

        let writer = Connection::open(&path)?;

        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }

        Self::configure_connection(&writer)?;

        // Apply migrations on the writer only
        migrations::apply_migrations(&writer)?;

        let reader = Connection::open(&path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    /// Lock the writer connection
    pub fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| EngineError::Init("Writer lock poisoned".to_string()))
    }

    /// Lock the reader connection
    pub fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".to_string()))
    }
}

// ============================================================================
// JSON COLUMN HELPERS
// ============================================================================

/// Serialize a string list for a TEXT column
pub(crate) fn to_json_array<S: serde::Serialize>(items: &[S]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Parse a TEXT column back into a string list; bad data degrades to empty
pub(crate) fn from_json_array<T: serde::de::DeserializeOwned>(raw: &str) -> Vec<T> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Serialize a string→i64 map for a TEXT column
pub(crate) fn to_json_map(map: &std::collections::HashMap<String, i64>) -> String {
    serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string())
}

/// Parse a TEXT column back into a string→i64 map
pub(crate) fn from_json_map(raw: &str) -> std::collections::HashMap<String, i64> {
    serde_json::from_str(raw).unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================
