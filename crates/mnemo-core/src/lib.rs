//! # Mnemo Core
//!
//! Local memory engine for assistant coding sessions. Captures, scores,
//! relates, and selectively surfaces observations so the next session can
//! start from concise, relevant context instead of re-exploring the code
//! base.
//!
//! - **Observation store**: durable CRUD + FTS5 search with per-project and
//!   global scope, importance scoring, and supersession
//! - **Detectors**: conflicts (corrections, opposing changes), typed
//!   relations (file/concept overlap, type progression, temporal proximity,
//!   narrative mentions), and recurring patterns (online signature
//!   clustering with promotion)
//! - **Consolidation**: periodic decay, creative association, and an
//!   opt-in forgetting pass that archives but never deletes
//! - **Hybrid vector retrieval**: embeddings persisted only for hub
//!   documents, everything else recomputed on demand, with an auto-tuned
//!   hub threshold and optional relation-graph expansion
//! - **Context assembly**: hybrid FTS + vector query, near-duplicate
//!   clustering, and ranked injection for the session-start hook
//!
//! The hook executables, CLI, HTTP worker, chunkers, and the embedding
//! model runtime are external collaborators; the engine consumes an
//! [`Embedder`] and an injected [`Clock`] and exposes plain Rust calls.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mnemo_core::{
//!     Clock, EngineConfig, HashingEmbedder, InjectRequest, MemoryEngine,
//!     ParsedObservation, SystemClock,
//! };
//!
//! let engine = Arc::new(MemoryEngine::open(
//!     None,
//!     Arc::new(HashingEmbedder::default()),
//!     Arc::new(SystemClock),
//!     EngineConfig::default(),
//! )?);
//!
//! // Ingest an observation extracted from a session
//! let parsed = ParsedObservation {
//!     title: Some("Connection pool sizing".into()),
//!     narrative: Some("Pool exhaustion under load; sized to 2x cores".into()),
//!     concepts: vec!["performance".into()],
//!     ..Default::default()
//! };
//! let (id, _) = engine.store("session-1", "my-app", &parsed, Some(1), 120).await?;
//!
//! // Rehydrate the next session
//! let context = engine.inject(&InjectRequest {
//!     project: "my-app".into(),
//!     ..Default::default()
//! })?;
//! ```

// Only warn about missing docs at the crate level; internal struct fields
// and enum variants don't need documentation
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod clock;
pub mod config;
pub mod consolidation;
pub mod detect;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod memory;
pub mod relevance;
pub mod retrieval;
pub mod storage;
pub mod text;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Engine facade
pub use engine::MemoryEngine;

// Errors
pub use error::{EngineError, Result, validate_project};

// Time
pub use clock::{Clock, FixedClock, SharedClock, SystemClock};

// Configuration
pub use config::{
    EngineConfig, GraphExpansionConfig, PatternConfig, RelationConfig, RelevanceConfig,
    RetrievalConfig, SchedulerConfig, StorageStrategy, StoreConfig, VectorConfig,
};

// Memory types
pub use memory::{
    Conflict, ConflictType, DetectionSource, EngineStats, MemoryKind, NewConflict, NewPattern,
    NewRelation, Observation, ObservationKind, ObservationOrder, ParsedObservation, Pattern,
    PatternStatus, PatternType, Relation, RelationType, Resolution, Scope,
};

// Storage layer
pub use storage::{
    CleanupHook, ConflictStore, Database, ObservationStore, PatternStore, RelationStore,
};

// Relevance
pub use relevance::{RelevanceInput, relevance};

// Detectors
pub use detect::{
    ConflictDetector, PatternAnalysis, PatternDetector, PatternSyncCallback, RelationDetector,
};

// Consolidation
pub use consolidation::{AssociationReport, ConsolidationScheduler, DecayReport, ForgetReport};

// Embeddings
pub use embeddings::{CountingEmbedder, Embedder, Embedding, EmbeddingError, HashingEmbedder};

// Vector store
pub use vector::{DocType, LatencyTuner, VectorDocInput, VectorFilter, VectorMatch, VectorStore};

// Retrieval
pub use retrieval::{
    ContextAssembler, ContextObservation, InjectRequest, InjectResult, format_context,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimension the schema is sized for
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Clock, EngineConfig, EngineError, EngineStats, HashingEmbedder, InjectRequest,
        InjectResult, MemoryEngine, Observation, ObservationKind, ParsedObservation, Result,
        Scope, SystemClock,
    };

    pub use crate::{
        ConflictStore, ObservationStore, PatternStore, RelationStore, VectorStore,
    };

    pub use crate::{ConsolidationScheduler, Embedder, StorageStrategy};
}
