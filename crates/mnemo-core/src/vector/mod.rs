//! Vector Store (Hybrid)
//!
//! Selective-storage embedding index. Only frequently-queried "hub"
//! documents keep a persisted embedding; everything else is recomputed on
//! demand from a content cache. An auto-tuner moves the hub threshold to
//! keep query latency near its target, and queries can optionally expand
//! through the relation graph.

mod graph;
pub mod store;
pub mod tuner;

pub use store::{DocType, VectorDocInput, VectorFilter, VectorMatch, VectorStore};
pub use tuner::LatencyTuner;
