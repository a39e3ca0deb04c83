//! End-to-end test harness for the memory engine
//!
//! Provides isolated engine instances for testing:
//! - Temporary databases that are cleaned up automatically
//! - A pinned clock so decay math is exact
//! - An instrumented embedder that counts embed calls

pub mod harness;

pub use harness::TestEngine;
