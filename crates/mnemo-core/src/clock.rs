//! Injected Time Source
//!
//! Stores and detectors never call `Utc::now()` directly; they take a
//! `Clock` so tests can pin time and decay math stays deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// A source of the current time
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Current time as epoch milliseconds
    fn now_epoch_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time via chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed, settable clock for tests
#[derive(Debug, Default)]
pub struct FixedClock {
    epoch_ms: AtomicI64,
}

impl FixedClock {
    /// Create a clock pinned at the given time
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            epoch_ms: AtomicI64::new(time.timestamp_millis()),
        }
    }

    /// Move the clock to a new time
    pub fn set(&self, time: DateTime<Utc>) {
        self.epoch_ms.store(time.timestamp_millis(), Ordering::SeqCst);
    }

    /// Advance the clock by a duration
    pub fn advance(&self, by: chrono::Duration) {
        self.epoch_ms
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.epoch_ms.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

// ============================================================================
// TESTS
// ============================================================================
