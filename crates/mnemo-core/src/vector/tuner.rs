//! Hub-Threshold Auto-Tuner
//!
//! Records query latencies and periodically nudges the hub threshold:
//! a high p95 lowers the threshold (more stored hubs, less recomputation),
//! a comfortably low p95 raises it (less storage). Pure state machine; the
//! store feeds it samples and applies the returned threshold.

const MAX_SAMPLES: usize = 1024;

/// Latency-driven threshold tuner
#[derive(Debug)]
pub struct LatencyTuner {
    target_ms: f64,
    period_ms: i64,
    min_threshold: u32,
    max_threshold: u32,
    samples: Vec<f64>,
    last_adjust_epoch_ms: i64,
}

impl LatencyTuner {
    /// Create a tuner
    pub fn new(
        target_ms: f64,
        period_secs: u64,
        min_threshold: u32,
        max_threshold: u32,
        now_epoch_ms: i64,
    ) -> Self {
        Self {
            target_ms,
            period_ms: period_secs as i64 * 1000,
            min_threshold,
            max_threshold,
            samples: Vec::new(),
            last_adjust_epoch_ms: now_epoch_ms,
        }
    }

    /// Record one query latency; when an adjustment period has elapsed,
    /// evaluate and return the threshold to use from now on.
    pub fn record(&mut self, latency_ms: f64, now_epoch_ms: i64, current: u32) -> Option<u32> {
        if self.samples.len() >= MAX_SAMPLES {
            self.samples.remove(0);
        }
        self.samples.push(latency_ms);

        if now_epoch_ms - self.last_adjust_epoch_ms < self.period_ms {
            return None;
        }
        self.last_adjust_epoch_ms = now_epoch_ms;

        let p95 = self.p95()?;
        // The buffer never carries over across an evaluation
        self.samples.clear();

        let adjusted = if p95 > self.target_ms {
            let overshoot = p95 / self.target_ms;
            let step = if overshoot >= 2.0 {
                3
            } else if overshoot >= 1.5 {
                2
            } else {
                1
            };
            current.saturating_sub(step)
        } else if p95 < 0.8 * self.target_ms {
            current + 1
        } else {
            current
        };

        let clamped = adjusted.clamp(self.min_threshold, self.max_threshold);
        if clamped != current {
            tracing::debug!(
                p95_ms = p95,
                old = current,
                new = clamped,
                "hub threshold adjusted"
            );
            Some(clamped)
        } else {
            None
        }
    }

    fn p95(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((sorted.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        Some(sorted[index.min(sorted.len() - 1)])
    }

    /// Samples currently buffered (for tests)
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
