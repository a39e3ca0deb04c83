//! Consolidation Scheduler
//!
//! One worker task multiplexes the three maintenance loops with
//! `tokio::select!` over a cancellation token, a set-once stop signal, and
//! per-task interval ticks. A failing task logs and the loop continues; the
//! scheduler never tears itself down on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::config::{RelevanceConfig, SchedulerConfig};
use crate::consolidation::{AssociationReport, DecayReport, ForgetReport};
use crate::embeddings::Embedder;
use crate::error::{EngineError, Result};
use crate::memory::{
    DetectionSource, MemoryKind, NewRelation, Observation, ObservationKind, RelationType,
};
use crate::relevance::{RelevanceInput, relevance};
use crate::storage::{ObservationStore, RelationStore};
use crate::text::cosine_similarity;

// ============================================================================
// SCHEDULER
// ============================================================================

/// Periodic consolidation over one project's memory
pub struct ConsolidationScheduler {
    observations: Arc<ObservationStore>,
    relations: Arc<RelationStore>,
    embedder: Arc<dyn Embedder>,
    clock: SharedClock,
    relevance_config: RelevanceConfig,
    config: SchedulerConfig,
    project: String,
    stop_tx: tokio::sync::watch::Sender<bool>,
    last_forget_epoch_ms: Mutex<Option<i64>>,
}

impl ConsolidationScheduler {
    /// Create a scheduler; call `run` on a worker task to start it
    pub fn new(
        observations: Arc<ObservationStore>,
        relations: Arc<RelationStore>,
        embedder: Arc<dyn Embedder>,
        clock: SharedClock,
        relevance_config: RelevanceConfig,
        config: SchedulerConfig,
        project: impl Into<String>,
    ) -> Self {
        let (stop_tx, _) = tokio::sync::watch::channel(false);
        Self {
            observations,
            relations,
            embedder,
            clock,
            relevance_config,
            config,
            project: project.into(),
            stop_tx,
            last_forget_epoch_ms: Mutex::new(None),
        }
    }

    /// Signal the loop to exit. Set-once: calling twice is a no-op.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Run the scheduling loop until cancellation or stop
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow() {
            return;
        }

        let mut decay_tick =
            tokio::time::interval(std::time::Duration::from_secs(self.config.decay_interval_secs));
        let mut assoc_tick = tokio::time::interval(std::time::Duration::from_secs(
            self.config.association_interval_secs,
        ));
        decay_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        assoc_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Interval yields immediately once; consume the startup ticks
        decay_tick.tick().await;
        assoc_tick.tick().await;

        let mut forget_tick = if self.config.forget_enabled {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(
                self.config.forget_interval_secs,
            ));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            Some(tick)
        } else {
            None
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = stop_rx.changed() => {
                    if result.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = decay_tick.tick() => {
                    match self.run_decay() {
                        Ok(report) => tracing::info!(
                            processed = report.observations_processed,
                            duration_ms = report.duration_ms,
                            "decay pass complete"
                        ),
                        Err(err) => tracing::warn!("decay pass failed: {err}"),
                    }
                }
                _ = assoc_tick.tick() => {
                    match self.run_associations() {
                        Ok(report) => tracing::info!(
                            sampled = report.sampled,
                            created = report.relations_created,
                            "association pass complete"
                        ),
                        Err(err) => tracing::warn!("association pass failed: {err}"),
                    }
                }
                _ = tick_or_never(&mut forget_tick) => {
                    match self.run_forgetting() {
                        Ok(report) => tracing::info!(
                            archived = report.archived,
                            protected = report.protected,
                            "forgetting pass complete"
                        ),
                        Err(err) => tracing::warn!("forgetting pass failed: {err}"),
                    }
                }
            }
        }
        tracing::debug!("consolidation scheduler exited");
    }

    // ------------------------------------------------------------------
    // Decay
    // ------------------------------------------------------------------

    /// Recompute every observation's importance with the relevance
    /// calculator and bulk-persist the new scores. An empty store is a no-op.
    pub fn run_decay(&self) -> Result<DecayReport> {
        let started = Instant::now();
        let all = self.observations.get_all()?;
        if all.is_empty() {
            return Ok(DecayReport::default());
        }

        let ids: Vec<i64> = all.iter().map(|o| o.id).collect();
        let stats = self.relations.stats_for(&ids)?;
        let now = self.clock.now();

        let mut scores: HashMap<i64, f64> = HashMap::with_capacity(all.len());
        for obs in &all {
            let rel = stats.get(&obs.id).copied().unwrap_or_default();
            let input =
                RelevanceInput::from_observation(obs, now, rel.count, rel.avg_confidence);
            scores.insert(obs.id, relevance(&input, &self.relevance_config));
        }
        self.observations.update_importance_scores(&scores)?;

        Ok(DecayReport {
            observations_processed: all.len() as i64,
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }

    // ------------------------------------------------------------------
    // Creative association
    // ------------------------------------------------------------------

    /// Embed a sample of recent observations and relate similar (or
    /// pointedly dissimilar) pairs.
    pub fn run_associations(&self) -> Result<AssociationReport> {
        let sample = self
            .observations
            .get_timeline(&self.project, None, self.config.association_sample_size)?;

        // Keep only observations with embeddable text
        let sample: Vec<&Observation> = sample
            .iter()
            .filter(|o| !o.searchable_text().trim().is_empty())
            .collect();
        if sample.len() < 2 {
            return Ok(AssociationReport {
                sampled: sample.len() as i64,
                ..Default::default()
            });
        }

        let texts: Vec<String> = sample.iter().map(|o| o.searchable_text()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        let mut relations = Vec::new();
        let mut pairs_checked = 0i64;
        for i in 0..sample.len() {
            for j in (i + 1)..sample.len() {
                pairs_checked += 1;
                let similarity = f64::from(cosine_similarity(&vectors[i], &vectors[j]));
                if let Some(relation) = associate_pair(sample[i], sample[j], similarity) {
                    relations.push(relation);
                }
            }
        }

        let created = self.relations.insert_batch(&relations)?;
        Ok(AssociationReport {
            sampled: sample.len() as i64,
            pairs_checked,
            relations_created: created as i64,
        })
    }

    // ------------------------------------------------------------------
    // Forgetting
    // ------------------------------------------------------------------

    /// Archive observations whose importance collapsed. Protected rows
    /// (high importance, young, or decision/discovery kind) are never
    /// archived; nothing is ever deleted.
    pub fn run_forgetting(&self) -> Result<ForgetReport> {
        if !self.config.forget_enabled {
            tracing::debug!("forgetting disabled, skipping");
            return Ok(ForgetReport::default());
        }

        let now_ms = self.clock.now_epoch_ms();
        {
            let mut gate = self
                .last_forget_epoch_ms
                .lock()
                .map_err(|_| EngineError::Init("forget gate poisoned".into()))?;
            if let Some(last) = *gate {
                let cooldown_ms = self.config.forget_cooldown_secs as i64 * 1000;
                if now_ms - last < cooldown_ms {
                    return Err(EngineError::RateLimited(format!(
                        "forgetting ran {}s ago, cooldown is {}s",
                        (now_ms - last) / 1000,
                        self.config.forget_cooldown_secs
                    )));
                }
            }
            *gate = Some(now_ms);
        }

        let all = self.observations.get_all()?;
        let now = self.clock.now();
        let mut report = ForgetReport::default();
        let mut to_archive = Vec::new();

        for obs in &all {
            if obs.archived {
                continue;
            }
            report.examined += 1;
            if obs.importance_score >= self.config.forget_threshold {
                continue;
            }
            let protected = obs.importance_score >= self.config.forget_protect_score
                || obs.age_days(now) < self.config.forget_protect_age_days as f64
                || matches!(obs.kind, ObservationKind::Decision | ObservationKind::Discovery);
            if protected {
                report.protected += 1;
                continue;
            }
            to_archive.push(obs.id);
        }

        self.observations.mark_archived(&to_archive)?;
        report.archived = to_archive.len() as i64;
        Ok(report)
    }
}

/// Tick the interval, or wait forever when forgetting is disabled
async fn tick_or_never(tick: &mut Option<tokio::time::Interval>) {
    match tick.as_mut() {
        Some(tick) => {
            tick.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// ============================================================================
// ASSOCIATION RULES
// ============================================================================

/// Type-pair rules over one sampled pair; first match wins.
///
/// The edge points from the newer observation to the older one.
fn associate_pair(a: &Observation, b: &Observation, similarity: f64) -> Option<NewRelation> {
    let (newer, older) = if a.created_at_epoch >= b.created_at_epoch {
        (a, b)
    } else {
        (b, a)
    };

    let both_decisions =
        newer.kind == ObservationKind::Decision && older.kind == ObservationKind::Decision;
    let insight_pattern_pair = matches!(
        (newer.memory_type, older.memory_type),
        (MemoryKind::Insight, MemoryKind::Pattern) | (MemoryKind::Pattern, MemoryKind::Insight)
    );
    let within_week =
        (newer.created_at_epoch - older.created_at_epoch).abs() <= 7 * 86_400_000;

    let (relation_type, confidence, reason) = if both_decisions && similarity < 0.3 {
        (
            RelationType::Contradicts,
            0.6,
            format!("two dissimilar decisions (sim {similarity:.2})"),
        )
    } else if insight_pattern_pair && similarity > 0.5 {
        (
            RelationType::Explains,
            similarity,
            format!("insight/pattern pair (sim {similarity:.2})"),
        )
    } else if similarity > 0.7 {
        (
            RelationType::SharesTheme,
            similarity,
            format!("high similarity (sim {similarity:.2})"),
        )
    } else if within_week && similarity < 0.4 {
        (
            RelationType::ParallelContext,
            0.45,
            format!("same week, low similarity (sim {similarity:.2})"),
        )
    } else {
        return None;
    };

    Some(NewRelation {
        source_id: newer.id,
        target_id: older.id,
        relation_type,
        confidence: confidence.clamp(0.0, 1.0),
        detection_source: DetectionSource::CreativeAssociation,
        reason,
    })
}

// ============================================================================
// TESTS
// ============================================================================
