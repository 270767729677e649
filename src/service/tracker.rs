//! Process-wide update coordination.
//!
//! The tracker is in-memory only: a restart forgets the time since the
//! last update, which is an accepted staleness tradeoff because the
//! recompute it gates is idempotent.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::service::engagement::{EngagementAggregator, RecalcOutcome};
use crate::service::scoring::{ScoreUpdateOutcome, ScoringEngine};
use crate::service::Clock;

#[derive(Default)]
struct TrackerState {
    last_full_update_at: Option<DateTime<Utc>>,
    pending: HashSet<Uuid>,
    in_progress: bool,
}

/// Singleton status for the recompute pipeline.
pub struct UpdateTracker {
    state: Mutex<TrackerState>,
    clock: Arc<dyn Clock>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UpdateStatusReport {
    pub last_full_update_at: Option<DateTime<Utc>>,
    pub seconds_since_last_update: Option<i64>,
    pub in_progress: bool,
    pub pending_count: usize,
}

impl UpdateTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            clock,
        }
    }

    pub fn status(&self) -> UpdateStatusReport {
        let state = self.state.lock().expect("Mutex poisoned");
        let now = self.clock.now();
        UpdateStatusReport {
            last_full_update_at: state.last_full_update_at,
            seconds_since_last_update: state
                .last_full_update_at
                .map(|at| (now - at).num_seconds()),
            in_progress: state.in_progress,
            pending_count: state.pending.len(),
        }
    }

    /// Claims the in-progress slot, or fails if another full update holds it.
    pub fn begin_full_update(&self) -> Result<()> {
        let mut state = self.state.lock().expect("Mutex poisoned");
        if state.in_progress {
            return Err(Error::UpdateAlreadyInProgress);
        }
        state.in_progress = true;
        Ok(())
    }

    pub fn finish_full_update(&self, at: DateTime<Utc>) {
        let mut state = self.state.lock().expect("Mutex poisoned");
        state.in_progress = false;
        state.last_full_update_at = Some(at);
        state.pending.clear();
    }

    pub fn abort_full_update(&self) {
        self.state.lock().expect("Mutex poisoned").in_progress = false;
    }

    pub fn note_pending(&self, ids: &[Uuid]) {
        let mut state = self.state.lock().expect("Mutex poisoned");
        state.pending.extend(ids.iter().copied());
    }

    pub fn clear_pending(&self, ids: &[Uuid]) {
        let mut state = self.state.lock().expect("Mutex poisoned");
        for id in ids {
            state.pending.remove(id);
        }
    }
}

/// Combined result of a full engagement + score update.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct FullUpdateOutcome {
    pub metrics: RecalcOutcome,
    pub scores: ScoreUpdateOutcome,
    pub finished_at: DateTime<Utc>,
}

/// Runs the aggregator and scoring engine back-to-back under the tracker's
/// in-progress guard.
pub struct UpdateCoordinator {
    tracker: Arc<UpdateTracker>,
    engagement: Arc<EngagementAggregator>,
    scoring: Arc<ScoringEngine>,
    clock: Arc<dyn Clock>,
}

struct InProgressGuard<'a> {
    tracker: &'a UpdateTracker,
    done: bool,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.tracker.abort_full_update();
        }
    }
}

impl UpdateCoordinator {
    pub fn new(
        tracker: Arc<UpdateTracker>,
        engagement: Arc<EngagementAggregator>,
        scoring: Arc<ScoringEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tracker,
            engagement,
            scoring,
            clock,
        }
    }

    pub fn status(&self) -> UpdateStatusReport {
        self.tracker.status()
    }

    /// Full recompute. A concurrent call while one is running fails with
    /// `UpdateAlreadyInProgress` instead of racing it.
    pub async fn force_full_update(&self) -> Result<FullUpdateOutcome> {
        self.tracker.begin_full_update()?;
        let mut guard = InProgressGuard {
            tracker: self.tracker.as_ref(),
            done: false,
        };
        let metrics = self.engagement.recalculate_all_product_metrics().await?;
        let scores = self.scoring.update_all_product_scores().await?;
        let finished_at = self.clock.now();
        self.tracker.finish_full_update(finished_at);
        guard.done = true;
        tracing::info!(
            metrics_updated = metrics.updated,
            scores_updated = scores.updated,
            "full update complete"
        );
        Ok(FullUpdateOutcome {
            metrics,
            scores,
            finished_at,
        })
    }

    /// Partial refresh for an explicit product subset.
    pub async fn trigger_manual_update(&self, product_ids: &[Uuid]) -> Result<ScoreUpdateOutcome> {
        self.tracker.note_pending(product_ids);
        let outcome = self.scoring.update_scores_for(product_ids).await;
        if outcome.is_ok() {
            self.tracker.clear_pending(product_ids);
        }
        outcome
    }
}
