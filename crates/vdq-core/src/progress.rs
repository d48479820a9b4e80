//! Aggregate progress across the queue (approximate, UI-facing).
//!
//! overall = completed_fraction * 100
//!         + (1 - completed_fraction) * average(active percents)
//!
//! The job total is re-read on every call, so the queue may grow while a run
//! is active; appending a large batch mid-run can step the displayed number
//! backwards. Accepted: this is UX feedback, not a metric.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::job::JobId;

#[derive(Default)]
struct AggregateState {
    total_known: usize,
    completed: usize,
    active: HashMap<JobId, f32>,
}

#[derive(Default)]
pub struct ProgressAggregator {
    inner: Mutex<AggregateState>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job the queue now knows about (enqueue or restore).
    pub fn note_known(&self) {
        self.inner.lock().unwrap().total_known += 1;
    }

    /// Latest percentage for a still-active job. Clamped to [0, 100].
    pub fn report(&self, id: JobId, percent: f32) {
        let mut state = self.inner.lock().unwrap();
        state.active.insert(id, percent.clamp(0.0, 100.0));
    }

    /// Move a job into the completed bucket.
    pub fn note_completed(&self, id: JobId) {
        let mut state = self.inner.lock().unwrap();
        state.active.remove(&id);
        state.completed += 1;
    }

    /// Drop a failed or stopped job from the active set. It still counts
    /// toward the total, so the overall number dips accordingly.
    pub fn note_inactive(&self, id: JobId) {
        self.inner.lock().unwrap().active.remove(&id);
    }

    /// Forget a removed queue slot entirely.
    pub fn remove_job(&self, id: JobId, was_completed: bool) {
        let mut state = self.inner.lock().unwrap();
        state.total_known = state.total_known.saturating_sub(1);
        if was_completed {
            state.completed = state.completed.saturating_sub(1);
        }
        state.active.remove(&id);
    }

    /// Forget everything (queue cleared).
    pub fn reset(&self) {
        *self.inner.lock().unwrap() = AggregateState::default();
    }

    /// Aggregate percentage in [0, 100].
    pub fn overall(&self) -> f32 {
        let state = self.inner.lock().unwrap();
        if state.total_known == 0 {
            return 0.0;
        }
        let completed_fraction = state.completed as f32 / state.total_known as f32;
        let active_avg = if state.active.is_empty() {
            0.0
        } else {
            state.active.values().sum::<f32>() / state.active.len() as f32
        };
        (completed_fraction * 100.0 + (1.0 - completed_fraction) * active_avg).clamp(0.0, 100.0)
    }
}
