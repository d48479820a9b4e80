//! The dispatch loop: keeps up to `max_concurrency` runners in flight.
//!
//! Runs on its own task per `start()` call. The queue is re-read on every
//! pass, so items enqueued mid-run and runtime concurrency adjustments take
//! effect without a restart. When a worker finishes, the next `Queued` item
//! is claimed immediately; the loop winds down once nothing is queued and
//! nothing is in flight, or after a stop request drains the workers.

use std::sync::Arc;

use tokio::task::JoinSet;

use super::{DispatchedJob, OrchestratorInner};
use crate::job::JobId;
use crate::runner::{self, TerminalStatus};

pub(crate) async fn run_loop(inner: Arc<OrchestratorInner>) {
    let mut workers: JoinSet<(JobId, TerminalStatus)> = JoinSet::new();

    loop {
        if inner.stop_requested() {
            break;
        }

        let cap = inner.max_concurrency();
        while workers.len() < cap {
            let Some(job) = inner.claim_next() else {
                break;
            };
            spawn_worker(&mut workers, Arc::clone(&inner), job);
        }

        if workers.is_empty() {
            // Nothing queued, nothing in flight: the run is complete.
            break;
        }

        match workers.join_next().await {
            Some(Ok((id, status))) => inner.finish_job(id, status),
            Some(Err(e)) => tracing::error!(error = %e, "worker task failed to join"),
            None => break,
        }

        // Sequential courtesy pause between dispatches.
        if inner.max_concurrency() == 1 && !inner.stop_requested() {
            tokio::time::sleep(inner.dispatch_delay()).await;
        }
    }

    // A stop request leaves workers running until their next checkpoint;
    // collect them so their slots record Stopped rather than staying stuck.
    while let Some(result) = workers.join_next().await {
        match result {
            Ok((id, status)) => inner.finish_job(id, status),
            Err(e) => tracing::error!(error = %e, "worker task failed to join"),
        }
    }

    inner.record_summary();
    inner.run_finished();
}

fn spawn_worker(
    workers: &mut JoinSet<(JobId, TerminalStatus)>,
    inner: Arc<OrchestratorInner>,
    job: DispatchedJob,
) {
    workers.spawn(async move {
        let DispatchedJob {
            id,
            descriptor,
            prefetched,
            token,
        } = job;
        let progress = {
            let inner = Arc::clone(&inner);
            move |percent: f32| inner.note_progress(id, percent)
        };
        let status = runner::run_job(inner.ctx(), &descriptor, prefetched, &token, &progress).await;
        (id, status)
    });
}
