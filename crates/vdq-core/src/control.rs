//! Cancellation plumbing: a queue-wide stop flag plus per-job abort tokens.
//!
//! The orchestrator registers each dispatched job with the control registry
//! and hands the resulting token to that job's runner. Cancellation is
//! cooperative: the runner polls its token at progress checkpoints, so
//! `stop()` is "requested", not "immediate".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::job::JobId;

/// Token polled by a job runner at its progress checkpoints.
///
/// Signals either when the whole queue was stopped or when this specific
/// job was asked to abort.
#[derive(Debug, Clone)]
pub struct CancelToken {
    queue: Arc<AtomicBool>,
    job: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.queue.load(Ordering::Relaxed) || self.job.load(Ordering::Relaxed)
    }
}

/// Registry of running jobs and the queue-wide stop flag.
///
/// `stop_all()` flips the shared flag first, so even a job claimed but not
/// yet registered observes the stop through its token.
#[derive(Default)]
pub struct QueueControl {
    stop_flag: Arc<AtomicBool>,
    jobs: RwLock<HashMap<JobId, Arc<AtomicBool>>>,
}

impl QueueControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dispatched job; returns the token to hand to its runner.
    pub fn register(&self, job_id: JobId) -> CancelToken {
        let job = Arc::new(AtomicBool::new(false));
        self.jobs.write().unwrap().insert(job_id, Arc::clone(&job));
        CancelToken {
            queue: Arc::clone(&self.stop_flag),
            job,
        }
    }

    /// Unregister a job (call when the job finishes, whatever the outcome).
    pub fn unregister(&self, job_id: JobId) {
        self.jobs.write().unwrap().remove(&job_id);
    }

    /// Request abort for a single job; its runner stops at the next checkpoint.
    pub fn request_abort(&self, job_id: JobId) {
        if let Some(token) = self.jobs.read().unwrap().get(&job_id) {
            token.store(true, Ordering::Relaxed);
        }
    }

    /// Stop everything: no further dispatches, all in-flight runners are
    /// asked to stop at their next checkpoint. Does not block.
    pub fn stop_all(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        for token in self.jobs.read().unwrap().values() {
            token.store(true, Ordering::Relaxed);
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    /// Clear the queue-wide flag before a new run.
    pub fn reset(&self) {
        self.stop_flag.store(false, Ordering::Relaxed);
    }
}
