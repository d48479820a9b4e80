//! Queue orchestrator: ordered job list, bounded dispatch, stop/cancel.
//!
//! One orchestrator owns the `(descriptor, state)` list and its worker pool
//! for the application lifetime; collaborators are injected at construction.
//! The dispatch loop runs on its own task so the UI thread never blocks.

mod dispatch;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::config::VdqConfig;
use crate::control::{CancelToken, QueueControl};
use crate::fetch::{MediaMetadata, MetadataFetcher};
use crate::job::{JobDescriptor, JobId, JobSnapshot, JobState, JobStatus};
use crate::ledger::{ResumeLedger, SavedQueueItem};
use crate::progress::ProgressAggregator;
use crate::runner::{RunnerContext, TerminalStatus};
use crate::transfer::TransferExecutor;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is already running")]
    AlreadyRunning,
    #[error("no item at index {0}")]
    OutOfRange(usize),
    #[error("item at index {0} is downloading and cannot be modified")]
    SlotDownloading(usize),
    #[error("queue cannot be cleared while a run is active")]
    ClearWhileRunning,
}

/// Terminal counts for one run, recorded when no jobs remain eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
    pub total: usize,
}

impl RunSummary {
    /// The UI-facing "N/M succeeded" line.
    pub fn succeeded_line(&self) -> String {
        format!("{}/{} succeeded", self.completed, self.total)
    }
}

struct QueueEntry {
    id: JobId,
    descriptor: JobDescriptor,
    state: JobState,
    prefetched: Option<MediaMetadata>,
}

struct QueueState {
    entries: Vec<QueueEntry>,
    next_id: JobId,
    max_concurrency: usize,
}

/// A claimed job on its way to a worker.
pub(crate) struct DispatchedJob {
    pub(crate) id: JobId,
    pub(crate) descriptor: JobDescriptor,
    pub(crate) prefetched: Option<MediaMetadata>,
    pub(crate) token: CancelToken,
}

pub(crate) struct OrchestratorInner {
    queue: Mutex<QueueState>,
    control: QueueControl,
    aggregator: ProgressAggregator,
    ctx: RunnerContext,
    dispatch_delay: Duration,
    run_flag: watch::Sender<bool>,
    summary: Mutex<Option<RunSummary>>,
}

/// Thread-safe handle to the queue. Clone freely; all clones share state.
#[derive(Clone)]
pub struct QueueOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl QueueOrchestrator {
    pub fn new(
        cfg: &VdqConfig,
        fetcher: Arc<dyn MetadataFetcher>,
        transfer: Arc<dyn TransferExecutor>,
        ledger: ResumeLedger,
    ) -> Self {
        let (run_flag, _) = watch::channel(false);
        Self {
            inner: Arc::new(OrchestratorInner {
                queue: Mutex::new(QueueState {
                    entries: Vec::new(),
                    next_id: 1,
                    max_concurrency: cfg.max_concurrent_downloads.max(1),
                }),
                control: QueueControl::new(),
                aggregator: ProgressAggregator::new(),
                ctx: RunnerContext {
                    fetcher,
                    transfer,
                    ledger,
                    rate_limit: cfg.max_download_rate,
                },
                dispatch_delay: Duration::from_millis(cfg.dispatch_delay_ms),
                run_flag,
                summary: Mutex::new(None),
            }),
        }
    }

    /// Append a job to the queue. Valid in any state, including mid-run;
    /// an active dispatch loop picks the item up on its next pass.
    pub fn enqueue(&self, descriptor: JobDescriptor) -> JobId {
        self.enqueue_inner(descriptor, None)
    }

    /// Append a job whose metadata the parse step already resolved, so the
    /// runner skips the second fetch.
    pub fn enqueue_with_metadata(&self, descriptor: JobDescriptor, metadata: MediaMetadata) -> JobId {
        self.enqueue_inner(descriptor, Some(metadata))
    }

    fn enqueue_inner(&self, descriptor: JobDescriptor, prefetched: Option<MediaMetadata>) -> JobId {
        let id = {
            let mut queue = self.inner.queue.lock().unwrap();
            let id = queue.next_id;
            queue.next_id += 1;
            queue.entries.push(QueueEntry {
                id,
                descriptor,
                state: JobState::queued(),
                prefetched,
            });
            id
        };
        self.inner.aggregator.note_known();
        tracing::debug!(job_id = id, "job enqueued");
        id
    }

    /// Begin dispatching. Fails with `AlreadyRunning` while a run is active.
    /// `Stopped` items are reset to `Queued` so a stopped run resumes.
    pub fn start(&self, concurrency: Option<usize>) -> Result<(), QueueError> {
        if self.inner.run_flag.send_replace(true) {
            return Err(QueueError::AlreadyRunning);
        }
        self.inner.control.reset();
        *self.inner.summary.lock().unwrap() = None;

        {
            let mut queue = self.inner.queue.lock().unwrap();
            if let Some(n) = concurrency {
                queue.max_concurrency = n.max(1);
            }
            for entry in &mut queue.entries {
                if entry.state.status == JobStatus::Stopped {
                    entry.state.status = JobStatus::Queued;
                    entry.state.error = None;
                    tracing::info!(job_id = entry.id, "resuming stopped job");
                }
            }
        }

        tracing::info!(
            concurrency = self.inner.queue.lock().unwrap().max_concurrency,
            "queue run started"
        );
        tokio::spawn(dispatch::run_loop(Arc::clone(&self.inner)));
        Ok(())
    }

    /// Request a stop: no further dispatches, in-flight jobs are signalled
    /// and transition to `Stopped` at their next checkpoint. Does not block.
    pub fn stop(&self) {
        tracing::info!("queue stop requested");
        self.inner.control.stop_all();
    }

    pub fn is_running(&self) -> bool {
        *self.inner.run_flag.borrow()
    }

    /// Wait until the current run (if any) has fully wound down.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.run_flag.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Adjust the worker-pool bound. Takes effect for future dispatches
    /// only; already-running jobs are unaffected.
    pub fn set_max_concurrency(&self, n: usize) {
        self.inner.queue.lock().unwrap().max_concurrency = n.max(1);
    }

    /// Remove the item at `index`. Rejected while that slot is downloading.
    pub fn remove(&self, index: usize) -> Result<JobDescriptor, QueueError> {
        let (entry, was_completed) = {
            let mut queue = self.inner.queue.lock().unwrap();
            if index >= queue.entries.len() {
                return Err(QueueError::OutOfRange(index));
            }
            if queue.entries[index].state.status == JobStatus::Downloading {
                return Err(QueueError::SlotDownloading(index));
            }
            let entry = queue.entries.remove(index);
            let was_completed = entry.state.status == JobStatus::Completed;
            (entry, was_completed)
        };
        self.inner.aggregator.remove_job(entry.id, was_completed);
        Ok(entry.descriptor)
    }

    /// Move the item at `index` by `delta` positions (clamped to the list).
    /// Rejected while that slot is downloading.
    pub fn move_item(&self, index: usize, delta: isize) -> Result<(), QueueError> {
        let mut queue = self.inner.queue.lock().unwrap();
        if index >= queue.entries.len() {
            return Err(QueueError::OutOfRange(index));
        }
        if queue.entries[index].state.status == JobStatus::Downloading {
            return Err(QueueError::SlotDownloading(index));
        }
        let len = queue.entries.len() as isize;
        let target = (index as isize + delta).clamp(0, len - 1) as usize;
        let entry = queue.entries.remove(index);
        queue.entries.insert(target, entry);
        Ok(())
    }

    /// Empty the queue. Rejected while a run is active.
    pub fn clear(&self) -> Result<(), QueueError> {
        if self.is_running() {
            return Err(QueueError::ClearWhileRunning);
        }
        self.inner.queue.lock().unwrap().entries.clear();
        self.inner.aggregator.reset();
        Ok(())
    }

    /// Snapshot of every queue slot for UI display, in list order.
    pub fn statuses(&self) -> Vec<JobSnapshot> {
        let queue = self.inner.queue.lock().unwrap();
        queue
            .entries
            .iter()
            .map(|entry| JobSnapshot {
                id: entry.id,
                source_url: entry.descriptor.source_url.clone(),
                status: entry.state.status,
                progress_percent: entry.state.progress_percent,
                resume_ref: entry.state.resume_ref.clone(),
                error: entry.state.error.clone(),
            })
            .collect()
    }

    /// Aggregate percentage across the queue.
    pub fn overall_progress(&self) -> f32 {
        self.inner.aggregator.overall()
    }

    /// The last completed run's terminal counts, if any.
    pub fn summary(&self) -> Option<RunSummary> {
        *self.inner.summary.lock().unwrap()
    }

    /// Save the pending queue (non-completed items) to the ledger.
    pub async fn persist_queue(&self) -> anyhow::Result<()> {
        let items: Vec<SavedQueueItem> = {
            let queue = self.inner.queue.lock().unwrap();
            queue
                .entries
                .iter()
                .enumerate()
                .map(|(position, entry)| SavedQueueItem {
                    position: position as i64,
                    descriptor: entry.descriptor.clone(),
                    status: entry.state.status,
                })
                .collect()
        };
        self.inner.ctx.ledger.save_queue(&items).await
    }

    /// Append the saved queue from the ledger. Returns how many items were
    /// restored. Only valid while idle.
    pub async fn restore_queue(&self) -> anyhow::Result<usize> {
        anyhow::ensure!(!self.is_running(), "cannot restore queue mid-run");
        let saved = self.inner.ctx.ledger.load_queue().await?;
        let count = saved.len();
        let mut queue = self.inner.queue.lock().unwrap();
        for item in saved {
            let id = queue.next_id;
            queue.next_id += 1;
            let mut state = JobState::queued();
            state.status = item.status;
            queue.entries.push(QueueEntry {
                id,
                descriptor: item.descriptor,
                state,
                prefetched: None,
            });
            self.inner.aggregator.note_known();
        }
        Ok(count)
    }
}

impl OrchestratorInner {
    pub(crate) fn max_concurrency(&self) -> usize {
        self.queue.lock().unwrap().max_concurrency
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.control.stop_requested()
    }

    pub(crate) fn dispatch_delay(&self) -> Duration {
        self.dispatch_delay
    }

    pub(crate) fn ctx(&self) -> &RunnerContext {
        &self.ctx
    }

    pub(crate) fn run_finished(&self) {
        self.run_flag.send_replace(false);
    }

    /// Claim the first `Queued` entry: flip it to `Downloading` and take it
    /// out of the dispatchable set in one critical section.
    pub(crate) fn claim_next(&self) -> Option<DispatchedJob> {
        let (id, descriptor, prefetched) = {
            let mut queue = self.queue.lock().unwrap();
            let entry = queue
                .entries
                .iter_mut()
                .find(|e| e.state.status == JobStatus::Queued)?;
            entry.state.status = JobStatus::Downloading;
            entry.state.error = None;
            (entry.id, entry.descriptor.clone(), entry.prefetched.clone())
        };
        // The token registers after the lock drops; a concurrent stop() is
        // still observed through the shared queue-wide flag.
        let token = self.control.register(id);
        tracing::info!(job_id = id, "job dispatched");
        Some(DispatchedJob {
            id,
            descriptor,
            prefetched,
            token,
        })
    }

    pub(crate) fn note_progress(&self, id: JobId, percent: f32) {
        {
            let mut queue = self.queue.lock().unwrap();
            if let Some(entry) = queue.entries.iter_mut().find(|e| e.id == id) {
                if entry.state.status == JobStatus::Downloading {
                    entry.state.progress_percent = percent.clamp(0.0, 100.0);
                }
            }
        }
        self.aggregator.report(id, percent);
    }

    /// Record a worker's terminal status on its queue slot.
    pub(crate) fn finish_job(&self, id: JobId, status: TerminalStatus) {
        self.control.unregister(id);
        let completed = {
            let mut queue = self.queue.lock().unwrap();
            let Some(entry) = queue.entries.iter_mut().find(|e| e.id == id) else {
                tracing::warn!(job_id = id, "finished job no longer in queue");
                return;
            };
            match status {
                TerminalStatus::Completed => {
                    entry.state.status = JobStatus::Completed;
                    entry.state.progress_percent = 100.0;
                    entry.state.resume_ref = None;
                    entry.state.error = None;
                    true
                }
                TerminalStatus::Stopped { resume_ref } => {
                    entry.state.status = JobStatus::Stopped;
                    entry.state.resume_ref = resume_ref;
                    false
                }
                TerminalStatus::Failed { error, resume_ref } => {
                    entry.state.status = JobStatus::Failed;
                    entry.state.resume_ref = resume_ref;
                    entry.state.error = Some(error.to_string());
                    false
                }
            }
        };
        if completed {
            self.aggregator.note_completed(id);
        } else {
            self.aggregator.note_inactive(id);
        }
    }

    /// Count terminal states and publish the run summary.
    pub(crate) fn record_summary(&self) {
        let summary = {
            let queue = self.queue.lock().unwrap();
            let mut summary = RunSummary {
                completed: 0,
                failed: 0,
                stopped: 0,
                total: queue.entries.len(),
            };
            for entry in &queue.entries {
                match entry.state.status {
                    JobStatus::Completed => summary.completed += 1,
                    JobStatus::Failed => summary.failed += 1,
                    JobStatus::Stopped => summary.stopped += 1,
                    JobStatus::Queued | JobStatus::Downloading => {}
                }
            }
            summary
        };
        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            stopped = summary.stopped,
            "queue run finished: {}",
            summary.succeeded_line()
        );
        *self.summary.lock().unwrap() = Some(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::job::{JobKind, JobOrigin, QualitySelector};
    use crate::ledger::db::open_memory;
    use crate::outpath::DestinationTemplate;
    use crate::transfer::{TransferError, TransferOutcome, TransferProgress, TransferRequest};
    use async_trait::async_trait;

    struct NoopFetcher;

    #[async_trait]
    impl MetadataFetcher for NoopFetcher {
        async fn fetch(&self, _url: &str) -> Result<MediaMetadata, FetchError> {
            Err(FetchError::NotFound)
        }
    }

    struct NoopTransfer;

    #[async_trait]
    impl TransferExecutor for NoopTransfer {
        async fn transfer(
            &self,
            _request: &TransferRequest,
            _progress: &(dyn Fn(TransferProgress) + Send + Sync),
            _cancel: &CancelToken,
        ) -> Result<TransferOutcome, TransferError> {
            Ok(TransferOutcome::Completed)
        }
    }

    async fn orchestrator() -> QueueOrchestrator {
        QueueOrchestrator::new(
            &VdqConfig::default(),
            Arc::new(NoopFetcher),
            Arc::new(NoopTransfer),
            open_memory().await.unwrap(),
        )
    }

    fn descriptor(url: &str) -> JobDescriptor {
        JobDescriptor::new(
            url,
            JobKind::VideoContainer,
            QualitySelector::Best,
            DestinationTemplate::new("/tmp/{title}.mp4"),
            JobOrigin::SingleItem,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn enqueue_preserves_insertion_order() {
        let queue = orchestrator().await;
        queue.enqueue(descriptor("https://v.example/a"));
        queue.enqueue(descriptor("https://v.example/b"));

        let statuses = queue.statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].source_url, "https://v.example/a");
        assert_eq!(statuses[1].source_url, "https://v.example/b");
        assert!(statuses.iter().all(|s| s.status == JobStatus::Queued));
    }

    #[tokio::test]
    async fn remove_rejects_out_of_range() {
        let queue = orchestrator().await;
        queue.enqueue(descriptor("https://v.example/a"));
        assert_eq!(queue.remove(5), Err(QueueError::OutOfRange(5)));
        assert!(queue.remove(0).is_ok());
        assert!(queue.statuses().is_empty());
    }

    #[tokio::test]
    async fn move_item_reorders_pending_list() {
        let queue = orchestrator().await;
        queue.enqueue(descriptor("https://v.example/a"));
        queue.enqueue(descriptor("https://v.example/b"));
        queue.enqueue(descriptor("https://v.example/c"));

        queue.move_item(2, -2).unwrap();
        let statuses = queue.statuses();
        assert_eq!(statuses[0].source_url, "https://v.example/c");
        assert_eq!(statuses[1].source_url, "https://v.example/a");

        // Deltas past the ends clamp instead of failing.
        queue.move_item(0, 10).unwrap();
        assert_eq!(queue.statuses()[2].source_url, "https://v.example/c");
    }

    #[tokio::test]
    async fn clear_empties_an_idle_queue() {
        let queue = orchestrator().await;
        queue.enqueue(descriptor("https://v.example/a"));
        queue.clear().unwrap();
        assert!(queue.statuses().is_empty());
        assert_eq!(queue.overall_progress(), 0.0);
    }

    #[tokio::test]
    async fn claim_next_flips_status_atomically() {
        let queue = orchestrator().await;
        queue.enqueue(descriptor("https://v.example/a"));

        let claimed = queue.inner.claim_next().expect("one queued item");
        assert_eq!(queue.statuses()[0].status, JobStatus::Downloading);
        // The claimed slot is out of the dispatchable set.
        assert!(queue.inner.claim_next().is_none());
        // And a downloading slot rejects list mutation.
        assert_eq!(queue.remove(0), Err(QueueError::SlotDownloading(0)));
        assert_eq!(queue.move_item(0, 1), Err(QueueError::SlotDownloading(0)));

        queue.inner.finish_job(claimed.id, TerminalStatus::Completed);
        assert_eq!(queue.statuses()[0].status, JobStatus::Completed);
    }
}
