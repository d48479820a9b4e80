//! Drive one job: metadata fetch, format selection, destination, transfer.
//!
//! The runner owns the per-job pipeline and reports a three-way terminal
//! status. Errors never cross the orchestrator boundary; they end up as
//! structured state on the queue slot.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::control::CancelToken;
use crate::fetch::{FetchError, MediaMetadata, MetadataFetcher};
use crate::job::{JobDescriptor, JobKind, QualitySelector};
use crate::ledger::{ResumeEntry, ResumeLedger};
use crate::outpath;
use crate::transfer::{TransferError, TransferExecutor, TransferOutcome, TransferRequest};

/// Errors that terminate a single job. `FormatUnavailable` has no variant
/// here on purpose: a missing exact quality match falls back to the nearest
/// available stream inside the selector and never surfaces.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("metadata fetch failed: {0}")]
    MetadataFetch(#[from] FetchError),
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

/// Three-way terminal result of one job run.
///
/// `resume_ref` carries the ledger key when a partial artifact was recorded,
/// so the orchestrator can surface resumability without touching the ledger.
#[derive(Debug)]
pub enum TerminalStatus {
    Completed,
    Stopped { resume_ref: Option<String> },
    Failed { error: JobError, resume_ref: Option<String> },
}

/// Collaborators and stores a runner needs; cheap to clone per dispatch.
#[derive(Clone)]
pub struct RunnerContext {
    pub fetcher: Arc<dyn MetadataFetcher>,
    pub transfer: Arc<dyn TransferExecutor>,
    pub ledger: ResumeLedger,
    /// Forwarded to the transfer backend, not enforced here.
    pub rate_limit: Option<u64>,
}

/// Run one job to a terminal status.
///
/// `prefetched` metadata (from the parse step) skips the fetch; the cancel
/// token is polled before the transfer and at every progress callback.
pub async fn run_job(
    ctx: &RunnerContext,
    job: &JobDescriptor,
    prefetched: Option<MediaMetadata>,
    cancel: &CancelToken,
    progress: &(dyn Fn(f32) + Send + Sync),
) -> TerminalStatus {
    let metadata = match prefetched {
        Some(m) => m,
        None => match ctx.fetcher.fetch(&job.source_url).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(url = %job.source_url, error = %e, "metadata fetch failed");
                return TerminalStatus::Failed {
                    error: e.into(),
                    resume_ref: None,
                };
            }
        },
    };

    let selector = job.format_selector();
    if !quality_available(job, &metadata) {
        tracing::debug!(
            url = %job.source_url,
            selector = %selector,
            "requested quality not listed; backend falls back to nearest available"
        );
    }

    // Reuse a live partial from the ledger so the backend appends instead of
    // restarting; otherwise resolve the template against the fetched title.
    let resumed_from = resume_target(&ctx.ledger, &job.source_url).await;
    let output_path = match &resumed_from {
        Some(partial) => outpath::final_from_partial(partial),
        None => job.destination.resolve(&metadata.title),
    };

    if cancel.is_cancelled() {
        return TerminalStatus::Stopped {
            resume_ref: resumed_from.map(|_| job.source_url.clone()),
        };
    }

    let request = TransferRequest {
        format_selector: selector,
        output_path: output_path.clone(),
        resume: true,
        rate_limit: ctx.rate_limit,
    };

    let last_percent = Mutex::new(0.0f64);
    let progress_cb = |p: crate::transfer::TransferProgress| {
        if let Some(fraction) = p.fraction() {
            let percent = fraction * 100.0;
            *last_percent.lock().unwrap() = percent;
            progress(percent as f32);
        }
        tracing::trace!(
            url = %job.source_url,
            downloaded = p.downloaded_bytes,
            phase = ?p.phase,
            "transfer progress"
        );
    };

    match ctx.transfer.transfer(&request, &progress_cb, cancel).await {
        Ok(TransferOutcome::Completed) => {
            if let Err(e) = ctx.ledger.remove(&job.source_url).await {
                tracing::warn!(url = %job.source_url, error = %e, "failed to clear resume entry");
            }
            tracing::info!(url = %job.source_url, path = %output_path.display(), "job completed");
            TerminalStatus::Completed
        }
        Ok(TransferOutcome::Cancelled) => {
            let percent = *last_percent.lock().unwrap();
            let resume_ref =
                record_partial(&ctx.ledger, &job.source_url, &output_path, percent).await;
            tracing::info!(url = %job.source_url, "job stopped at checkpoint");
            TerminalStatus::Stopped { resume_ref }
        }
        Err(e) => {
            let percent = *last_percent.lock().unwrap();
            let resume_ref =
                record_partial(&ctx.ledger, &job.source_url, &output_path, percent).await;
            tracing::warn!(url = %job.source_url, error = %e, "job failed");
            TerminalStatus::Failed {
                error: e.into(),
                resume_ref,
            }
        }
    }
}

/// Whether the fetched format list has an exact match under the requested
/// ceiling. Only used for logging; the selector's fallback tail handles the
/// actual nearest-available policy.
fn quality_available(job: &JobDescriptor, metadata: &MediaMetadata) -> bool {
    match (job.kind, job.quality) {
        (_, QualitySelector::Best) => true,
        (JobKind::VideoContainer, QualitySelector::Limit(height)) => {
            metadata.has_height_within(height)
        }
        (JobKind::AudioOnly, QualitySelector::Limit(kbps)) => {
            metadata.has_audio_bitrate_within(kbps)
        }
    }
}

/// The ledger's partial path for this URL, if the file still exists.
async fn resume_target(ledger: &ResumeLedger, url: &str) -> Option<PathBuf> {
    let entry = match ledger.get(url).await {
        Ok(entry) => entry?,
        Err(e) => {
            tracing::warn!(%url, error = %e, "resume ledger read failed");
            return None;
        }
    };
    let exists = tokio::fs::try_exists(&entry.partial_file_path)
        .await
        .unwrap_or(false);
    exists.then_some(entry.partial_file_path)
}

/// Record a resume entry if a partial artifact is actually on disk.
/// Returns the ledger key when an entry was written.
async fn record_partial(
    ledger: &ResumeLedger,
    url: &str,
    output_path: &Path,
    percent: f64,
) -> Option<String> {
    let partial = outpath::partial_path(output_path);
    if !tokio::fs::try_exists(&partial).await.unwrap_or(false) {
        return None;
    }
    let entry = ResumeEntry::new(partial, percent);
    match ledger.put(url, &entry).await {
        Ok(()) => Some(url.to_string()),
        Err(e) => {
            tracing::warn!(%url, error = %e, "failed to record resume entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::QueueControl;
    use crate::fetch::FormatInfo;
    use crate::job::JobOrigin;
    use crate::ledger::db::open_memory;
    use crate::outpath::DestinationTemplate;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingFetcher;

    #[async_trait]
    impl MetadataFetcher for FailingFetcher {
        async fn fetch(&self, _url: &str) -> Result<MediaMetadata, FetchError> {
            Err(FetchError::NotFound)
        }
    }

    struct CountingFetcher(AtomicUsize);

    #[async_trait]
    impl MetadataFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<MediaMetadata, FetchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(sample_metadata())
        }
    }

    struct NoopTransfer;

    #[async_trait]
    impl TransferExecutor for NoopTransfer {
        async fn transfer(
            &self,
            _request: &TransferRequest,
            progress: &(dyn Fn(crate::transfer::TransferProgress) + Send + Sync),
            _cancel: &CancelToken,
        ) -> Result<TransferOutcome, TransferError> {
            progress(crate::transfer::TransferProgress {
                downloaded_bytes: 10,
                total_bytes: Some(10),
                total_bytes_estimate: None,
                phase: crate::transfer::TransferPhase::Finished,
            });
            Ok(TransferOutcome::Completed)
        }
    }

    fn sample_metadata() -> MediaMetadata {
        MediaMetadata {
            title: "Sample".to_string(),
            duration_secs: Some(60),
            formats: vec![FormatInfo {
                format_id: "136".to_string(),
                height: Some(720),
                audio_bitrate: None,
            }],
            thumbnail_url: None,
        }
    }

    fn sample_job() -> JobDescriptor {
        JobDescriptor::new(
            "https://video.example/watch?v=abc",
            JobKind::VideoContainer,
            QualitySelector::Limit(1080),
            DestinationTemplate::new("/tmp/{title}.mp4"),
            JobOrigin::SingleItem,
        )
        .unwrap()
    }

    async fn context(fetcher: Arc<dyn MetadataFetcher>) -> RunnerContext {
        RunnerContext {
            fetcher,
            transfer: Arc::new(NoopTransfer),
            ledger: open_memory().await.unwrap(),
            rate_limit: None,
        }
    }

    #[tokio::test]
    async fn fetch_failure_becomes_failed_status() {
        let ctx = context(Arc::new(FailingFetcher)).await;
        let control = QueueControl::new();
        let token = control.register(1);
        let status = run_job(&ctx, &sample_job(), None, &token, &|_| {}).await;
        assert!(matches!(
            status,
            TerminalStatus::Failed {
                error: JobError::MetadataFetch(FetchError::NotFound),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn prefetched_metadata_skips_fetch() {
        let fetcher = Arc::new(CountingFetcher(AtomicUsize::new(0)));
        let ctx = context(fetcher.clone()).await;
        let control = QueueControl::new();
        let token = control.register(1);
        let status = run_job(&ctx, &sample_job(), Some(sample_metadata()), &token, &|_| {}).await;
        assert!(matches!(status, TerminalStatus::Completed));
        assert_eq!(fetcher.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_before_transfer_is_stopped_not_failed() {
        let ctx = context(Arc::new(FailingFetcher)).await;
        let control = QueueControl::new();
        let token = control.register(1);
        control.stop_all();
        let status = run_job(&ctx, &sample_job(), Some(sample_metadata()), &token, &|_| {}).await;
        assert!(matches!(status, TerminalStatus::Stopped { .. }));
    }

    #[test]
    fn quality_ceiling_detection() {
        let job = sample_job();
        let meta = sample_metadata();
        // 1080 requested, only 720 listed: falls back, not an error.
        assert!(!quality_available(&job, &meta));
        let mut best = job;
        best.quality = QualitySelector::Best;
        assert!(quality_available(&best, &meta));
    }
}
