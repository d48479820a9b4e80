//! Scripted collaborators for queue scenario tests.
//!
//! `FakeFetcher` serves canned metadata per URL. `FakeTransfer` moves real
//! bytes through the `.part` convention in a temp directory: it appends to
//! an existing partial when asked to resume, polls the cancellation token
//! between chunks, and can be scripted to fail a named output mid-way.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use vdq_core::control::CancelToken;
use vdq_core::fetch::{FetchError, FormatInfo, MediaMetadata, MetadataFetcher};
use vdq_core::outpath;
use vdq_core::transfer::{
    TransferError, TransferExecutor, TransferOutcome, TransferPhase, TransferProgress,
    TransferRequest,
};

#[derive(Default)]
pub struct FakeFetcher {
    entries: Mutex<HashMap<String, MediaMetadata>>,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, metadata: MediaMetadata) {
        self.entries
            .lock()
            .unwrap()
            .insert(url.to_string(), metadata);
    }

    pub fn video_metadata(title: &str, heights: &[u32]) -> MediaMetadata {
        MediaMetadata {
            title: title.to_string(),
            duration_secs: Some(120),
            formats: heights
                .iter()
                .map(|&h| FormatInfo {
                    format_id: format!("v{h}"),
                    height: Some(h),
                    audio_bitrate: None,
                })
                .collect(),
            thumbnail_url: None,
        }
    }

    pub fn audio_metadata(title: &str, bitrates: &[u32]) -> MediaMetadata {
        MediaMetadata {
            title: title.to_string(),
            duration_secs: Some(240),
            formats: bitrates
                .iter()
                .map(|&b| FormatInfo {
                    format_id: format!("a{b}"),
                    height: None,
                    audio_bitrate: Some(b),
                })
                .collect(),
            thumbnail_url: None,
        }
    }
}

#[async_trait]
impl MetadataFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<MediaMetadata, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(FetchError::NotFound)
    }
}

/// Decrements the in-flight gauge when a transfer leaves scope.
struct InflightGuard<'a>(&'a AtomicUsize);

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeTransfer {
    chunk_count: u64,
    chunk_bytes: u64,
    chunk_delay: Duration,
    /// Output file name -> chunk index at which the transfer errors out.
    fail_after: Mutex<HashMap<String, u64>>,
    /// Output file names in dispatch order.
    pub started: Mutex<Vec<String>>,
    /// Format selectors as received, in dispatch order.
    pub selectors: Mutex<Vec<String>>,
    /// Byte offset each transfer started from (0 = fresh, >0 = resumed).
    pub resume_offsets: Mutex<Vec<u64>>,
    inflight: AtomicUsize,
    /// Highest number of concurrently running transfers observed.
    pub peak_inflight: AtomicUsize,
}

impl FakeTransfer {
    pub fn new(chunk_count: u64, chunk_bytes: u64, chunk_delay: Duration) -> Self {
        Self {
            chunk_count,
            chunk_bytes,
            chunk_delay,
            fail_after: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            selectors: Mutex::new(Vec::new()),
            resume_offsets: Mutex::new(Vec::new()),
            inflight: AtomicUsize::new(0),
            peak_inflight: AtomicUsize::new(0),
        }
    }

    /// Script the transfer for `name` to fail once `chunks` chunks are on disk.
    pub fn fail_named_after(&self, name: &str, chunks: u64) {
        self.fail_after
            .lock()
            .unwrap()
            .insert(name.to_string(), chunks);
    }

    pub fn total_bytes(&self) -> u64 {
        self.chunk_count * self.chunk_bytes
    }

    pub fn started_names(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferExecutor for FakeTransfer {
    async fn transfer(
        &self,
        request: &TransferRequest,
        progress: &(dyn Fn(TransferProgress) + Send + Sync),
        cancel: &CancelToken,
    ) -> Result<TransferOutcome, TransferError> {
        let name = request
            .output_path
            .file_name()
            .expect("output path has a file name")
            .to_string_lossy()
            .to_string();
        self.started.lock().unwrap().push(name.clone());
        self.selectors
            .lock()
            .unwrap()
            .push(request.format_selector.clone());

        let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_inflight.fetch_max(current, Ordering::SeqCst);
        let _guard = InflightGuard(&self.inflight);

        let total = self.total_bytes();

        // Re-transferring an already-complete file is a no-op success.
        if tokio::fs::try_exists(&request.output_path)
            .await
            .unwrap_or(false)
        {
            progress(TransferProgress {
                downloaded_bytes: total,
                total_bytes: Some(total),
                total_bytes_estimate: None,
                phase: TransferPhase::Finished,
            });
            return Ok(TransferOutcome::Completed);
        }

        let partial = outpath::partial_path(&request.output_path);
        let mut downloaded = if request.resume {
            tokio::fs::metadata(&partial)
                .await
                .map(|m| m.len())
                .unwrap_or(0)
        } else {
            0
        };
        self.resume_offsets.lock().unwrap().push(downloaded);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&partial)
            .await?;

        let mut chunk_index = downloaded / self.chunk_bytes;
        while chunk_index < self.chunk_count {
            if cancel.is_cancelled() {
                file.flush().await?;
                return Ok(TransferOutcome::Cancelled);
            }
            let fail_at = self.fail_after.lock().unwrap().get(&name).copied();
            if let Some(fail_at) = fail_at {
                if chunk_index >= fail_at {
                    file.flush().await?;
                    return Err(TransferError::Network("injected failure".to_string()));
                }
            }

            file.write_all(&vec![7u8; self.chunk_bytes as usize])
                .await?;
            downloaded += self.chunk_bytes;
            chunk_index += 1;
            progress(TransferProgress {
                downloaded_bytes: downloaded,
                total_bytes: Some(total),
                total_bytes_estimate: None,
                phase: TransferPhase::Downloading,
            });
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, &request.output_path).await?;
        progress(TransferProgress {
            downloaded_bytes: total,
            total_bytes: Some(total),
            total_bytes_estimate: None,
            phase: TransferPhase::Finished,
        });
        Ok(TransferOutcome::Completed)
    }
}
