//! Job descriptors, per-job state, and format-selector resolution.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::outpath::DestinationTemplate;

/// Job identifier, assigned by the orchestrator at enqueue time.
pub type JobId = i64;

/// What the user asked for: a bare audio track or a full video container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    AudioOnly,
    VideoContainer,
}

/// Requested quality: symbolic best, or a concrete ceiling.
///
/// The ceiling is a vertical resolution for video and a kbit/s bitrate for
/// audio. A ceiling with no exact match falls back to the nearest available
/// stream; that is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualitySelector {
    Best,
    Limit(u32),
}

/// Where a queue item came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    SingleItem,
    PlaylistMember { playlist_title: Option<String> },
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("invalid source url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Immutable record describing one requested download.
///
/// Created when the user commits a parse+select action; read-only afterwards.
/// Serializable so the pending queue can be persisted across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub source_url: String,
    pub kind: JobKind,
    pub quality: QualitySelector,
    pub destination: DestinationTemplate,
    pub origin: JobOrigin,
}

impl JobDescriptor {
    pub fn new(
        source_url: impl Into<String>,
        kind: JobKind,
        quality: QualitySelector,
        destination: DestinationTemplate,
        origin: JobOrigin,
    ) -> Result<Self, DescriptorError> {
        let source_url = source_url.into();
        if let Err(e) = Url::parse(&source_url) {
            return Err(DescriptorError::InvalidUrl {
                url: source_url,
                reason: e.to_string(),
            });
        }
        Ok(Self {
            source_url,
            kind,
            quality,
            destination,
            origin,
        })
    }

    /// Concrete format selector for the transfer backend.
    ///
    /// Precedence: explicit ceiling > symbolic best; every ceiling carries a
    /// fallback tail so the backend picks the nearest available stream when
    /// nothing matches exactly.
    pub fn format_selector(&self) -> String {
        match (self.kind, self.quality) {
            (JobKind::AudioOnly, QualitySelector::Best) => "bestaudio/best".to_string(),
            (JobKind::AudioOnly, QualitySelector::Limit(kbps)) => {
                format!("bestaudio[abr<={kbps}]/bestaudio/best")
            }
            (JobKind::VideoContainer, QualitySelector::Best) => {
                "bestvideo+bestaudio/best".to_string()
            }
            (JobKind::VideoContainer, QualitySelector::Limit(height)) => {
                format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
            }
        }
    }
}

/// High-level job status, stored as a string when the queue is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "queued" => JobStatus::Queued,
            "downloading" => JobStatus::Downloading,
            "completed" => JobStatus::Completed,
            "stopped" => JobStatus::Stopped,
            _ => JobStatus::Failed,
        }
    }

    /// Terminal states are never dispatched again within a run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }
}

/// Mutable per-job state, owned by the orchestrator.
///
/// Written only while holding that job's queue slot; a job in `Downloading`
/// is owned by exactly one worker until it reports a terminal status.
#[derive(Debug, Clone)]
pub struct JobState {
    pub status: JobStatus,
    pub progress_percent: f32,
    /// Resume-ledger key (the source URL) when a partial artifact was
    /// recorded for this job.
    pub resume_ref: Option<String>,
    /// Human-readable failure message for the UI status line.
    pub error: Option<String>,
}

impl JobState {
    pub fn queued() -> Self {
        Self {
            status: JobStatus::Queued,
            progress_percent: 0.0,
            resume_ref: None,
            error: None,
        }
    }
}

/// Snapshot of one queue slot for UI display.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub source_url: String,
    pub status: JobStatus,
    pub progress_percent: f32,
    pub resume_ref: Option<String>,
    pub error: Option<String>,
}
