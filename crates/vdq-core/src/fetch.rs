//! Metadata-fetch collaborator contract.
//!
//! The real extractor lives outside this crate; the GUI layer injects it as
//! an `Arc<dyn MetadataFetcher>`. Tests inject scripted fakes.

use async_trait::async_trait;
use thiserror::Error;

/// One stream variant advertised by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatInfo {
    pub format_id: String,
    /// Vertical resolution for video streams.
    pub height: Option<u32>,
    /// Audio bitrate in kbit/s for audio streams.
    pub audio_bitrate: Option<u32>,
}

/// Result of a metadata fetch for one source URL.
#[derive(Debug, Clone)]
pub struct MediaMetadata {
    pub title: String,
    pub duration_secs: Option<u64>,
    pub formats: Vec<FormatInfo>,
    pub thumbnail_url: Option<String>,
}

impl MediaMetadata {
    /// Whether any advertised video stream fits under the given ceiling.
    pub fn has_height_within(&self, ceiling: u32) -> bool {
        self.formats
            .iter()
            .any(|f| f.height.is_some_and(|h| h <= ceiling))
    }

    /// Whether any advertised audio stream fits under the given bitrate.
    pub fn has_audio_bitrate_within(&self, ceiling: u32) -> bool {
        self.formats
            .iter()
            .any(|f| f.audio_bitrate.is_some_and(|b| b <= ceiling))
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no media found at url")]
    NotFound,
    #[error("network failure during metadata fetch: {0}")]
    Network(String),
    #[error("unsupported url or extractor: {0}")]
    Unsupported(String),
}

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<MediaMetadata, FetchError>;
}
