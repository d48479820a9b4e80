//! Types stored in the resume ledger.

use std::path::PathBuf;

use crate::job::{JobDescriptor, JobStatus};

/// One resumable partial download, keyed by source URL.
///
/// An entry exists only while a partial artifact has been observed on disk;
/// completion removes it and startup pruning drops entries whose file has
/// gone missing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeEntry {
    pub partial_file_path: PathBuf,
    pub last_progress_percent: f64,
    /// Unix seconds when the entry was first written.
    pub created_time: i64,
}

impl ResumeEntry {
    pub fn new(partial_file_path: PathBuf, last_progress_percent: f64) -> Self {
        Self {
            partial_file_path,
            last_progress_percent,
            created_time: super::db::unix_timestamp(),
        }
    }
}

/// A pending queue item saved across restarts.
#[derive(Debug, Clone)]
pub struct SavedQueueItem {
    pub position: i64,
    pub descriptor: JobDescriptor,
    pub status: JobStatus,
}
