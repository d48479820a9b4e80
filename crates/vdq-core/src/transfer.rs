//! Transfer-execution collaborator contract.
//!
//! The backend (extractor library plus conversion binary) is injected as an
//! `Arc<dyn TransferExecutor>`. The contract it must honor:
//!
//! - call the progress callback periodically with byte counts and phase
//! - poll the cancellation token at the same checkpoints and return
//!   `Cancelled` (not an error) when it fires
//! - write partial data to `<output_path>.part` and rename to the final
//!   path on completion
//! - with `resume = true`, append to an existing partial instead of
//!   restarting; re-transferring an already-complete file is a no-op success

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::control::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Downloading,
    Converting,
    Finished,
}

/// One progress callback payload.
///
/// Exactly one of `total_bytes` / `total_bytes_estimate` is usually present;
/// when the exact total is unknown the estimate is the denominator.
#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<u64>,
    pub phase: TransferPhase,
}

impl TransferProgress {
    /// Fraction complete in [0.0, 1.0]; None when no denominator is known.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total_bytes.or(self.total_bytes_estimate)?;
        if total == 0 {
            return None;
        }
        Some((self.downloaded_bytes as f64 / total as f64).min(1.0))
    }
}

/// Everything the backend needs to run one transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub format_selector: String,
    pub output_path: PathBuf,
    /// Always true from the runner; idempotent when no partial exists.
    pub resume: bool,
    /// Optional bytes/sec cap, forwarded from configuration.
    pub rate_limit: Option<u64>,
}

/// Three-way transfer result: completion and cancellation are distinct
/// successes, errors are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The final file exists at `output_path`.
    Completed,
    /// The cancellation token fired; any partial stays at `<output_path>.part`.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("network failure during transfer: {0}")]
    Network(String),
    #[error("disk failure during transfer: {0}")]
    Disk(#[from] std::io::Error),
    #[error("conversion failed: {0}")]
    Conversion(String),
}

#[async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn transfer(
        &self,
        request: &TransferRequest,
        progress: &(dyn Fn(TransferProgress) + Send + Sync),
        cancel: &CancelToken,
    ) -> Result<TransferOutcome, TransferError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_prefers_exact_total() {
        let p = TransferProgress {
            downloaded_bytes: 25,
            total_bytes: Some(100),
            total_bytes_estimate: Some(50),
            phase: TransferPhase::Downloading,
        };
        assert_eq!(p.fraction(), Some(0.25));
    }

    #[test]
    fn fraction_falls_back_to_estimate() {
        let p = TransferProgress {
            downloaded_bytes: 25,
            total_bytes: None,
            total_bytes_estimate: Some(50),
            phase: TransferPhase::Downloading,
        };
        assert_eq!(p.fraction(), Some(0.5));
    }

    #[test]
    fn fraction_is_clamped_and_handles_unknown() {
        let over = TransferProgress {
            downloaded_bytes: 120,
            total_bytes: None,
            total_bytes_estimate: Some(100),
            phase: TransferPhase::Downloading,
        };
        assert_eq!(over.fraction(), Some(1.0));

        let unknown = TransferProgress {
            downloaded_bytes: 120,
            total_bytes: None,
            total_bytes_estimate: None,
            phase: TransferPhase::Downloading,
        };
        assert_eq!(unknown.fraction(), None);

        let zero = TransferProgress {
            downloaded_bytes: 0,
            total_bytes: Some(0),
            total_bytes_estimate: None,
            phase: TransferPhase::Finished,
        };
        assert_eq!(zero.fraction(), None);
    }
}
