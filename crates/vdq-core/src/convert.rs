//! Converter binary lookup along a fixed search path.
//!
//! The conversion binary is invoked by the transfer backend, never by this
//! crate; the lookup lives here so every backend resolves it the same way.
//! Absence fails the jobs that need conversion, not the process.

use std::path::{Path, PathBuf};

pub const CONVERTER_BIN: &str = "ffmpeg";

/// Resolve the external conversion binary.
///
/// Search order: explicitly configured directory, a `ffmpeg/` directory next
/// to the running executable (bundled layout), a `ffmpeg/` directory under
/// the working directory, then `$PATH`.
pub fn resolve_converter(configured_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = configured_dir {
        if let Some(found) = binary_in(dir) {
            tracing::debug!(path = %found.display(), "converter found in configured dir");
            return Some(found);
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            if let Some(found) = binary_in(&exe_dir.join(CONVERTER_BIN)) {
                tracing::debug!(path = %found.display(), "converter found next to executable");
                return Some(found);
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        if let Some(found) = binary_in(&cwd.join(CONVERTER_BIN)) {
            tracing::debug!(path = %found.display(), "converter found in working dir");
            return Some(found);
        }
    }

    match which::which(CONVERTER_BIN) {
        Ok(found) => Some(found),
        Err(_) => {
            tracing::warn!("converter binary not found in any search location");
            None
        }
    }
}

fn binary_in(dir: &Path) -> Option<PathBuf> {
    let name = if cfg!(windows) {
        "ffmpeg.exe"
    } else {
        CONVERTER_BIN
    };
    let candidate = dir.join(name);
    candidate.is_file().then_some(candidate)
}
