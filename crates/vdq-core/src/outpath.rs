//! Destination paths: title sanitization, template resolution, partial naming.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const PART_SUFFIX: &str = "part";
const MAX_TITLE_BYTES: usize = 150;

/// Sanitizes a media title for safe use as a filename.
///
/// - Replaces NUL, `/`, `\`, control characters and the characters Windows
///   reserves (`< > : " | ? *`) with `_`
/// - Collapses consecutive underscores
/// - Trims leading/trailing spaces, dots and underscores
/// - Limits length to 150 bytes so quality tags and extensions still fit
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut prev_underscore = false;

    for c in title.chars() {
        let keep = !(c == '\0'
            || c == '/'
            || c == '\\'
            || c.is_control()
            || matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'));
        if keep {
            out.push(c);
            prev_underscore = false;
        } else if !prev_underscore {
            out.push('_');
            prev_underscore = true;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '.' || c == '_');

    let capped = if trimmed.len() > MAX_TITLE_BYTES {
        let mut take = MAX_TITLE_BYTES;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        &trimmed[..take]
    } else {
        trimmed
    };

    if capped.is_empty() {
        "download".to_string()
    } else {
        capped.to_string()
    }
}

/// Path pattern with a `{title}` placeholder, resolved once metadata is known.
///
/// The pattern is stored verbatim in a job descriptor; resolution substitutes
/// the sanitized title, so the same descriptor always resolves to the same
/// path for the same remote title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationTemplate(String);

impl DestinationTemplate {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn pattern(&self) -> &str {
        &self.0
    }

    /// Substitute the sanitized title into the pattern.
    pub fn resolve(&self, title: &str) -> PathBuf {
        PathBuf::from(self.0.replace("{title}", &sanitize_title(title)))
    }
}

/// Location of the partial artifact for a final output path (`<path>.part`).
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(".");
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Inverse of `partial_path`: the final output path for a partial artifact.
/// Paths without the `.part` suffix are returned unchanged.
pub fn final_from_partial(partial: &Path) -> PathBuf {
    match partial.extension() {
        Some(ext) if ext == PART_SUFFIX => partial.with_extension(""),
        _ => partial.to_path_buf(),
    }
}
