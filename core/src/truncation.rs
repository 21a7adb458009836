//! Truncation policy shared by every text blob leaving the service
//!
//! A blob within the limit passes through untouched. A larger blob is cut to
//! the limit (on a UTF-8 boundary), the full text is persisted through the
//! [`OverflowWriter`], and a notice naming the limit and the saved path is
//! appended. Persistence failure only changes the notice.

use crate::overflow::{overflow_file_name, OverflowWriter};
use schema::OverflowInfo;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bounded view of a text blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationResult {
    /// The text to hand out: the blob itself, or its head plus a notice
    pub content: String,
    /// Byte length of the original blob
    pub original_size: usize,
    /// Bytes of the original kept in `content` (only when truncated)
    pub truncated_size: Option<usize>,
    /// Where the full blob was saved (only when persistence succeeded)
    pub file_path: Option<PathBuf>,
    /// Whether the blob exceeded the limit
    pub overflow: bool,
}

impl TruncationResult {
    /// Pass-through result for a blob within the limit
    fn unchanged(text: &str) -> Self {
        Self {
            content: text.to_string(),
            original_size: text.len(),
            truncated_size: None,
            file_path: None,
            overflow: false,
        }
    }

    /// Wire descriptor, present only when the blob overflowed
    pub fn overflow_info(&self) -> Option<OverflowInfo> {
        if !self.overflow {
            return None;
        }
        Some(OverflowInfo {
            original_size: self.original_size,
            truncated_size: self.truncated_size.unwrap_or_default(),
            file_path: self
                .file_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        })
    }
}

/// Size limit plus the writer used for overflowing blobs
#[derive(Debug, Clone)]
pub struct TruncationPolicy {
    max_size: usize,
    writer: Arc<OverflowWriter>,
}

impl TruncationPolicy {
    /// Create a policy with a default limit
    pub fn new(max_size: usize, writer: Arc<OverflowWriter>) -> Self {
        Self { max_size, writer }
    }

    /// Default limit in bytes
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Writer used for overflowing blobs
    pub fn writer(&self) -> &Arc<OverflowWriter> {
        &self.writer
    }

    /// Apply the policy with the default limit
    pub async fn apply(&self, text: &str, category: &str) -> TruncationResult {
        self.apply_with_limit(text, category, self.max_size).await
    }

    /// Apply the policy with an explicit limit
    pub async fn apply_with_limit(
        &self,
        text: &str,
        category: &str,
        max_size: usize,
    ) -> TruncationResult {
        if text.len() <= max_size {
            return TruncationResult::unchanged(text);
        }

        let cut = char_boundary_at_or_before(text, max_size);
        let head = &text[..cut];
        let file_name = overflow_file_name(category);

        let (notice, file_path) = match self.writer.persist(&file_name, text.as_bytes()).await {
            Ok(path) => {
                debug!(
                    "Truncated {} output from {} to {} bytes, saved to {}",
                    category,
                    text.len(),
                    cut,
                    path.display()
                );
                (saved_notice(max_size, &path), Some(path))
            }
            Err(e) => {
                warn!("Could not save full {} output: {}", category, e);
                (unsaved_notice(max_size), None)
            }
        };

        TruncationResult {
            content: format!("{}{}", head, notice),
            original_size: text.len(),
            truncated_size: Some(cut),
            file_path,
            overflow: true,
        }
    }
}

/// Notice appended when the full output was saved
pub fn saved_notice(max_size: usize, path: &Path) -> String {
    format!(
        "\n\n[Output truncated: exceeded {} bytes. Full output saved to: {}]",
        max_size,
        path.display()
    )
}

/// Notice appended when the full output could not be saved
pub fn unsaved_notice(max_size: usize) -> String {
    format!(
        "\n\n[Output truncated: exceeded {} bytes. Full output could not be saved.]",
        max_size
    )
}

/// Largest char boundary in `text` that is `<= max_bytes`
fn char_boundary_at_or_before(text: &str, max_bytes: usize) -> usize {
    if max_bytes >= text.len() {
        return text.len();
    }
    let mut idx = max_bytes;
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Largest char boundary in `text` that leaves at most `max_bytes` after it
pub(crate) fn char_boundary_for_tail(text: &str, max_bytes: usize) -> usize {
    if max_bytes >= text.len() {
        return 0;
    }
    let mut idx = text.len() - max_bytes;
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
