//! Bounded per-stream output accumulator for background processes
//!
//! Each stream keeps the most recent chunks in a ring bounded by chunk count,
//! alongside a running byte total. Crossing the byte threshold flips a
//! monotonic overflow flag and fixes the path the retained chunks will be
//! written to when the process terminates. Nothing is written per chunk.

use crate::overflow::stream_overflow_file_name;
use crate::truncation::char_boundary_for_tail;
use schema::{StreamKind, StreamOverflow};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Output captured from one stream of a background process
#[derive(Debug)]
pub struct OutputAccumulator {
    stream: StreamKind,
    process_name: String,
    capacity: usize,
    overflow_threshold: usize,
    overflow_dir: PathBuf,
    chunks: VecDeque<Vec<u8>>,
    total_bytes: u64,
    total_evicted: u64,
    overflow: bool,
    overflow_path: Option<PathBuf>,
}

impl OutputAccumulator {
    /// Create an accumulator (capacity must be > 0)
    pub fn new(
        process_name: &str,
        stream: StreamKind,
        capacity: usize,
        overflow_threshold: usize,
        overflow_dir: &Path,
    ) -> Self {
        assert!(capacity > 0, "OutputAccumulator capacity must be > 0");
        Self {
            stream,
            process_name: process_name.to_string(),
            capacity,
            overflow_threshold,
            overflow_dir: overflow_dir.to_path_buf(),
            chunks: VecDeque::with_capacity(capacity),
            total_bytes: 0,
            total_evicted: 0,
            overflow: false,
            overflow_path: None,
        }
    }

    /// Append a chunk read from the stream.
    ///
    /// Returns `true` when this chunk is the one that crossed the threshold.
    pub fn push(&mut self, chunk: Vec<u8>) -> bool {
        self.total_bytes = self.total_bytes.saturating_add(chunk.len() as u64);

        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
            self.total_evicted = self.total_evicted.saturating_add(1);
        }
        self.chunks.push_back(chunk);

        if !self.overflow && self.total_bytes > self.overflow_threshold as u64 {
            self.overflow = true;
            self.overflow_path = Some(
                self.overflow_dir
                    .join(stream_overflow_file_name(&self.process_name, self.stream)),
            );
            return true;
        }
        false
    }

    /// Number of chunks currently retained
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no chunk is retained
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Bytes received over the whole life of the stream
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Chunks evicted by the count cap
    pub fn total_evicted(&self) -> u64 {
        self.total_evicted
    }

    /// Whether the threshold has ever been exceeded
    pub fn is_overflow(&self) -> bool {
        self.overflow
    }

    /// Path assigned when the threshold was first exceeded
    pub fn overflow_path(&self) -> Option<&Path> {
        self.overflow_path.as_deref()
    }

    /// Wire descriptor, present only after overflow
    pub fn overflow_descriptor(&self) -> Option<StreamOverflow> {
        self.overflow_path.as_ref().map(|p| StreamOverflow {
            overflow: true,
            file_path: p.to_string_lossy().into_owned(),
        })
    }

    /// Retained chunks in arrival order
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(Vec::as_slice)
    }

    /// All retained chunks joined, as written to the overflow file
    pub fn retained_bytes(&self) -> Vec<u8> {
        let len = self.chunks.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(len);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// The last `max_chunks` chunks joined and capped to the last `max_bytes`
    pub fn tail(&self, max_chunks: usize, max_bytes: usize) -> String {
        let skip = self.chunks.len().saturating_sub(max_chunks);
        let mut joined = Vec::new();
        for chunk in self.chunks.iter().skip(skip) {
            joined.extend_from_slice(chunk);
        }
        let text = String::from_utf8_lossy(&joined);
        let start = char_boundary_for_tail(&text, max_bytes);
        text[start..].to_string()
    }
}
