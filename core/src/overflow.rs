//! Overflow persistence: writing oversized output to files
//!
//! Output that does not fit in a response is saved to a uniquely named file
//! under the effective temp directory. The directory is resolved once at
//! startup ([`TempDirectory::resolve`]): a caller-configured directory is used
//! only if it exists (or can be created) and is writable, otherwise the run
//! falls back permanently to the system temp directory.
//!
//! Writes degrade in two steps: configured directory, then system default,
//! then give up with [`CoreError::PersistenceFailure`]. Callers treat that
//! error as a content note, never as an operation failure.

use crate::{CoreError, Result};
use schema::StreamKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Longest label kept in a generated file name
const MAX_LABEL_LEN: usize = 64;

static FILE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Resolved overflow directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempDirectory {
    effective: PathBuf,
    system_default: PathBuf,
    rejection: Option<String>,
}

impl TempDirectory {
    /// The system temp directory, with no custom directory configured
    pub fn system() -> Self {
        Self::with_default(std::env::temp_dir())
    }

    /// Use `system_default` as both the effective and the fallback directory
    pub fn with_default(system_default: PathBuf) -> Self {
        Self {
            effective: system_default.clone(),
            system_default,
            rejection: None,
        }
    }

    /// Resolve the effective directory against the system temp directory
    pub async fn resolve(custom: Option<&Path>) -> Self {
        Self::resolve_with_default(custom, std::env::temp_dir()).await
    }

    /// Resolve the effective directory against an explicit default
    ///
    /// A custom directory that fails verification is reported through
    /// [`TempDirectory::rejection`] and the default is used instead.
    pub async fn resolve_with_default(custom: Option<&Path>, system_default: PathBuf) -> Self {
        let mut dirs = Self::with_default(system_default);
        let Some(custom) = custom else {
            return dirs;
        };

        match verify_directory(custom).await {
            Ok(()) => {
                info!("Using overflow directory {}", custom.display());
                dirs.effective = custom.to_path_buf();
            }
            Err(e) => {
                warn!(
                    "Overflow directory {} is unusable, falling back to {}: {}",
                    custom.display(),
                    dirs.system_default.display(),
                    e
                );
                dirs.rejection = Some(e.to_string());
            }
        }
        dirs
    }

    /// Directory new overflow files are written to
    pub fn effective(&self) -> &Path {
        &self.effective
    }

    /// Fallback directory
    pub fn system_default(&self) -> &Path {
        &self.system_default
    }

    /// Whether a verified custom directory is in use
    pub fn is_custom(&self) -> bool {
        self.effective != self.system_default
    }

    /// Why the configured directory was rejected, if it was
    pub fn rejection(&self) -> Option<&str> {
        self.rejection.as_deref()
    }
}

/// Check that `dir` exists (creating it if needed) and accepts new files
pub async fn verify_directory(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        CoreError::ConfigurationError(format!("cannot create {}: {}", dir.display(), e))
    })?;

    let meta = tokio::fs::metadata(dir).await?;
    if !meta.is_dir() {
        return Err(CoreError::ConfigurationError(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let scratch = dir.join(format!(".runhost-write-check-{}", std::process::id()));
    tokio::fs::write(&scratch, b"").await.map_err(|e| {
        CoreError::ConfigurationError(format!("{} is not writable: {}", dir.display(), e))
    })?;
    if let Err(e) = tokio::fs::remove_file(&scratch).await {
        debug!("Failed to remove write-check file {}: {}", scratch.display(), e);
    }
    Ok(())
}

/// Writes overflow content under the resolved temp directory
#[derive(Debug, Clone)]
pub struct OverflowWriter {
    dirs: TempDirectory,
}

impl OverflowWriter {
    /// Create a writer for the given directory resolution
    pub fn new(dirs: TempDirectory) -> Self {
        Self { dirs }
    }

    /// Directory resolution in use
    pub fn dirs(&self) -> &TempDirectory {
        &self.dirs
    }

    /// Path a file of this name gets in the effective directory
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dirs.effective.join(file_name)
    }

    /// Persist `content` as `file_name`, retrying once in the system default
    /// directory if the custom directory fails
    pub async fn persist(&self, file_name: &str, content: &[u8]) -> Result<PathBuf> {
        let primary = self.path_for(file_name);
        let primary_err = match tokio::fs::write(&primary, content).await {
            Ok(()) => {
                debug!("Saved {} bytes to {}", content.len(), primary.display());
                return Ok(primary);
            }
            Err(e) => e,
        };

        if !self.dirs.is_custom() {
            return Err(CoreError::PersistenceFailure(format!(
                "{}: {}",
                primary.display(),
                primary_err
            )));
        }

        warn!(
            "Failed to write {}: {}; retrying in {}",
            primary.display(),
            primary_err,
            self.dirs.system_default.display()
        );
        let fallback = self.dirs.system_default.join(file_name);
        match tokio::fs::write(&fallback, content).await {
            Ok(()) => Ok(fallback),
            Err(e) => Err(CoreError::PersistenceFailure(format!(
                "{}: {} (after {}: {})",
                fallback.display(),
                e,
                primary.display(),
                primary_err
            ))),
        }
    }

    /// Write `content` to a path that was handed out earlier
    ///
    /// No fallback: the path has already been reported to callers.
    pub async fn persist_at(&self, path: &Path, content: &[u8]) -> Result<()> {
        tokio::fs::write(path, content)
            .await
            .map_err(|e| CoreError::PersistenceFailure(format!("{}: {}", path.display(), e)))
    }
}

/// File name for a truncated blob of the given category (`stdout`, `response`, ...)
pub fn overflow_file_name(category: &str) -> String {
    format!("runhost-{}-{}.txt", sanitize_label(category), unique_stamp())
}

/// File name for the overflow of one stream of a background process
pub fn stream_overflow_file_name(process_name: &str, stream: StreamKind) -> String {
    format!(
        "runhost-bg-{}-{}-{}.log",
        sanitize_label(process_name),
        stream,
        unique_stamp()
    )
}

/// Millisecond timestamp plus a process-wide sequence number
fn unique_stamp() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = FILE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", millis, seq)
}

/// Keep file-name-safe characters, replace the rest with `_`
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .take(MAX_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "output".to_string()
    } else {
        cleaned
    }
}
