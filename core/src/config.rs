//! Runtime configuration loading and validation
//!
//! Configuration is resolved once by the host process and handed to the
//! service as an explicit value. Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables (`RUNHOST_MAX_OUTPUT_SIZE`, `RUNHOST_TEMP_DIR`, `RUNHOST_TIMEOUT_MS`)
//!
//! Command-line flags are applied on top by the daemon.

use crate::{CoreError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default truncation limit (50 KiB)
pub const DEFAULT_MAX_OUTPUT_SIZE: usize = 50 * 1024;
/// Default synchronous run deadline
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Default raw read ceiling per stream (10 MiB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;
/// Default number of chunks retained per background stream
pub const DEFAULT_CHUNK_CAPACITY: usize = 100;

/// Environment variable overriding `max_output_size`
pub const ENV_MAX_OUTPUT_SIZE: &str = "RUNHOST_MAX_OUTPUT_SIZE";
/// Environment variable overriding `temp_dir`
pub const ENV_TEMP_DIR: &str = "RUNHOST_TEMP_DIR";
/// Environment variable overriding `default_timeout_ms`
pub const ENV_TIMEOUT_MS: &str = "RUNHOST_TIMEOUT_MS";

/// Effective runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Truncation limit and accumulator overflow threshold, in bytes
    pub max_output_size: usize,
    /// Caller-configured overflow directory (verified at startup)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    /// Deadline applied to `run` when the caller gives none
    pub default_timeout_ms: u64,
    /// Hard ceiling on raw bytes read per stream by the synchronous path
    pub max_buffer_size: usize,
    /// Chunk-count cap of each background accumulator
    pub chunk_capacity: usize,
    /// Chunks joined into a list snapshot
    pub snapshot_chunks: usize,
    /// Byte cap of a joined snapshot tail
    pub snapshot_bytes: usize,
    /// Grace between SIGTERM and SIGKILL when cancelling a synchronous run
    pub kill_grace_ms: u64,
    /// Tombstones kept for processes that exited on their own
    pub recent_exit_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
            temp_dir: None,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            snapshot_chunks: 10,
            snapshot_bytes: 1000,
            kill_grace_ms: 2_000,
            recent_exit_capacity: 20,
        }
    }
}

impl RuntimeConfig {
    /// Default deadline as a Duration
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Kill grace as a Duration
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Validate the configuration, reporting the offending field
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("maxOutputSize", self.max_output_size as u64),
            ("defaultTimeoutMs", self.default_timeout_ms),
            ("maxBufferSize", self.max_buffer_size as u64),
            ("chunkCapacity", self.chunk_capacity as u64),
            ("snapshotChunks", self.snapshot_chunks as u64),
            ("snapshotBytes", self.snapshot_bytes as u64),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(CoreError::ValidationError(format!(
                    "{}: must be greater than 0",
                    field
                )));
            }
        }

        if self.max_buffer_size < self.max_output_size {
            return Err(CoreError::ValidationError(format!(
                "maxBufferSize: {} is smaller than maxOutputSize {}",
                self.max_buffer_size, self.max_output_size
            )));
        }

        if let Some(dir) = &self.temp_dir {
            if dir.as_os_str().is_empty() {
                return Err(CoreError::ValidationError(
                    "tempDir: cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Apply environment overrides using the given lookup
    ///
    /// The lookup is injected so tests don't have to mutate the process
    /// environment; production callers pass `|k| std::env::var(k).ok()`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_OUTPUT_SIZE) {
            self.max_output_size = raw.trim().parse().map_err(|e| {
                CoreError::ConfigurationError(format!(
                    "{}: invalid byte count '{}': {}",
                    ENV_MAX_OUTPUT_SIZE, raw, e
                ))
            })?;
        }
        if let Some(raw) = lookup(ENV_TEMP_DIR) {
            if !raw.trim().is_empty() {
                self.temp_dir = Some(PathBuf::from(raw.trim()));
            }
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            self.default_timeout_ms = raw.trim().parse().map_err(|e| {
                CoreError::ConfigurationError(format!(
                    "{}: invalid milliseconds '{}': {}",
                    ENV_TIMEOUT_MS, raw, e
                ))
            })?;
        }
        Ok(())
    }
}

/// Load configuration from a TOML file path
pub fn load_config_from_toml_path(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_config_from_toml_str(&data)
}

/// Load configuration from a TOML string
pub fn load_config_from_toml_str(input: &str) -> Result<RuntimeConfig> {
    let cfg: RuntimeConfig = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Resolve the effective configuration: optional file, then process environment
pub fn load_runtime_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let mut cfg = match path {
        Some(p) => load_config_from_toml_path(p)?,
        None => RuntimeConfig::default(),
    };
    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
