//! Daemon bootstrap: resolve configuration and the overflow directory
//!
//! Loads the optional TOML file and environment, layers command-line
//! overrides on top, verifies the overflow directory, and builds the
//! [`ExecService`] the protocol loop serves.

use runhost_core::{load_runtime_config, ExecService, RuntimeConfig, TempDirectory};
use std::path::PathBuf;
use tracing::info;

use crate::{DaemonError, Result};

/// Command-line overrides applied after file and environment
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    /// Optional TOML configuration file
    pub config_path: Option<PathBuf>,
    /// Overrides `maxOutputSize`
    pub max_output_size: Option<usize>,
    /// Overrides `tempDir`
    pub temp_dir: Option<PathBuf>,
    /// Overrides `defaultTimeoutMs`
    pub timeout_ms: Option<u64>,
}

impl BootstrapOptions {
    /// Layer the overrides onto `config` and re-validate
    pub fn apply(&self, mut config: RuntimeConfig) -> Result<RuntimeConfig> {
        if let Some(size) = self.max_output_size {
            config.max_output_size = size;
            if config.max_buffer_size < size {
                config.max_buffer_size = size;
            }
        }
        if let Some(dir) = &self.temp_dir {
            config.temp_dir = Some(dir.clone());
        }
        if let Some(ms) = self.timeout_ms {
            config.default_timeout_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Resolve configuration and build the service
pub async fn bootstrap(options: &BootstrapOptions) -> Result<ExecService> {
    let config = load_runtime_config(options.config_path.as_deref())
        .map_err(|e| DaemonError::StartupError(e.to_string()))?;
    let config = options.apply(config)?;

    let dirs = TempDirectory::resolve(config.temp_dir.as_deref()).await;
    info!(
        "Overflow files go to {} (max output {} bytes, default timeout {} ms)",
        dirs.effective().display(),
        config.max_output_size,
        config.default_timeout_ms
    );

    Ok(ExecService::unix(config, dirs))
}
