//! Core functionality for runhost
//!
//! Command execution with bounded output capture:
//!
//! - [`exec`]: run a command to completion under a deadline
//! - [`background`]: named background processes, their registry and lifecycle
//! - [`accumulator`]: per-stream chunk ring with overflow detection
//! - [`truncation`] and [`overflow`]: bounding text and saving what does not fit
//! - [`service`]: the tool-call facade used by the daemon

pub mod accumulator;
pub mod adapters;
pub mod background;
pub mod config;
pub mod error;
pub mod exec;
pub mod overflow;
pub mod process;
pub mod service;
pub mod truncation;


// Re-export schema types for convenience
pub use schema::*;

pub use config::{load_runtime_config, RuntimeConfig};
pub use error::{CoreError, Result};
pub use overflow::{OverflowWriter, TempDirectory};
pub use service::{ExecService, ToolReply};
pub use truncation::{TruncationPolicy, TruncationResult};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing on stderr
    ///
    /// `RUST_LOG` wins over `level` when set. stdout is left alone because
    /// the daemon speaks its protocol there.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| crate::CoreError::ConfigurationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
