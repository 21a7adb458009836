//! runhost daemon binary
//!
//! Speaks newline-delimited JSON on stdin/stdout. Logs go to stderr.

#![allow(unused_crate_dependencies)]

use clap::Parser;
use daemon::bootstrap::{bootstrap, BootstrapOptions};
use daemon::{Daemon, DaemonError};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "runhostd", version, about = "Serve shell command execution over stdio")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "RUNHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Truncation limit in bytes
    #[arg(long)]
    max_output_size: Option<usize>,

    /// Directory for overflow files
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Default run timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> daemon::Result<()> {
    let cli = Cli::parse();
    runhost_core::utils::init_tracing(&cli.log_level)?;

    info!("Starting runhost daemon");

    let options = BootstrapOptions {
        config_path: cli.config,
        max_output_size: cli.max_output_size,
        temp_dir: cli.temp_dir,
        timeout_ms: cli.timeout_ms,
    };
    let service = bootstrap(&options).await.map_err(|e| {
        error!("Bootstrap failed: {}", e);
        e
    })?;
    let daemon = Daemon::new(service);

    let served = tokio::select! {
        result = daemon.serve(tokio::io::stdin(), tokio::io::stdout()) => result,
        signal = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            signal.map_err(DaemonError::from)
        }
    };

    daemon.shutdown().await;

    if let Err(e) = &served {
        error!("Daemon failed: {}", e);
    }
    info!("Daemon stopped");
    served
}
