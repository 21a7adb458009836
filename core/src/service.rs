//! Service facade: tool calls in, bounded text replies out
//!
//! Every operation answers with a tagged [`Outcome`]; no error crosses this
//! boundary. [`ExecService::call`] serializes the outcome as pretty JSON and
//! passes the whole envelope through the truncation policy once more, so a
//! reply never exceeds the limit plus a notice.

use crate::adapters::ProcessSpawner;
use crate::background::BackgroundManager;
use crate::config::RuntimeConfig;
use crate::exec::SyncExecutor;
use crate::overflow::{OverflowWriter, TempDirectory};
use crate::truncation::TruncationPolicy;
use schema::{
    ErrorKind, ErrorReport, KillOutcome, LaunchOutcome, ListOutcome, Outcome, RunOutcome, ToolCall,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Category label of truncated reply envelopes
pub const RESPONSE_CATEGORY: &str = "response";

/// Text reply to one tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolReply {
    /// Pretty-printed outcome, possibly truncated
    pub content: String,
    /// Whether the outcome was the failure variant
    pub is_error: bool,
}

/// Command execution service
#[derive(Debug, Clone)]
pub struct ExecService {
    config: RuntimeConfig,
    policy: TruncationPolicy,
    executor: SyncExecutor,
    background: BackgroundManager,
}

impl ExecService {
    /// Build the service from resolved configuration and directories
    pub fn new(config: RuntimeConfig, dirs: TempDirectory, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let writer = Arc::new(OverflowWriter::new(dirs));
        let policy = TruncationPolicy::new(config.max_output_size, Arc::clone(&writer));
        let executor = SyncExecutor::new(&config, Arc::clone(&spawner), policy.clone());
        let background = BackgroundManager::new(&config, spawner, writer);
        Self {
            config,
            policy,
            executor,
            background,
        }
    }

    /// Service backed by real shell processes
    #[cfg(unix)]
    pub fn unix(config: RuntimeConfig, dirs: TempDirectory) -> Self {
        Self::new(config, dirs, Arc::new(crate::adapters::UnixSpawner::new()))
    }

    /// Effective configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Truncation policy shared by outputs and replies
    pub fn policy(&self) -> &TruncationPolicy {
        &self.policy
    }

    /// Background process manager
    pub fn background(&self) -> &BackgroundManager {
        &self.background
    }

    /// Run a command to completion
    pub async fn run(&self, command: &str, cwd: Option<&str>, timeout_ms: Option<u64>) -> RunOutcome {
        self.executor
            .run(
                command,
                cwd.map(PathBuf::from),
                timeout_ms.map(Duration::from_millis),
            )
            .await
    }

    /// Launch a named background process
    pub async fn run_background(&self, command: &str, name: &str, cwd: Option<&str>) -> LaunchOutcome {
        match self
            .background
            .launch(name, command, cwd.map(PathBuf::from))
            .await
        {
            Ok(report) => Outcome::Success(report),
            Err(e) => Outcome::Failure(e.to_report()),
        }
    }

    /// Terminate a named background process
    pub fn kill_background(&self, name: &str) -> KillOutcome {
        match self.background.kill(name) {
            Ok(report) => Outcome::Success(report),
            Err(e) => Outcome::Failure(e.to_report()),
        }
    }

    /// Snapshot the registry
    pub fn list_background(&self) -> ListOutcome {
        Outcome::Success(self.background.list())
    }

    /// Dispatch a tool call and render its outcome
    pub async fn call(&self, call: ToolCall) -> ToolReply {
        debug!("Handling {} call", call.tool_name());
        match call {
            ToolCall::Run {
                command,
                cwd,
                timeout_ms,
            } => {
                let outcome = self.run(&command, cwd.as_deref(), timeout_ms).await;
                self.render(&outcome, !outcome.is_success()).await
            }
            ToolCall::RunBackground { command, name, cwd } => {
                let outcome = self.run_background(&command, &name, cwd.as_deref()).await;
                self.render(&outcome, !outcome.is_success()).await
            }
            ToolCall::KillBackground { name } => {
                let outcome = self.kill_background(&name);
                self.render(&outcome, !outcome.is_success()).await
            }
            ToolCall::ListBackground => {
                let outcome = self.list_background();
                self.render(&outcome, !outcome.is_success()).await
            }
        }
    }

    /// Reply for a request that could not be parsed into a tool call
    pub async fn reject(&self, message: impl Into<String>) -> ToolReply {
        let outcome: Outcome<(), ErrorReport> =
            Outcome::Failure(ErrorReport::new(ErrorKind::InvalidRequest, message));
        self.render(&outcome, true).await
    }

    /// Serialize `outcome` and bound the envelope
    pub async fn render<T: Serialize>(&self, outcome: &T, is_error: bool) -> ToolReply {
        let envelope = match serde_json::to_string_pretty(outcome) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize reply: {}", e);
                return ToolReply {
                    content: format!(
                        "{{\n  \"success\": false,\n  \"error\": \"Failed to serialize reply: {}\",\n  \"kind\": \"INTERNAL\"\n}}",
                        e.to_string().replace('"', "'")
                    ),
                    is_error: true,
                };
            }
        };
        let bounded = self.policy.apply(&envelope, RESPONSE_CATEGORY).await;
        ToolReply {
            content: bounded.content,
            is_error,
        }
    }

    /// Terminate and forget every background process
    pub async fn shutdown(&self) -> usize {
        self.background.shutdown().await
    }
}
