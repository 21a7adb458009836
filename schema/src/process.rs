//! Background process types for the runhost registry
//!
//! These types describe what a caller can observe about a named background
//! process: its lifecycle state, the way it exited, and the point-in-time
//! snapshot returned by `list_background`.
//!
//! ## Process Lifecycle
//!
//! ```text
//! Spawning → Running → Exited
//!                    ↘ Errored
//! ```
//!
//! `Exited` and `Errored` are terminal; nothing transitions out of them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Output stream of a child process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl StreamKind {
    /// Lowercase label used in file names and log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a managed process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ProcessState {
    /// Spawn call issued, no live handle yet
    #[default]
    Spawning,
    /// Live handle obtained, streams wired
    Running,
    /// Process terminated (exit code and/or signal recorded)
    Exited,
    /// Spawn or runtime error after launch
    Errored,
}

impl ProcessState {
    /// Whether the state is terminal (`Exited` or `Errored`)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited | ProcessState::Errored)
    }

    /// Whether the process is still considered running
    pub fn is_running(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Spawning => "spawning",
            ProcessState::Running => "running",
            ProcessState::Exited => "exited",
            ProcessState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// How a process terminated
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessExit {
    /// Process ID of the exited process
    pub pid: u32,
    /// Exit code (None if terminated by signal)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Raw signal number that terminated the process (Unix only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    /// Exit timestamp in RFC3339 format
    pub timestamp: String,
}

impl ProcessExit {
    /// Whether the process exited with code 0
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Overflow descriptor of one stream in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamOverflow {
    /// Always true when present
    pub overflow: bool,
    /// Where the retained output is (or will be) written
    pub file_path: String,
}

/// Point-in-time view of a background process
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    /// Caller-supplied unique name
    pub name: String,
    /// Process ID (also the process group ID)
    pub pid: u32,
    /// Command text as given by the caller
    pub command: String,
    /// Working directory, if one was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Launch timestamp in RFC3339 format
    pub start_time: String,
    /// Termination timestamp in RFC3339 format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Lifecycle state
    pub state: ProcessState,
    /// True iff no end time has been recorded
    pub running: bool,
    /// Exit code, once exited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Name of the terminating signal, once exited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
    /// Error message for an errored process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tail of the most recent stdout chunks
    pub stdout: String,
    /// Tail of the most recent stderr chunks
    pub stderr: String,
    /// Cumulative stdout bytes received
    pub stdout_size: u64,
    /// Cumulative stderr bytes received
    pub stderr_size: u64,
    /// Stdout overflow descriptor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_overflow: Option<StreamOverflow>,
    /// Stderr overflow descriptor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_overflow: Option<StreamOverflow>,
}
