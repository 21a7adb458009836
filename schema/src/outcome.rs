//! Tagged results returned by every runhost operation
//!
//! Each operation answers with an [`Outcome`]: a success payload or a failure
//! payload. On the wire both serialize as a flat JSON object with a leading
//! `"success": true|false` field, so callers can branch on a single key while
//! Rust code matches exhaustively on the variant.

use crate::process::ProcessSnapshot;
use schemars::JsonSchema;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Success-or-failure result of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<S, F> {
    /// The operation succeeded
    Success(S),
    /// The operation failed; the payload says why
    Failure(F),
}

impl<S, F> Outcome<S, F> {
    /// Whether this is the success variant
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Borrow the success payload, if any
    pub fn success(&self) -> Option<&S> {
        match self {
            Outcome::Success(s) => Some(s),
            Outcome::Failure(_) => None,
        }
    }

    /// Borrow the failure payload, if any
    pub fn failure(&self) -> Option<&F> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(f) => Some(f),
        }
    }
}

impl<S: Serialize, F: Serialize> Serialize for Outcome<S, F> {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> Result<Z::Ok, Z::Error> {
        #[derive(Serialize)]
        struct Tagged<'a, T> {
            success: bool,
            #[serde(flatten)]
            body: &'a T,
        }

        match self {
            Outcome::Success(body) => Tagged {
                success: true,
                body,
            }
            .serialize(serializer),
            Outcome::Failure(body) => Tagged {
                success: false,
                body,
            }
            .serialize(serializer),
        }
    }
}

impl<'de, S: DeserializeOwned, F: DeserializeOwned> Deserialize<'de> for Outcome<S, F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut value = serde_json::Value::deserialize(deserializer)?;
        let success = value
            .as_object_mut()
            .and_then(|map| map.remove("success"))
            .and_then(|v| v.as_bool())
            .ok_or_else(|| de::Error::missing_field("success"))?;

        if success {
            serde_json::from_value(value)
                .map(Outcome::Success)
                .map_err(de::Error::custom)
        } else {
            serde_json::from_value(value)
                .map(Outcome::Failure)
                .map_err(de::Error::custom)
        }
    }
}

/// Failure category visible to callers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// A background process with this name is already registered
    AlreadyRunning,
    /// No background process with this name is registered
    NotFound,
    /// The OS rejected the spawn
    SpawnFailure,
    /// The process failed after it was spawned (non-zero exit, signal, read error)
    RuntimeFailure,
    /// A synchronous run exceeded its deadline
    Timeout,
    /// Overflow output could not be persisted
    PersistenceFailure,
    /// The request itself was malformed
    InvalidRequest,
    /// Anything else
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::AlreadyRunning => "ALREADY_RUNNING",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::SpawnFailure => "SPAWN_FAILURE",
            ErrorKind::RuntimeFailure => "RUNTIME_FAILURE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::PersistenceFailure => "PERSISTENCE_FAILURE",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Generic failure payload
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// Human-readable error message
    pub error: String,
    /// Failure category
    pub kind: ErrorKind,
}

impl ErrorReport {
    /// Build a report from a kind and message
    pub fn new(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind,
        }
    }
}

/// Truncation details of one captured stream
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OverflowInfo {
    /// Size of the full output in bytes
    pub original_size: usize,
    /// Bytes kept in the response
    pub truncated_size: usize,
    /// Where the full output was saved, if saving succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Successful synchronous run
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunSuccess {
    /// Captured stdout (possibly truncated)
    pub stdout: String,
    /// Captured stderr (possibly truncated)
    pub stderr: String,
    /// Command text as given by the caller
    pub command: String,
    /// Present when stdout was truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_overflow: Option<OverflowInfo>,
    /// Present when stderr was truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_overflow: Option<OverflowInfo>,
}

/// Failed synchronous run
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    /// Human-readable error message
    pub error: String,
    /// Failure category
    pub kind: ErrorKind,
    /// Whatever stdout was captured before the failure
    pub stdout: String,
    /// Whatever stderr was captured before the failure
    pub stderr: String,
    /// Exit code, if the process exited normally
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Terminating signal name, if the process was signalled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// Command text as given by the caller
    pub command: String,
    /// Whether the deadline elapsed
    #[serde(default)]
    pub timed_out: bool,
    /// Present when stdout was truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_overflow: Option<OverflowInfo>,
    /// Present when stderr was truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_overflow: Option<OverflowInfo>,
}

/// Successful background launch
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchReport {
    /// Registered name
    pub name: String,
    /// Process ID of the launched process
    pub pid: u32,
    /// Command text as given by the caller
    pub command: String,
    /// Human-readable confirmation
    pub message: String,
}

/// Successful background kill
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KillReport {
    /// Name that was removed from the registry
    pub name: String,
    /// Process ID that was signalled
    pub pid: u32,
    /// Signal that was delivered (`SIGTERM` or `SIGKILL`)
    pub signal: String,
    /// Human-readable confirmation
    pub message: String,
    /// Overflow file of stdout, written once the process exits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_overflow_path: Option<String>,
    /// Overflow file of stderr, written once the process exits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_overflow_path: Option<String>,
}

/// Registry listing
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListReport {
    /// Number of registered processes
    pub count: usize,
    /// One snapshot per registered process
    pub processes: Vec<ProcessSnapshot>,
    /// Terminal snapshots of processes that exited on their own, most recent last
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recently_exited: Vec<ProcessSnapshot>,
}

/// Result of `run`
pub type RunOutcome = Outcome<RunSuccess, RunFailure>;
/// Result of `run_background`
pub type LaunchOutcome = Outcome<LaunchReport, ErrorReport>;
/// Result of `kill_background`
pub type KillOutcome = Outcome<KillReport, ErrorReport>;
/// Result of `list_background`
pub type ListOutcome = Outcome<ListReport, ErrorReport>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_flag_is_flattened() {
        let outcome: LaunchOutcome = Outcome::Success(LaunchReport {
            name: "w1".to_string(),
            pid: 1234,
            command: "sleep 5".to_string(),
            message: "started".to_string(),
        });
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["name"], "w1");
        assert_eq!(value["pid"], 1234);
    }

    #[test]
    fn test_failure_flag_and_kind() {
        let outcome: KillOutcome = Outcome::Failure(ErrorReport::new(
            ErrorKind::NotFound,
            "No background process named 'x'",
        ));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["kind"], "NOT_FOUND");
        assert!(value["error"].as_str().unwrap().contains("'x'"));
    }

    #[test]
    fn test_outcome_deserialize_requires_success() {
        let err = serde_json::from_str::<KillOutcome>(r#"{"error":"x","kind":"NOT_FOUND"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("success"));
    }

    #[test]
    fn test_error_kind_display_matches_wire() {
        for kind in [
            ErrorKind::AlreadyRunning,
            ErrorKind::NotFound,
            ErrorKind::Timeout,
            ErrorKind::PersistenceFailure,
        ] {
            let wire = serde_json::to_string(&kind).unwrap();
            assert_eq!(wire.trim_matches('"'), kind.to_string());
        }
    }
}
