//! Tool calls accepted by the runhost service
//!
//! A call is a flat JSON object whose `tool` field selects the operation and
//! whose remaining fields are that operation's arguments:
//!
//! ```json
//! {"tool": "run", "command": "echo hello", "timeoutMs": 5000}
//! {"tool": "run_background", "command": "sleep 5", "name": "w1"}
//! {"tool": "kill_background", "name": "w1"}
//! {"tool": "list_background"}
//! ```
//!
//! Over the daemon's stdio transport each call travels in a [`ToolRequest`]
//! frame carrying a caller-chosen `id`, answered by a [`ToolResponse`] with
//! the same `id`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One operation request with its arguments
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    /// Run a command to completion and return its output
    #[serde(rename_all = "camelCase")]
    Run {
        /// Shell command line
        command: String,
        /// Working directory
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        /// Deadline in milliseconds (service default when absent)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Launch a named background process
    #[serde(rename_all = "camelCase")]
    RunBackground {
        /// Shell command line
        command: String,
        /// Unique name to register the process under
        name: String,
        /// Working directory
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    /// Terminate a named background process
    KillBackground {
        /// Registered name
        name: String,
    },
    /// Snapshot every registered background process
    ListBackground,
}

impl ToolCall {
    /// Wire name of the selected tool
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolCall::Run { .. } => "run",
            ToolCall::RunBackground { .. } => "run_background",
            ToolCall::KillBackground { .. } => "kill_background",
            ToolCall::ListBackground => "list_background",
        }
    }
}

/// One request frame: a correlation id plus the flattened call
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ToolRequest {
    /// Echoed back in the response; any JSON value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// The call itself
    #[serde(flatten)]
    pub call: ToolCall,
}

/// One response frame
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// Id of the request being answered (null when it could not be read)
    pub id: Option<serde_json::Value>,
    /// Whether the outcome is a failure
    pub is_error: bool,
    /// Pretty-printed outcome, truncated if it exceeded the output limit
    pub content: String,
}
