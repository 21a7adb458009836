//! Schema definitions for runhost
//!
//! This crate contains the data structures exchanged between the runhost
//! service and its callers: tool calls, tagged outcomes and background
//! process snapshots. All types here implement JSON Schema generation for
//! external consumption.

pub mod outcome;
pub mod process;
pub mod tool;

#[cfg(test)]
mod json_roundtrip_tests;

pub use outcome::*;
pub use process::*;
pub use tool::*;

use std::time::SystemTime;

/// Create a current timestamp string in RFC3339 format (seconds precision)
#[must_use]
pub fn current_timestamp() -> String {
    format_timestamp(SystemTime::now())
}

/// Format a point in time as RFC3339 (seconds precision)
#[must_use]
pub fn format_timestamp(at: SystemTime) -> String {
    humantime::format_rfc3339_seconds(at).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::schema_for;

    #[test]
    fn test_timestamp_shape() {
        let ts = current_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-01-01T00:00:00Z".len());
    }

    #[test]
    fn test_schema_generation() {
        // Just check that schemas can be generated without panicking
        let _call = schema_for!(ToolCall);
        let _snapshot = schema_for!(ProcessSnapshot);
        let _run = schema_for!(RunFailure);
        let _list = schema_for!(ListReport);
    }
}
