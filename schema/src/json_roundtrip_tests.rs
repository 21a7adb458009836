//! JSON round-trip tests for schema types
//!
//! These tests verify that the outcome payloads survive serialization to JSON
//! and back, including the flattened `success` tag of [`Outcome`].

#[cfg(test)]
mod tests {
    use crate::*;

    /// Helper to test JSON round-trip for any serializable type
    fn test_json_roundtrip<T>(original: &T)
    where
        T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
    {
        let json = serde_json::to_string(original).expect("Failed to serialize to JSON");
        let deserialized: T = serde_json::from_str(&json).expect("Failed to deserialize from JSON");
        assert_eq!(*original, deserialized, "Round-trip failed for JSON: {}", json);
    }

    fn snapshot(name: &str) -> ProcessSnapshot {
        ProcessSnapshot {
            name: name.to_string(),
            pid: 4242,
            command: "tail -f app.log".to_string(),
            cwd: Some("/var/log".to_string()),
            start_time: "2024-05-01T10:00:00Z".to_string(),
            end_time: None,
            state: ProcessState::Running,
            running: true,
            exit_code: None,
            exit_signal: None,
            error: None,
            stdout: "line 1\nline 2\n".to_string(),
            stderr: String::new(),
            stdout_size: 14,
            stderr_size: 0,
            stdout_overflow: Some(StreamOverflow {
                overflow: true,
                file_path: "/tmp/runhost-bg-tail-stdout-1.log".to_string(),
            }),
            stderr_overflow: None,
        }
    }

    #[test]
    fn test_run_failure_roundtrip() {
        let outcome: RunOutcome = Outcome::Failure(RunFailure {
            error: "Command timed out after 500 ms".to_string(),
            kind: ErrorKind::Timeout,
            stdout: "partial\n".to_string(),
            stderr: String::new(),
            code: None,
            signal: Some("SIGTERM".to_string()),
            command: "echo partial; sleep 5".to_string(),
            timed_out: true,
            stdout_overflow: None,
            stderr_overflow: None,
        });
        test_json_roundtrip(&outcome);
    }

    #[test]
    fn test_run_success_with_overflow_roundtrip() {
        let outcome: RunOutcome = Outcome::Success(RunSuccess {
            stdout: "x".repeat(16),
            stderr: String::new(),
            command: "yes x".to_string(),
            stdout_overflow: Some(OverflowInfo {
                original_size: 61440,
                truncated_size: 51200,
                file_path: Some("/tmp/runhost-stdout-1.txt".to_string()),
            }),
            stderr_overflow: None,
        });
        test_json_roundtrip(&outcome);

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["stdoutOverflow"]["truncatedSize"], 51200);
        assert!(value.get("stderrOverflow").is_none());
    }

    #[test]
    fn test_list_report_roundtrip() {
        let outcome: ListOutcome = Outcome::Success(ListReport {
            count: 1,
            processes: vec![snapshot("tailer")],
            recently_exited: vec![],
        });
        test_json_roundtrip(&outcome);

        let value = serde_json::to_value(&outcome).unwrap();
        assert!(value.get("recentlyExited").is_none());
        assert_eq!(value["processes"][0]["startTime"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn test_kill_report_roundtrip() {
        let outcome: KillOutcome = Outcome::Success(KillReport {
            name: "w1".to_string(),
            pid: 99,
            signal: "SIGTERM".to_string(),
            message: "Killed background process 'w1' (PID 99)".to_string(),
            stdout_overflow_path: None,
            stderr_overflow_path: Some("/tmp/x.log".to_string()),
        });
        test_json_roundtrip(&outcome);
    }

    #[test]
    fn test_tool_call_roundtrip() {
        test_json_roundtrip(&ToolCall::RunBackground {
            command: "npm start".to_string(),
            name: "web".to_string(),
            cwd: Some("/srv/web".to_string()),
        });
        test_json_roundtrip(&ToolCall::ListBackground);
    }
}
