//! Per-process record: lifecycle state plus the two output accumulators

use crate::accumulator::OutputAccumulator;
use crate::process::signal_name;
use schema::{ProcessExit, ProcessSnapshot, ProcessState, StreamKind};
use std::path::{Path, PathBuf};

/// Accumulator sizing shared by every background process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    /// Chunk-count cap per stream
    pub chunk_capacity: usize,
    /// Byte total above which a stream overflows
    pub overflow_threshold: usize,
    /// Chunks joined into a snapshot
    pub snapshot_chunks: usize,
    /// Byte cap of a snapshot tail
    pub snapshot_bytes: usize,
}

/// Captured state of one background process
///
/// Created in the `Running` state once the spawn call has returned a live
/// handle. `Exited` and `Errored` are terminal.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    pid: u32,
    command: String,
    cwd: Option<String>,
    start_time: String,
    end_time: Option<String>,
    state: ProcessState,
    exit_code: Option<i32>,
    exit_signal: Option<i32>,
    error: Option<String>,
    killed: bool,
    stdout: OutputAccumulator,
    stderr: OutputAccumulator,
}

impl ManagedProcess {
    /// Record for a freshly spawned process
    pub fn new(
        name: &str,
        pid: u32,
        command: &str,
        cwd: Option<String>,
        limits: CaptureLimits,
        overflow_dir: &Path,
    ) -> Self {
        let accumulator = |stream| {
            OutputAccumulator::new(
                name,
                stream,
                limits.chunk_capacity,
                limits.overflow_threshold,
                overflow_dir,
            )
        };
        Self {
            name: name.to_string(),
            pid,
            command: command.to_string(),
            cwd,
            start_time: schema::current_timestamp(),
            end_time: None,
            state: ProcessState::Running,
            exit_code: None,
            exit_signal: None,
            error: None,
            killed: false,
            stdout: accumulator(StreamKind::Stdout),
            stderr: accumulator(StreamKind::Stderr),
        }
    }

    /// Registered name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Command text
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// True until an end time is recorded
    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }

    /// Whether a kill or shutdown has claimed this process
    ///
    /// A claimed process leaves no tombstone: the kill response is its
    /// terminal report.
    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Accumulator for `stream`
    pub fn output(&self, stream: StreamKind) -> &OutputAccumulator {
        match stream {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }

    /// Append a chunk; returns `true` when it made the stream overflow
    pub fn append(&mut self, stream: StreamKind, chunk: Vec<u8>) -> bool {
        match stream {
            StreamKind::Stdout => self.stdout.push(chunk),
            StreamKind::Stderr => self.stderr.push(chunk),
        }
    }

    /// `Running → Exited`
    pub fn mark_exited(&mut self, exit: &ProcessExit) {
        if self.state.is_terminal() {
            return;
        }
        self.state = ProcessState::Exited;
        self.exit_code = exit.exit_code;
        self.exit_signal = exit.signal;
        self.end_time = Some(exit.timestamp.clone());
    }

    /// `Running → Errored`
    pub fn mark_errored(&mut self, message: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = ProcessState::Errored;
        self.error = Some(message.into());
        self.end_time = Some(schema::current_timestamp());
    }

    /// Claim the process for a kill
    ///
    /// Fails once an exit has been recorded, so a process that ended on its
    /// own is never also reported as killed.
    pub fn mark_killed(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.killed = true;
        true
    }

    /// Release a claim whose signals could not be delivered
    pub fn clear_killed(&mut self) {
        self.killed = false;
    }

    /// Overflow paths as handed out to callers (stdout, stderr)
    pub fn overflow_paths(&self) -> (Option<PathBuf>, Option<PathBuf>) {
        (
            self.stdout.overflow_path().map(Path::to_path_buf),
            self.stderr.overflow_path().map(Path::to_path_buf),
        )
    }

    /// Files to write at termination: retained chunks of each overflowing stream
    pub fn pending_overflow_writes(&self) -> Vec<(PathBuf, Vec<u8>)> {
        [&self.stdout, &self.stderr]
            .into_iter()
            .filter_map(|acc| {
                acc.overflow_path()
                    .map(|path| (path.to_path_buf(), acc.retained_bytes()))
            })
            .collect()
    }

    /// Point-in-time view for `list_background`
    pub fn snapshot(&self, limits: &CaptureLimits) -> ProcessSnapshot {
        ProcessSnapshot {
            name: self.name.clone(),
            pid: self.pid,
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
            state: self.state,
            running: self.is_running(),
            exit_code: self.exit_code,
            exit_signal: self.exit_signal.map(signal_name),
            error: self.error.clone(),
            stdout: self.stdout.tail(limits.snapshot_chunks, limits.snapshot_bytes),
            stderr: self.stderr.tail(limits.snapshot_chunks, limits.snapshot_bytes),
            stdout_size: self.stdout.total_bytes(),
            stderr_size: self.stderr.total_bytes(),
            stdout_overflow: self.stdout.overflow_descriptor(),
            stderr_overflow: self.stderr.overflow_descriptor(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> CaptureLimits {
        CaptureLimits {
            chunk_capacity: 100,
            overflow_threshold: 8,
            snapshot_chunks: 10,
            snapshot_bytes: 1000,
        }
    }

    fn record() -> ManagedProcess {
        ManagedProcess::new("w1", 4242, "sleep 5", None, limits(), Path::new("/tmp"))
    }

    #[test]
    fn test_new_record_is_running() {
        let rec = record();
        assert_eq!(rec.state(), ProcessState::Running);
        assert!(rec.is_running());
        let snap = rec.snapshot(&limits());
        assert!(snap.running);
        assert_eq!(snap.pid, 4242);
        assert!(snap.end_time.is_none());
        assert!(snap.exit_code.is_none());
    }

    #[test]
    fn test_exit_is_terminal() {
        let mut rec = record();
        rec.mark_exited(&ProcessExit {
            pid: 4242,
            exit_code: None,
            signal: Some(15),
            timestamp: schema::current_timestamp(),
        });
        assert_eq!(rec.state(), ProcessState::Exited);
        assert!(!rec.is_running());

        rec.mark_errored("late error");
        assert_eq!(rec.state(), ProcessState::Exited);

        let snap = rec.snapshot(&limits());
        assert_eq!(snap.exit_signal.as_deref(), Some("SIGTERM"));
        assert!(snap.error.is_none());
    }

    #[test]
    fn test_kill_claim_only_while_running() {
        let mut rec = record();
        assert!(rec.mark_killed());
        assert!(rec.is_killed());
        rec.clear_killed();
        assert!(!rec.is_killed());

        rec.mark_exited(&ProcessExit {
            pid: 4242,
            exit_code: Some(0),
            signal: None,
            timestamp: schema::current_timestamp(),
        });
        assert!(!rec.mark_killed());
        assert!(!rec.is_killed());
    }

    #[test]
    fn test_errored_records_message() {
        let mut rec = record();
        rec.mark_errored("wait failed");
        let snap = rec.snapshot(&limits());
        assert_eq!(snap.state, ProcessState::Errored);
        assert_eq!(snap.error.as_deref(), Some("wait failed"));
        assert!(!snap.running);
    }

    #[test]
    fn test_overflow_writes_only_for_overflowing_streams() {
        let mut rec = record();
        rec.append(StreamKind::Stdout, b"0123456789".to_vec());
        rec.append(StreamKind::Stderr, b"err".to_vec());

        let writes = rec.pending_overflow_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, b"0123456789");

        let (stdout_path, stderr_path) = rec.overflow_paths();
        assert_eq!(stdout_path.as_ref(), Some(&writes[0].0));
        assert!(stderr_path.is_none());

        let snap = rec.snapshot(&limits());
        assert_eq!(snap.stdout_size, 10);
        assert_eq!(snap.stderr, "err");
        assert!(snap.stdout_overflow.is_some());
        assert!(snap.stderr_overflow.is_none());
    }
}
