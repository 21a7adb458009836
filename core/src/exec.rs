//! Synchronous execution: run a command to completion and return its output
//!
//! Output is collected in memory up to a raw ceiling per stream. The run ends
//! on whichever comes first: exit, the deadline, or a stream hitting the
//! ceiling. The last two cancel the process group (SIGTERM, then SIGKILL
//! after the kill grace) and resolve as failures. Both streams then go
//! through the truncation policy. Nothing here touches the registry.

use crate::adapters::{ManagedChild, OutputStream, ProcessSignaller, ProcessSpawner, SpawnRequest};
use crate::background::{drain_readers, READER_DRAIN_TIMEOUT};
use crate::config::RuntimeConfig;
use crate::process::signal_name;
use crate::truncation::TruncationPolicy;
use crate::CoreError;
use schema::{ErrorKind, ProcessExit, RunFailure, RunOutcome, RunSuccess, StreamKind};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Bytes collected from one stream
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    exceeded: bool,
}

type SharedCapture = Arc<Mutex<Captured>>;

fn take_capture(capture: &SharedCapture) -> Captured {
    std::mem::take(&mut *capture.lock().unwrap_or_else(PoisonError::into_inner))
}

/// SIGKILLs the process group on drop unless an exit was observed
///
/// Covers a caller that drops the `run` future mid-flight: the group lives in
/// its own session and would otherwise outlive the call.
struct GroupGuard {
    signaller: Arc<dyn ProcessSignaller>,
    pid: u32,
    armed: bool,
}

impl GroupGuard {
    fn new(signaller: Arc<dyn ProcessSignaller>, pid: u32) -> Self {
        Self {
            signaller,
            pid,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("Run of pid {} abandoned before exit, sending SIGKILL", self.pid);
        if let Err(e) = self.signaller.kill() {
            warn!("SIGKILL to abandoned pid {} failed: {}", self.pid, e);
        }
    }
}

/// How the wait ended
enum Ending {
    Exited(crate::Result<ProcessExit>),
    TimedOut,
    BufferExceeded,
}

/// Runs commands to completion
#[derive(Clone)]
pub struct SyncExecutor {
    spawner: Arc<dyn ProcessSpawner>,
    policy: TruncationPolicy,
    default_timeout: Duration,
    max_buffer_size: usize,
    kill_grace: Duration,
}

impl std::fmt::Debug for SyncExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncExecutor")
            .field("policy", &self.policy)
            .field("default_timeout", &self.default_timeout)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("kill_grace", &self.kill_grace)
            .finish()
    }
}

impl SyncExecutor {
    /// Create an executor
    pub fn new(
        config: &RuntimeConfig,
        spawner: Arc<dyn ProcessSpawner>,
        policy: TruncationPolicy,
    ) -> Self {
        Self {
            spawner,
            policy,
            default_timeout: config.default_timeout(),
            max_buffer_size: config.max_buffer_size,
            kill_grace: config.kill_grace(),
        }
    }

    /// Run `command`, waiting at most `timeout` (default when `None`)
    ///
    /// Never fails outright: every problem becomes the failure variant.
    pub async fn run(
        &self,
        command: &str,
        cwd: Option<PathBuf>,
        timeout: Option<Duration>,
    ) -> RunOutcome {
        let timeout = timeout.unwrap_or(self.default_timeout);
        debug!("Running '{}' with timeout {:?}", command, timeout);

        let request = SpawnRequest::new(command).with_cwd(cwd);
        let mut child = match self.spawner.spawn(&request).await {
            Ok(child) => child,
            Err(e) => {
                warn!("Could not start '{}': {}", command, e);
                return RunOutcome::Failure(RunFailure {
                    error: e.to_string(),
                    kind: e.kind(),
                    stdout: String::new(),
                    stderr: String::new(),
                    code: None,
                    signal: None,
                    command: command.to_string(),
                    timed_out: false,
                    stdout_overflow: None,
                    stderr_overflow: None,
                });
            }
        };

        let signaller = child.signaller();
        let mut guard = GroupGuard::new(Arc::clone(&signaller), child.pid());
        let ceiling = Arc::new(Notify::new());
        let stdout = SharedCapture::default();
        let stderr = SharedCapture::default();
        let mut readers = Vec::with_capacity(2);
        if let Some(stream) = child.take_stdout() {
            readers.push(self.collect(stream, Arc::clone(&stdout), Arc::clone(&ceiling)));
        }
        if let Some(stream) = child.take_stderr() {
            readers.push(self.collect(stream, Arc::clone(&stderr), Arc::clone(&ceiling)));
        }

        let ending = tokio::select! {
            res = child.wait() => Ending::Exited(res),
            _ = tokio::time::sleep(timeout) => Ending::TimedOut,
            _ = ceiling.notified() => Ending::BufferExceeded,
        };

        let (cancelled, exit) = match ending {
            Ending::Exited(res) => (None, res),
            Ending::TimedOut => (
                Some(Ending::TimedOut),
                self.cancel(child.as_mut(), signaller.as_ref()).await,
            ),
            Ending::BufferExceeded => (
                Some(Ending::BufferExceeded),
                self.cancel(child.as_mut(), signaller.as_ref()).await,
            ),
        };

        if exit.is_ok() {
            guard.disarm();
        }
        drain_readers(readers, READER_DRAIN_TIMEOUT).await;
        let stdout = take_capture(&stdout);
        let stderr = take_capture(&stderr);

        let stdout_text = String::from_utf8_lossy(&stdout.bytes);
        let stderr_text = String::from_utf8_lossy(&stderr.bytes);
        let stdout_view = self.policy.apply(&stdout_text, StreamKind::Stdout.as_str()).await;
        let stderr_view = self.policy.apply(&stderr_text, StreamKind::Stderr.as_str()).await;

        let (code, signal) = match &exit {
            Ok(exit) => (exit.exit_code, exit.signal),
            Err(_) => (None, None),
        };

        let failure = |error: String, kind: ErrorKind, timed_out: bool| {
            RunOutcome::Failure(RunFailure {
                error,
                kind,
                stdout: stdout_view.content.clone(),
                stderr: stderr_view.content.clone(),
                code,
                signal: signal.map(signal_name),
                command: command.to_string(),
                timed_out,
                stdout_overflow: stdout_view.overflow_info(),
                stderr_overflow: stderr_view.overflow_info(),
            })
        };

        let exceeded = stdout.exceeded || stderr.exceeded;
        match (cancelled, exit) {
            (Some(Ending::TimedOut), _) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                info!("'{}' timed out after {} ms", command, timeout_ms);
                failure(
                    CoreError::Timeout { timeout_ms }.to_string(),
                    ErrorKind::Timeout,
                    true,
                )
            }
            (Some(_), _) | (None, Ok(_)) if exceeded => failure(
                format!(
                    "Output exceeded the maximum buffer of {} bytes; command was terminated",
                    self.max_buffer_size
                ),
                ErrorKind::RuntimeFailure,
                false,
            ),
            (_, Err(e)) => failure(e.to_string(), ErrorKind::RuntimeFailure, false),
            (_, Ok(_)) => match (code, signal) {
                (Some(0), _) => RunOutcome::Success(RunSuccess {
                    stdout: stdout_view.content.clone(),
                    stderr: stderr_view.content.clone(),
                    command: command.to_string(),
                    stdout_overflow: stdout_view.overflow_info(),
                    stderr_overflow: stderr_view.overflow_info(),
                }),
                (Some(code), _) => failure(
                    format!("Command failed with exit code {}", code),
                    ErrorKind::RuntimeFailure,
                    false,
                ),
                (None, Some(sig)) => failure(
                    format!("Command terminated by signal {}", signal_name(sig)),
                    ErrorKind::RuntimeFailure,
                    false,
                ),
                (None, None) => failure(
                    "Command ended without an exit status".to_string(),
                    ErrorKind::RuntimeFailure,
                    false,
                ),
            },
        }
    }

    /// Read `stream` into `capture` until EOF or the ceiling
    fn collect(
        &self,
        mut stream: OutputStream,
        capture: SharedCapture,
        ceiling: Arc<Notify>,
    ) -> JoinHandle<()> {
        let max = self.max_buffer_size;
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        debug!("Output read ended: {}", e);
                        break;
                    }
                };
                let mut captured = capture.lock().unwrap_or_else(PoisonError::into_inner);
                let room = max.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.bytes.extend_from_slice(&buf[..room]);
                    captured.exceeded = true;
                    drop(captured);
                    ceiling.notify_one();
                    break;
                }
                captured.bytes.extend_from_slice(&buf[..n]);
            }
        })
    }

    /// SIGTERM the group, then SIGKILL if it outlives the kill grace
    async fn cancel(
        &self,
        child: &mut dyn ManagedChild,
        signaller: &dyn ProcessSignaller,
    ) -> crate::Result<ProcessExit> {
        if let Err(e) = signaller.terminate() {
            warn!("SIGTERM to pid {} failed: {}", child.pid(), e);
        }
        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(res) => res,
            Err(_) => {
                warn!(
                    "pid {} still running {:?} after SIGTERM, sending SIGKILL",
                    child.pid(),
                    self.kill_grace
                );
                signaller.kill()?;
                match tokio::time::timeout(self.kill_grace, child.wait()).await {
                    Ok(res) => res,
                    Err(_) => Err(CoreError::RuntimeFailure(format!(
                        "pid {} did not exit after SIGKILL",
                        child.pid()
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockInstruction, MockSpawner};
    use crate::overflow::{OverflowWriter, TempDirectory};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Debug, Default)]
    struct CountingSignaller {
        kills: AtomicUsize,
    }

    impl ProcessSignaller for CountingSignaller {
        fn terminate(&self) -> crate::Result<()> {
            Ok(())
        }

        fn kill(&self) -> crate::Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn executor(spawner: MockSpawner, dir: &std::path::Path, config: RuntimeConfig) -> SyncExecutor {
        let writer = Arc::new(OverflowWriter::new(TempDirectory::with_default(dir.to_path_buf())));
        let policy = TruncationPolicy::new(config.max_output_size, writer);
        SyncExecutor::new(&config, Arc::new(spawner), policy)
    }

    #[test]
    fn test_guard_kills_unless_disarmed() {
        let signaller = Arc::new(CountingSignaller::default());
        drop(GroupGuard::new(Arc::clone(&signaller) as Arc<dyn ProcessSignaller>, 1));
        assert_eq!(signaller.kills.load(Ordering::SeqCst), 1);

        let mut guard = GroupGuard::new(Arc::clone(&signaller) as Arc<dyn ProcessSignaller>, 2);
        guard.disarm();
        drop(guard);
        assert_eq!(signaller.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mock_success() {
        let dir = tempdir().unwrap();
        let spawner = MockSpawner::with_instructions(vec![MockInstruction::exits(0, "ok\n")]);
        let exec = executor(spawner, dir.path(), RuntimeConfig::default());

        let outcome = exec.run("echo ok", None, None).await;
        assert_eq!(outcome.success().unwrap().stdout, "ok\n");
    }

    #[tokio::test]
    async fn test_mock_timeout_terminates() {
        let dir = tempdir().unwrap();
        let spawner = MockSpawner::with_instructions(vec![MockInstruction::long_running()]);
        let exec = executor(spawner, dir.path(), RuntimeConfig::default());

        let outcome = exec
            .run("sleep 100", None, Some(Duration::from_millis(30)))
            .await;
        let failure = outcome.failure().unwrap();
        assert!(failure.timed_out);
        assert_eq!(failure.signal.as_deref(), Some("SIGTERM"));
    }
}
