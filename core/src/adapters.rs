//! Process spawning seam
//!
//! The lifecycle manager and the synchronous path only see these traits:
//! "start a process, hand out its stdout/stderr as byte streams, report its
//! exit, signal it". [`UnixSpawner`] backs them with real shell processes and
//! [`MockSpawner`] with scripted output for tests.

use crate::{CoreError, Result};
use async_trait::async_trait;
use schema::ProcessExit;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tracing::debug;

/// Readable end of a child's output stream
pub type OutputStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Shell command text
    pub command: String,
    /// Working directory, inherited when absent
    pub cwd: Option<PathBuf>,
}

impl SpawnRequest {
    /// Request for `command` in the inherited working directory
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
        }
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }
}

/// Starts processes
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Spawn a process; failure here is a `SpawnFailure`
    async fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn ManagedChild>>;
}

/// A spawned process owned by exactly one waiter
#[async_trait]
pub trait ManagedChild: Send {
    /// Process ID
    fn pid(&self) -> u32;

    /// Shareable handle for signalling the process after it has been moved
    /// into its waiter
    fn signaller(&self) -> Arc<dyn ProcessSignaller>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessExit>;

    /// Take stdout, if piped and not yet taken
    fn take_stdout(&mut self) -> Option<OutputStream>;

    /// Take stderr, if piped and not yet taken
    fn take_stderr(&mut self) -> Option<OutputStream>;
}

/// Delivers termination signals
pub trait ProcessSignaller: Send + Sync + Debug {
    /// Graceful termination (SIGTERM)
    fn terminate(&self) -> Result<()>;

    /// Forceful termination (SIGKILL)
    fn kill(&self) -> Result<()>;
}

/// Real shell processes in their own process groups
#[cfg(unix)]
#[derive(Copy, Clone, Debug, Default)]
pub struct UnixSpawner;

#[cfg(unix)]
impl UnixSpawner {
    /// Create a Unix spawner
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessSpawner for UnixSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn ManagedChild>> {
        let child = crate::process::unix::spawn_shell(&request.command, request.cwd.as_deref())?;
        Ok(Box::new(UnixChild { child }))
    }
}

#[cfg(unix)]
struct UnixChild {
    child: crate::process::unix::ChildProcess,
}

#[cfg(unix)]
#[async_trait]
impl ManagedChild for UnixChild {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    fn signaller(&self) -> Arc<dyn ProcessSignaller> {
        Arc::new(self.child.group())
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        let status = self.child.wait().await?;
        let (exit_code, signal) = crate::process::unix::exit_parts(status);
        Ok(ProcessExit {
            pid: self.pid(),
            exit_code,
            signal,
            timestamp: schema::current_timestamp(),
        })
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.child.take_stdout().map(|s| {
            let r: OutputStream = Box::pin(s);
            r
        })
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.child.take_stderr().map(|s| {
            let r: OutputStream = Box::pin(s);
            r
        })
    }
}

#[cfg(unix)]
impl ProcessSignaller for crate::process::unix::ProcessGroup {
    fn terminate(&self) -> Result<()> {
        crate::process::unix::ProcessGroup::terminate(self)
    }

    fn kill(&self) -> Result<()> {
        crate::process::unix::ProcessGroup::kill(self)
    }
}

/// Scripted behaviour of one mock process
#[derive(Debug, Clone)]
pub struct MockInstruction {
    /// Bytes served on stdout
    pub stdout: Vec<u8>,
    /// Bytes served on stderr
    pub stderr: Vec<u8>,
    /// How long until the process "exits" on its own
    pub exit_delay: Duration,
    /// Exit code on natural exit (None means killed by `signal`)
    pub exit_code: Option<i32>,
    /// Terminating signal on natural exit
    pub signal: Option<i32>,
    /// Whether terminate/kill end the process
    pub responds_to_signals: bool,
    /// Whether terminate/kill report an error
    pub fail_signals: bool,
    /// Fail the spawn itself with this message
    pub spawn_error: Option<String>,
    /// Fail `wait` with this message once the exit delay has passed
    pub wait_error: Option<String>,
}

impl Default for MockInstruction {
    fn default() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_delay: Duration::from_millis(50),
            exit_code: Some(0),
            signal: None,
            responds_to_signals: true,
            fail_signals: false,
            spawn_error: None,
            wait_error: None,
        }
    }
}

impl MockInstruction {
    /// Exit immediately with `code` after printing `stdout`
    pub fn exits(code: i32, stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_delay: Duration::ZERO,
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// Keep running until signalled
    pub fn long_running() -> Self {
        Self {
            exit_delay: Duration::from_secs(3600),
            ..Self::default()
        }
    }

    /// Spawn fails with `message`
    pub fn spawn_fails(message: impl Into<String>) -> Self {
        Self {
            spawn_error: Some(message.into()),
            ..Self::default()
        }
    }
}

static NEXT_MOCK_PID: AtomicU32 = AtomicU32::new(40_000);

/// Spawner serving scripted processes, in the order instructions were queued
#[derive(Debug, Clone, Default)]
pub struct MockSpawner {
    instructions: Arc<tokio::sync::Mutex<VecDeque<MockInstruction>>>,
    requests: Arc<tokio::sync::Mutex<Vec<SpawnRequest>>>,
}

impl MockSpawner {
    /// Spawner with no queued instructions (each spawn uses the default)
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawner with a fixed queue
    pub fn with_instructions(instructions: Vec<MockInstruction>) -> Self {
        Self {
            instructions: Arc::new(tokio::sync::Mutex::new(instructions.into())),
            requests: Arc::default(),
        }
    }

    /// Requests seen so far
    pub async fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ProcessSpawner for MockSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn ManagedChild>> {
        debug!("Spawning mock process for: {}", request.command);
        self.requests.lock().await.push(request.clone());

        let instruction = self.instructions.lock().await.pop_front().unwrap_or_default();
        if let Some(message) = &instruction.spawn_error {
            return Err(CoreError::SpawnFailure(message.clone()));
        }

        let pid = NEXT_MOCK_PID.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockChild::new(pid, instruction)))
    }
}

#[derive(Debug, Default)]
struct MockSignalState {
    terminated: AtomicBool,
    killed: AtomicBool,
}

#[derive(Debug)]
struct MockSignaller {
    state: Arc<MockSignalState>,
    responds: bool,
    fail: bool,
}

impl ProcessSignaller for MockSignaller {
    fn terminate(&self) -> Result<()> {
        if self.fail {
            return Err(CoreError::ProcessSignal("mock SIGTERM rejected".to_string()));
        }
        if self.responds {
            self.state.terminated.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn kill(&self) -> Result<()> {
        if self.fail {
            return Err(CoreError::ProcessSignal("mock SIGKILL rejected".to_string()));
        }
        if self.responds {
            self.state.killed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MockChild {
    pid: u32,
    instruction: MockInstruction,
    started_at: Instant,
    state: Arc<MockSignalState>,
    stdout: Option<Vec<u8>>,
    stderr: Option<Vec<u8>>,
}

impl MockChild {
    fn new(pid: u32, mut instruction: MockInstruction) -> Self {
        let stdout = Some(std::mem::take(&mut instruction.stdout));
        let stderr = Some(std::mem::take(&mut instruction.stderr));
        Self {
            pid,
            instruction,
            started_at: Instant::now(),
            state: Arc::default(),
            stdout,
            stderr,
        }
    }

    fn should_exit(&self) -> bool {
        self.state.killed.load(Ordering::SeqCst)
            || self.state.terminated.load(Ordering::SeqCst)
            || self.started_at.elapsed() >= self.instruction.exit_delay
    }

    fn create_exit(&self) -> ProcessExit {
        let (exit_code, signal) = if self.state.killed.load(Ordering::SeqCst) {
            (None, Some(9))
        } else if self.state.terminated.load(Ordering::SeqCst) {
            (None, Some(15))
        } else {
            (self.instruction.exit_code, self.instruction.signal)
        };

        ProcessExit {
            pid: self.pid,
            exit_code,
            signal,
            timestamp: schema::current_timestamp(),
        }
    }
}

#[async_trait]
impl ManagedChild for MockChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn signaller(&self) -> Arc<dyn ProcessSignaller> {
        Arc::new(MockSignaller {
            state: Arc::clone(&self.state),
            responds: self.instruction.responds_to_signals,
            fail: self.instruction.fail_signals,
        })
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        while !self.should_exit() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if let Some(message) = &self.instruction.wait_error {
            return Err(CoreError::RuntimeFailure(message.clone()));
        }
        Ok(self.create_exit())
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take().map(|bytes| {
            let r: OutputStream = Box::pin(std::io::Cursor::new(bytes));
            r
        })
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take().map(|bytes| {
            let r: OutputStream = Box::pin(std::io::Cursor::new(bytes));
            r
        })
    }
}
