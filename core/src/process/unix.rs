//! Unix shell spawning in isolated process groups
//!
//! Every command runs as `/bin/sh -c <command>` in a new session (`setsid()`),
//! so the shell and anything it forks share one process group whose id equals
//! the shell's pid. Signals go to the whole group, which is what makes
//! `sleep 5 & wait` style commands killable as a unit.

// setsid() in pre_exec needs unsafe
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
#[allow(unused_imports)]
use std::os::unix::process::CommandExt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, error};

/// Shell used to interpret command strings
pub const SHELL: &str = "/bin/sh";

/// A shell child that leads its own process group
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    child: Child,
}

impl ChildProcess {
    /// Process ID of the shell
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Process group ID (same as the pid for a session leader)
    pub fn pgid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Handle that signals this child's process group
    pub fn group(&self) -> ProcessGroup {
        ProcessGroup { pgid: self.pid }
    }

    /// Wait for the shell to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::RuntimeFailure(format!("Failed to wait for process {}: {}", self.pid, e))
        })
    }

    /// Take the stdout pipe
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr pipe
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }
}

/// Spawn `command` through the shell in a new process group
///
/// stdin is closed, stdout and stderr are piped. A `cwd` that does not exist
/// makes the spawn itself fail.
///
/// ```rust,no_run
/// use runhost_core::process::unix::spawn_shell;
///
/// # async fn demo() -> runhost_core::Result<()> {
/// let mut child = spawn_shell("echo hello", None)?;
/// let status = child.wait().await?;
/// assert!(status.success());
/// # Ok(())
/// # }
/// ```
pub fn spawn_shell(command: &str, cwd: Option<&Path>) -> Result<ChildProcess> {
    debug!("Spawning shell command: {}", command);

    let mut cmd = Command::new(SHELL);
    cmd.arg("-c").arg(command);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    // Safety: setsid() is async-signal-safe and runs in the child before exec
    #[deny(unsafe_op_in_unsafe_fn)]
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|e| {
        error!("Failed to spawn '{}': {}", command, e);
        match cwd {
            Some(dir) => CoreError::SpawnFailure(format!(
                "'{}' in {}: {}",
                command,
                dir.display(),
                e
            )),
            None => CoreError::SpawnFailure(format!("'{}': {}", command, e)),
        }
    })?;

    let raw_pid = child
        .id()
        .ok_or_else(|| CoreError::SpawnFailure("Spawned child did not have a PID".to_string()))?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Spawned {} in process group {}", command, pid);

    Ok(ChildProcess { pid, child })
}

/// Signal target for a whole process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pgid: Pid,
}

impl ProcessGroup {
    /// Address an existing process group
    pub fn from_raw(pgid: u32) -> Self {
        Self {
            pgid: Pid::from_raw(pgid as i32),
        }
    }

    /// Group id
    pub fn pgid(&self) -> u32 {
        self.pgid.as_raw() as u32
    }

    /// SIGTERM the group
    pub fn terminate(&self) -> Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// SIGKILL the group
    pub fn kill(&self) -> Result<()> {
        self.signal(Signal::SIGKILL)
    }

    /// Send `signal` to every member of the group
    ///
    /// `ESRCH` and `EPERM` mean the group is already gone and count as success.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        debug!("Sending {} to process group {}", signal, self.pgid);
        match killpg(self.pgid, signal) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) => {
                debug!("Process group {} already exited", self.pgid);
                Ok(())
            }
            Err(nix::errno::Errno::EPERM) => {
                debug!(
                    "Permission denied signaling process group {} (likely already exited)",
                    self.pgid
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to send {} to process group {}: {}", signal, self.pgid, e);
                Err(CoreError::ProcessSignal(format!(
                    "{} to process group {}: {}",
                    signal, self.pgid, e
                )))
            }
        }
    }
}

/// Split an exit status into (exit code, terminating signal)
pub fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    match status.code() {
        Some(code) => (Some(code), None),
        None => (None, status.signal()),
    }
}

/// Conventional name of a signal number (`SIGTERM`), or the number itself
pub fn signal_name(signal: i32) -> String {
    Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| signal.to_string())
}
