//! Background process lifecycle
//!
//! [`BackgroundManager::launch`] spawns a command, creates its record with
//! both accumulators, and registers it in one step before any output can be
//! read. Three tasks then run per process: one reader per stream feeding the
//! accumulators, and a watcher that waits for exit.
//!
//! On exit the watcher records the exit, lets the readers drain (bounded by
//! [`READER_DRAIN_TIMEOUT`]), writes the retained chunks of any overflowing
//! stream to its precomputed path, and removes the entry. A process that
//! ended on its own leaves a tombstone in `recentlyExited`.

mod record;
mod registry;

pub use record::{CaptureLimits, ManagedProcess};
pub use registry::{KillSignal, ProcessRegistry, RegistryEntry};

use crate::adapters::{ManagedChild, OutputStream, ProcessSpawner, SpawnRequest};
use crate::config::RuntimeConfig;
use crate::overflow::OverflowWriter;
use crate::{CoreError, Result};
use schema::{KillReport, LaunchReport, ListReport, StreamKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long readers may keep draining after the process has exited
pub const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Launches, lists and terminates named background processes
#[derive(Clone)]
pub struct BackgroundManager {
    registry: Arc<ProcessRegistry>,
    spawner: Arc<dyn ProcessSpawner>,
    writer: Arc<OverflowWriter>,
    kill_grace: Duration,
}

impl std::fmt::Debug for BackgroundManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundManager")
            .field("registry", &self.registry)
            .field("writer", &self.writer)
            .field("kill_grace", &self.kill_grace)
            .finish()
    }
}

impl BackgroundManager {
    /// Create a manager with an empty registry
    pub fn new(
        config: &RuntimeConfig,
        spawner: Arc<dyn ProcessSpawner>,
        writer: Arc<OverflowWriter>,
    ) -> Self {
        let limits = CaptureLimits {
            chunk_capacity: config.chunk_capacity,
            overflow_threshold: config.max_output_size,
            snapshot_chunks: config.snapshot_chunks,
            snapshot_bytes: config.snapshot_bytes,
        };
        Self {
            registry: Arc::new(ProcessRegistry::new(limits, config.recent_exit_capacity)),
            spawner,
            writer,
            kill_grace: config.kill_grace(),
        }
    }

    /// The registry
    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Spawn `command` and register it as `name`
    ///
    /// Returns as soon as the process is registered; output may not have
    /// arrived yet.
    pub async fn launch(
        &self,
        name: &str,
        command: &str,
        cwd: Option<PathBuf>,
    ) -> Result<LaunchReport> {
        if name.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "name: cannot be empty".to_string(),
            ));
        }
        // Checked before spawning so a duplicate never starts a process
        if self.registry.contains(name) {
            return Err(CoreError::AlreadyRunning {
                name: name.to_string(),
            });
        }

        let request = SpawnRequest::new(command).with_cwd(cwd.clone());
        let mut child = self.spawner.spawn(&request).await?;
        let pid = child.pid();
        let signaller = child.signaller();

        let record = ManagedProcess::new(
            name,
            pid,
            command,
            cwd.map(|p| p.to_string_lossy().into_owned()),
            self.registry.limits(),
            self.writer.dirs().effective(),
        );
        let entry = Arc::new(RegistryEntry::new(record, Arc::clone(&signaller)));

        if let Err(e) = self.registry.register(name, Arc::clone(&entry)) {
            // Lost a race with a concurrent launch of the same name
            warn!("'{}' was registered while pid {} was spawning; killing it", name, pid);
            if let Err(kill_err) = signaller.kill() {
                error!("Failed to kill orphaned pid {}: {}", pid, kill_err);
            }
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            return Err(e);
        }

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.take_stdout() {
            readers.push(spawn_reader(stdout, Arc::clone(&entry), StreamKind::Stdout));
        }
        if let Some(stderr) = child.take_stderr() {
            readers.push(spawn_reader(stderr, Arc::clone(&entry), StreamKind::Stderr));
        }

        tokio::spawn(watch(
            child,
            entry,
            readers,
            name.to_string(),
            Arc::clone(&self.registry),
            Arc::clone(&self.writer),
        ));

        info!("Started background process '{}' (pid {}): {}", name, pid, command);
        Ok(LaunchReport {
            name: name.to_string(),
            pid,
            command: command.to_string(),
            message: format!("Started background process '{}' (pid {})", name, pid),
        })
    }

    /// Terminate `name` (see [`ProcessRegistry::kill`])
    pub fn kill(&self, name: &str) -> Result<KillReport> {
        self.registry.kill(name)
    }

    /// Snapshot of every registered process plus recent tombstones
    pub fn list(&self) -> ListReport {
        let processes = self.registry.snapshot();
        ListReport {
            count: processes.len(),
            processes,
            recently_exited: self.registry.recently_exited(),
        }
    }

    /// Terminate every registered process and empty the registry
    ///
    /// Sends SIGTERM to all, waits up to the kill grace for them to exit,
    /// then SIGKILLs the rest. Returns how many were registered.
    pub async fn shutdown(&self) -> usize {
        let drained = self.registry.drain();
        if drained.is_empty() {
            return 0;
        }
        info!("Terminating {} background process(es)", drained.len());

        for (name, entry) in &drained {
            if !entry.with_record(|rec| rec.mark_killed()) {
                continue;
            }
            if let Err(e) = entry.signaller().terminate() {
                warn!("SIGTERM to '{}' (pid {}) failed: {}", name, entry.pid(), e);
            }
        }

        let deadline = tokio::time::Instant::now() + self.kill_grace;
        loop {
            let all_exited = drained
                .iter()
                .all(|(_, entry)| entry.with_record(|rec| !rec.is_running()));
            if all_exited || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        for (name, entry) in &drained {
            if entry.with_record(|rec| rec.is_running()) {
                warn!("'{}' (pid {}) ignored SIGTERM, sending SIGKILL", name, entry.pid());
                if let Err(e) = entry.signaller().kill() {
                    error!("SIGKILL to '{}' (pid {}) failed: {}", name, entry.pid(), e);
                }
            }
        }
        drained.len()
    }
}

fn spawn_reader(
    mut stream: OutputStream,
    entry: Arc<RegistryEntry>,
    kind: StreamKind,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = buf[..n].to_vec();
                    let crossed = entry.with_record(|rec| {
                        if rec.append(kind, chunk) {
                            rec.output(kind).overflow_path().map(|p| p.to_path_buf())
                        } else {
                            None
                        }
                    });
                    if let Some(path) = crossed {
                        info!(
                            "{} of pid {} overflowed; retained output will be saved to {}",
                            kind,
                            entry.pid(),
                            path.display()
                        );
                    }
                }
                Err(e) => {
                    debug!("{} read for pid {} ended: {}", kind, entry.pid(), e);
                    break;
                }
            }
        }
    })
}

/// Wait for `readers` to finish, aborting any still running at the deadline
pub(crate) async fn drain_readers(readers: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            debug!("Reader still open after exit (inherited pipe?), aborting");
            reader.abort();
        }
    }
}

async fn watch(
    mut child: Box<dyn ManagedChild>,
    entry: Arc<RegistryEntry>,
    readers: Vec<JoinHandle<()>>,
    name: String,
    registry: Arc<ProcessRegistry>,
    writer: Arc<OverflowWriter>,
) {
    match child.wait().await {
        Ok(exit) => {
            entry.with_record(|rec| rec.mark_exited(&exit));
            debug!(
                "'{}' (pid {}) exited: code={:?} signal={:?}",
                name, exit.pid, exit.exit_code, exit.signal
            );

            drain_readers(readers, READER_DRAIN_TIMEOUT).await;

            let writes = entry.with_record(|rec| rec.pending_overflow_writes());
            for (path, content) in writes {
                match writer.persist_at(&path, &content).await {
                    Ok(()) => info!("Saved overflow output of '{}' to {}", name, path.display()),
                    Err(e) => warn!("Could not save overflow output of '{}': {}", name, e),
                }
            }

            retire(&registry, &name, &entry);
        }
        Err(e) => {
            error!("Waiting on '{}' (pid {}) failed: {}", name, entry.pid(), e);
            entry.with_record(|rec| rec.mark_errored(e.to_string()));
            for reader in &readers {
                reader.abort();
            }
            retire(&registry, &name, &entry);
        }
    }
}

/// Remove an ended process and tombstone it unless a kill claimed it
fn retire(registry: &ProcessRegistry, name: &str, entry: &Arc<RegistryEntry>) {
    let removed = registry.remove_if_same(name, entry);
    let limits = registry.limits();
    let snapshot = entry.with_record(|rec| (!rec.is_killed()).then(|| rec.snapshot(&limits)));
    if let Some(snapshot) = snapshot {
        if removed {
            registry.push_tombstone(snapshot);
        } else {
            debug!("'{}' was already removed; no tombstone", name);
        }
    }
}
