//! Name-keyed registry of background processes
//!
//! The map has one guard, held only for the insert/remove/copy step and never
//! across an `.await`. Each entry carries its own guard around the captured
//! record, so readers appending output for one process never contend with
//! another process. Snapshots copy the `Arc`s out under the map guard and
//! then lock entries one at a time.

use super::record::{CaptureLimits, ManagedProcess};
use crate::adapters::ProcessSignaller;
use crate::{CoreError, Result};
use schema::{KillReport, ProcessSnapshot};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Acquire a guard, recovering the data from a poisoned lock
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A registered process: its record plus the handle used to signal it
#[derive(Debug)]
pub struct RegistryEntry {
    pid: u32,
    record: Mutex<ManagedProcess>,
    signaller: Arc<dyn ProcessSignaller>,
}

impl RegistryEntry {
    /// Wrap a record and its signal handle
    pub fn new(record: ManagedProcess, signaller: Arc<dyn ProcessSignaller>) -> Self {
        Self {
            pid: record.pid(),
            record: Mutex::new(record),
            signaller,
        }
    }

    /// Process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Signal handle
    pub fn signaller(&self) -> &Arc<dyn ProcessSignaller> {
        &self.signaller
    }

    /// Run `f` with exclusive access to the record
    pub fn with_record<R>(&self, f: impl FnOnce(&mut ManagedProcess) -> R) -> R {
        f(&mut lock(&self.record))
    }
}

/// Signal that ended up being delivered by [`ProcessRegistry::kill`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// Graceful termination was accepted
    Term,
    /// Graceful termination failed, forceful termination was accepted
    Kill,
}

impl KillSignal {
    /// Conventional signal name
    pub fn as_str(&self) -> &'static str {
        match self {
            KillSignal::Term => "SIGTERM",
            KillSignal::Kill => "SIGKILL",
        }
    }
}

/// Mapping from process name to registry entry
#[derive(Debug)]
pub struct ProcessRegistry {
    entries: Mutex<BTreeMap<String, Arc<RegistryEntry>>>,
    tombstones: Mutex<VecDeque<ProcessSnapshot>>,
    tombstone_capacity: usize,
    limits: CaptureLimits,
}

impl ProcessRegistry {
    /// Empty registry
    pub fn new(limits: CaptureLimits, tombstone_capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            tombstones: Mutex::new(VecDeque::new()),
            tombstone_capacity,
            limits,
        }
    }

    /// Accumulator sizing used for new records and snapshots
    pub fn limits(&self) -> CaptureLimits {
        self.limits
    }

    /// Insert `entry` under `name`, failing if the name is taken
    pub fn register(&self, name: &str, entry: Arc<RegistryEntry>) -> Result<()> {
        let mut entries = lock(&self.entries);
        if entries.contains_key(name) {
            return Err(CoreError::AlreadyRunning {
                name: name.to_string(),
            });
        }
        entries.insert(name.to_string(), entry);
        debug!("Registered background process '{}'", name);
        Ok(())
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.entries).contains_key(name)
    }

    /// Entry registered under `name`
    pub fn lookup(&self, name: &str) -> Result<Arc<RegistryEntry>> {
        lock(&self.entries)
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                name: name.to_string(),
            })
    }

    /// Remove `name` unconditionally
    pub fn remove(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        lock(&self.entries).remove(name)
    }

    /// Remove `name` only if it still maps to `entry`
    ///
    /// A watcher of an old process must not evict a newer process that
    /// reused the name after a kill.
    pub fn remove_if_same(&self, name: &str, entry: &Arc<RegistryEntry>) -> bool {
        let mut entries = lock(&self.entries);
        match entries.get(name) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                entries.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Number of registered processes
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Snapshot every registered process, ordered by name
    pub fn snapshot(&self) -> Vec<ProcessSnapshot> {
        let entries: Vec<Arc<RegistryEntry>> = lock(&self.entries).values().cloned().collect();
        entries
            .iter()
            .map(|entry| entry.with_record(|rec| rec.snapshot(&self.limits)))
            .collect()
    }

    /// Terminate `name`: SIGTERM, falling back to SIGKILL if that fails
    ///
    /// On success the entry is removed right away, without waiting for the
    /// exit to be observed. The record is claimed under its own guard before
    /// any signal is sent: a process whose exit was already recorded is
    /// `NotFound` here and keeps its tombstone, and a claimed process gets
    /// no tombstone even if its watcher removes it first.
    pub fn kill(&self, name: &str) -> Result<KillReport> {
        let entry = self.lookup(name)?;
        let pid = entry.pid();

        if !entry.with_record(|rec| rec.mark_killed()) {
            debug!("'{}' (pid {}) already exited; nothing to kill", name, pid);
            return Err(CoreError::NotFound {
                name: name.to_string(),
            });
        }

        let signal = match entry.signaller().terminate() {
            Ok(()) => KillSignal::Term,
            Err(term_err) => {
                warn!(
                    "SIGTERM to '{}' (pid {}) failed: {}; sending SIGKILL",
                    name, pid, term_err
                );
                match entry.signaller().kill() {
                    Ok(()) => KillSignal::Kill,
                    Err(kill_err) => {
                        entry.with_record(|rec| rec.clear_killed());
                        return Err(CoreError::ProcessSignal(format!(
                            "could not terminate '{}' (pid {}): {}; {}",
                            name, pid, term_err, kill_err
                        )));
                    }
                }
            }
        };

        let (stdout_path, stderr_path) = entry.with_record(|rec| rec.overflow_paths());
        self.remove_if_same(name, &entry);
        info!(
            "Sent {} to background process '{}' (pid {})",
            signal.as_str(),
            name,
            pid
        );

        Ok(KillReport {
            name: name.to_string(),
            pid,
            signal: signal.as_str().to_string(),
            message: format!(
                "Sent {} to background process '{}' (pid {})",
                signal.as_str(),
                name,
                pid
            ),
            stdout_overflow_path: stdout_path.map(|p| p.to_string_lossy().into_owned()),
            stderr_overflow_path: stderr_path.map(|p| p.to_string_lossy().into_owned()),
        })
    }

    /// Keep the final snapshot of a process that ended on its own
    pub fn push_tombstone(&self, snapshot: ProcessSnapshot) {
        if self.tombstone_capacity == 0 {
            return;
        }
        let mut tombstones = lock(&self.tombstones);
        if tombstones.len() == self.tombstone_capacity {
            tombstones.pop_front();
        }
        tombstones.push_back(snapshot);
    }

    /// Tombstones, most recent last
    pub fn recently_exited(&self) -> Vec<ProcessSnapshot> {
        lock(&self.tombstones).iter().cloned().collect()
    }

    /// Remove and return every registered entry
    pub fn drain(&self) -> Vec<(String, Arc<RegistryEntry>)> {
        std::mem::take(&mut *lock(&self.entries)).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FakeSignaller {
        fail_term: bool,
        fail_kill: bool,
        terms: AtomicUsize,
        kills: AtomicUsize,
    }

    impl ProcessSignaller for FakeSignaller {
        fn terminate(&self) -> Result<()> {
            self.terms.fetch_add(1, Ordering::SeqCst);
            if self.fail_term {
                return Err(CoreError::ProcessSignal("EINVAL".to_string()));
            }
            Ok(())
        }

        fn kill(&self) -> Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            if self.fail_kill {
                return Err(CoreError::ProcessSignal("EPERM".to_string()));
            }
            Ok(())
        }
    }

    fn limits() -> CaptureLimits {
        CaptureLimits {
            chunk_capacity: 100,
            overflow_threshold: 1024,
            snapshot_chunks: 10,
            snapshot_bytes: 1000,
        }
    }

    fn entry(name: &str, pid: u32, signaller: Arc<FakeSignaller>) -> Arc<RegistryEntry> {
        let record = ManagedProcess::new(name, pid, "sleep 5", None, limits(), Path::new("/tmp"));
        Arc::new(RegistryEntry::new(record, signaller))
    }

    #[test]
    fn test_register_rejects_duplicate_and_keeps_first() {
        let registry = ProcessRegistry::new(limits(), 4);
        let first = entry("x", 100, Arc::default());
        registry.register("x", Arc::clone(&first)).unwrap();

        let err = registry.register("x", entry("x", 200, Arc::default())).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRunning { .. }));

        let found = registry.lookup("x").unwrap();
        assert!(Arc::ptr_eq(&found, &first));
        assert_eq!(found.pid(), 100);
    }

    #[test]
    fn test_lookup_missing() {
        let registry = ProcessRegistry::new(limits(), 4);
        assert!(matches!(
            registry.lookup("nope"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_kill_removes_entry() {
        let registry = ProcessRegistry::new(limits(), 4);
        let signaller = Arc::new(FakeSignaller::default());
        registry
            .register("x", entry("x", 300, Arc::clone(&signaller)))
            .unwrap();

        let report = registry.kill("x").unwrap();
        assert_eq!(report.pid, 300);
        assert_eq!(report.signal, "SIGTERM");
        assert_eq!(signaller.terms.load(Ordering::SeqCst), 1);
        assert_eq!(signaller.kills.load(Ordering::SeqCst), 0);
        assert!(registry.snapshot().iter().all(|s| s.name != "x"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_kill_falls_back_to_sigkill() {
        let registry = ProcessRegistry::new(limits(), 4);
        let signaller = Arc::new(FakeSignaller {
            fail_term: true,
            ..Default::default()
        });
        registry
            .register("x", entry("x", 301, Arc::clone(&signaller)))
            .unwrap();

        let report = registry.kill("x").unwrap();
        assert_eq!(report.signal, "SIGKILL");
        assert_eq!(signaller.kills.load(Ordering::SeqCst), 1);
        assert!(!registry.contains("x"));
    }

    #[test]
    fn test_kill_failure_keeps_entry() {
        let registry = ProcessRegistry::new(limits(), 4);
        let signaller = Arc::new(FakeSignaller {
            fail_term: true,
            fail_kill: true,
            ..Default::default()
        });
        registry.register("x", entry("x", 302, signaller)).unwrap();

        let err = registry.kill("x").unwrap_err();
        assert!(matches!(err, CoreError::ProcessSignal(_)));
        assert!(err.to_string().contains("EINVAL"));
        assert!(err.to_string().contains("EPERM"));
        assert!(registry.contains("x"));
        let e = registry.lookup("x").unwrap();
        assert!(!e.with_record(|rec| rec.is_killed()));
    }

    #[test]
    fn test_kill_after_exit_is_not_found() {
        let registry = ProcessRegistry::new(limits(), 4);
        let signaller = Arc::new(FakeSignaller::default());
        let e = entry("x", 303, Arc::clone(&signaller));
        registry.register("x", Arc::clone(&e)).unwrap();
        e.with_record(|rec| {
            rec.mark_exited(&schema::ProcessExit {
                pid: 303,
                exit_code: Some(0),
                signal: None,
                timestamp: schema::current_timestamp(),
            })
        });

        assert!(matches!(
            registry.kill("x"),
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(signaller.terms.load(Ordering::SeqCst), 0);
        assert!(!e.with_record(|rec| rec.is_killed()));
    }

    #[test]
    fn test_kill_claims_record() {
        let registry = ProcessRegistry::new(limits(), 4);
        let e = entry("x", 304, Arc::default());
        registry.register("x", Arc::clone(&e)).unwrap();

        registry.kill("x").unwrap();
        assert!(e.with_record(|rec| rec.is_killed()));
    }

    #[test]
    fn test_kill_unknown_name() {
        let registry = ProcessRegistry::new(limits(), 4);
        assert!(matches!(
            registry.kill("ghost"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_if_same_ignores_newer_entry() {
        let registry = ProcessRegistry::new(limits(), 4);
        let old = entry("x", 1, Arc::default());
        let new = entry("x", 2, Arc::default());
        registry.register("x", Arc::clone(&new)).unwrap();

        assert!(!registry.remove_if_same("x", &old));
        assert!(registry.contains("x"));
        assert!(registry.remove_if_same("x", &new));
        assert!(!registry.contains("x"));
    }

    #[test]
    fn test_snapshot_is_ordered_by_name() {
        let registry = ProcessRegistry::new(limits(), 4);
        for name in ["b", "a", "c"] {
            registry.register(name, entry(name, 7, Arc::default())).unwrap();
        }
        let names: Vec<String> = registry.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tombstones_are_bounded() {
        let registry = ProcessRegistry::new(limits(), 2);
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let e = entry(name, i as u32, Arc::default());
            registry.push_tombstone(e.with_record(|rec| rec.snapshot(&limits())));
        }
        let names: Vec<String> = registry
            .recently_exited()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = ProcessRegistry::new(limits(), 2);
        registry.register("a", entry("a", 1, Arc::default())).unwrap();
        registry.register("b", entry("b", 2, Arc::default())).unwrap();
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
