//! Synchronous execution against real shell processes

#![cfg(unix)]
#![allow(unused_crate_dependencies)]

use runhost_core::{ErrorKind, ExecService, Outcome, RuntimeConfig, TempDirectory};
use std::path::Path;
use std::time::{Duration, Instant};

fn service(dir: &Path, config: RuntimeConfig) -> ExecService {
    ExecService::unix(config, TempDirectory::with_default(dir.to_path_buf()))
}

#[tokio::test]
async fn test_echo_hello() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path(), RuntimeConfig::default());

    match svc.run("echo hello", None, None).await {
        Outcome::Success(ok) => {
            assert_eq!(ok.stdout, "hello\n");
            assert_eq!(ok.stderr, "");
            assert_eq!(ok.command, "echo hello");
            assert!(ok.stdout_overflow.is_none());
        }
        Outcome::Failure(f) => panic!("echo failed: {}", f.error),
    }
}

#[tokio::test]
async fn test_false_reports_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path(), RuntimeConfig::default());

    let outcome = svc.run("false", None, None).await;
    let failure = outcome.failure().expect("false must fail");
    assert_eq!(failure.code, Some(1));
    assert_eq!(failure.command, "false");
    assert_eq!(failure.stdout, "");
    assert_eq!(failure.kind, ErrorKind::RuntimeFailure);
    assert!(!failure.timed_out);
}

#[tokio::test]
async fn test_stderr_is_captured_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path(), RuntimeConfig::default());

    let outcome = svc.run("echo oops >&2; exit 4", None, None).await;
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.stderr, "oops\n");
    assert_eq!(failure.code, Some(4));
    assert!(failure.error.contains('4'));
}

#[tokio::test]
async fn test_timeout_kills_and_fails() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path(), RuntimeConfig::default());

    let started = Instant::now();
    let outcome = svc.run("echo started; sleep 10", None, Some(200)).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    let failure = outcome.failure().expect("timeout must fail");
    assert!(failure.timed_out);
    assert_eq!(failure.kind, ErrorKind::Timeout);
    assert_eq!(failure.error, "Command timed out after 200 ms");
    assert_eq!(failure.stdout, "started\n");
    assert_eq!(failure.signal.as_deref(), Some("SIGTERM"));
}

#[tokio::test]
async fn test_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    std::fs::write(work.path().join("marker.txt"), "here").unwrap();
    let svc = service(dir.path(), RuntimeConfig::default());

    let cwd = work.path().to_string_lossy().into_owned();
    let outcome = svc.run("cat marker.txt", Some(&cwd), None).await;
    assert_eq!(outcome.success().unwrap().stdout, "here");
}

#[tokio::test]
async fn test_missing_cwd_is_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path(), RuntimeConfig::default());

    let outcome = svc.run("true", Some("/nonexistent/runhost/cwd"), None).await;
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::SpawnFailure);
    assert!(failure.code.is_none());
}

#[tokio::test]
async fn test_sixty_kib_overflows_fifty_kib_limit() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path(), RuntimeConfig::default());

    // 61440 bytes of 'a'
    let outcome = svc
        .run("head -c 61440 /dev/zero | tr '\\0' a", None, None)
        .await;
    let ok = outcome.success().expect("command succeeds");
    let info = ok.stdout_overflow.as_ref().expect("stdout overflowed");
    assert_eq!(info.original_size, 61440);
    assert_eq!(info.truncated_size, 51200);

    let path = info.file_path.as_ref().expect("saved to a file");
    assert!(Path::new(path).starts_with(dir.path()));
    let saved = std::fs::read_to_string(path).unwrap();
    assert_eq!(saved.len(), 61440);
    assert!(saved.bytes().all(|b| b == b'a'));

    assert!(ok.stdout.starts_with(&"a".repeat(51200)));
    assert!(ok
        .stdout
        .contains("[Output truncated: exceeded 51200 bytes. Full output saved to: "));
}

#[tokio::test]
async fn test_raw_ceiling_cancels_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        max_output_size: 1024,
        max_buffer_size: 64 * 1024,
        ..RuntimeConfig::default()
    };
    let svc = service(dir.path(), config);

    let started = Instant::now();
    let outcome = svc.run("yes", None, Some(20_000)).await;
    assert!(started.elapsed() < Duration::from_secs(10));

    let failure = outcome.failure().expect("ceiling must fail");
    assert!(!failure.timed_out);
    assert_eq!(failure.kind, ErrorKind::RuntimeFailure);
    assert!(failure.error.contains("maximum buffer"));
    let info = failure.stdout_overflow.as_ref().unwrap();
    assert_eq!(info.original_size, 64 * 1024);
}

#[tokio::test]
async fn test_sync_run_never_registers() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path(), RuntimeConfig::default());

    svc.run("true", None, None).await;
    let _ = svc.run("sleep 5", None, Some(50)).await;
    assert!(svc.background().registry().is_empty());
}

#[tokio::test]
async fn test_abandoned_run_kills_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let marker = work.path().join("survived");
    let svc = service(dir.path(), RuntimeConfig::default());

    let command = format!("sleep 1; touch {}; sleep 30", marker.display());
    let task = tokio::spawn(async move { svc.run(&command, None, Some(20_000)).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "shell outlived its dropped run");
}
