//! Test utilities for integration tests in the daemon crate.

use daemon::Daemon;
use runhost_core::{ExecService, RuntimeConfig, TempDirectory};
use schema::ToolResponse;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

/// Run the given future with a timeout, failing the test if it elapses.
pub async fn run_with_timeout<F, T>(duration: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .expect("test timed out")
}

/// Run a future with a default timeout of 30 seconds.
pub async fn run_with_default_timeout<F, T>(fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    run_with_timeout(Duration::from_secs(30), fut).await
}

/// A daemon serving one in-memory connection
pub struct Session {
    pub daemon: Daemon,
    writer: WriteHalf<DuplexStream>,
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    serving: JoinHandle<daemon::Result<()>>,
}

impl Session {
    /// Start a daemon backed by real shell processes
    pub fn start(dir: &Path, config: RuntimeConfig) -> Self {
        let daemon = Daemon::new(ExecService::unix(
            config,
            TempDirectory::with_default(dir.to_path_buf()),
        ));
        let (client, server) = tokio::io::duplex(256 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let serving = {
            let daemon = daemon.clone();
            tokio::spawn(async move { daemon.serve(server_read, server_write).await })
        };
        let (client_read, writer) = tokio::io::split(client);
        Self {
            daemon,
            writer,
            lines: BufReader::new(client_read).lines(),
            serving,
        }
    }

    /// Send one raw request line
    pub async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Read the next response
    pub async fn recv(&mut self) -> ToolResponse {
        let line = run_with_default_timeout(self.lines.next_line())
            .await
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    /// Send a request and wait for its response
    pub async fn request(&mut self, line: &str) -> ToolResponse {
        self.send(line).await;
        self.recv().await
    }

    /// Close the input, wait for the loop, then terminate background work
    pub async fn finish(mut self) -> usize {
        self.writer.shutdown().await.unwrap();
        run_with_default_timeout(self.serving).await.unwrap().unwrap();
        self.daemon.shutdown().await
    }
}

/// Parse a response body as JSON
pub fn body(response: &ToolResponse) -> serde_json::Value {
    serde_json::from_str(&response.content).unwrap()
}
