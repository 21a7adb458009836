//! Daemon library for runhost
//!
//! Serves the execution tools over newline-delimited JSON. Each request line
//! is a [`ToolRequest`]; each response line is a [`ToolResponse`] carrying
//! the request's `id`. Requests are handled concurrently, so a long `run`
//! does not hold up a `list_background` behind it, and responses may come
//! back out of order.

#![allow(unused_crate_dependencies)]

pub mod bootstrap;
pub mod simple_error;


use runhost_core::{ExecService, ToolReply};
use schema::{ToolRequest, ToolResponse};
pub use simple_error::{DaemonError, Result};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Maximum allowed request frame (64KB)
const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Responses waiting for the writer
const RESPONSE_QUEUE: usize = 64;

/// What one read off the input produced
enum Frame {
    Line,
    Oversized(usize),
    Eof,
}

/// The protocol server
#[derive(Debug, Clone)]
pub struct Daemon {
    service: ExecService,
}

impl Daemon {
    /// Create a daemon serving `service`
    #[must_use]
    pub fn new(service: ExecService) -> Self {
        Self { service }
    }

    /// The service requests are dispatched to
    pub fn service(&self) -> &ExecService {
        &self.service
    }

    /// Serve requests from `reader` until end of input
    ///
    /// Waits for every in-flight request to be answered before returning.
    /// Background processes are left running; call [`Daemon::shutdown`].
    ///
    /// # Errors
    /// Returns an error if reading a frame or writing a response fails.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<ToolResponse>(RESPONSE_QUEUE);
        let writer_task = tokio::spawn(write_responses(writer, rx));

        let mut reader = BufReader::new(reader);
        let mut in_flight = JoinSet::new();
        let mut frame = Vec::with_capacity(1024);

        let read_result = loop {
            frame.clear();
            let size = match read_frame(&mut reader, &mut frame).await {
                Ok(Frame::Eof) => break Ok(()),
                Ok(Frame::Line) => None,
                Ok(Frame::Oversized(size)) => Some(size),
                Err(e) => break Err(DaemonError::from(e)),
            };

            // Reap finished handlers so the set doesn't grow without bound
            while in_flight.try_join_next().is_some() {}

            if let Some(size) = size {
                warn!("Rejecting {} byte frame", size);
                let service = self.service.clone();
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let reply = service
                        .reject(format!(
                            "Request size {} exceeds maximum allowed size of {} bytes",
                            size, MAX_FRAME_SIZE
                        ))
                        .await;
                    if tx.send(response(None, reply)).await.is_err() {
                        debug!("Response dropped: writer has stopped");
                    }
                });
                continue;
            }

            if matches!(frame.last(), Some(b'\n')) {
                frame.pop();
                if matches!(frame.last(), Some(b'\r')) {
                    frame.pop();
                }
            }
            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let service = self.service.clone();
            let tx = tx.clone();
            let frame = std::mem::take(&mut frame);
            in_flight.spawn(async move {
                let response = handle_frame(&service, &frame).await;
                if tx.send(response).await.is_err() {
                    debug!("Response dropped: writer has stopped");
                }
            });
        };

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Request handler failed: {}", e);
            }
        }
        drop(tx);

        let write_result = match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(DaemonError::ProtocolError(format!(
                "response writer failed: {}",
                e
            ))),
        };

        read_result?;
        write_result
    }

    /// Terminate every background process
    pub async fn shutdown(&self) -> usize {
        let count = self.service.shutdown().await;
        info!("Terminated {} background process(es)", count);
        count
    }
}

/// Read one line into `frame`, buffering at most `MAX_FRAME_SIZE` bytes of it
///
/// A longer line is consumed up to and including its newline without being
/// kept; its full length is reported instead.
async fn read_frame<R>(reader: &mut R, frame: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let limit = MAX_FRAME_SIZE as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', frame).await?;
    if n == 0 {
        return Ok(Frame::Eof);
    }
    if n <= MAX_FRAME_SIZE || frame.last() == Some(&b'\n') {
        return Ok(Frame::Line);
    }

    frame.clear();
    let mut size = n;
    loop {
        let (used, newline) = {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                break;
            }
            match buf.iter().position(|b| *b == b'\n') {
                Some(i) => (i + 1, true),
                None => (buf.len(), false),
            }
        };
        reader.consume(used);
        if newline {
            size += used - 1;
            break;
        }
        size += used;
    }
    Ok(Frame::Oversized(size))
}

/// Decode one frame and produce its response
async fn handle_frame(service: &ExecService, frame: &[u8]) -> ToolResponse {
    let value: serde_json::Value = match serde_json::from_slice(frame) {
        Ok(value) => value,
        Err(e) => {
            warn!("Malformed request frame: {}", e);
            let reply = service.reject(format!("Malformed request: {}", e)).await;
            return response(None, reply);
        }
    };

    let id = value.get("id").cloned();
    match serde_json::from_value::<ToolRequest>(value) {
        Ok(request) => {
            let reply = service.call(request.call).await;
            response(request.id, reply)
        }
        Err(e) => {
            warn!("Invalid request: {}", e);
            let reply = service.reject(format!("Invalid request: {}", e)).await;
            response(id, reply)
        }
    }
}

fn response(id: Option<serde_json::Value>, reply: ToolReply) -> ToolResponse {
    ToolResponse {
        id,
        is_error: reply.is_error,
        content: reply.content,
    }
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<ToolResponse>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut data = serde_json::to_vec(&response)?;
        data.push(b'\n');
        writer.write_all(&data).await?;
        writer.flush().await?;
    }
    Ok(())
}
