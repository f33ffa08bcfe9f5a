//! Streaming body relay.
//!
//! The upstream read path runs in its own task and pushes chunks onto a
//! bounded channel; the caller-facing body drains that channel. With a
//! capacity of one chunk, a slow caller throttles upstream reads directly.
//! Chunks are forwarded exactly as received, in order, never re-chunked.

use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use super::forward::Phase;
use super::pool::PooledConnection;
use crate::error::Error;

/// Chunks buffered between the upstream reader and the caller's socket.
pub const RELAY_CHANNEL_CAPACITY: usize = 1;

/// Why a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Upstream closed the body cleanly.
    Completed,
    /// No upstream bytes within the read timeout.
    Stalled,
    /// Upstream body errored mid-transfer.
    UpstreamError,
    /// The caller went away; upstream read was abandoned.
    ClientDisconnected,
}

/// Summary of one relay, produced when its task finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub chunks: usize,
    pub bytes: usize,
    pub end: RelayEnd,
}

impl RelayReport {
    /// Terminal request phase this relay ended in.
    pub fn phase(&self) -> Phase {
        match self.end {
            RelayEnd::Completed => Phase::Completed,
            _ => Phase::Failed,
        }
    }
}

type RelayItem = Result<Bytes, std::io::Error>;

/// Spawn a relay task and return the caller-facing body plus the task handle.
///
/// `connection` is held until the upstream stream has been dropped, so the
/// pool slot is released exactly when upstream reading stops. Mid-stream
/// failures end the body with an error, which aborts the caller's
/// connection instead of finishing the response cleanly.
pub fn spawn_relay<S, E>(
    upstream: S,
    connection: PooledConnection,
    read_timeout: Duration,
    request_id: String,
) -> (Body, JoinHandle<RelayReport>)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<RelayItem>(RELAY_CHANNEL_CAPACITY);

    let handle = tokio::spawn(async move {
        let report = pump(upstream, &tx, read_timeout).await;
        drop(connection);
        let phase = Phase::Streaming.advance(report.phase());

        match report.end {
            RelayEnd::Completed => tracing::info!(
                request_id = %request_id,
                chunks = report.chunks,
                bytes = report.bytes,
                phase = ?phase,
                "Stream relay completed"
            ),
            RelayEnd::ClientDisconnected => tracing::info!(
                request_id = %request_id,
                chunks = report.chunks,
                bytes = report.bytes,
                phase = ?phase,
                "Client disconnected, upstream stream abandoned"
            ),
            RelayEnd::Stalled | RelayEnd::UpstreamError => tracing::warn!(
                request_id = %request_id,
                chunks = report.chunks,
                bytes = report.bytes,
                end = ?report.end,
                phase = ?phase,
                "Stream relay truncated"
            ),
        }

        report
    });

    (Body::from_stream(ReceiverStream::new(rx)), handle)
}

async fn pump<S, E>(
    upstream: S,
    tx: &mpsc::Sender<RelayItem>,
    read_timeout: Duration,
) -> RelayReport
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut chunks = 0usize;
    let mut bytes = 0usize;
    let report = |chunks, bytes, end| RelayReport { chunks, bytes, end };

    loop {
        let next = tokio::select! {
            _ = tx.closed() => return report(chunks, bytes, RelayEnd::ClientDisconnected),
            next = tokio::time::timeout(read_timeout, upstream.next()) => next,
        };

        match next {
            Err(_elapsed) => {
                let err = Error::UpstreamStalled {
                    idle_secs: read_timeout.as_secs_f64(),
                };
                let _ = tx.send(Err(std::io::Error::other(err.to_string()))).await;
                return report(chunks, bytes, RelayEnd::Stalled);
            }
            Ok(None) => return report(chunks, bytes, RelayEnd::Completed),
            Ok(Some(Err(e))) => {
                let err = Error::UpstreamProtocol(format!("upstream stream failed: {}", e));
                let _ = tx.send(Err(std::io::Error::other(err.to_string()))).await;
                return report(chunks, bytes, RelayEnd::UpstreamError);
            }
            Ok(Some(Ok(chunk))) => {
                if chunk.is_empty() {
                    continue;
                }
                let len = chunk.len();
                if tx.send(Ok(chunk)).await.is_err() {
                    return report(chunks, bytes, RelayEnd::ClientDisconnected);
                }
                chunks += 1;
                bytes += len;
            }
        }
    }
}
