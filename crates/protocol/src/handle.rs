//! Connection handle: the write side of one framed connection.
//!
//! Several tasks write to the same connection (pong replies, broadcast
//! deliveries, heartbeat pings, outbound text). The wire format cannot
//! interleave partial frames, so every write goes through the handle's
//! async mutex, bounded by the write deadline.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::SinkExt;
use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::error::{Deadline, RelayError};
use crate::frame::{Frame, FrameSink, encode_frame};

/// Unique id of one connection, distinguishing reconnects of the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared write handle for a framed connection.
///
/// Reads stay with the task that owns the connection; the handle only
/// covers writes plus the close signal that owner listens on.
pub struct ConnectionHandle {
    id: ConnectionId,
    sink: Mutex<FrameSink>,
    write_wait: Duration,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Creates a handle around the write half of a connection.
    pub fn new(sink: FrameSink, write_wait: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            sink: Mutex::new(sink),
            write_wait,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn write_wait(&self) -> Duration {
        self.write_wait
    }

    /// Writes one frame under the write deadline.
    ///
    /// The deadline covers waiting for the write lock as well as the write
    /// itself, so a writer stuck on a dead peer cannot stall others past
    /// their own deadline.
    pub async fn send(&self, frame: Frame) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }

        let write = async {
            let mut sink = self.sink.lock().await;
            encode_frame(&mut *sink, frame).await
        };

        match tokio::time::timeout(self.write_wait, write).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout(Deadline::Write)),
        }
    }

    /// Writes a text frame.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.send(Frame::Text(text.into())).await
    }

    /// Marks the handle closed and wakes the owning read loop.
    ///
    /// Returns `true` only for the call that actually closed the handle.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Owner-side teardown: best-effort close frame, then closes the sink.
    ///
    /// Bounded by the write deadline; errors are ignored because the peer
    /// may already be gone.
    pub async fn finish(&self, reason: Option<String>) {
        self.close();
        let teardown = async {
            let mut sink = self.sink.lock().await;
            let _ = encode_frame(&mut *sink, Frame::Close(reason)).await;
            let _ = sink.close().await;
        };
        if tokio::time::timeout(self.write_wait, teardown).await.is_err() {
            tracing::debug!(conn = %self.id, "close frame not delivered before deadline");
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
