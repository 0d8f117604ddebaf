//! Inbound message sequence.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

/// Text payloads received on one connection.
///
/// Ends once the connection closes and buffered messages are drained.
/// A reconnect produces a fresh sequence.
#[derive(Debug)]
pub struct Inbound {
    rx: mpsc::Receiver<String>,
}

impl Inbound {
    pub(crate) fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Waits for the next message; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Stream for Inbound {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.rx.poll_recv(cx)
    }
}
