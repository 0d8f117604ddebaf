//! Fan-out of one sender's text to every other session.

use std::sync::Arc;

use chatrelay_protocol::RelayError;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::SessionRegistry;

/// Texts one sender may have waiting for broadcast.
pub(crate) const QUEUE_DEPTH: usize = 32;

/// Formats the text delivered to recipients.
pub fn format_broadcast(text: &str, sender: &str) -> String {
    format!("{text} -- FROM {sender}")
}

/// Outcome of one broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Identities the message was written to.
    pub delivered: Vec<String>,
    /// One [`RelayError::WriteFailure`] per recipient that failed.
    pub failed: Vec<RelayError>,
}

/// Delivers text frames to all sessions except the sender.
///
/// Deliveries run concurrently, each bounded by the recipient handle's
/// write deadline. A failed recipient is logged and reported but stays
/// registered; its own lifecycle notices the broken connection.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn broadcast(&self, sender: &str, text: &str) -> BroadcastReport {
        info!(from = %sender, message = %text, "message received");

        let recipients: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|session| session.identity != sender)
            .collect();

        let mut report = BroadcastReport::default();
        if recipients.is_empty() {
            debug!(from = %sender, "no recipients");
            return report;
        }

        let outbound = format_broadcast(text, sender);
        let deliveries = recipients.into_iter().map(|session| {
            let body = outbound.clone();
            async move {
                let result = session.handle.send_text(body).await;
                (session.identity, result)
            }
        });

        for (identity, result) in join_all(deliveries).await {
            match result {
                Ok(()) => {
                    debug!(to = %identity, "delivered");
                    report.delivered.push(identity);
                }
                Err(e) => {
                    warn!(to = %identity, "write failed: {e}");
                    report.failed.push(RelayError::write_failure(identity, e));
                }
            }
        }

        report
    }

    /// Starts a broadcast queue for one sender.
    ///
    /// Texts pushed into the returned channel are broadcast one at a time, in
    /// the order they were queued, on a task of their own. Producers must use
    /// `try_send`: a hung recipient can hold each broadcast for a full write
    /// deadline, and the sender's read loop must keep answering pings. The
    /// task drains what is left once the channel is dropped and returns how
    /// many texts it sent out.
    pub fn queue(&self, sender: String) -> (mpsc::Sender<String>, JoinHandle<usize>) {
        let (tx, mut rx) = mpsc::channel::<String>(QUEUE_DEPTH);
        let dispatcher = self.clone();
        let task = tokio::spawn(async move {
            let mut count = 0;
            while let Some(text) = rx.recv().await {
                dispatcher.broadcast(&sender, &text).await;
                count += 1;
            }
            count
        });
        (tx, task)
    }
}
