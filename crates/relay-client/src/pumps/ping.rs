//! Heartbeat pump: periodic pings, independent of read activity.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_protocol::{ConnectionHandle, Frame, RelayError};
use tracing::trace;

/// Sends a ping every `heartbeat` until the handle closes.
///
/// Pongs are consumed by the read pump. A failed ping write ends the pump
/// and is returned to the caller; it is not retried.
pub(crate) async fn ping_pump(
    handle: Arc<ConnectionHandle>,
    heartbeat: Duration,
) -> Result<(), RelayError> {
    let mut interval = tokio::time::interval(heartbeat);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = handle.closed() => return Ok(()),
            _ = interval.tick() => {
                trace!("ping");
                match handle.send(Frame::Ping).await {
                    Ok(()) => {}
                    Err(RelayError::Closed) => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
        }
    }
}
