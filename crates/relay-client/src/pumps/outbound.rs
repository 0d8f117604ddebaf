//! Outbound pump: application text on its own schedule.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_protocol::{ConnectionHandle, RelayError};
use tracing::{error, info};

/// Sends `message` every `interval` until the handle closes.
///
/// Each write carries the handle's deadline. A failed write is logged and
/// the pump keeps going; whether the connection is dead is for the read
/// pump to decide.
pub(crate) async fn outbound_pump(handle: Arc<ConnectionHandle>, interval: Duration, message: String) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = handle.closed() => break,
            _ = ticker.tick() => {
                info!(%message, "send message");
                match handle.send_text(message.clone()).await {
                    Ok(()) => {}
                    Err(RelayError::Closed) => break,
                    Err(e) => error!("send text failed: {e}"),
                }
            }
        }
    }
}
