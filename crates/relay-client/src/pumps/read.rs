//! Inbound pump: decodes frames and tracks server liveness.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_protocol::{CloseReason, ConnectionHandle, Frame, FrameSource, decode_frame};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

/// Reads frames until the connection closes, fails, or goes quiet.
///
/// Only a pong re-arms the liveness deadline: the heartbeat pump pings on a
/// fixed schedule, so a healthy server answers well inside `pong_wait`.
pub(crate) async fn read_pump(
    mut source: FrameSource,
    handle: Arc<ConnectionHandle>,
    inbound: mpsc::Sender<String>,
    pong_wait: Duration,
) -> CloseReason {
    let pong_deadline = tokio::time::sleep(pong_wait);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = handle.closed() => return CloseReason::Local,

            () = &mut pong_deadline => {
                warn!("pong timeout, connection dead");
                return CloseReason::Timeout;
            }

            frame = decode_frame(&mut source) => {
                match frame {
                    Ok(Frame::Pong) => {
                        trace!("received pong");
                        pong_deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + pong_wait);
                    }
                    Ok(Frame::Ping) => {
                        trace!("received ping, sending pong");
                        if let Err(e) = handle.send(Frame::Pong).await {
                            return e.into();
                        }
                    }
                    Ok(Frame::Text(text)) => match inbound.try_send(text) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("inbound buffer full, dropping message");
                        }
                        Err(TrySendError::Closed(_)) => {
                            trace!("inbound sequence dropped, discarding message");
                        }
                    },
                    Ok(Frame::Close(reason)) => {
                        debug!(?reason, "received close frame");
                        return CloseReason::PeerClosed;
                    }
                    Err(e) => {
                        warn!("read error: {e}");
                        return e.into();
                    }
                }
            }
        }
    }
}
