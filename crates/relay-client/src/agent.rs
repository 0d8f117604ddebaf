//! Client agent: one connection to the relay and the pumps driving it.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_protocol::constants::{
    CLIENT_HEARTBEAT, CLIENT_SEND_INTERVAL, DEFAULT_ADDRESS, DEFAULT_MESSAGE,
    INBOUND_BUFFER_SIZE, USER_QUERY_PARAM, WRITE_WAIT, pong_wait,
};
use chatrelay_protocol::frame::{split, ws_config};
use chatrelay_protocol::{CloseReason, ConnectionHandle, RelayError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

use crate::ClientError;
use crate::inbound::Inbound;
use crate::pumps::{outbound::outbound_pump, ping::ping_pump, read::read_pump};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. `ws://localhost:8001`.
    pub address: String,
    /// Identity announced to the server.
    pub user: String,
    /// Interval between heartbeat pings.
    pub heartbeat: Duration,
    /// How long to wait for a pong before declaring the server dead.
    pub pong_wait: Duration,
    /// Deadline for each frame written.
    pub write_wait: Duration,
    /// Interval between outbound text messages.
    pub send_interval: Duration,
    /// Text sent by the outbound pump.
    pub message: String,
    /// Capacity of the inbound message buffer.
    pub inbound_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.into(),
            user: String::new(),
            heartbeat: CLIENT_HEARTBEAT,
            pong_wait: pong_wait(CLIENT_HEARTBEAT),
            write_wait: WRITE_WAIT,
            send_interval: CLIENT_SEND_INTERVAL,
            message: DEFAULT_MESSAGE.into(),
            inbound_buffer: INBOUND_BUFFER_SIZE,
        }
    }
}

impl ClientConfig {
    /// Target URL with the user identity in the query string.
    pub fn url(&self) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(USER_QUERY_PARAM, &self.user)
            .finish();
        let sep = if self.address.contains('?') { '&' } else { '?' };
        format!("{}{sep}{query}", self.address)
    }
}

/// A live client connection.
///
/// The inbound and heartbeat pumps start with the agent; the outbound pump
/// starts on [`start_outbound`](Self::start_outbound). The closure signal
/// fires once, when the inbound pump exits.
pub struct ClientAgent {
    config: ClientConfig,
    handle: Arc<ConnectionHandle>,
    inbound: Option<Inbound>,
    closed_rx: Option<oneshot::Receiver<CloseReason>>,
    read_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<Result<(), RelayError>>,
    outbound_task: Option<JoinHandle<()>>,
}

impl ClientAgent {
    /// Dials the server and starts the agent.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        if config.user.is_empty() {
            return Err(ClientError::EmptyUser);
        }

        let url = config.url();
        let (ws, _) = tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config()), false)
            .await
            .map_err(|e| RelayError::Handshake(e.to_string()))?;
        info!(%url, user = %config.user, "connected");

        Ok(Self::from_stream(ws, config))
    }

    /// Starts the agent on an already-upgraded connection.
    pub fn from_stream<S>(ws: WebSocketStream<S>, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = split(ws);
        let handle = ConnectionHandle::new(sink, config.write_wait);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer);
        let (closed_tx, closed_rx) = oneshot::channel();

        let read_task = {
            let handle = Arc::clone(&handle);
            let pong_wait = config.pong_wait;
            tokio::spawn(async move {
                info!("read loop started");
                let reason = read_pump(source, Arc::clone(&handle), inbound_tx, pong_wait).await;
                // Stop the other pumps before anyone else writes on a dead connection.
                handle.close();
                info!(%reason, "connection closed");
                let _ = closed_tx.send(reason);
            })
        };

        let heartbeat_task = {
            let handle = Arc::clone(&handle);
            let heartbeat = config.heartbeat;
            tokio::spawn(async move {
                info!("heartbeat loop started");
                let result = ping_pump(handle, heartbeat).await;
                if let Err(e) = &result {
                    warn!("heartbeat loop stopped: {e}");
                }
                result
            })
        };

        Self {
            config,
            handle,
            inbound: Some(Inbound::new(inbound_rx)),
            closed_rx: Some(closed_rx),
            read_task,
            heartbeat_task,
            outbound_task: None,
        }
    }

    pub fn user(&self) -> &str {
        &self.config.user
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// Takes the inbound message sequence. Returns `None` after the first call.
    pub fn take_inbound(&mut self) -> Option<Inbound> {
        self.inbound.take()
    }

    /// Sends one text frame under the write deadline.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.handle.send_text(text).await
    }

    /// Starts sending the configured message every `send_interval`.
    pub fn start_outbound(&mut self) {
        if self.outbound_task.is_some() {
            return;
        }
        self.outbound_task = Some(tokio::spawn(outbound_pump(
            Arc::clone(&self.handle),
            self.config.send_interval,
            self.config.message.clone(),
        )));
    }

    /// Returns `true` once the heartbeat pump has stopped.
    pub fn heartbeat_stopped(&self) -> bool {
        self.heartbeat_task.is_finished()
    }

    /// Waits for the closure signal.
    ///
    /// Cancel-safe, so it can sit in a `select!`. After the signal has been
    /// observed once, later calls return [`CloseReason::Local`] immediately.
    pub async fn wait_closed(&mut self) -> CloseReason {
        let Some(rx) = self.closed_rx.as_mut() else {
            return CloseReason::Local;
        };
        let reason = rx.await.unwrap_or(CloseReason::Local);
        self.closed_rx = None;
        reason
    }

    /// Closes the connection from this side.
    pub async fn close(&self) {
        self.handle.finish(None).await;
    }
}

impl Drop for ClientAgent {
    fn drop(&mut self) {
        self.handle.close();
        self.read_task.abort();
        self.heartbeat_task.abort();
        if let Some(task) = &self.outbound_task {
            task.abort();
        }
    }
}
