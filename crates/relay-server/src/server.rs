//! Relay server.
//!
//! Listens on a TCP address, upgrades every accepted stream to WebSocket
//! and runs one [`Lifecycle`] task per connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chatrelay_protocol::{CloseReason, Deadline, RelayError};
use chatrelay_protocol::constants::{DEFAULT_LISTEN, SERVER_READ_WAIT, WRITE_WAIT};
use futures_util::{Stream, StreamExt, stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::broadcast::Dispatcher;
use crate::handshake;
use crate::registry::SessionRegistry;
use crate::session::Lifecycle;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server id, attached to log lines.
    pub id: String,
    /// Address to listen on (`host:port`, port 0 = OS-assigned).
    pub listen: String,
    /// Read inactivity window per connection.
    pub read_wait: Duration,
    /// Deadline for each frame written to a connection.
    pub write_wait: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: "demo".into(),
            listen: DEFAULT_LISTEN.into(),
            read_wait: SERVER_READ_WAIT,
            write_wait: WRITE_WAIT,
        }
    }
}

/// The relay server.
///
/// Owns its [`SessionRegistry`], so several servers can run side by side
/// in one process.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        Arc::new(Self {
            config,
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Stops accepting and closes every session.
    ///
    /// Safe to call any number of times; handles are closed once.
    pub fn shutdown(&self) -> usize {
        self.cancel.cancel();
        self.registry.shutdown_all()
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(
            server_id = %self.config.id,
            listen = %local_addr,
            "relay server started"
        );

        let incoming = stream::unfold(listener, |listener| async move {
            let next = listener.accept().await;
            Some((next, listener))
        });
        self.serve_incoming(incoming).await;
        Ok(())
    }

    /// Accept loop over any source of accepted streams.
    ///
    /// A failed accept (e.g. out of file descriptors) is logged and retried
    /// after [`ACCEPT_BACKOFF`].
    async fn serve_incoming<S, I>(self: &Arc<Self>, incoming: I)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        I: Stream<Item = io::Result<(S, SocketAddr)>>,
    {
        tokio::pin!(incoming);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(server_id = %self.config.id, "server shutting down");
                    self.registry.shutdown_all();
                    break;
                }

                next = incoming.next() => {
                    match next {
                        Some(Ok((stream, peer_addr))) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.serve_connection(stream).await {
                                    tracing::warn!(%peer_addr, "connection rejected: {e}");
                                }
                            });
                        }
                        Some(Err(e)) => {
                            tracing::error!("accept error: {e}");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                        None => break,
                    }
                }
            }
        }
    }

    /// Handshakes one stream and runs its session to completion.
    ///
    /// The upgrade request must arrive within the read window.
    pub async fn serve_connection<S>(&self, stream: S) -> Result<CloseReason, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (identity, ws) = tokio::time::timeout(self.config.read_wait, handshake::accept(stream))
            .await
            .map_err(|_| RelayError::Timeout(Deadline::Read))??;
        let lifecycle = Lifecycle::activate(
            identity,
            ws,
            Arc::clone(&self.registry),
            self.dispatcher.clone(),
            &self.config,
        )?;
        Ok(lifecycle.run().await)
    }
}
