//! Server-side connection lifecycle.
//!
//! `Handshaking → Active → Closing → Closed`. The handshake happens in
//! [`crate::accept`]; [`Lifecycle::activate`] registers the session and
//! [`Lifecycle::run`] drives the read loop until the connection dies.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_protocol::frame::split;
use chatrelay_protocol::{CloseReason, ConnectionHandle, Frame, FrameSource, decode_frame};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};

use crate::ServerError;
use crate::broadcast::Dispatcher;
use crate::registry::SessionRegistry;
use crate::server::ServerConfig;

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Active,
    Closing,
    Closed,
}

/// Drives one accepted connection.
pub struct Lifecycle {
    identity: String,
    handle: Arc<ConnectionHandle>,
    source: FrameSource,
    registry: Arc<SessionRegistry>,
    dispatcher: Dispatcher,
    read_wait: Duration,
    state: SessionState,
}

impl Lifecycle {
    /// Registers an upgraded connection as the session for `identity`.
    ///
    /// Any session it replaces is closed after the registry lock is
    /// released; that session's own read loop then winds down.
    pub fn activate<S>(
        identity: String,
        ws: WebSocketStream<S>,
        registry: Arc<SessionRegistry>,
        dispatcher: Dispatcher,
        config: &ServerConfig,
    ) -> Result<Self, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = split(ws);
        let handle = ConnectionHandle::new(sink, config.write_wait);

        if let Some(old) = registry.upsert(&identity, Arc::clone(&handle))? {
            info!(user = %identity, old = %old.id(), "replacing previous session");
            old.close();
        }
        info!(user = %identity, conn = %handle.id(), "user connected");

        let mut lifecycle = Self {
            identity,
            handle,
            source,
            registry,
            dispatcher,
            read_wait: config.read_wait,
            state: SessionState::Handshaking,
        };
        lifecycle.transition(SessionState::Active);
        Ok(lifecycle)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(user = %self.identity, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Runs the read loop, then tears the session down.
    ///
    /// Registry removal also happens on unwind through [`SessionGuard`].
    pub async fn run(mut self) -> CloseReason {
        let guard = SessionGuard {
            registry: Arc::clone(&self.registry),
            identity: self.identity.clone(),
            handle: Arc::clone(&self.handle),
        };

        let (outbox, broadcasts) = self.dispatcher.queue(self.identity.clone());
        let reason = self.read_loop(&outbox).await;
        self.transition(SessionState::Closing);
        // Texts already queued still go out; the queue task ends on its own.
        drop(outbox);
        drop(broadcasts);

        self.handle.finish(None).await;
        drop(guard);

        self.transition(SessionState::Closed);
        info!(
            user = %self.identity,
            conn = %self.handle.id(),
            %reason,
            "connection closed"
        );
        reason
    }

    async fn read_loop(&mut self, outbox: &mpsc::Sender<String>) -> CloseReason {
        let handle = Arc::clone(&self.handle);

        loop {
            let next = tokio::select! {
                _ = handle.closed() => return CloseReason::Local,
                next = tokio::time::timeout(self.read_wait, decode_frame(&mut self.source)) => next,
            };

            let frame = match next {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => return e.into(),
                Err(_) => return CloseReason::Timeout,
            };

            match frame {
                Frame::Ping => {
                    trace!(user = %self.identity, "ping");
                    if let Err(e) = handle.send(Frame::Pong).await {
                        return e.into();
                    }
                }
                Frame::Pong => trace!(user = %self.identity, "pong"),
                Frame::Close(reason) => {
                    debug!(user = %self.identity, ?reason, "received close frame");
                    return CloseReason::PeerClosed;
                }
                Frame::Text(text) => match outbox.try_send(text) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(user = %self.identity, "broadcast queue full, dropping message");
                    }
                    Err(TrySendError::Closed(_)) => return CloseReason::Local,
                },
            }
        }
    }
}

/// Unregisters a session when dropped, including on panic unwind.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    identity: String,
    handle: Arc<ConnectionHandle>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.handle.close();
        if self.registry.remove(&self.identity, self.handle.id()) {
            debug!(user = %self.identity, "session removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_protocol::{RelayError, Role, encode_frame, framed};
    use tokio::io::{DuplexStream, duplex};

    use crate::broadcast::QUEUE_DEPTH;
    use crate::test_support::{recording_handle, stuck_handle};

    type ClientWs = WebSocketStream<DuplexStream>;

    async fn connect(
        registry: &Arc<SessionRegistry>,
        user: &str,
        config: &ServerConfig,
    ) -> (Lifecycle, ClientWs) {
        let (server_io, client_io) = duplex(64 * 1024);
        let server_ws = framed(server_io, Role::Acceptor).await;
        let client_ws = framed(client_io, Role::Initiator).await;
        let lifecycle = Lifecycle::activate(
            user.into(),
            server_ws,
            Arc::clone(registry),
            Dispatcher::new(Arc::clone(registry)),
            config,
        )
        .unwrap();
        (lifecycle, client_ws)
    }

    #[tokio::test]
    async fn activate_registers_session() {
        let registry = Arc::new(SessionRegistry::new());
        let (lifecycle, _client) = connect(&registry, "alice", &ServerConfig::default()).await;

        assert_eq!(lifecycle.state(), SessionState::Active);
        assert_eq!(lifecycle.identity(), "alice");
        assert_eq!(
            registry.get("alice").unwrap().id(),
            lifecycle.handle().id()
        );
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let registry = Arc::new(SessionRegistry::new());
        let (lifecycle, mut client) = connect(&registry, "alice", &ServerConfig::default()).await;
        let task = tokio::spawn(lifecycle.run());

        encode_frame(&mut client, Frame::Ping).await.unwrap();
        assert_eq!(decode_frame(&mut client).await.unwrap(), Frame::Pong);

        encode_frame(&mut client, Frame::Close(None)).await.unwrap();
        assert!(matches!(task.await.unwrap(), CloseReason::PeerClosed));
    }

    #[tokio::test]
    async fn peer_close_unregisters() {
        let registry = Arc::new(SessionRegistry::new());
        let (lifecycle, mut client) = connect(&registry, "alice", &ServerConfig::default()).await;
        let task = tokio::spawn(lifecycle.run());

        encode_frame(&mut client, Frame::Close(Some("bye".into())))
            .await
            .unwrap();

        assert!(matches!(task.await.unwrap(), CloseReason::PeerClosed));
        assert!(!registry.contains("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let registry = Arc::new(SessionRegistry::new());
        let (lifecycle, _client) = connect(&registry, "alice", &ServerConfig::default()).await;

        let reason = lifecycle.run().await;

        assert!(matches!(reason, CloseReason::Timeout), "got {reason}");
        assert!(!registry.contains("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn any_frame_refreshes_read_deadline() {
        let registry = Arc::new(SessionRegistry::new());
        let config = ServerConfig::default();
        let (lifecycle, mut client) = connect(&registry, "alice", &config).await;
        let task = tokio::spawn(lifecycle.run());

        // Keep the connection alive past several read windows.
        for _ in 0..4 {
            tokio::time::sleep(config.read_wait - Duration::from_secs(1)).await;
            encode_frame(&mut client, Frame::Pong).await.unwrap();
        }
        assert!(registry.contains("alice"));
        assert!(!task.is_finished());

        let reason = task.await.unwrap();
        assert!(matches!(reason, CloseReason::Timeout));
        assert!(!registry.contains("alice"));
    }

    #[tokio::test]
    async fn text_is_relayed_to_other_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let config = ServerConfig::default();
        let (alice, mut alice_client) = connect(&registry, "alice", &config).await;
        let (bob, mut bob_client) = connect(&registry, "bob", &config).await;
        let alice_task = tokio::spawn(alice.run());
        let bob_task = tokio::spawn(bob.run());

        encode_frame(&mut alice_client, Frame::Text("hi".into()))
            .await
            .unwrap();

        assert_eq!(
            decode_frame(&mut bob_client).await.unwrap(),
            Frame::Text("hi -- FROM alice".into())
        );

        encode_frame(&mut alice_client, Frame::Close(None)).await.unwrap();
        encode_frame(&mut bob_client, Frame::Close(None)).await.unwrap();
        alice_task.await.unwrap();
        bob_task.await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn replaced_session_exits_without_removing_successor() {
        let registry = Arc::new(SessionRegistry::new());
        let config = ServerConfig::default();
        let (first, _first_client) = connect(&registry, "alice", &config).await;
        let first_task = tokio::spawn(first.run());

        let (second, _second_client) = connect(&registry, "alice", &config).await;
        let second_id = second.handle().id();

        let reason = first_task.await.unwrap();
        assert!(matches!(reason, CloseReason::Local));
        assert_eq!(registry.get("alice").unwrap().id(), second_id);
        assert!(!second.handle().is_closed());
    }

    #[tokio::test]
    async fn shutdown_ends_running_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let config = ServerConfig::default();
        let (alice, _a) = connect(&registry, "alice", &config).await;
        let (bob, _b) = connect(&registry, "bob", &config).await;
        let tasks = [tokio::spawn(alice.run()), tokio::spawn(bob.run())];

        assert_eq!(registry.shutdown_all(), 2);
        for task in tasks {
            assert!(matches!(task.await.unwrap(), CloseReason::Local));
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn activate_after_shutdown_fails() {
        let registry = Arc::new(SessionRegistry::new());
        registry.shutdown_all();

        let (server_io, _client_io) = duplex(1024);
        let server_ws = framed(server_io, Role::Acceptor).await;
        let result = Lifecycle::activate(
            "alice".into(),
            server_ws,
            Arc::clone(&registry),
            Dispatcher::new(Arc::clone(&registry)),
            &ServerConfig::default(),
        );

        assert!(matches!(result, Err(ServerError::ShuttingDown)));
    }

    #[tokio::test]
    async fn broken_stream_ends_session() {
        let registry = Arc::new(SessionRegistry::new());
        let (lifecycle, client) = connect(&registry, "alice", &ServerConfig::default()).await;
        drop(client);

        let reason = lifecycle.run().await;
        assert!(matches!(
            reason,
            CloseReason::Error(RelayError::Eof | RelayError::Protocol(_))
        ));
        assert!(!registry.contains("alice"));
    }

    #[test]
    fn guard_removes_on_drop() {
        let registry = Arc::new(SessionRegistry::new());
        let handle = crate::test_support::null_handle();
        registry.upsert("alice", Arc::clone(&handle)).unwrap();

        drop(SessionGuard {
            registry: Arc::clone(&registry),
            identity: "alice".into(),
            handle: Arc::clone(&handle),
        });

        assert!(registry.is_empty());
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_recipient_does_not_stall_sender_heartbeat() {
        let registry = Arc::new(SessionRegistry::new());
        let config = ServerConfig::default();
        let (carol, mut carol_rx) = recording_handle();
        registry.upsert("bob", stuck_handle()).unwrap();
        registry.upsert("carol", carol).unwrap();

        let (alice, mut alice_client) = connect(&registry, "alice", &config).await;
        let task = tokio::spawn(alice.run());
        let started = tokio::time::Instant::now();

        // Far more texts than the queue holds while bob never drains a write.
        for i in 0..QUEUE_DEPTH + 8 {
            encode_frame(&mut alice_client, Frame::Text(format!("m{i}")))
                .await
                .unwrap();
        }

        assert_eq!(
            carol_rx.recv().await,
            Some(Frame::Text("m0 -- FROM alice".into()))
        );
        assert!(started.elapsed() < config.write_wait);

        encode_frame(&mut alice_client, Frame::Ping).await.unwrap();
        let pong = tokio::time::timeout(Duration::from_secs(1), decode_frame(&mut alice_client))
            .await
            .expect("pong should not wait on the stuck recipient");
        assert_eq!(pong.unwrap(), Frame::Pong);
        assert!(registry.contains("alice"));

        encode_frame(&mut alice_client, Frame::Close(None)).await.unwrap();
        assert!(matches!(task.await.unwrap(), CloseReason::PeerClosed));
    }
}
