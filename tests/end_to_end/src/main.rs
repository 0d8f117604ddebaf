fn main() {
    println!("Run `cargo test -p chatrelay-e2e` to execute the end-to-end scenarios.");
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use chatrelay_client::{ClientAgent, ClientConfig, Inbound};
    use chatrelay_protocol::{CloseReason, Frame, decode_frame, encode_frame};
    use chatrelay_server::{RelayServer, ServerConfig};
    use tokio::task::JoinHandle;

    /// Window used to assert that nothing arrives.
    const QUIET: Duration = Duration::from_millis(300);

    async fn start_server(config: ServerConfig) -> (Arc<RelayServer>, JoinHandle<()>, SocketAddr) {
        let server = RelayServer::new(ServerConfig {
            listen: "127.0.0.1:0".into(),
            ..config
        });
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            runner.run().await.unwrap();
        });

        let addr = loop {
            if let Some(addr) = server.local_addr().await {
                break addr;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        (server, handle, addr)
    }

    async fn connect(addr: SocketAddr, user: &str) -> (ClientAgent, Inbound) {
        let config = ClientConfig {
            address: format!("ws://{addr}"),
            user: user.into(),
            ..ClientConfig::default()
        };
        let mut agent = ClientAgent::connect(config).await.unwrap();
        let inbound = agent.take_inbound().unwrap();
        (agent, inbound)
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn next_message(inbound: &mut Inbound) -> String {
        tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .expect("message should arrive")
            .expect("connection should be open")
    }

    async fn assert_quiet(inbound: &mut Inbound) {
        if let Ok(Some(msg)) = tokio::time::timeout(QUIET, inbound.recv()).await {
            panic!("unexpected message: {msg}");
        }
    }

    #[tokio::test]
    async fn alice_and_bob() {
        let (server, handle, addr) = start_server(ServerConfig::default()).await;
        let registry = Arc::clone(server.registry());

        let (alice, mut alice_in) = connect(addr, "alice").await;
        let (bob, mut bob_in) = connect(addr, "bob").await;
        wait_for(|| registry.len() == 2).await;

        alice.send_text("hi").await.unwrap();
        assert_eq!(next_message(&mut bob_in).await, "hi -- FROM alice");
        assert_quiet(&mut alice_in).await;

        alice.close().await;
        wait_for(|| !registry.contains("alice")).await;
        assert_eq!(registry.identities(), ["bob"]);

        // Nobody left to hear it, and the sender never gets its own message.
        bob.send_text("yo").await.unwrap();
        assert_quiet(&mut bob_in).await;

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_survives_a_vanished_recipient() {
        let (server, handle, addr) = start_server(ServerConfig::default()).await;
        let registry = Arc::clone(server.registry());

        let (alice, _alice_in) = connect(addr, "alice").await;
        let (_bob, mut bob_in) = connect(addr, "bob").await;
        let (ghost, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/?user=ghost"))
            .await
            .unwrap();
        wait_for(|| registry.len() == 3).await;

        // Drop the socket without a close handshake.
        drop(ghost);

        alice.send_text("still there?").await.unwrap();
        assert_eq!(next_message(&mut bob_in).await, "still there? -- FROM alice");

        wait_for(|| !registry.contains("ghost")).await;
        assert_eq!(registry.identities(), ["alice", "bob"]);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_keeps_one_session_per_user() {
        let (server, handle, addr) = start_server(ServerConfig::default()).await;
        let registry = Arc::clone(server.registry());

        let (mut first, _first_in) = connect(addr, "alice").await;
        wait_for(|| registry.contains("alice")).await;
        let first_id = registry.get("alice").unwrap().id();

        let (_second, mut second_in) = connect(addr, "alice").await;
        wait_for(|| registry.get("alice").is_some_and(|h| h.id() != first_id)).await;

        let reason = tokio::time::timeout(Duration::from_secs(5), first.wait_closed())
            .await
            .expect("replaced connection should be closed");
        assert!(!matches!(reason, CloseReason::Timeout));

        let (bob, _bob_in) = connect(addr, "bob").await;
        wait_for(|| registry.len() == 2).await;
        bob.send_text("hey").await.unwrap();
        assert_eq!(next_message(&mut second_in).await, "hey -- FROM bob");

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_everyone_once() {
        let (server, handle, addr) = start_server(ServerConfig::default()).await;
        let registry = Arc::clone(server.registry());

        let (mut alice, _) = connect(addr, "alice").await;
        let (mut bob, _) = connect(addr, "bob").await;
        wait_for(|| registry.len() == 2).await;

        assert_eq!(server.shutdown(), 2);
        assert_eq!(server.shutdown(), 0);
        handle.await.unwrap();

        for agent in [&mut alice, &mut bob] {
            tokio::time::timeout(Duration::from_secs(5), agent.wait_closed())
                .await
                .expect("client should see the server close");
        }
        wait_for(|| registry.is_empty()).await;
    }

    #[tokio::test]
    async fn heartbeat_keeps_idle_client_alive() {
        let (server, handle, addr) = start_server(ServerConfig {
            read_wait: Duration::from_millis(500),
            ..ServerConfig::default()
        })
        .await;
        let registry = Arc::clone(server.registry());

        let config = ClientConfig {
            address: format!("ws://{addr}"),
            user: "idle".into(),
            heartbeat: Duration::from_millis(150),
            pong_wait: Duration::from_millis(450),
            ..ClientConfig::default()
        };
        let mut agent = ClientAgent::connect(config).await.unwrap();
        wait_for(|| registry.contains("idle")).await;

        let outcome = tokio::time::timeout(Duration::from_millis(1500), agent.wait_closed()).await;
        assert!(outcome.is_err(), "pings and pongs should keep both sides alive");
        assert!(registry.contains("idle"));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn silent_peer_is_dropped_after_read_wait() {
        let (server, handle, addr) = start_server(ServerConfig {
            read_wait: Duration::from_millis(300),
            ..ServerConfig::default()
        })
        .await;
        let registry = Arc::clone(server.registry());

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/?user=mute"))
            .await
            .unwrap();
        wait_for(|| registry.contains("mute")).await;

        // Never send anything; the server gives up and says goodbye.
        let frame = tokio::time::timeout(Duration::from_secs(5), decode_frame(&mut ws))
            .await
            .expect("server should close the connection");
        assert!(matches!(frame, Ok(Frame::Close(_)) | Err(_)));
        wait_for(|| !registry.contains("mute")).await;

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn server_answers_raw_ping() {
        let (server, handle, addr) = start_server(ServerConfig::default()).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/?user=raw"))
            .await
            .unwrap();
        encode_frame(&mut ws, Frame::Ping).await.unwrap();
        assert_eq!(decode_frame(&mut ws).await.unwrap(), Frame::Pong);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn missing_user_is_rejected_before_registration() {
        let (server, handle, addr) = start_server(ServerConfig::default()).await;

        for url in [format!("ws://{addr}/"), format!("ws://{addr}/?user=")] {
            assert!(tokio_tungstenite::connect_async(url).await.is_err());
        }
        assert!(server.registry().is_empty());

        server.shutdown();
        handle.await.unwrap();
    }
}
