//! Runs the server or the client until it stops or Ctrl-C arrives.

use std::sync::Arc;

use chatrelay_client::{ClientAgent, ClientConfig};
use chatrelay_server::{RelayServer, ServerConfig};
use futures_util::StreamExt;

/// Runs the relay server until Ctrl-C or a fatal accept-loop error.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let server = RelayServer::new(config);

    let server_run = Arc::clone(&server);
    let mut run = tokio::spawn(async move { server_run.run().await });

    let result = tokio::select! {
        joined = &mut run => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
            let closed = server.shutdown();
            tracing::info!(sessions = closed, "sessions closed");
            run.await
        }
    };

    // No-op if shutdown already ran.
    server.shutdown();
    result??;
    Ok(())
}

/// Connects, logs every relayed message, and sends the configured text on
/// its interval until the connection ends or Ctrl-C arrives.
pub async fn run_client(config: ClientConfig) -> anyhow::Result<()> {
    let mut agent = ClientAgent::connect(config).await?;
    let user = agent.user().to_string();

    if let Some(mut inbound) = agent.take_inbound() {
        tokio::spawn(async move {
            while let Some(text) = inbound.next().await {
                tracing::info!(%user, %text, "received");
            }
        });
    }
    agent.start_outbound();

    tokio::select! {
        reason = agent.wait_closed() => {
            tracing::info!(%reason, "connection ended");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, closing connection");
            agent.close().await;
            let reason = agent.wait_closed().await;
            tracing::debug!(%reason, "connection ended");
        }
    }

    Ok(())
}
