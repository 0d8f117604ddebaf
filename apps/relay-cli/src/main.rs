//! chatrelay entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "WebSocket chat relay", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    #[command(alias = "chat")]
    Serve {
        /// Server id shown in logs
        #[arg(short = 'i', long = "serverid")]
        server_id: Option<String>,
        /// Listen address (host:port)
        #[arg(short, long)]
        listen: Option<String>,
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Connect to a relay and send a message on a fixed interval
    Client {
        /// Server URL
        #[arg(short, long)]
        address: Option<String>,
        /// User name announced to the server
        #[arg(short, long)]
        user: Option<String>,
        /// Text to send on every interval
        #[arg(short, long)]
        message: Option<String>,
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Serve {
            server_id,
            listen,
            config,
        } => {
            let mut section = Config::load(config.as_deref())?.server;
            if let Some(id) = server_id {
                section.id = id;
            }
            if let Some(listen) = listen {
                section.listen = listen;
            }
            rt.block_on(app::run_server(section.to_server_config()))?;
        }
        Commands::Client {
            address,
            user,
            message,
            config,
        } => {
            let mut section = Config::load(config.as_deref())?.client;
            if let Some(address) = address {
                section.address = address;
            }
            if let Some(user) = user {
                section.user = user;
            }
            if let Some(message) = message {
                section.message = message;
            }
            rt.block_on(app::run_client(section.to_client_config()))?;
        }
    }

    tracing::info!("shut down cleanly");
    Ok(())
}
