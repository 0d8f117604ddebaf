//! Configuration file.
//!
//! Optional TOML with a `[server]` and a `[client]` table. Every key has a
//! default, so a partial file (or no file) is fine. Command line flags are
//! applied on top in `main`.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chatrelay_client::ClientConfig;
use chatrelay_protocol::constants::{
    CLIENT_HEARTBEAT, CLIENT_SEND_INTERVAL, DEFAULT_ADDRESS, DEFAULT_LISTEN, DEFAULT_MESSAGE,
    SERVER_READ_WAIT, WRITE_WAIT, pong_wait,
};
use chatrelay_server::ServerConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
}

/// `[server]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Server id shown in logs.
    #[serde(default = "default_server_id")]
    pub id: String,

    /// Listen address, `host:port`.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Seconds without any inbound frame before a connection is dropped.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

/// `[client]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    /// Server URL.
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default)]
    pub user: String,

    /// Heartbeat interval; the pong deadline is three times this.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_send_interval")]
    pub send_interval_secs: u64,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Text sent on every send interval.
    #[serde(default = "default_message")]
    pub message: String,
}

fn default_server_id() -> String {
    "demo".into()
}

fn default_listen() -> String {
    DEFAULT_LISTEN.into()
}

fn default_read_timeout() -> u64 {
    SERVER_READ_WAIT.as_secs()
}

fn default_write_timeout() -> u64 {
    WRITE_WAIT.as_secs()
}

fn default_address() -> String {
    DEFAULT_ADDRESS.into()
}

fn default_heartbeat() -> u64 {
    CLIENT_HEARTBEAT.as_secs()
}

fn default_send_interval() -> u64 {
    CLIENT_SEND_INTERVAL.as_secs()
}

fn default_message() -> String {
    DEFAULT_MESSAGE.into()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            id: default_server_id(),
            listen: default_listen(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            address: default_address(),
            user: String::new(),
            heartbeat_secs: default_heartbeat(),
            send_interval_secs: default_send_interval(),
            write_timeout_secs: default_write_timeout(),
            message: default_message(),
        }
    }
}

impl Config {
    /// Loads the file at `path`, or returns defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Rejects zero intervals and timeouts; the pumps cannot run on them.
    pub fn validate(&self) -> anyhow::Result<()> {
        let durations = [
            ("server.read_timeout_secs", self.server.read_timeout_secs),
            ("server.write_timeout_secs", self.server.write_timeout_secs),
            ("client.heartbeat_secs", self.client.heartbeat_secs),
            ("client.send_interval_secs", self.client.send_interval_secs),
            ("client.write_timeout_secs", self.client.write_timeout_secs),
        ];
        for (key, secs) in durations {
            anyhow::ensure!(secs > 0, "{key} must be greater than zero");
        }
        Ok(())
    }
}

impl ServerSection {
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            id: self.id.clone(),
            listen: self.listen.clone(),
            read_wait: Duration::from_secs(self.read_timeout_secs),
            write_wait: Duration::from_secs(self.write_timeout_secs),
        }
    }
}

impl ClientSection {
    pub fn to_client_config(&self) -> ClientConfig {
        let heartbeat = Duration::from_secs(self.heartbeat_secs);
        ClientConfig {
            address: self.address.clone(),
            user: self.user.clone(),
            heartbeat,
            pong_wait: pong_wait(heartbeat),
            write_wait: Duration::from_secs(self.write_timeout_secs),
            send_interval: Duration::from_secs(self.send_interval_secs),
            message: self.message.clone(),
            ..ClientConfig::default()
        }
    }
}
