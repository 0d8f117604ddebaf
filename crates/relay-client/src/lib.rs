//! Client agent for the chatrelay server.
//!
//! Dials the server as the masking side of the connection and runs three
//! independent pumps over one shared handle: inbound frames, heartbeat
//! pings, and periodic outbound text.

pub mod agent;
pub mod inbound;
mod pumps;

pub use agent::{ClientAgent, ClientConfig};
pub use inbound::Inbound;

use chatrelay_protocol::RelayError;

/// Errors from the client agent.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("user name must not be empty")]
    EmptyUser,

    #[error(transparent)]
    Relay(#[from] RelayError),
}
