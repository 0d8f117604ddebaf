//! WebSocket relay server.
//!
//! Accepts connections identified by a `user` query parameter, keeps one
//! live session per identity in a [`SessionRegistry`], answers heartbeat
//! pings, and rebroadcasts every text frame to all other sessions through
//! the [`Dispatcher`].

mod broadcast;
mod handshake;
mod registry;
mod server;
mod session;

pub use broadcast::{BroadcastReport, Dispatcher, format_broadcast};
pub use handshake::{accept, identity_from_query};
pub use registry::{Session, SessionRegistry};
pub use server::{RelayServer, ServerConfig};
pub use session::{Lifecycle, SessionState};

use chatrelay_protocol::RelayError;

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("server is shutting down")]
    ShuttingDown,
}
