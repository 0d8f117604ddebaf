//! Wire layer shared by the chatrelay server and client.
//!
//! Provides the typed [`Frame`] codec over a WebSocket byte stream, the
//! role-dependent masking rule, and the [`ConnectionHandle`] that
//! serialises writes and applies write deadlines.

pub mod constants;
pub mod error;
pub mod frame;
pub mod handle;

// Re-export primary types for convenience.
pub use error::{CloseReason, Deadline, RelayError};
pub use frame::{Frame, FrameSink, FrameSource, OpCode, Role, decode_frame, encode_frame, framed};
pub use handle::{ConnectionHandle, ConnectionId};
