//! Frame codec: typed frames on top of a WebSocket byte stream.
//!
//! The masking rule follows the connection role. Frames written by the
//! initiating side are masked with a random per-frame key, frames written by
//! the accepting side go out unmasked, and a frame masked in the wrong
//! direction is rejected on decode.

use std::pin::Pin;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::constants::WS_MAX_MESSAGE_SIZE;
use crate::error::RelayError;

/// Type-erased write half of a framed connection.
pub type FrameSink = Pin<Box<dyn Sink<WsMessage, Error = tungstenite::Error> + Send>>;

/// Type-erased read half of a framed connection.
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<WsMessage, tungstenite::Error>> + Send>>;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Text,
    Ping,
    Pong,
    Close,
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text payload.
    Text(String),
    Ping,
    Pong,
    /// Close with an optional reason.
    Close(Option<String>),
}

impl Frame {
    pub fn opcode(&self) -> OpCode {
        match self {
            Frame::Text(_) => OpCode::Text,
            Frame::Ping => OpCode::Ping,
            Frame::Pong => OpCode::Pong,
            Frame::Close(_) => OpCode::Close,
        }
    }

    /// Converts a decoded WebSocket message into a frame.
    ///
    /// Binary and raw frames have no meaning in this protocol and map to
    /// `None`.
    pub fn from_message(msg: WsMessage) -> Option<Self> {
        match msg {
            WsMessage::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
            WsMessage::Ping(_) => Some(Frame::Ping),
            WsMessage::Pong(_) => Some(Frame::Pong),
            WsMessage::Close(close) => Some(Frame::Close(
                close
                    .map(|f| f.reason.as_str().to_owned())
                    .filter(|r| !r.is_empty()),
            )),
            WsMessage::Binary(_) | WsMessage::Frame(_) => None,
        }
    }

    /// Converts this frame into a WebSocket message for writing.
    pub fn into_message(self) -> WsMessage {
        match self {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Ping => WsMessage::Ping(Vec::new().into()),
            Frame::Pong => WsMessage::Pong(Vec::new().into()),
            Frame::Close(None) => WsMessage::Close(None),
            Frame::Close(Some(reason)) => WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: reason.into(),
            })),
        }
    }
}

/// Which side of the connection this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dialed the connection; masks outgoing frames.
    Initiator,
    /// Accepted the connection; writes unmasked frames.
    Acceptor,
}

impl From<Role> for tungstenite::protocol::Role {
    fn from(role: Role) -> Self {
        match role {
            Role::Initiator => tungstenite::protocol::Role::Client,
            Role::Acceptor => tungstenite::protocol::Role::Server,
        }
    }
}

/// WebSocket limits shared by both roles.
pub fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
    config
}

/// Wraps an already-upgraded byte stream in the frame codec for `role`.
pub async fn framed<S>(io: S, role: Role) -> WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    WebSocketStream::from_raw_socket(io, role.into(), Some(ws_config())).await
}

/// Splits a framed connection into boxed halves.
pub fn split<S>(ws: WebSocketStream<S>) -> (FrameSink, FrameSource)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, source) = ws.split();
    (Box::pin(sink), Box::pin(source))
}

/// Reads the next protocol frame.
///
/// Frames outside the protocol's opcode set are skipped. The end of the
/// stream is reported as [`RelayError::Eof`].
pub async fn decode_frame<S>(stream: &mut S) -> Result<Frame, RelayError>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        match Frame::from_message(msg?) {
            Some(frame) => return Ok(frame),
            None => tracing::trace!("skipping non-protocol frame"),
        }
    }
    Err(RelayError::Eof)
}

/// Writes one protocol frame and flushes it.
pub async fn encode_frame<S>(sink: &mut S, frame: Frame) -> Result<(), RelayError>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    sink.send(frame.into_message()).await?;
    Ok(())
}
