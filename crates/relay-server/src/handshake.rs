//! WebSocket upgrade with identity extraction.

use chatrelay_protocol::RelayError;
use chatrelay_protocol::constants::USER_QUERY_PARAM;
use chatrelay_protocol::frame::ws_config;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

/// Extracts a non-empty `user` value from a request query string.
pub fn identity_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == USER_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Upgrades an accepted stream and returns the identity it announced.
///
/// A request without a usable `user` parameter is answered with
/// `400 Bad Request` and the stream is dropped, so no session is ever
/// created for it.
pub async fn accept<S>(stream: S) -> Result<(String, WebSocketStream<S>), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut identity = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        match identity_from_query(req.uri().query()) {
            Some(user) => {
                identity = Some(user);
                Ok(resp)
            }
            None => Err(reject("missing user")),
        }
    };

    let ws = accept_hdr_async_with_config(stream, callback, Some(ws_config()))
        .await
        .map_err(|e| RelayError::Handshake(e.to_string()))?;

    let identity = identity.ok_or_else(|| RelayError::Handshake("missing user".into()))?;
    Ok((identity, ws))
}

fn reject(reason: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(reason.to_owned()));
    *resp.status_mut() = StatusCode::BAD_REQUEST;
    resp
}
