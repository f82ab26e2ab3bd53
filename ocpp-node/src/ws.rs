//! WebSocket transport for the OCPP-J engine
//!
//! Handles the upgrade handshake (subprotocol negotiation and the station
//! identity in the URL path) and pumps text frames between the socket and a
//! `Connection`.

use futures_util::{SinkExt, StreamExt};
use ocpp_core::types::IdentifierError;
use ocpp_core::{Connection, NetworkIdentity, OutboundFrame, ProtocolVersion};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_hdr_async_with_config, connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{ErrorResponse, Request, Response},
        http::{header, HeaderValue, StatusCode},
        protocol::WebSocketConfig,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid station identity: {0}")]
    Identity(#[from] IdentifierError),

    #[error("Peer accepted no OCPP subprotocol (offered {offered})")]
    NoSubprotocol { offered: String },

    #[error("Invalid header value: {0}")]
    Header(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),
}

fn ws_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(64 * 1024),
        max_frame_size: Some(16 * 1024),
        ..Default::default()
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Server side of the handshake
///
/// The station identity is the last path segment (`ws://host/ocpp/CS001`).
pub async fn accept(
    stream: TcpStream,
) -> Result<(WebSocketStream<TcpStream>, ProtocolVersion, NetworkIdentity), LinkError> {
    let mut negotiated: Option<(ProtocolVersion, NetworkIdentity)> = None;

    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let offered = request
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let version = ProtocolVersion::negotiate(offered)
            .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "no supported OCPP subprotocol"))?;

        let segment = request.uri().path().rsplit('/').next().unwrap_or("");
        let identity = NetworkIdentity::new(segment)
            .map_err(|e| reject(StatusCode::NOT_FOUND, &e.to_string()))?;

        response.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(version.subprotocol()),
        );
        negotiated = Some((version, identity));
        Ok(response)
    };

    let ws = accept_hdr_async_with_config(stream, callback, Some(ws_config())).await?;
    let (version, identity) = negotiated.ok_or_else(|| LinkError::NoSubprotocol {
        offered: String::new(),
    })?;
    Ok((ws, version, identity))
}

/// Client side of the handshake: offer `versions`, highest first
pub async fn connect(
    base_url: &str,
    station: &NetworkIdentity,
    versions: &[ProtocolVersion],
) -> Result<(WebSocketStream<MaybeTlsStream<TcpStream>>, ProtocolVersion), LinkError> {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), station);
    let offered = versions
        .iter()
        .rev()
        .map(|v| v.subprotocol())
        .collect::<Vec<_>>()
        .join(",");

    let mut request = url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(&offered)?);

    let (ws, response) = connect_async_with_config(request, Some(ws_config()), false).await?;

    let accepted = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .and_then(ProtocolVersion::from_subprotocol)
        .filter(|v| versions.contains(v))
        .ok_or(LinkError::NoSubprotocol { offered })?;

    info!(url = %url, version = %accepted, "WebSocket connected");
    Ok((ws, accepted))
}

/// Pump frames until the socket closes, then tear the connection down
///
/// Delivery is direct: inbound frames reach the `Connection` with an empty
/// path, and a routed outbound frame goes to the link peer as its next hop.
pub async fn run_link<S>(
    ws: WebSocketStream<S>,
    connection: Connection,
    mut outbound: mpsc::Receiver<OutboundFrame>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if frame.path.is_direct() {
                debug!("Sending: {}", frame.text);
            } else {
                // OCPP-J frames carry no hop list; the link peer is the next hop
                debug!(
                    destination = ?frame.destination,
                    path = %frame.path,
                    "Sending routed: {}",
                    frame.text
                );
            }
            if let Err(e) = ws_tx.send(Message::Text(frame.text)).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        if let Err(e) = ws_tx.close().await {
            debug!("WebSocket close failed: {}", e);
        }
    });

    let reason = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!("Received: {}", text);
                connection.receive_frame(&text).await;
            }
            Some(Ok(Message::Binary(_))) => {
                warn!("Ignoring binary frame");
            }
            Some(Ok(Message::Close(frame))) => {
                break frame.map_or_else(|| "closed by peer".to_string(), |f| f.reason.to_string());
            }
            // Ping/pong answered by tungstenite
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("WebSocket error: {}", e);
                break e.to_string();
            }
            None => break "stream ended".to_string(),
        }
    };

    connection.close(&reason);
    writer.abort();
}
