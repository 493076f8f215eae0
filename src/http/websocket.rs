//! WebSocket proxy handling.
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Design Decisions
//! - Messages are relayed as they arrive
//! - Close frames propagated in both directions
//! - WebSocket traffic is never intercepted by the task simulation

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::header::{AUTHORIZATION, COOKIE, SEC_WEBSOCKET_PROTOCOL};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    handshake::client::Request as BackendRequest,
    protocol::{frame::coding::CloseCode, CloseFrame as BackendCloseFrame},
    Message as BackendMessage,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client handshake headers carried over to the backend handshake.
const FORWARDED_HEADERS: [axum::http::HeaderName; 3] = [COOKIE, AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL];

/// Whether the request asks for a WebSocket upgrade.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Open the backend socket, then complete the client handshake and relay
/// frames between the two.
///
/// The subprotocol the backend picked is offered to the client. A backend
/// that refuses the handshake yields `502 Bad Gateway`.
pub async fn forward(ws: WebSocketUpgrade, backend_url: String, headers: &HeaderMap) -> Response {
    let backend = match backend_request(&backend_url, headers) {
        Ok(request) => tokio_tungstenite::connect_async(request).await,
        Err(e) => Err(e),
    };
    let (backend, handshake) = match backend {
        Ok(connected) => connected,
        Err(e) => {
            tracing::warn!(backend = %backend_url, error = %e, "WebSocket backend handshake failed");
            return (StatusCode::BAD_GATEWAY, "WebSocket backend unavailable").into_response();
        }
    };

    let ws = match handshake
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        Some(protocol) => ws.protocols([protocol.to_string()]),
        None => ws,
    };

    ws.on_upgrade(move |client| relay(client, backend, backend_url))
}

fn backend_request(backend_url: &str, headers: &HeaderMap) -> Result<BackendRequest, tungstenite::Error> {
    let mut request = backend_url.into_client_request()?;
    for name in FORWARDED_HEADERS {
        for value in headers.get_all(&name) {
            request.headers_mut().append(name.clone(), value.clone());
        }
    }
    Ok(request)
}

async fn relay(client: WebSocket, backend: BackendSocket, backend_url: String) {
    tracing::debug!(backend = %backend_url, "WebSocket relay established");

    let (mut backend_tx, mut backend_rx) = backend.split();
    let (mut client_tx, mut client_rx) = client.split();

    let upstream = async {
        while let Some(Ok(message)) = client_rx.next().await {
            if backend_tx.send(to_backend(message)).await.is_err() {
                break;
            }
        }
        let _ = backend_tx.close().await;
    };

    let downstream = async {
        while let Some(Ok(message)) = backend_rx.next().await {
            let Some(message) = to_client(message) else {
                continue;
            };
            if client_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = upstream => {}
        _ = downstream => {}
    }

    tracing::debug!(backend = %backend_url, "WebSocket relay closed");
}

fn to_backend(message: Message) -> BackendMessage {
    match message {
        Message::Text(text) => BackendMessage::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => BackendMessage::Binary(data),
        Message::Ping(data) => BackendMessage::Ping(data),
        Message::Pong(data) => BackendMessage::Pong(data),
        Message::Close(frame) => BackendMessage::Close(frame.map(|f| BackendCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
    }
}

/// Raw frames have no client-side equivalent and are dropped.
fn to_client(message: BackendMessage) -> Option<Message> {
    Some(match message {
        BackendMessage::Text(text) => Message::Text(text.as_str().to_owned().into()),
        BackendMessage::Binary(data) => Message::Binary(data),
        BackendMessage::Ping(data) => Message::Ping(data),
        BackendMessage::Pong(data) => Message::Pong(data),
        BackendMessage::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
        BackendMessage::Frame(_) => return None,
    })
}
