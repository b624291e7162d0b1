use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{ClientRequest, ServerEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
};
use tracing::{info, warn};
use url::Url;

use shared::domain::UserId;

/// Bounded retry budget for transient connect failures. Exceeding it leaves
/// the client `Disconnected` until `connect` is called again explicitly.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Credential handed to `connect`. The `user_id` is the authenticated
/// session's own identity, used for local read-receipt marking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCredential {
    pub token: String,
    pub user_id: UserId,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    /// The server refused the credential. Terminal: the driver must not
    /// retry until the consumer calls `connect` again.
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// Network-level failure. Transient: retried with a bounded budget.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl ConnectError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectError::Auth(_))
    }
}

/// One live, authenticated socket session. The session is over when the
/// inbound stream yields `None`; dropping `outbound` closes the writer.
pub struct SocketSession {
    pub outbound: mpsc::UnboundedSender<ClientRequest>,
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Seam between the connection driver and the wire. Tests inject a
/// channel-backed implementation; production uses [`WsConnector`].
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, token: &str) -> Result<SocketSession, ConnectError>;
}

/// WebSocket connector for the namespaced chat endpoint.
pub struct WsConnector {
    endpoint: Url,
}

impl WsConnector {
    /// Derives the socket endpoint (`/chat/ws`) from the REST server URL.
    pub fn from_server_url(server_url: &str) -> Result<Self> {
        let mut endpoint =
            Url::parse(server_url).map_err(|err| anyhow!("invalid server url: {err}"))?;
        let scheme = match endpoint.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(anyhow!("unsupported server url scheme: {other}")),
        };
        endpoint
            .set_scheme(scheme)
            .map_err(|_| anyhow!("failed to set websocket scheme"))?;
        endpoint.set_path("/chat/ws");
        endpoint.set_query(None);
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, token: &str) -> Result<SocketSession, ConnectError> {
        let mut request_url = self.endpoint.clone();
        request_url.query_pairs_mut().append_pair("token", token);

        let (ws_stream, _) = connect_async(request_url.as_str())
            .await
            .map_err(map_handshake_error)?;
        info!(endpoint = %self.endpoint, "chat: websocket established");

        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientRequest>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(async move {
            while let Some(request) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&request) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("chat: failed to encode outbound frame: {err}");
                        continue;
                    }
                };
                if ws_writer.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if inbound_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!("chat: invalid server frame: {err}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("chat: websocket receive failed: {err}");
                        break;
                    }
                }
            }
        });

        Ok(SocketSession {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// An HTTP 401/403 during the upgrade is a credential problem; everything
/// else is assumed to be a transient network condition.
fn map_handshake_error(err: tungstenite::Error) -> ConnectError {
    match &err {
        tungstenite::Error::Http(response)
            if response.status() == tungstenite::http::StatusCode::UNAUTHORIZED
                || response.status() == tungstenite::http::StatusCode::FORBIDDEN =>
        {
            ConnectError::Auth(format!("handshake rejected with {}", response.status()))
        }
        _ => ConnectError::Transport(err.to_string()),
    }
}
