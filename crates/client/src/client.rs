//! WebSocket client for the capture progress channel.
//!
//! [`ProgressSocket`] holds the connection configuration for one project.
//! Call [`ProgressSocket::connect`] to open a [`ProgressConnection`] that is
//! already subscribed to the project's progress messages.

use std::sync::Arc;

use futures::SinkExt;
use shotline_core::socket_events::{MSG_TYPE_SUBSCRIBE, MSG_TYPE_UNSUBSCRIBE};
use shotline_core::types::ProjectId;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::auth::TokenSource;

pub type ProgressStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the progress socket of one project.
#[derive(Clone)]
pub struct ProgressSocket {
    ws_url: String,
    project_id: ProjectId,
    tokens: Arc<dyn TokenSource>,
}

/// A live, subscribed WebSocket connection.
pub struct ProgressConnection {
    pub project_id: ProjectId,
    /// Unique client ID sent with the subscription.
    pub client_id: String,
    pub ws_stream: ProgressStream,
}

impl ProgressSocket {
    /// * `ws_url`     - WebSocket endpoint, e.g. `ws://host:8000/ws`.
    /// * `project_id` - project whose progress to subscribe to.
    /// * `tokens`     - read again for every (re)subscription.
    pub fn new(ws_url: String, project_id: ProjectId, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            ws_url,
            project_id,
            tokens,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect and subscribe.
    ///
    /// Generates a unique `client_id` (UUID v4) and sends the `subscribe`
    /// frame before returning, so no progress for the project is missed
    /// after the caller's resync.
    pub async fn connect(&self) -> Result<ProgressConnection, SocketError> {
        let client_id = uuid::Uuid::new_v4().to_string();

        let (mut ws_stream, _response) = connect_async(self.ws_url.as_str()).await.map_err(|e| {
            SocketError::Connection(format!(
                "Failed to connect to progress socket at {}: {e}",
                self.ws_url
            ))
        })?;

        let token = self.tokens.bearer_token();
        let frame = subscribe_frame(&self.project_id, &client_id, token.as_deref());
        ws_stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| SocketError::Protocol(format!("Failed to subscribe: {e}")))?;

        tracing::info!(
            project_id = %self.project_id,
            client_id = %client_id,
            "Subscribed to capture progress at {}",
            self.ws_url,
        );

        Ok(ProgressConnection {
            project_id: self.project_id.clone(),
            client_id,
            ws_stream,
        })
    }
}

impl ProgressConnection {
    /// Send `unsubscribe` and close the socket.
    pub async fn close(mut self) -> Result<(), SocketError> {
        let frame = serde_json::json!({
            "type": MSG_TYPE_UNSUBSCRIBE,
            "data": { "project_id": self.project_id, "client_id": self.client_id },
        });
        self.ws_stream
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| SocketError::Protocol(e.to_string()))?;
        self.ws_stream
            .close(None)
            .await
            .map_err(|e| SocketError::Protocol(e.to_string()))
    }
}

/// JSON text of the subscription frame.
pub fn subscribe_frame(project_id: &str, client_id: &str, token: Option<&str>) -> String {
    let mut data = serde_json::json!({
        "project_id": project_id,
        "client_id": client_id,
    });
    if let Some(token) = token {
        data["token"] = serde_json::Value::String(token.to_string());
    }
    serde_json::json!({ "type": MSG_TYPE_SUBSCRIBE, "data": data }).to_string()
}

/// Errors that can occur when working with the progress socket.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
