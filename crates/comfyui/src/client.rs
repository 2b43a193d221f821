//! WebSocket client for a ComfyUI instance's event stream.
//!
//! [`ComfyUIClient`] holds the connection configuration. Call
//! [`ComfyUIClient::connect`] with the process session id to open a live
//! [`ComfyUIConnection`]; ComfyUI addresses job events to that id.

use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::messages::{parse_message, ComfyUIMessage};

/// Configuration handle for a ComfyUI event stream.
pub struct ComfyUIClient {
    ws_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake.
    pub client_id: String,
    ws_stream: tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl ComfyUIClient {
    /// Create a new client.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(ws_url: String) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
        }
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// `client_id` is appended as a query parameter so that ComfyUI
    /// routes execution messages for jobs submitted under the same id to
    /// this connection.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::debug!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

impl ComfyUIConnection {
    /// Wait for the next typed message.
    ///
    /// Returns `None` when the server closes the stream, `Some(Err)` on a
    /// receive error. Binary frames (preview images) and text frames that
    /// do not parse are skipped.
    pub async fn next_message(&mut self) -> Option<Result<ComfyUIMessage, ComfyUIClientError>> {
        while let Some(msg_result) = self.ws_stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match parse_message(&text) {
                    Ok(msg) => return Some(Ok(msg)),
                    Err(e) => {
                        tracing::warn!(
                            client_id = %self.client_id,
                            error = %e,
                            raw_message = %text,
                            "Failed to parse ComfyUI message",
                        );
                    }
                },
                Ok(Message::Binary(_)) => {
                    tracing::trace!(client_id = %self.client_id, "Ignoring binary message (preview image)");
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(client_id = %self.client_id, ?frame, "ComfyUI WebSocket closed");
                    return None;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    return Some(Err(ComfyUIClientError::Protocol(format!(
                        "WebSocket receive error: {e}"
                    ))));
                }
            }
        }
        None
    }

    /// Send a close frame. Errors are logged; the socket is released
    /// either way when the connection is dropped.
    pub async fn close(&mut self) {
        if let Err(e) = self.ws_stream.close(None).await {
            tracing::debug!(client_id = %self.client_id, error = %e, "WebSocket close failed");
        }
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
