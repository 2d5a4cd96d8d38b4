//! WebSocket client for the Gate.io futures stream
//!
//! Handles connection, subscription, and message reception.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{RecorderError, Result};
use crate::parser::SubscribeRequest;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What a single `recv` produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Ping/pong or raw frame, nothing to process
    Control,
    /// Peer closed the connection or the stream ended
    Closed,
}

/// WebSocket client for a single connection
pub struct WebSocketClient {
    stream: Option<WsStream>,
    endpoint: String,
}

impl WebSocketClient {
    /// Create a new WebSocket client
    pub fn new(endpoint: &str) -> Self {
        Self {
            stream: None,
            endpoint: endpoint.to_string(),
        }
    }

    /// Connect to the WebSocket endpoint
    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.endpoint, "Connecting to Gate.io WebSocket");

        let (ws_stream, response) = connect_async(&self.endpoint).await.map_err(|e| {
            RecorderError::WebSocketConnection(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);

        Ok(())
    }

    /// Subscribe to order book updates for `contract`
    pub async fn subscribe(&mut self, contract: &str) -> Result<()> {
        let request = SubscribeRequest::order_book_update(contract, chrono::Utc::now().timestamp());
        let payload = request.to_json()?;
        self.send_text(payload).await?;
        info!(contract = %contract, channel = request.channel, "Subscription sent");
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RecorderError::WebSocketConnection("Not connected".to_string()))?;
        stream
            .send(Message::Text(text))
            .await
            .map_err(|e| RecorderError::WebSocketMessage(e.to_string()))
    }

    /// Receive the next message
    pub async fn recv(&mut self) -> Result<Inbound> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RecorderError::WebSocketConnection("Not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "Received text message");
                Ok(Inbound::Text(text))
            }
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8_lossy(&data).to_string();
                Ok(Inbound::Text(text))
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                if let Err(e) = stream.send(Message::Pong(data)).await {
                    warn!(error = %e, "Failed to answer ping");
                }
                Ok(Inbound::Control)
            }
            Some(Ok(Message::Pong(_))) => {
                debug!("Received pong");
                Ok(Inbound::Control)
            }
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Received close frame");
                self.stream = None;
                Ok(Inbound::Closed)
            }
            Some(Ok(Message::Frame(_))) => Ok(Inbound::Control),
            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                self.stream = None;
                Err(RecorderError::WebSocketMessage(e.to_string()))
            }
            None => {
                warn!("WebSocket stream ended");
                self.stream = None;
                Ok(Inbound::Closed)
            }
        }
    }

    /// Send a ping to keep connection alive
    pub async fn ping(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream
                .send(Message::Ping(vec![]))
                .await
                .map_err(|e| RecorderError::WebSocketMessage(e.to_string()))?;
        }
        Ok(())
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the connection
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
