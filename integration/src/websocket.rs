//! WebSocket stream transport seam.
//!
//! The connector's user-stream consumer drives a [`StreamTransport`]; the
//! production implementation wraps `tokio-tungstenite`. Reconnect policy and
//! message interpretation live above this seam - here a stream is just a
//! sequence of text frames with ping/pong housekeeping.

use crate::error::TransportError;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A frame surfaced to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// A text payload (venues speak JSON over text frames).
    Text(String),
    /// Pong received for an earlier ping.
    Pong,
    /// Remote closed the stream; the consumer should reconnect.
    Closed,
}

/// Transport seam between the user-stream consumer and the socket.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Establish (or re-establish) the underlying connection.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Send a text frame (subscription requests, auth payloads).
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a ping frame (liveness probe on idle streams).
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Receive the next frame, suspending until one arrives.
    async fn next_message(&mut self) -> Result<StreamMessage, TransportError>;

    /// Tear down the connection. Safe to call when not connected.
    async fn close(&mut self);
}

/// Production [`StreamTransport`] backed by `tokio-tungstenite`.
#[derive(Debug)]
pub struct TungsteniteTransport {
    url: Url,
    socket: Option<WsStream>,
}

impl TungsteniteTransport {
    pub fn new(url: Url) -> Self {
        Self { url, socket: None }
    }

    fn socket(&mut self) -> Result<&mut WsStream, TransportError> {
        self.socket
            .as_mut()
            .ok_or_else(|| TransportError::WebSocket("not connected".to_string()))
    }
}

#[async_trait::async_trait]
impl StreamTransport for TungsteniteTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.close().await;
        let (socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|error| TransportError::WebSocket(error.to_string()))?;
        debug!(url = %self.url, "websocket connected");
        self.socket = Some(socket);
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.socket()?
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| TransportError::WebSocket(error.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.socket()?
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|error| TransportError::WebSocket(error.to_string()))
    }

    async fn next_message(&mut self) -> Result<StreamMessage, TransportError> {
        let socket = self.socket()?;
        loop {
            match socket.next().await {
                None => return Ok(StreamMessage::Closed),
                Some(Err(error)) => {
                    return Err(TransportError::WebSocket(error.to_string()));
                }
                Some(Ok(message)) => match message {
                    Message::Text(text) => return Ok(StreamMessage::Text(text.to_string())),
                    Message::Binary(bytes) => {
                        return Ok(StreamMessage::Text(
                            String::from_utf8_lossy(&bytes).into_owned(),
                        ));
                    }
                    Message::Ping(payload) => {
                        // Tungstenite queues the pong; flush it promptly.
                        socket
                            .send(Message::Pong(payload))
                            .await
                            .map_err(|error| TransportError::WebSocket(error.to_string()))?;
                    }
                    Message::Pong(_) => return Ok(StreamMessage::Pong),
                    Message::Close(_) => return Ok(StreamMessage::Closed),
                    Message::Frame(_) => {}
                },
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }
}
