//! WebSocket Transport Layer
//!
//! Single responsibility: Connect to a message endpoint and send/receive text frames.
//! No knowledge of envelopes, call ids, or session management.
//!
//! The session manager only sees the [`Connector`], [`MessageSink`] and
//! [`MessageStream`] traits. [`WsConnector`] is the production implementation;
//! `memory::MemoryConnector` runs the same protocol over in-process channels.

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use thiserror::Error;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Failure of a transport operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect to {uri} failed: {reason}")]
    Connect { uri: String, reason: String },

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("connection closed")]
    Closed,

    #[error("invalid connection request: {0}")]
    InvalidRequest(String),
}

/// Options negotiated when opening a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Sub-protocols offered in `Sec-WebSocket-Protocol`
    pub subprotocols: Vec<String>,
}

impl ConnectOptions {
    pub fn with_subprotocol(subprotocol: impl Into<String>) -> Self {
        Self {
            subprotocols: vec![subprotocol.into()],
        }
    }
}

/// Send half of a connection.
#[async_trait]
pub trait MessageSink: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection. Errors are ignored; the connection is going away.
    async fn close(&mut self);
}

/// Receive half of a connection.
#[async_trait]
pub trait MessageStream: Send {
    /// Receive the next text frame.
    ///
    /// Returns `TransportError::Closed` once the peer has gone away.
    async fn receive(&mut self) -> Result<String, TransportError>;
}

/// Opens connections to a URI.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        uri: &str,
        options: &ConnectOptions,
    ) -> Result<Connection, TransportError>;
}

/// A connected transport, split into independently owned halves.
///
/// The send half stays with the session manager, the receive half is handed
/// to the receiver loop.
pub struct Connection {
    sink: Box<dyn MessageSink>,
    stream: Box<dyn MessageStream>,
}

impl Connection {
    pub fn new(sink: Box<dyn MessageSink>, stream: Box<dyn MessageStream>) -> Self {
        Self { sink, stream }
    }

    /// Split into separate sink and stream for concurrent send/receive.
    pub fn split(self) -> (Box<dyn MessageSink>, Box<dyn MessageStream>) {
        (self.sink, self.stream)
    }
}

/// Connects over WebSocket using tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        uri: &str,
        options: &ConnectOptions,
    ) -> Result<Connection, TransportError> {
        debug!(uri = %uri, subprotocols = ?options.subprotocols, "Connecting to WebSocket");

        let mut builder = Request::builder()
            .uri(uri)
            .header("Host", extract_host(uri))
            .header("Origin", "http://localhost")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            );
        if !options.subprotocols.is_empty() {
            builder = builder.header("Sec-WebSocket-Protocol", options.subprotocols.join(", "));
        }
        let request = builder
            .body(())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let (ws, _) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| TransportError::Connect {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        let (sink, stream) = ws.split();

        debug!(uri = %uri, "WebSocket connected");
        Ok(Connection::new(
            Box::new(WebSocketSink { sink }),
            Box::new(WebSocketReceiver { stream }),
        ))
    }
}

struct WebSocketSink {
    sink: WsSink,
}

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

struct WebSocketReceiver {
    stream: WsStream,
}

#[async_trait]
impl MessageStream for WebSocketReceiver {
    async fn receive(&mut self) -> Result<String, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map_err(|e| TransportError::Receive(format!("non UTF-8 frame: {}", e)))
                }
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                // Pong is handled automatically by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Receive(e.to_string())),
            }
        }
    }
}

/// Extract host from URL for Host header
fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("localhost")
}
