//! In-process transport over Tokio channels.
//!
//! Each `connect` creates a fresh channel pair and hands the server end to
//! the [`MemoryListener`]. Tests drive the server side through [`MemoryPeer`];
//! embedders can use it to run a session against an in-process server.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::transport::{
    ConnectOptions, Connection, Connector, MessageSink, MessageStream, TransportError,
};

/// Connector whose connections terminate in the paired [`MemoryListener`].
#[derive(Debug)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    failures_remaining: AtomicUsize,
    connects: AtomicUsize,
}

/// Receives the server end of each connection made through a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server end of one in-memory connection.
///
/// Dropping the peer closes the connection: the client's stream reports
/// `TransportError::Closed` and its sink fails on the next send.
#[derive(Debug)]
pub struct MemoryPeer {
    uri: String,
    options: ConnectOptions,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            accept_tx,
            failures_remaining: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        };
        (connector, MemoryListener { accept_rx })
    }

    /// Make the next `count` connection attempts fail with a connect error.
    pub fn fail_next_connects(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of connection attempts made, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        uri: &str,
        options: &ConnectOptions,
    ) -> Result<Connection, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::Connect {
                uri: uri.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            uri: uri.to_string(),
            options: options.clone(),
            from_client,
            to_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::Connect {
                uri: uri.to_string(),
                reason: "listener dropped".to_string(),
            })?;

        debug!(uri = %uri, "In-memory connection established");
        Ok(Connection::new(
            Box::new(MemorySink { tx: Some(client_tx) }),
            Box::new(MemoryStream { rx: client_rx }),
        ))
    }
}

impl MemoryListener {
    /// Wait for the next connection. Returns `None` once the connector is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Take a connection that has already been made, without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

impl MemoryPeer {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Next frame sent by the client. `None` once the client closed its sink.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Deliver a frame to the client. Returns false if the client stream is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Ok(text.into())).is_ok()
    }

    /// Stop accepting frames from the client while still delivering to it.
    ///
    /// The client's next send fails; its stream stays open.
    pub fn close_inbound(&mut self) {
        self.from_client.close();
    }

    /// Make the client's next receive fail with `error`.
    pub fn fail(&self, error: TransportError) -> bool {
        self.to_client.send(Err(error)).is_ok()
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text)
            .map_err(|_| TransportError::Send("peer disconnected".to_string()))
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn receive(&mut self) -> Result<String, TransportError> {
        self.rx.recv().await.unwrap_or(Err(TransportError::Closed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (connector, mut listener) = MemoryConnector::new();
        let options = ConnectOptions::with_subprotocol("jerky");
        let (mut sink, mut stream) = connector
            .connect("mem://server", &options)
            .await
            .unwrap()
            .split();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.uri(), "mem://server");
        assert_eq!(peer.options(), &options);

        sink.send("ping".to_string()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("ping"));

        assert!(peer.send("pong"));
        assert_eq!(stream.receive().await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_dropped_peer_closes_both_halves() {
        let (connector, mut listener) = MemoryConnector::new();
        let (mut sink, mut stream) = connector
            .connect("mem://server", &ConnectOptions::default())
            .await
            .unwrap()
            .split();
        drop(listener.accept().await.unwrap());

        assert_eq!(stream.receive().await, Err(TransportError::Closed));
        assert!(matches!(
            sink.send("late".to_string()).await,
            Err(TransportError::Send(_))
        ));
    }

    #[tokio::test]
    async fn test_close_inbound_fails_sends_only() {
        let (connector, mut listener) = MemoryConnector::new();
        let (mut sink, mut stream) = connector
            .connect("mem://server", &ConnectOptions::default())
            .await
            .unwrap()
            .split();
        let mut peer = listener.accept().await.unwrap();
        peer.close_inbound();

        assert!(sink.send("dropped".to_string()).await.is_err());
        assert!(peer.send("still delivered"));
        assert_eq!(stream.receive().await.unwrap(), "still delivered");
    }

    #[tokio::test]
    async fn test_injected_connect_failures() {
        let (connector, mut listener) = MemoryConnector::new();
        connector.fail_next_connects(1);

        let first = connector.connect("mem://a", &ConnectOptions::default()).await;
        assert!(matches!(first, Err(TransportError::Connect { .. })));
        assert!(listener.try_accept().is_none());

        let second = connector.connect("mem://a", &ConnectOptions::default()).await;
        assert!(second.is_ok());
        assert!(listener.try_accept().is_some());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_receive_error() {
        let (connector, mut listener) = MemoryConnector::new();
        let (_sink, mut stream) = connector
            .connect("mem://a", &ConnectOptions::default())
            .await
            .unwrap()
            .split();
        let peer = listener.accept().await.unwrap();

        assert!(peer.fail(TransportError::Receive("reset".to_string())));
        assert_eq!(
            stream.receive().await,
            Err(TransportError::Receive("reset".to_string()))
        );
    }
}
