//! Shared fixtures for session integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ensime_client::session::{MemoryConnector, MemoryListener, MemoryPeer};
use ensime_client::{
    CallId, ClientContext, ClientError, Config, Editor, ResponseHandler, ServerLauncher,
    ServerProcess, SessionManager,
};
use serde_json::{json, Value};

/// Port reported by the stub server
pub const STUB_PORT: u16 = 4242;

/// Server process whose readiness is set by the test
pub struct StubServer {
    ready: AtomicBool,
    port: Option<u16>,
    stops: AtomicUsize,
}

impl StubServer {
    pub fn new(ready: bool, port: Option<u16>) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(ready),
            port,
            stops: AtomicUsize::new(0),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerProcess for StubServer {
    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn http_port(&self) -> Option<u16> {
        self.port
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out the stub server, or fails every launch
pub struct StubLauncher {
    server: Arc<StubServer>,
    fail: bool,
    launches: AtomicUsize,
}

impl StubLauncher {
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerLauncher for StubLauncher {
    async fn launch(&self) -> ensime_client::Result<Arc<dyn ServerProcess>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ClientError::Launch("stub launch failure".to_string()));
        }
        Ok(self.server.clone())
    }
}

#[derive(Default)]
pub struct RecordingEditor {
    uncolorized: AtomicUsize,
    messages: Mutex<Vec<String>>,
}

impl RecordingEditor {
    pub fn uncolorize_count(&self) -> usize {
        self.uncolorized.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Editor for RecordingEditor {
    fn uncolorize_all(&self) {
        self.uncolorized.fetch_add(1, Ordering::SeqCst);
    }

    fn error_message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<(Option<CallId>, Value)>>,
}

impl RecordingHandler {
    pub fn calls(&self) -> Vec<(Option<CallId>, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose payload carries `typehint`
    pub fn calls_with(&self, typehint: &str) -> Vec<(Option<CallId>, Value)> {
        self.calls()
            .into_iter()
            .filter(|(_, payload)| payload["typehint"] == typehint)
            .collect()
    }
}

impl ResponseHandler for RecordingHandler {
    fn handle_incoming_response(&self, call_id: Option<CallId>, payload: &Value) {
        self.calls.lock().unwrap().push((call_id, payload.clone()));
    }
}

/// A session wired to in-memory transport and recording capabilities
pub struct Harness {
    pub session: SessionManager,
    pub connector: Arc<MemoryConnector>,
    pub listener: MemoryListener,
    pub server: Arc<StubServer>,
    pub launcher: Arc<StubLauncher>,
    pub editor: Arc<RecordingEditor>,
    pub handler: Arc<RecordingHandler>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Self::build(config, StubServer::new(true, Some(STUB_PORT)), false)
    }

    pub fn with_server(config: Config, server: Arc<StubServer>) -> Self {
        Self::build(config, server, false)
    }

    pub fn failing_launch(config: Config) -> Self {
        Self::build(config, StubServer::new(true, Some(STUB_PORT)), true)
    }

    fn build(config: Config, server: Arc<StubServer>, fail: bool) -> Self {
        let (connector, listener) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let launcher = Arc::new(StubLauncher {
            server: server.clone(),
            fail,
            launches: AtomicUsize::new(0),
        });
        let editor = Arc::new(RecordingEditor::default());
        let handler = Arc::new(RecordingHandler::default());

        let context = ClientContext::new(config, launcher.clone())
            .with_connector(connector.clone())
            .with_editor(editor.clone())
            .with_handler(handler.clone());

        Self {
            session: SessionManager::new(context),
            connector,
            listener,
            server,
            launcher,
            editor,
            handler,
        }
    }

    /// Run setup, answer the handshake and wait for the confirmed connection
    pub async fn connect(&mut self) -> MemoryPeer {
        assert!(self.session.setup().await);
        let peer = answer_handshake(&mut self.listener).await;
        let session = self.session.clone();
        wait_until(|| session.is_connected()).await;
        peer
    }
}

/// Accept the next connection and reply to its `ConnectionInfoReq`
pub async fn answer_handshake(listener: &mut MemoryListener) -> MemoryPeer {
    let mut peer = listener.accept().await.expect("client should connect");
    let call_id = expect_request(&mut peer, "ConnectionInfoReq").await;
    peer.send(
        json!({
            "callId": call_id,
            "payload": {"typehint": "ConnectionInfo", "version": "1.0"}
        })
        .to_string(),
    );
    peer
}

/// Read the next frame, check its request typehint and return its call id
pub async fn expect_request(peer: &mut MemoryPeer, typehint: &str) -> CallId {
    let frame = peer.recv().await.expect("client should send a frame");
    assert!(frame.ends_with('\n'), "frames are newline terminated: {frame:?}");
    let value: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["req"]["typehint"], typehint, "unexpected frame {value}");
    value["callId"].as_u64().expect("request carries a callId")
}

/// Poll `condition` until it holds; panics after two minutes of (possibly paused) time
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition was not reached in time");
}
