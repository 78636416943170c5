//! Session Manager
//!
//! Single responsibility: Own the connection lifecycle of one ENSIME session.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    SessionManager                       │
//! │  - setup() / teardown()                                 │
//! │  - send_request() assigns call ids                      │
//! │  - await_response() waits on the registry               │
//! └────────────────────────────────────────────────────────┘
//!          │ sink                         ▲ registry / handler
//!          ▼                              │
//!      Connector ──── stream ────▶ ReceiverLoop ──▶ Dispatcher
//! ```
//!
//! # Lifecycle
//!
//! `Unconnected` → `setup()` → `Connecting` → handshake → `Connected`.
//! `teardown()` always ends in `Stopped`. A transport failure while connecting,
//! or while receiving on a confirmed connection, disables the session: it
//! detaches, shuts the server down, warns the user once and stays `Stopped`.
//!
//! # Reconnection Policy
//!
//! Every connection attempt consumes one unit of the attempt budget
//! (`max_connection_attempts`, default 1). A failed send triggers exactly one
//! reconnect-and-resend. Once the budget is gone the next attempt disables the
//! session instead of connecting.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dispatcher::{Dispatcher, ResponseHandler};
use super::protocol::{encode_request, CallId, Envelope};
use super::receiver::ReceiverLoop;
use super::registry::{CorrelationRegistry, ResponseSlot};
use super::transport::{
    ConnectOptions, Connection, Connector, MessageSink, MessageStream, TransportError,
};
use crate::config::Config;
use crate::context::ClientContext;
use crate::editor::{Editor, DISABLED_WARNING};
use crate::requests::ConnectionInfoRequest;
use crate::server::{ServerLauncher, ServerProcess};

/// Coarse lifecycle state, see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Unconnected = 0,
    Connecting = 1,
    Connected = 2,
    ShuttingDown = 3,
    Stopped = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Unconnected,
            1 => SessionState::Connecting,
            2 => SessionState::Connected,
            3 => SessionState::ShuttingDown,
            _ => SessionState::Stopped,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::ShuttingDown => "shutting-down",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub(crate) struct SessionInner {
    id: Uuid,
    config: Config,
    launcher: Arc<dyn ServerLauncher>,
    connector: Arc<dyn Connector>,
    editor: Arc<dyn Editor>,
    handler: Arc<dyn ResponseHandler>,
    registry: Arc<CorrelationRegistry>,
    /// Call id counter, first id is 1
    next_call_id: AtomicU64,
    remaining_attempts: AtomicU32,
    running: AtomicBool,
    connected: AtomicBool,
    disabled: AtomicBool,
    /// Set while a `setup` connect task is running
    connect_in_flight: AtomicBool,
    state: AtomicU8,
    server: RwLock<Option<Arc<dyn ServerProcess>>>,
    server_uri: Mutex<Option<String>>,
    /// Send half of the current connection
    sink: Mutex<Option<Box<dyn MessageSink>>>,
    /// Hands receive halves to the receiver loop
    streams_tx: mpsc::UnboundedSender<Box<dyn MessageStream>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Client side of one ENSIME session.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create a session and start its receiver loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(context: ClientContext) -> Self {
        let ClientContext {
            config,
            launcher,
            connector,
            editor,
            handler,
        } = context;

        let registry = Arc::new(CorrelationRegistry::new());
        let (streams_tx, streams_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(registry.clone(), handler.clone());
        let retry_interval = config.receive_retry_interval();
        let id = Uuid::new_v4();

        let inner = Arc::new_cyclic(|weak| {
            let receiver = ReceiverLoop {
                session: weak.clone(),
                dispatcher,
                streams: streams_rx,
                shutdown: shutdown_rx,
                retry_interval,
            };
            let recv_task = tokio::spawn(receiver.run());

            SessionInner {
                id,
                remaining_attempts: AtomicU32::new(config.max_connection_attempts),
                config,
                launcher,
                connector,
                editor,
                handler,
                registry,
                next_call_id: AtomicU64::new(1),
                running: AtomicBool::new(true),
                connected: AtomicBool::new(false),
                disabled: AtomicBool::new(false),
                connect_in_flight: AtomicBool::new(false),
                state: AtomicU8::new(SessionState::Unconnected as u8),
                server: RwLock::new(None),
                server_uri: Mutex::new(None),
                sink: Mutex::new(None),
                streams_tx,
                shutdown_tx,
                tasks: Mutex::new(vec![recv_task]),
            }
        });

        debug!(session_id = %id, "Session created");
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// Start the server process (once) and connect in the background.
    ///
    /// Returns false when no server process could be obtained. A true result
    /// only means the connection attempt has started; watch `is_connected()`.
    pub async fn setup(&self) -> bool {
        debug!(session_id = %self.inner.id, "setup: in");

        let initialized = self.initialize_server().await;
        self.inner.running.store(initialized, Ordering::SeqCst);
        if !initialized {
            self.set_state(SessionState::Stopped);
            let _ = self.inner.shutdown_tx.send(true);
            return false;
        }

        if self.inner.connect_in_flight.swap(true, Ordering::SeqCst) {
            info!(session_id = %self.inner.id, "Connection attempt already in progress");
            return true;
        }

        self.transition(&[SessionState::Unconnected], SessionState::Connecting);
        let session = self.clone();
        let timeout = self.inner.config.connection_timeout();
        let task = tokio::spawn(async move {
            let fallback = session.clone();
            session
                .connect_when_ready(timeout, move || async move {
                    fallback.shutdown_server().await;
                })
                .await;
            session.inner.connect_in_flight.store(false, Ordering::SeqCst);
        });

        let mut tasks = self.inner.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
        true
    }

    async fn initialize_server(&self) -> bool {
        let mut server = self.inner.server.write().await;
        if server.is_none() {
            info!(session_id = %self.inner.id, "Initialising server");
            match self.inner.launcher.launch().await {
                Ok(process) => *server = Some(process),
                Err(e) => error!(session_id = %self.inner.id, error = %e, "Server launch failed"),
            }
        }
        server.is_some()
    }

    /// Wait for the server to become ready, then run the handshake.
    ///
    /// `on_failure` runs when no confirmed connection results.
    pub async fn connect_when_ready<F, Fut>(&self, timeout: Duration, on_failure: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        if self.has_transport().await {
            info!(session_id = %self.inner.id, "Already connected");
            return;
        }

        let server = self.inner.server.read().await.clone();
        if let Some(server) = server {
            let poll = self.inner.config.readiness_poll_interval();
            let mut remaining = timeout;
            while self.is_running() && !server.is_ready().await && !remaining.is_zero() {
                tokio::time::sleep(poll).await;
                remaining = remaining.saturating_sub(poll);
            }

            if self.is_running() && server.is_ready().await {
                // Another caller attached while this one was polling
                if self.has_transport().await {
                    info!(session_id = %self.inner.id, "Already connected");
                    return;
                }
                let confirmed = self.connect_server().await;
                self.inner.connected.store(confirmed, Ordering::SeqCst);
            }
        } else {
            warn!(session_id = %self.inner.id, "No server process to connect to");
        }

        if self.is_connected() {
            self.transition(
                &[SessionState::Unconnected, SessionState::Connecting],
                SessionState::Connected,
            );
            info!(session_id = %self.inner.id, "Connected to the server");
        } else {
            on_failure().await;
            info!(session_id = %self.inner.id, "Couldn't connect to the server");
        }
    }

    /// Open a transport and confirm it with the `ConnectionInfoReq` handshake.
    ///
    /// Consumes one connection attempt. Returns true once the handshake
    /// response arrived.
    pub async fn connect_server(&self) -> bool {
        debug!(session_id = %self.inner.id, "connect_server: in");

        // Step 1: Guard on lifecycle and attempt budget
        let permitted = self.is_running()
            && !self.is_disabled()
            && self
                .inner
                .remaining_attempts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if !permitted {
            warn!(
                session_id = %self.inner.id,
                running = self.is_running(),
                disabled = self.is_disabled(),
                "Connection not permitted: session stopped or attempts exhausted"
            );
            self.disable_completely(None).await;
            return false;
        }

        // Step 2: Resolve the transport address
        let uri = match self.server_uri().await {
            Ok(uri) => uri,
            Err(e) => {
                self.disable_completely(Some(&e)).await;
                return false;
            }
        };

        // Step 3: Connect
        let options = ConnectOptions::with_subprotocol(self.inner.config.subprotocol.clone());
        info!(session_id = %self.inner.id, uri = %uri, "About to connect");
        let connection = match self.inner.connector.connect(&uri, &options).await {
            Ok(connection) => connection,
            Err(e) => {
                self.disable_completely(Some(&e)).await;
                return false;
            }
        };
        self.attach(connection).await;

        // Step 4: Handshake
        let call_id = self.next_call_id();
        let message = match encode_request(call_id, &ConnectionInfoRequest::default()) {
            Ok(message) => message,
            Err(e) => {
                error!(session_id = %self.inner.id, error = %e, "Failed to encode handshake");
                return false;
            }
        };
        if let Err(e) = self.send_line(&message).await {
            self.disable_completely(Some(&e)).await;
            return false;
        }
        self.await_response(call_id, self.inner.config.handshake_timeout(), true)
            .await
    }

    async fn server_uri(&self) -> Result<String, TransportError> {
        let mut cached = self.inner.server_uri.lock().await;
        if let Some(uri) = cached.as_ref() {
            return Ok(uri.clone());
        }
        let server = self.inner.server.read().await.clone();
        let port = server.and_then(|s| s.http_port()).ok_or_else(|| {
            TransportError::InvalidRequest("server process reports no HTTP port".to_string())
        })?;
        let uri = self.inner.config.server_uri(port);
        *cached = Some(uri.clone());
        Ok(uri)
    }

    async fn attach(&self, connection: Connection) {
        let (sink, stream) = connection.split();
        let previous = self.inner.sink.lock().await.replace(sink);
        if let Some(mut previous) = previous {
            previous.close().await;
        }
        if self.inner.streams_tx.send(stream).is_err() {
            warn!(session_id = %self.inner.id, "Receiver loop is gone; responses will not be delivered");
        }
    }

    async fn detach_transport(&self) {
        let sink = self.inner.sink.lock().await.take();
        if let Some(mut sink) = sink {
            sink.close().await;
        }
    }

    async fn has_transport(&self) -> bool {
        self.inner.sink.lock().await.is_some()
    }

    fn next_call_id(&self) -> CallId {
        self.inner.next_call_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send `request` under a fresh call id and return that id.
    ///
    /// The id is consumed even when encoding or sending fails.
    pub async fn send_request<T: Serialize + ?Sized>(&self, request: &T) -> CallId {
        let call_id = self.next_call_id();
        match encode_request(call_id, request) {
            Ok(message) => {
                debug!(session_id = %self.inner.id, call_id, "send_request");
                self.send(&message).await;
            }
            Err(e) => {
                error!(session_id = %self.inner.id, call_id, error = %e, "Failed to encode request")
            }
        }
        call_id
    }

    /// Send a request and wait for its response.
    pub async fn request<T: Serialize + ?Sized>(&self, request: &T, timeout: Duration) -> bool {
        let call_id = self.send_request(request).await;
        self.await_response(call_id, timeout, true).await
    }

    /// Send one text frame.
    ///
    /// Without an attached transport this does nothing; messages are not
    /// queued. A transport error triggers one reconnect and one resend.
    pub async fn send(&self, text: &str) {
        match self.send_line(text).await {
            Ok(()) => {}
            Err(TransportError::Closed) => {
                debug!(session_id = %self.inner.id, "No transport attached, dropping message");
            }
            Err(e) => {
                error!(session_id = %self.inner.id, error = %e, "Send failed, reconnecting");
                self.reconnect().await;
                match self.send_line(text).await {
                    Ok(()) => debug!(session_id = %self.inner.id, "Resent after reconnect"),
                    Err(TransportError::Closed) => {
                        warn!(session_id = %self.inner.id, "No transport after reconnect, message dropped")
                    }
                    Err(e) => error!(session_id = %self.inner.id, error = %e, "Resend failed"),
                }
            }
        }
    }

    /// `Closed` means no transport is attached.
    async fn send_line(&self, text: &str) -> Result<(), TransportError> {
        let mut sink = self.inner.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink.send(format!("{}\n", text)).await,
            None => Err(TransportError::Closed),
        }
    }

    async fn reconnect(&self) {
        self.transition(&[SessionState::Connected], SessionState::Connecting);
        let confirmed = self.connect_server().await;
        self.inner.connected.store(confirmed, Ordering::SeqCst);
        if confirmed {
            self.transition(&[SessionState::Connecting], SessionState::Connected);
        } else {
            self.transition(&[SessionState::Connecting], SessionState::Unconnected);
        }
    }

    /// Wait until the response for `call_id` arrives or `timeout` elapses.
    ///
    /// On success the entry is removed, its payload goes to the response
    /// handler and true is returned. A nil sentinel restarts the timeout.
    /// With `should_wait == false` the registry is checked once.
    pub async fn await_response(&self, call_id: CallId, timeout: Duration, should_wait: bool) -> bool {
        let registry = &self.inner.registry;
        let poll = self.inner.config.response_poll_interval();
        let mut deadline = Instant::now() + timeout;

        loop {
            let notified = registry.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match registry.take(call_id) {
                Some(ResponseSlot::Response(envelope)) => {
                    self.resolve(call_id, envelope);
                    return true;
                }
                Some(ResponseSlot::Nil) => {
                    debug!(session_id = %self.inner.id, call_id, "Nil received, waiting again");
                    deadline = Instant::now() + timeout;
                }
                None => {}
            }

            if !should_wait {
                return false;
            }
            if !self.is_running() {
                debug!(session_id = %self.inner.id, call_id, "Session stopped while waiting");
                return false;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    session_id = %self.inner.id,
                    call_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "No reply from server"
                );
                return false;
            }

            let wake_at = deadline.min(now + poll);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    fn resolve(&self, call_id: CallId, envelope: Envelope) {
        debug!(session_id = %self.inner.id, call_id, "Response received");
        if let Some(echoed) = envelope.call_id.filter(|echoed| *echoed != call_id) {
            warn!(
                session_id = %self.inner.id,
                requested = call_id,
                echoed,
                "Protocol anomaly: response carries a different callId"
            );
        }
        if let Some(payload) = envelope.payload.as_ref() {
            self.inner
                .handler
                .handle_incoming_response(Some(call_id), payload);
        }
    }

    /// Stop the session: signal the receiver, stop the server, close the
    /// transport and join background tasks.
    pub async fn teardown(&self) {
        debug!(session_id = %self.inner.id, "teardown: in");
        self.inner.running.store(false, Ordering::SeqCst);
        self.set_state(SessionState::ShuttingDown);
        let _ = self.inner.shutdown_tx.send(true);

        self.shutdown_server().await;
        self.detach_transport().await;
        self.inner.registry.wake_all();

        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        let join_timeout = self.inner.config.teardown_join_timeout();
        for mut task in tasks {
            if tokio::time::timeout(join_timeout, &mut task).await.is_err() {
                warn!(session_id = %self.inner.id, "Background task did not stop in time, aborting");
                task.abort();
            }
        }

        self.set_state(SessionState::Stopped);
        info!(session_id = %self.inner.id, "Session stopped");
    }

    /// Mark disconnected, stop the server process and clear editor state.
    ///
    /// Safe to call repeatedly. Does not stop the receiver loop.
    pub async fn shutdown_server(&self) {
        debug!(session_id = %self.inner.id, "shutdown_server: in");
        self.inner.connected.store(false, Ordering::SeqCst);
        let server = self.inner.server.read().await.clone();
        if let Some(server) = server {
            server.stop().await;
        }
        self.inner.editor.uncolorize_all();
        self.transition(
            &[SessionState::Connecting, SessionState::Connected],
            SessionState::Unconnected,
        );
    }

    /// Permanently disable the session after a transport failure.
    ///
    /// The user is warned on the first call only.
    pub(crate) async fn disable_completely(&self, error: Option<&TransportError>) {
        if let Some(e) = error {
            error!(session_id = %self.inner.id, error = %e, "Connection error");
        }
        let first = !self.inner.disabled.swap(true, Ordering::SeqCst);

        self.detach_transport().await;
        self.shutdown_server().await;
        info!(session_id = %self.inner.id, "Server was shut down");
        self.set_state(SessionState::Stopped);

        if first {
            self.inner.editor.error_message(DISABLED_WARNING);
        }
    }

    fn set_state(&self, next: SessionState) {
        let _ = self
            .inner
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != SessionState::Stopped as u8).then_some(next as u8)
            });
    }

    fn transition(&self, from: &[SessionState], to: SessionState) {
        let _ = self
            .inner
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                from.contains(&SessionState::from_u8(current))
                    .then_some(to as u8)
            });
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }

    pub fn remaining_connection_attempts(&self) -> u32 {
        self.inner.remaining_attempts.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.id
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.inner.registry
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .field("running", &self.is_running())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}
