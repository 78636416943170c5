//! ENSIME Session Module
//!
//! Request/response over a persistent WebSocket to the analysis server.
//!
//! # Architecture
//!
//! The module is organized by concern, with each submodule having a single responsibility:
//!
//! | Module       | Responsibility                                       |
//! |--------------|------------------------------------------------------|
//! | `transport`  | Connect/send/receive text frames (WebSocket)         |
//! | `memory`     | The same transport over in-process channels          |
//! | `protocol`   | `callId`/`req`/`payload` envelopes                   |
//! | `registry`   | Correlated responses waiting to be claimed           |
//! | `dispatcher` | Registry vs. handler routing of incoming envelopes   |
//! | `receiver`   | Background task reading the current connection       |
//! | `manager`    | Lifecycle, call ids, handshake, timeouts, reconnect  |
//!
//! # Usage
//!
//! ```ignore
//! use ensime_client::{AttachedLauncher, ClientContext, Config, SessionManager};
//!
//! let launcher = Arc::new(AttachedLauncher::new("127.0.0.1", 56123));
//! let session = SessionManager::new(ClientContext::new(Config::default(), launcher));
//!
//! // Returns once the server process exists; the handshake runs in the background
//! session.setup().await;
//!
//! let call_id = session.send_request(&request).await;
//! let answered = session.await_response(call_id, Duration::from_secs(10), true).await;
//!
//! session.teardown().await;
//! ```

// Internal modules
mod receiver;

// Public modules
pub mod dispatcher;
pub mod manager;
pub mod memory;
pub mod protocol;
pub mod registry;
pub mod transport;

// Re-export the public API
pub use dispatcher::{Dispatch, Dispatcher, HandlerRegistry, ResponseHandler};
pub use manager::{SessionManager, SessionState};
pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use protocol::{CallId, Envelope};
pub use registry::{CorrelationRegistry, ResponseSlot};
pub use transport::{
    ConnectOptions, Connection, Connector, MessageSink, MessageStream, TransportError, WsConnector,
};
