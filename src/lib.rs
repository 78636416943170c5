//! ENSIME Client - session manager for the ENSIME analysis server
//!
//! Speaks the `jerky` JSON protocol over a WebSocket to a long-lived server
//! process. Requests carry a `callId`; responses are matched back to the
//! waiting caller, everything else goes to a `ResponseHandler`.
//!
//! ## Architecture
//!
//! ```text
//!   caller ── send_request ──▶ SessionManager ── frames ──▶ server
//!   caller ◀─ await_response ── CorrelationRegistry ◀── ReceiverLoop ◀──┘
//!                                ResponseHandler   ◀──┘ (no callId)
//! ```
//!
//! ## Capabilities
//!
//! The session does not know how the server is started or what the editor
//! shows. Both are injected through [`ClientContext`]:
//!
//! - [`ServerLauncher`] / [`ServerProcess`] - readiness, port, stop
//! - [`Editor`] - clear highlights, show the disabled warning
//! - [`ResponseHandler`] - payloads not claimed by a waiter
//! - [`Connector`] - WebSocket by default, in-memory for tests

pub mod config;
pub mod context;
pub mod editor;
pub mod error;
pub mod requests;
pub mod server;
pub mod session;

pub use config::Config;
pub use context::ClientContext;
pub use editor::{Editor, LoggingEditor, DISABLED_WARNING};
pub use error::{ClientError, Result};
pub use requests::ConnectionInfoRequest;
pub use server::{AttachedLauncher, AttachedServer, ServerLauncher, ServerProcess};
pub use session::{
    CallId, Connector, Envelope, HandlerRegistry, ResponseHandler, ResponseSlot, SessionManager,
    SessionState,
};
