//! Analysis server process capability.
//!
//! The session manager never spawns or locates the server itself; it asks a
//! [`ServerLauncher`] for a [`ServerProcess`] and only uses its readiness
//! signal, its HTTP port and `stop()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::{ClientError, Result};

/// A running (or starting) analysis server.
#[async_trait]
pub trait ServerProcess: Send + Sync {
    /// Whether the server accepts connections yet.
    async fn is_ready(&self) -> bool;

    /// Port the WebSocket endpoint listens on, once known.
    fn http_port(&self) -> Option<u16>;

    /// Stop the server. Must be safe to call more than once.
    async fn stop(&self);
}

/// Produces the server process for a session.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn ServerProcess>>;
}

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// A server started outside this process, reachable on a known host and port.
///
/// Readiness is a TCP connect probe. `stop` detaches from the server but
/// leaves the process running, since this client does not own it.
#[derive(Debug)]
pub struct AttachedServer {
    host: String,
    port: u16,
    detached: AtomicBool,
}

impl AttachedServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            detached: AtomicBool::new(false),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerProcess for AttachedServer {
    async fn is_ready(&self) -> bool {
        if self.is_detached() {
            return false;
        }
        let probe = TcpStream::connect((self.host.as_str(), self.port));
        let ready = matches!(tokio::time::timeout(PROBE_TIMEOUT, probe).await, Ok(Ok(_)));
        debug!(host = %self.host, port = self.port, ready, "Readiness probe");
        ready
    }

    fn http_port(&self) -> Option<u16> {
        Some(self.port)
    }

    async fn stop(&self) {
        if !self.detached.swap(true, Ordering::SeqCst) {
            info!(host = %self.host, port = self.port, "Detached from server; process left running");
        }
    }
}

/// Launcher for an [`AttachedServer`].
#[derive(Debug, Clone)]
pub struct AttachedLauncher {
    host: String,
    port: u16,
}

impl AttachedLauncher {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl ServerLauncher for AttachedLauncher {
    async fn launch(&self) -> Result<Arc<dyn ServerProcess>> {
        if self.port == 0 {
            return Err(ClientError::Launch(format!(
                "no server port configured for {}",
                self.host
            )));
        }
        info!(host = %self.host, port = self.port, "Attaching to running server");
        Ok(Arc::new(AttachedServer::new(self.host.clone(), self.port)))
    }
}
