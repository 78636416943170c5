//! Everything a session needs from its surroundings.

use std::sync::Arc;

use crate::config::Config;
use crate::editor::{Editor, LoggingEditor};
use crate::server::ServerLauncher;
use crate::session::{Connector, HandlerRegistry, ResponseHandler, WsConnector};

/// Configuration plus capabilities, injected into `SessionManager::new`.
#[derive(Clone)]
pub struct ClientContext {
    pub config: Config,
    pub launcher: Arc<dyn ServerLauncher>,
    pub connector: Arc<dyn Connector>,
    pub editor: Arc<dyn Editor>,
    pub handler: Arc<dyn ResponseHandler>,
}

impl ClientContext {
    /// WebSocket transport, log-only editor and an empty handler registry.
    pub fn new(config: Config, launcher: Arc<dyn ServerLauncher>) -> Self {
        Self {
            config,
            launcher,
            connector: Arc::new(WsConnector),
            editor: Arc::new(LoggingEditor),
            handler: Arc::new(HandlerRegistry::new()),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_editor(mut self, editor: Arc<dyn Editor>) -> Self {
        self.editor = editor;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.handler = handler;
        self
    }
}
