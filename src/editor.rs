//! Editor integration side effects.

use tracing::{debug, warn};

/// Shown once when a session disables itself after a transport failure.
pub const DISABLED_WARNING: &str = "A WebSocket error occurred and the ENSIME session \
has been disabled. Check the client log for details, then restart the session.";

/// Presentation hooks the session manager triggers.
pub trait Editor: Send + Sync {
    /// Clear highlights and other presentation state tied to the server.
    fn uncolorize_all(&self);

    /// Show a warning to the user.
    fn error_message(&self, message: &str);
}

/// Editor without a UI; routes everything to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEditor;

impl Editor for LoggingEditor {
    fn uncolorize_all(&self) {
        debug!("Clearing editor presentation state");
    }

    fn error_message(&self, message: &str) {
        warn!(warning = %message, "User-visible warning");
    }
}
