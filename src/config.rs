//! Configuration for ensime-client

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Placeholder replaced by the server's HTTP port in `server_uri_template`
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Placeholder replaced by `server_path` in `server_uri_template`
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// How long to wait for the server process to become ready, in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// How long to wait for the connection info handshake response, in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Default wait for a correlated response, in seconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,

    /// Interval between server readiness checks
    #[serde(default = "default_readiness_poll_interval")]
    pub readiness_poll_interval_ms: u64,

    /// Upper bound between registry checks while awaiting a response
    #[serde(default = "default_response_poll_interval")]
    pub response_poll_interval_ms: u64,

    /// Pause after a failed receive before the receiver loop continues
    #[serde(default = "default_receive_retry_interval")]
    pub receive_retry_interval_ms: u64,

    /// Bounded wait for background tasks during teardown
    #[serde(default = "default_teardown_join_timeout")]
    pub teardown_join_timeout_ms: u64,

    /// Connection attempts allowed for the lifetime of a session
    #[serde(default = "default_max_connection_attempts")]
    pub max_connection_attempts: u32,

    /// Transport address template, e.g. `ws://127.0.0.1:{port}/{path}`
    #[serde(default = "default_server_uri_template")]
    pub server_uri_template: String,

    /// Path substituted for `{path}` in the template
    #[serde(default = "default_server_path")]
    pub server_path: String,

    /// WebSocket sub-protocol negotiated at connect time
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,
}

fn default_connection_timeout() -> u64 {
    20
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_response_timeout() -> u64 {
    10
}

fn default_readiness_poll_interval() -> u64 {
    1000
}

fn default_response_poll_interval() -> u64 {
    250
}

fn default_receive_retry_interval() -> u64 {
    500
}

fn default_teardown_join_timeout() -> u64 {
    2000
}

fn default_max_connection_attempts() -> u32 {
    1
}

fn default_server_uri_template() -> String {
    "ws://127.0.0.1:{port}/{path}".to_string()
}

fn default_server_path() -> String {
    "websocket".to_string()
}

fn default_subprotocol() -> String {
    "jerky".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            response_timeout_secs: default_response_timeout(),
            readiness_poll_interval_ms: default_readiness_poll_interval(),
            response_poll_interval_ms: default_response_poll_interval(),
            receive_retry_interval_ms: default_receive_retry_interval(),
            teardown_join_timeout_ms: default_teardown_join_timeout(),
            max_connection_attempts: default_max_connection_attempts(),
            server_uri_template: default_server_uri_template(),
            server_path: default_server_path(),
            subprotocol: default_subprotocol(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ensime-client")
            .join("config.toml")
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the session manager cannot work with
    pub fn validate(&self) -> Result<()> {
        if !self.server_uri_template.contains(PORT_PLACEHOLDER) {
            return Err(ClientError::Config(format!(
                "server_uri_template must contain {PORT_PLACEHOLDER}: {}",
                self.server_uri_template
            )));
        }
        if self.max_connection_attempts == 0 {
            return Err(ClientError::Config(
                "max_connection_attempts must be at least 1".to_string(),
            ));
        }
        if self.readiness_poll_interval_ms == 0 || self.response_poll_interval_ms == 0 {
            return Err(ClientError::Config(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the transport address for a server listening on `port`
    pub fn server_uri(&self, port: u16) -> String {
        self.server_uri_template
            .replace(PORT_PLACEHOLDER, &port.to_string())
            .replace(PATH_PLACEHOLDER, &self.server_path)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }

    pub fn response_poll_interval(&self) -> Duration {
        Duration::from_millis(self.response_poll_interval_ms)
    }

    pub fn receive_retry_interval(&self) -> Duration {
        Duration::from_millis(self.receive_retry_interval_ms)
    }

    pub fn teardown_join_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_join_timeout_ms)
    }
}
