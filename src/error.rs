//! Error types for ensime-client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
