//! Server error types.

use crate::config::ConfigError;
use prpc_protocol::ProtocolError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns whether the peer closed the stream.
    pub fn is_eof(&self) -> bool {
        match self {
            ServerError::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            ServerError::Protocol(e) => e.is_eof(),
            _ => false,
        }
    }
}
