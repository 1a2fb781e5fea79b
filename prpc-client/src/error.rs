//! Client error types.

use prpc_protocol::{ErrorCode, ProtocolError};
use thiserror::Error;

/// Client errors.
///
/// Three failure classes stay distinguishable: the call never reached a
/// backend (`InvalidAddressList`, `Dial`, `NoAvailableBackend`,
/// `NotConnected`), the backend answered with an application error
/// (`Remote`), or the bytes on the wire were unreadable (`Protocol`).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid address list: {0}")]
    InvalidAddressList(String),

    #[error("unknown load balancer: {0}")]
    UnknownLoadBalancer(String),

    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no available backend")]
    NoAvailableBackend,

    #[error("not connected")]
    NotConnected,

    #[error("request timeout")]
    Timeout,

    #[error("sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u64, actual: u64 },

    #[error("remote error {code}: {text}")]
    Remote { code: i32, text: String },
}

impl ClientError {
    /// Returns whether the backend answered with an application error.
    pub fn is_remote(&self) -> bool {
        matches!(self, ClientError::Remote { .. })
    }

    /// Returns the well-known code of a remote error, if it is one.
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Remote { code, .. } => ErrorCode::from_code(*code),
            _ => None,
        }
    }

    /// Returns whether the wire bytes could not be interpreted.
    pub fn is_decode(&self) -> bool {
        matches!(self, ClientError::Protocol(e) if e.is_decode())
    }

    /// Returns whether the request was handed to a backend connection.
    pub fn reached_backend(&self) -> bool {
        !matches!(
            self,
            ClientError::InvalidAddressList(_)
                | ClientError::UnknownLoadBalancer(_)
                | ClientError::Dial { .. }
                | ClientError::NoAvailableBackend
                | ClientError::NotConnected
        )
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::Dial { .. } => true,
            ClientError::NotConnected => true,
            ClientError::NoAvailableBackend => true,
            ClientError::Remote { .. } => self.remote_code().is_some_and(|c| c.is_retryable()),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes_are_distinct() {
        let selection = ClientError::NoAvailableBackend;
        let remote = ClientError::Remote {
            code: 1002,
            text: "no method".to_string(),
        };
        let decode = ClientError::Protocol(ProtocolError::MalformedHeader("bad magic".into()));

        assert!(!selection.reached_backend());
        assert!(!selection.is_remote());
        assert!(!selection.is_decode());

        assert!(remote.reached_backend());
        assert!(remote.is_remote());
        assert!(!remote.is_decode());
        assert_eq!(remote.remote_code(), Some(ErrorCode::NoMethod));

        assert!(decode.reached_backend());
        assert!(!decode.is_remote());
        assert!(decode.is_decode());
    }

    #[test]
    fn test_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::NoAvailableBackend.is_retryable());
        assert!(ClientError::Remote {
            code: ErrorCode::Overcrowded.code(),
            text: String::new()
        }
        .is_retryable());

        assert!(!ClientError::Remote {
            code: ErrorCode::NoService.code(),
            text: String::new()
        }
        .is_retryable());
        assert!(!ClientError::Remote {
            code: 7,
            text: String::new()
        }
        .is_retryable());
        assert!(!ClientError::InvalidAddressList("".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ClientError::Remote {
            code: 2001,
            text: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "remote error 2001: boom");

        let err = ClientError::SequenceMismatch {
            expected: 3,
            actual: 4,
        };
        assert!(err.to_string().contains("expected 3"));
    }
}
