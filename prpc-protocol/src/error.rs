//! Protocol error types and error codes.

use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or metadata handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed packet header: {0}")]
    MalformedHeader(String),

    #[error("malformed varint length prefix")]
    MalformedVarint,

    #[error("protocol sequence error: {0}")]
    ProtocolSequence(&'static str),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unsupported frame feature: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the peer closed the stream before a full frame arrived.
    pub fn is_eof(&self) -> bool {
        matches!(self, ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }

    /// Returns whether the bytes on the wire could not be interpreted.
    ///
    /// Transport failures are not decode failures: a short read is `Io`.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedHeader(_)
                | ProtocolError::MalformedVarint
                | ProtocolError::Decode(_)
                | ProtocolError::MissingField(_)
                | ProtocolError::Unsupported(_)
                | ProtocolError::FrameTooLarge { .. }
        )
    }
}

/// Numeric error codes carried in `RpcResponseMeta.error_code`.
///
/// The values are the baidu_std codes and must stay stable; peers written
/// in other languages interpret them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Request errors
    NoService,
    NoMethod,
    BadRequest,
    Unauthorized,
    TimedOut,
    Overcrowded,

    // Server errors
    Internal,
    BadResponse,
    LogOff,
    Limit,
}

impl ErrorCode {
    /// Returns the wire value of this code.
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::NoService => 1001,
            ErrorCode::NoMethod => 1002,
            ErrorCode::BadRequest => 1003,
            ErrorCode::Unauthorized => 1004,
            ErrorCode::TimedOut => 1008,
            ErrorCode::Overcrowded => 1011,
            ErrorCode::Internal => 2001,
            ErrorCode::BadResponse => 2002,
            ErrorCode::LogOff => 2003,
            ErrorCode::Limit => 2004,
        }
    }

    /// Maps a wire value back to a known code.
    pub fn from_code(code: i32) -> Option<Self> {
        let known = match code {
            1001 => ErrorCode::NoService,
            1002 => ErrorCode::NoMethod,
            1003 => ErrorCode::BadRequest,
            1004 => ErrorCode::Unauthorized,
            1008 => ErrorCode::TimedOut,
            1011 => ErrorCode::Overcrowded,
            2001 => ErrorCode::Internal,
            2002 => ErrorCode::BadResponse,
            2003 => ErrorCode::LogOff,
            2004 => ErrorCode::Limit,
            _ => return None,
        };
        Some(known)
    }

    /// Returns whether a call failing with this code may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::TimedOut | ErrorCode::Overcrowded | ErrorCode::LogOff | ErrorCode::Limit
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NoService => write!(f, "ENOSERVICE"),
            ErrorCode::NoMethod => write!(f, "ENOMETHOD"),
            ErrorCode::BadRequest => write!(f, "EREQUEST"),
            ErrorCode::Unauthorized => write!(f, "ERPCAUTH"),
            ErrorCode::TimedOut => write!(f, "ERPCTIMEDOUT"),
            ErrorCode::Overcrowded => write!(f, "EOVERCROWDED"),
            ErrorCode::Internal => write!(f, "EINTERNAL"),
            ErrorCode::BadResponse => write!(f, "ERESPONSE"),
            ErrorCode::LogOff => write!(f, "ELOGOFF"),
            ErrorCode::Limit => write!(f, "ELIMIT"),
        }
    }
}
