//! Facade error taxonomy

use crate::socket::{CloseInfo, SocketError};
use thiserror::Error;

/// Why `open` failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    /// The URL violates the security policy
    #[error("Bad security: {0}")]
    BadSecurity(String),
    /// The URL is malformed or not allowed
    #[error("Bad arguments: {0}")]
    BadArgs(String),
    /// The socket closed before it ever became ready
    #[error("Connection closed before opening: {0}")]
    Closed(CloseInfo),
}

impl From<SocketError> for OpenError {
    fn from(err: SocketError) -> Self {
        match err {
            SocketError::Security(msg) => OpenError::BadSecurity(msg),
            other => OpenError::BadArgs(other.to_string()),
        }
    }
}

/// Why a send was refused
///
/// Refusals are ordinary runtime conditions and are returned as values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection is not open
    #[error("Connection is not open")]
    NotOpen,
    /// The underlying layer rejected the payload
    #[error("Payload could not be transmitted")]
    BadString,
}

/// Result of a send attempt
pub type SendOutcome = Result<(), SendError>;

/// Why `close` failed
///
/// Both variants indicate caller misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseError {
    /// The reason string was rejected
    #[error("Bad close reason: {0}")]
    BadReason(String),
    /// The close code was rejected
    #[error("Bad close code: {0}")]
    BadCode(String),
}

impl From<SocketError> for CloseError {
    fn from(err: SocketError) -> Self {
        match err {
            SocketError::Syntax(msg) => CloseError::BadReason(msg),
            other => CloseError::BadCode(other.to_string()),
        }
    }
}
