//! Socket types shared by every socket implementation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use super::Socket;

/// Close code used when the connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code reported when the peer's close frame carried no status
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Longest close reason accepted, in UTF-8 bytes
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Connection lifecycle stage
///
/// Variants are ordered; a connection only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress
    Connecting = 0,
    /// Ready to send and receive
    Open = 1,
    /// Close handshake started
    Closing = 2,
    /// Connection released
    Closed = 3,
}

impl ReadyState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyState::Connecting => "connecting",
            ReadyState::Open => "open",
            ReadyState::Closing => "closing",
            ReadyState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Closure details, produced exactly once per connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInfo {
    /// Close status code
    pub code: u16,
    /// Close reason sent by the closing side
    pub reason: String,
    /// Whether the close handshake completed
    pub was_clean: bool,
}

impl CloseInfo {
    /// Create a close record
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }

    /// Close record for a connection that dropped without a close handshake
    pub fn abnormal() -> Self {
        Self::new(CLOSE_ABNORMAL, "", false)
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}", self.code)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        if !self.was_clean {
            f.write_str(", unclean")?;
        }
        Ok(())
    }
}

/// Event notification emitted by a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The connection became ready
    Open,
    /// A text message arrived
    Message(String),
    /// The connection closed; always the last event
    Close(CloseInfo),
}

/// Errors raised synchronously by socket primitives
///
/// Variant names follow the platform exception names a socket raises, so
/// callers can tell a policy violation from a malformed argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    /// Blocked by security policy
    #[error("Security error: {0}")]
    Security(String),
    /// Malformed argument (URL, close reason)
    #[error("Syntax error: {0}")]
    Syntax(String),
    /// Disallowed argument value (close code)
    #[error("Invalid access: {0}")]
    InvalidAccess(String),
    /// Operation not valid in the current ready state
    #[error("Invalid state: {0}")]
    InvalidState(ReadyState),
    /// The payload could not be handed to the transport
    #[error("Transmission failed: {0}")]
    Transmission(String),
}

/// A freshly constructed socket plus its event stream
pub struct Opened {
    /// The socket handle
    pub socket: Arc<dyn Socket>,
    /// Events in the order the socket observed them
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

impl fmt::Debug for Opened {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opened")
            .field("url", &self.socket.url())
            .field("ready_state", &self.socket.ready_state())
            .finish()
    }
}

/// Check close arguments the way browsers do
///
/// A code must be 1000 or within 3000..=4999; a reason must fit in
/// [`MAX_CLOSE_REASON_BYTES`] bytes.
pub fn validate_close(code: Option<u16>, reason: &str) -> Result<(), SocketError> {
    if let Some(code) = code {
        if code != CLOSE_NORMAL && !(3000..=4999).contains(&code) {
            return Err(SocketError::InvalidAccess(format!(
                "close code {} is neither 1000 nor in 3000..=4999",
                code
            )));
        }
    }
    if reason.len() > MAX_CLOSE_REASON_BYTES {
        return Err(SocketError::Syntax(format!(
            "close reason is {} bytes, limit is {}",
            reason.len(),
            MAX_CLOSE_REASON_BYTES
        )));
    }
    Ok(())
}
