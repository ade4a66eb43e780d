//! Underlying socket layer
//!
//! The facade never speaks the WebSocket protocol itself. It drives a
//! [`Socket`] obtained from a [`Connector`], both of which mirror the
//! platform WebSocket object: synchronous construction that can reject a
//! URL, a ready-state query, `send`, `close` and a backlog query, plus an
//! ordered stream of [`SocketEvent`]s.

pub mod memory;
mod state;
pub mod tungstenite;
mod types;

pub use state::StateCell;
pub use types::{
    validate_close, CloseInfo, Opened, ReadyState, SocketError, SocketEvent, CLOSE_ABNORMAL,
    CLOSE_NORMAL, CLOSE_NO_STATUS, MAX_CLOSE_REASON_BYTES,
};

/// Constructs sockets
pub trait Connector: Send + Sync {
    /// Construct a socket for `url`
    ///
    /// Rejections happen here, before any I/O: a policy violation returns
    /// [`SocketError::Security`], anything else about the URL returns
    /// another variant.
    fn connect(&self, url: &str) -> Result<Opened, SocketError>;
}

/// A single underlying connection
pub trait Socket: Send + Sync {
    /// Target URL
    fn url(&self) -> &str;

    /// Current lifecycle stage
    fn ready_state(&self) -> ReadyState;

    /// Hand a text payload to the transport
    fn send(&self, payload: &str) -> Result<(), SocketError>;

    /// Start the close handshake
    ///
    /// Invalid arguments are rejected before the state changes.
    fn close(&self, code: Option<u16>, reason: &str) -> Result<(), SocketError>;

    /// Bytes accepted by `send` but not yet written
    fn buffered_amount(&self) -> u64;
}
