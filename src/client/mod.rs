//! Async WebSocket client facade
//!
//! Wraps one underlying socket per connection and exposes `open`, `send`,
//! `close` and `queued_bytes` as async operations. Incoming messages and
//! the closure notification are delivered by spawning the tasks produced
//! by [`EventHandlers`].

mod connection;
mod facade;
mod handlers;
mod types;

pub use connection::Connection;
pub use facade::WebSocketClient;
pub use handlers::{EventHandler, EventHandlers, HandlerFuture};
pub use types::{CloseError, OpenError, SendError, SendOutcome};
