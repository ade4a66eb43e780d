//! ws-facade: async WebSocket client facade
//!
//! This library provides:
//! - An async facade (`open`, `send`, `close`, `queued_bytes`) over one
//!   underlying socket per connection
//! - Lifecycle events delivered as spawned handler tasks
//! - A native socket backed by tokio-tungstenite, with a security policy
//! - An in-process socket with a scripted peer for tests
//! - Logging and Prometheus metrics

pub mod cli;
pub mod client;
pub mod config;
pub mod socket;
pub mod telemetry;

pub use client::{
    CloseError, Connection, EventHandler, EventHandlers, OpenError, SendError, SendOutcome,
    WebSocketClient,
};
pub use socket::{CloseInfo, ReadyState};
