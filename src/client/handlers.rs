//! Event handler wiring
//!
//! Each event type maps to a function producing a task. The facade calls
//! the function in event order and hands the task to the connection's
//! delivery queue, which spawns tasks one after another in that order.

use super::Connection;
use crate::socket::CloseInfo;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Task produced by an event handler
pub type HandlerFuture = BoxFuture<'static, ()>;

type MessageFn = Arc<dyn Fn(Connection, String) -> HandlerFuture + Send + Sync>;
type CloseFn = Arc<dyn Fn(CloseInfo) -> HandlerFuture + Send + Sync>;

/// Trait form of [`EventHandlers`], for handlers that carry state
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// A message arrived on `connection`
    async fn on_message(&self, _connection: Connection, _payload: String) {}

    /// The connection closed
    async fn on_close(&self, _info: CloseInfo) {}
}

/// Callbacks invoked for connection events
#[derive(Clone)]
pub struct EventHandlers {
    on_message: MessageFn,
    on_close: CloseFn,
}

impl EventHandlers {
    /// Handlers that ignore every event
    pub fn new() -> Self {
        Self {
            on_message: Arc::new(|_: Connection, _: String| -> HandlerFuture {
                Box::pin(async {})
            }),
            on_close: Arc::new(|_: CloseInfo| -> HandlerFuture { Box::pin(async {}) }),
        }
    }

    /// Set the message callback
    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Connection, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_message = Arc::new(
            move |connection: Connection, payload: String| -> HandlerFuture {
                Box::pin(f(connection, payload))
            },
        );
        self
    }

    /// Set the close callback
    pub fn on_close<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CloseInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_close = Arc::new(move |info: CloseInfo| -> HandlerFuture { Box::pin(f(info)) });
        self
    }

    /// Route both events to an [`EventHandler`]
    pub fn from_handler<H: EventHandler>(handler: Arc<H>) -> Self {
        let for_message = handler.clone();
        let for_close = handler;
        Self {
            on_message: Arc::new(
                move |connection: Connection, payload: String| -> HandlerFuture {
                    let handler = for_message.clone();
                    Box::pin(async move { handler.on_message(connection, payload).await })
                },
            ),
            on_close: Arc::new(move |info: CloseInfo| -> HandlerFuture {
                let handler = for_close.clone();
                Box::pin(async move { handler.on_close(info).await })
            }),
        }
    }

    pub(crate) fn message_task(&self, connection: Connection, payload: String) -> HandlerFuture {
        (self.on_message)(connection, payload)
    }

    pub(crate) fn close_task(&self, info: CloseInfo) -> HandlerFuture {
        (self.on_close)(info)
    }
}

impl Default for EventHandlers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers").finish_non_exhaustive()
    }
}
