//! WebSocket client facade
//!
//! `open` constructs the socket synchronously, then waits for it to become
//! ready. A dispatcher task spawned per connection turns socket events into
//! handler tasks:
//!
//! - `Open` resolves the pending `open`, and message delivery starts only
//!   once `open` has acknowledged it;
//! - each `Message` produces one `on_message` task;
//! - the single `Close` produces one `on_close` task and ends the dispatcher.
//!
//! Handler tasks of one connection are spawned one at a time, in event
//! order, by a [`Delivery`] task; each runs to completion before the next
//! starts, so `on_close` always comes after the last `on_message`.
//!
//! The dispatcher only holds a weak reference to the connection. Dropping
//! every [`Connection`] handle releases the socket.
//!
//! Dropping the `open` future before it resolves closes the socket through
//! [`OpenGuard`]; the dispatcher then sees nobody waiting on `Open` and
//! never delivers messages for that connection.

use super::connection::WeakConnection;
use super::{Connection, EventHandlers, HandlerFuture, OpenError};
use crate::config::Config;
use crate::socket::tungstenite::TungsteniteConnector;
use crate::socket::{CloseInfo, Connector, Opened, SocketEvent};
use crate::telemetry::{self, CounterMetric, GaugeMetric};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// What the dispatcher reports to a pending `open`
enum Readiness {
    /// Ready; `open` acknowledges before messages are delivered
    Open(oneshot::Sender<()>),
    /// Closed before it was ever ready
    Closed(CloseInfo),
}

/// Async facade over a [`Connector`]
#[derive(Clone)]
pub struct WebSocketClient {
    connector: Arc<dyn Connector>,
}

impl WebSocketClient {
    /// Client using the native tokio-tungstenite socket
    pub fn new(config: &Config) -> Self {
        Self::with_connector(Arc::new(TungsteniteConnector::new(
            &config.client,
            &config.security,
        )))
    }

    /// Client using a custom socket implementation
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Open a connection to `url`
    ///
    /// Resolves once the socket is ready. Construction failures resolve
    /// immediately with [`OpenError::BadSecurity`] or [`OpenError::BadArgs`];
    /// a socket that closes before becoming ready yields
    /// [`OpenError::Closed`]. Nothing is retried.
    ///
    /// `handlers.on_close` fires exactly once for every socket that was
    /// constructed, including when this future is dropped early.
    pub async fn open(&self, url: &str, handlers: EventHandlers) -> Result<Connection, OpenError> {
        let Opened { socket, events } = self.connector.connect(url).map_err(|e| {
            let err = OpenError::from(e);
            tracing::warn!(url, error = %err, "WebSocket construction rejected");
            let reason = match err {
                OpenError::BadSecurity(_) => "bad_security",
                _ => "bad_args",
            };
            telemetry::increment_with_reason(CounterMetric::OpenFailures, reason);
            err
        })?;

        let connection = Connection::new(socket);
        tracing::debug!(id = %connection.id(), url, "WebSocket constructed");

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(dispatch(
            connection.downgrade(),
            connection.url().to_string(),
            events,
            handlers,
            ready_tx,
        ));

        let mut guard = OpenGuard {
            connection: Some(connection.clone()),
        };

        match ready_rx.await {
            Ok(Readiness::Open(ack)) => {
                guard.disarm();
                let _ = ack.send(());
                Ok(connection)
            }
            Ok(Readiness::Closed(info)) => {
                guard.disarm();
                telemetry::increment_with_reason(CounterMetric::OpenFailures, "closed");
                Err(OpenError::Closed(info))
            }
            Err(_) => {
                guard.disarm();
                telemetry::increment_with_reason(CounterMetric::OpenFailures, "closed");
                Err(OpenError::Closed(CloseInfo::abnormal()))
            }
        }
    }
}

impl fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketClient").finish_non_exhaustive()
    }
}

/// Closes the socket if `open` is dropped before it resolves
struct OpenGuard {
    connection: Option<Connection>,
}

impl OpenGuard {
    fn disarm(&mut self) {
        self.connection = None;
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::debug!(id = %connection.id(), "Open cancelled, releasing socket");
            if let Err(e) = connection.socket().close(None, "") {
                tracing::warn!(id = %connection.id(), error = %e, "Failed to release socket");
            }
        }
    }
}

/// Runs one connection's handler tasks sequentially, in event order
struct Delivery {
    tasks: mpsc::UnboundedSender<HandlerFuture>,
}

impl Delivery {
    fn spawn(id: Uuid) -> Self {
        let (tasks, mut rx) = mpsc::unbounded_channel::<HandlerFuture>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                if let Err(e) = tokio::spawn(task).await {
                    tracing::warn!(%id, error = %e, "Event handler failed");
                }
            }
        });
        Self { tasks }
    }

    fn push(&self, task: HandlerFuture) {
        let _ = self.tasks.send(task);
    }
}

/// Forward socket events to handler tasks until the socket closes
async fn dispatch(
    connection: WeakConnection,
    url: String,
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
    handlers: EventHandlers,
    ready: oneshot::Sender<Readiness>,
) {
    let id = connection.id();
    let delivery = Delivery::spawn(id);
    let mut ready = Some(ready);
    let mut delivering = false;

    while let Some(event) = events.recv().await {
        match event {
            SocketEvent::Open => {
                let Some(ready) = ready.take() else {
                    continue;
                };
                let (ack_tx, ack_rx) = oneshot::channel();
                if ready.send(Readiness::Open(ack_tx)).is_err() || ack_rx.await.is_err() {
                    tracing::debug!(%id, "Socket opened after open was abandoned");
                    continue;
                }
                delivering = true;
                telemetry::increment(CounterMetric::ConnectionsOpened);
                telemetry::adjust_gauge(GaugeMetric::OpenConnections, 1.0);
                tracing::info!(%id, url = %url, "WebSocket opened");
            }
            SocketEvent::Message(payload) => {
                if !delivering {
                    tracing::trace!(%id, "Dropping message for undelivered connection");
                    continue;
                }
                let Some(connection) = connection.upgrade() else {
                    tracing::trace!(%id, "Dropping message, every handle is gone");
                    continue;
                };
                telemetry::increment(CounterMetric::MessagesReceived);
                delivery.push(handlers.message_task(connection, payload));
            }
            SocketEvent::Close(info) => {
                finish(id, &delivery, &handlers, ready.take(), delivering, info);
                return;
            }
        }
    }

    // The socket went away without reporting a close
    finish(
        id,
        &delivery,
        &handlers,
        ready.take(),
        delivering,
        CloseInfo::abnormal(),
    );
}

fn finish(
    id: Uuid,
    delivery: &Delivery,
    handlers: &EventHandlers,
    ready: Option<oneshot::Sender<Readiness>>,
    delivering: bool,
    info: CloseInfo,
) {
    if let Some(ready) = ready {
        let _ = ready.send(Readiness::Closed(info.clone()));
    }
    if delivering {
        telemetry::adjust_gauge(GaugeMetric::OpenConnections, -1.0);
    }
    telemetry::increment(CounterMetric::ConnectionsClosed);
    tracing::info!(
        %id,
        code = info.code,
        reason = %info.reason,
        clean = info.was_clean,
        "WebSocket closed"
    );
    delivery.push(handlers.close_task(info));
}
