//! Connection handle

use super::{CloseError, SendError, SendOutcome};
use crate::socket::{ReadyState, Socket};
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

struct Inner {
    id: Uuid,
    created_at: DateTime<Utc>,
    socket: Arc<dyn Socket>,
}

/// Cloneable handle to one underlying socket
///
/// Clones share the socket. Dropping the last handle releases it; the
/// native socket then closes with 1001 (going away). Call
/// [`close`](Self::close) to close with a chosen code.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub(crate) fn new(socket: Arc<dyn Socket>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                socket,
            }),
        }
    }

    /// Unique connection id
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Target URL
    pub fn url(&self) -> &str {
        self.inner.socket.url()
    }

    /// When the socket was constructed
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Current lifecycle stage
    pub fn ready_state(&self) -> ReadyState {
        self.inner.socket.ready_state()
    }

    pub(crate) fn socket(&self) -> &dyn Socket {
        self.inner.socket.as_ref()
    }

    pub(crate) fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Send a text payload
    ///
    /// Never fails as an operation: a refusal is returned as
    /// [`SendError::NotOpen`] when the connection is not open (nothing is
    /// transmitted) or [`SendError::BadString`] when the underlying layer
    /// rejects the payload. No queueing or backpressure is applied here;
    /// use [`queued_bytes`](Self::queued_bytes) for flow control.
    pub async fn send(&self, payload: &str) -> SendOutcome {
        let state = self.ready_state();
        if state != ReadyState::Open {
            tracing::debug!(id = %self.id(), %state, "Send refused, connection not open");
            telemetry::increment_with_reason(CounterMetric::SendsRefused, "not_open");
            return Err(SendError::NotOpen);
        }

        match self.socket().send(payload) {
            Ok(()) => {
                telemetry::increment(CounterMetric::MessagesSent);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(id = %self.id(), error = %e, "Send rejected by socket");
                telemetry::increment_with_reason(CounterMetric::SendsRefused, "bad_string");
                Err(SendError::BadString)
            }
        }
    }

    /// Start the close handshake with `code` and `reason`
    ///
    /// Fails with [`CloseError::BadReason`] or [`CloseError::BadCode`] when
    /// the underlying layer rejects the arguments; the connection state is
    /// left untouched in that case. Closing a connection that is already
    /// closing or closed succeeds and does nothing.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), CloseError> {
        if let Err(e) = self.socket().close(Some(code), reason) {
            let err = CloseError::from(e);
            tracing::warn!(id = %self.id(), code, error = %err, "Close rejected");
            telemetry::increment(CounterMetric::ClosesRejected);
            return Err(err);
        }
        tracing::debug!(id = %self.id(), code, reason, "Close requested");
        Ok(())
    }

    /// Bytes accepted by `send` but not yet flushed to the network
    pub async fn queued_bytes(&self) -> u64 {
        self.socket().buffered_amount()
    }
}

/// Non-owning reference to a [`Connection`]
#[derive(Clone)]
pub(crate) struct WeakConnection {
    id: Uuid,
    inner: Weak<Inner>,
}

impl WeakConnection {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    /// `None` once every handle has been dropped
    pub(crate) fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("url", &self.url())
            .field("ready_state", &self.ready_state())
            .finish()
    }
}
