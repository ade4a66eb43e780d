//! In-process socket with a scripted peer
//!
//! [`MemoryConnector`] hands out [`MemorySocket`]s whose remote side is a
//! [`MemoryPeer`]. The peer decides when the socket opens, which messages
//! arrive and how it closes, and it records every call the socket receives.
//! Local closes complete their handshake immediately.

use super::{
    validate_close, CloseInfo, Connector, Opened, ReadyState, Socket, SocketError, SocketEvent,
    StateCell, CLOSE_NO_STATUS,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A recorded call to [`Socket::close`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseCall {
    /// Code passed by the caller
    pub code: Option<u16>,
    /// Reason passed by the caller
    pub reason: String,
}

#[derive(Debug)]
struct Shared {
    url: String,
    state: StateCell,
    buffered: AtomicU64,
    fail_sends: AtomicBool,
    send_attempts: AtomicUsize,
    sent: Mutex<Vec<String>>,
    close_calls: Mutex<Vec<CloseCall>>,
    close_emitted: AtomicBool,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl Shared {
    fn emit_close(&self, info: CloseInfo) -> bool {
        if self.close_emitted.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.advance(ReadyState::Closed);
        let _ = self.events.send(SocketEvent::Close(info));
        true
    }
}

/// Connector producing [`MemorySocket`]s
#[derive(Debug, Default)]
pub struct MemoryConnector {
    reject: Mutex<Option<SocketError>>,
    peers: Mutex<VecDeque<MemoryPeer>>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    /// Connector that accepts every URL
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `connect` fail with `error`
    pub fn reject_with(&self, error: SocketError) {
        *lock(&self.reject) = Some(error);
    }

    /// Accept URLs again
    pub fn accept(&self) {
        *lock(&self.reject) = None;
    }

    /// Take the peer of the oldest socket not yet taken
    pub fn take_peer(&self) -> Option<MemoryPeer> {
        lock(&self.peers).pop_front()
    }

    /// Number of `connect` calls, including rejected ones
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str) -> Result<Opened, SocketError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.reject).clone() {
            return Err(error);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            url: url.to_string(),
            state: StateCell::new(),
            buffered: AtomicU64::new(0),
            fail_sends: AtomicBool::new(false),
            send_attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            close_calls: Mutex::new(Vec::new()),
            close_emitted: AtomicBool::new(false),
            events: event_tx,
        });

        lock(&self.peers).push_back(MemoryPeer {
            shared: shared.clone(),
        });

        Ok(Opened {
            socket: Arc::new(MemorySocket { shared }),
            events: event_rx,
        })
    }
}

/// Local side of an in-process connection
#[derive(Debug)]
pub struct MemorySocket {
    shared: Arc<Shared>,
}

impl Socket for MemorySocket {
    fn url(&self) -> &str {
        &self.shared.url
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.state.get()
    }

    fn send(&self, payload: &str) -> Result<(), SocketError> {
        self.shared.send_attempts.fetch_add(1, Ordering::SeqCst);

        let state = self.shared.state.get();
        if state != ReadyState::Open {
            return Err(SocketError::InvalidState(state));
        }
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(SocketError::Transmission(
                "peer refused the payload".to_string(),
            ));
        }
        lock(&self.shared.sent).push(payload.to_string());
        Ok(())
    }

    fn close(&self, code: Option<u16>, reason: &str) -> Result<(), SocketError> {
        lock(&self.shared.close_calls).push(CloseCall {
            code,
            reason: reason.to_string(),
        });
        validate_close(code, reason)?;

        match self.shared.state.advance(ReadyState::Closing) {
            ReadyState::Connecting => {
                self.shared.emit_close(CloseInfo::abnormal());
            }
            ReadyState::Open => {
                let info = CloseInfo::new(code.unwrap_or(CLOSE_NO_STATUS), reason, true);
                self.shared.emit_close(info);
            }
            ReadyState::Closing | ReadyState::Closed => {}
        }
        Ok(())
    }

    fn buffered_amount(&self) -> u64 {
        self.shared.buffered.load(Ordering::SeqCst)
    }
}

/// Remote side of an in-process connection
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
}

impl MemoryPeer {
    /// URL the socket was opened with
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Current state of the local socket
    pub fn ready_state(&self) -> ReadyState {
        self.shared.state.get()
    }

    /// Complete the handshake; false if the socket was already past connecting
    pub fn open(&self) -> bool {
        if self.shared.state.advance(ReadyState::Open) != ReadyState::Connecting {
            return false;
        }
        let _ = self.shared.events.send(SocketEvent::Open);
        true
    }

    /// Deliver a text message; dropped unless the socket is open or closing
    pub fn message(&self, payload: impl Into<String>) -> bool {
        match self.shared.state.get() {
            ReadyState::Open | ReadyState::Closing => {
                let _ = self
                    .shared
                    .events
                    .send(SocketEvent::Message(payload.into()));
                true
            }
            _ => false,
        }
    }

    /// Close the connection from the remote side
    pub fn close(&self, code: u16, reason: impl Into<String>, was_clean: bool) -> bool {
        self.shared
            .emit_close(CloseInfo::new(code, reason, was_clean))
    }

    /// Drop the connection without a close handshake
    pub fn fail(&self) -> bool {
        self.shared.emit_close(CloseInfo::abnormal())
    }

    /// Make subsequent sends raise a transmission error
    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Set the backlog the socket reports
    pub fn set_buffered(&self, bytes: u64) {
        self.shared.buffered.store(bytes, Ordering::SeqCst);
    }

    /// Payloads accepted by `send`
    pub fn sent(&self) -> Vec<String> {
        lock(&self.shared.sent).clone()
    }

    /// Every `send` invocation, accepted or not
    pub fn send_attempts(&self) -> usize {
        self.shared.send_attempts.load(Ordering::SeqCst)
    }

    /// Every `close` invocation, accepted or not
    pub fn close_calls(&self) -> Vec<CloseCall> {
        lock(&self.shared.close_calls).clone()
    }
}
