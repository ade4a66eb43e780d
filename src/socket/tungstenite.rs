//! Native socket backed by tokio-tungstenite
//!
//! Construction validates the URL against the security policy and then
//! spawns one driver task per socket. The driver owns the stream: it
//! performs the handshake, forwards inbound text frames as events, writes
//! queued outbound frames, and emits exactly one `Close` event when the
//! connection ends for any reason.

use super::{
    validate_close, CloseInfo, Connector, Opened, ReadyState, Socket, SocketError, SocketEvent,
    StateCell, CLOSE_NO_STATUS,
};
use crate::config::{ClientConfig, SecurityConfig};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Outbound instruction for the driver task
#[derive(Debug)]
enum Command {
    Text(String),
    Close(Option<CloseFrame<'static>>),
    /// Fail the connection while the handshake is still running
    Abort,
}

/// State shared between the socket handle and its driver
#[derive(Debug, Default)]
struct Shared {
    state: StateCell,
    buffered: AtomicU64,
}

/// Builds [`TungsteniteSocket`]s under a security policy
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    security: SecurityConfig,
    handshake_timeout: Duration,
}

impl TungsteniteConnector {
    /// Create a connector from client and security configuration
    pub fn new(client: &ClientConfig, security: &SecurityConfig) -> Self {
        Self {
            security: security.clone(),
            handshake_timeout: client.handshake_timeout(),
        }
    }

    /// Validate a URL without connecting
    pub fn check_url(&self, url: &str) -> Result<Url, SocketError> {
        let parsed = Url::parse(url)
            .map_err(|e| SocketError::Syntax(format!("invalid URL {:?}: {}", url, e)))?;

        let scheme = parsed.scheme();
        if scheme != "ws" && scheme != "wss" {
            return Err(SocketError::Syntax(format!(
                "unsupported scheme {:?}, expected ws or wss",
                scheme
            )));
        }
        if parsed.fragment().is_some() {
            return Err(SocketError::Syntax(
                "URL must not contain a fragment".to_string(),
            ));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| SocketError::Syntax("URL has no host".to_string()))?;

        if self.security.require_tls && scheme == "ws" {
            return Err(SocketError::Security(
                "insecure ws:// connections are disabled".to_string(),
            ));
        }
        if let Some(port) = parsed.port_or_known_default() {
            if self.security.blocked_ports.contains(&port) {
                return Err(SocketError::Security(format!("port {} is blocked", port)));
            }
        }
        if !self.security.allowed_hosts.is_empty()
            && !self
                .security
                .allowed_hosts
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(host))
        {
            return Err(SocketError::Security(format!(
                "host {} is not in the allow list",
                host
            )));
        }

        Ok(parsed)
    }
}

impl TungsteniteConnector {
    fn spawn_socket(
        &self,
        url: &str,
        parsed: Url,
    ) -> (TungsteniteSocket, mpsc::UnboundedReceiver<SocketEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        tokio::spawn(drive(
            parsed,
            shared.clone(),
            command_rx,
            event_tx,
            self.handshake_timeout,
        ));

        let socket = TungsteniteSocket {
            url: url.to_string(),
            shared,
            commands: command_tx,
        };
        (socket, event_rx)
    }
}

impl Connector for TungsteniteConnector {
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, since the driver task is
    /// spawned immediately.
    fn connect(&self, url: &str) -> Result<Opened, SocketError> {
        let parsed = self.check_url(url)?;
        let (socket, events) = self.spawn_socket(url, parsed);

        Ok(Opened {
            socket: Arc::new(socket),
            events,
        })
    }
}

/// Handle to a connection driven by a background task
#[derive(Debug)]
pub struct TungsteniteSocket {
    url: String,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Socket for TungsteniteSocket {
    fn url(&self) -> &str {
        &self.url
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.state.get()
    }

    fn send(&self, payload: &str) -> Result<(), SocketError> {
        let state = self.shared.state.get();
        if state != ReadyState::Open {
            return Err(SocketError::InvalidState(state));
        }

        let len = payload.len() as u64;
        self.shared.buffered.fetch_add(len, Ordering::SeqCst);
        self.commands
            .send(Command::Text(payload.to_string()))
            .map_err(|_| {
                self.shared.buffered.fetch_sub(len, Ordering::SeqCst);
                SocketError::Transmission("connection driver has stopped".to_string())
            })
    }

    fn close(&self, code: Option<u16>, reason: &str) -> Result<(), SocketError> {
        validate_close(code, reason)?;

        match self.shared.state.advance(ReadyState::Closing) {
            ReadyState::Connecting => {
                let _ = self.commands.send(Command::Abort);
            }
            ReadyState::Open => {
                let frame = code.map(|code| CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.to_string().into(),
                });
                let _ = self.commands.send(Command::Close(frame));
            }
            ReadyState::Closing | ReadyState::Closed => {}
        }
        Ok(())
    }

    fn buffered_amount(&self) -> u64 {
        self.shared.buffered.load(Ordering::SeqCst)
    }
}

/// Driver task: runs the connection and always ends with one `Close` event
async fn drive(
    url: Url,
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SocketEvent>,
    handshake_timeout: Duration,
) {
    let info = run_connection(&url, &shared, &mut commands, &events, handshake_timeout).await;
    shared.state.advance(ReadyState::Closed);

    // Unsent text no longer counts as buffered
    commands.close();
    while let Ok(command) = commands.try_recv() {
        if let Command::Text(text) = command {
            shared.buffered.fetch_sub(text.len() as u64, Ordering::SeqCst);
        }
    }
    tracing::debug!(url = %url, code = info.code, clean = info.was_clean, "WebSocket closed");
    let _ = events.send(SocketEvent::Close(info));
}

async fn run_connection(
    url: &Url,
    shared: &Shared,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<SocketEvent>,
    handshake_timeout: Duration,
) -> CloseInfo {
    tracing::debug!(url = %url, "Connecting to WebSocket");

    let handshake = tokio::time::timeout(handshake_timeout, connect_async(url.as_str()));
    tokio::pin!(handshake);

    let stream = loop {
        tokio::select! {
            result = &mut handshake => match result {
                Ok(Ok((stream, response))) => {
                    tracing::debug!(url = %url, status = %response.status(), "WebSocket handshake complete");
                    break stream;
                }
                Ok(Err(e)) => {
                    tracing::warn!(url = %url, error = %e, "WebSocket connection failed");
                    return CloseInfo::abnormal();
                }
                Err(_) => {
                    tracing::warn!(url = %url, timeout = ?handshake_timeout, "WebSocket handshake timed out");
                    return CloseInfo::abnormal();
                }
            },
            command = commands.recv() => match command {
                Some(Command::Abort) | None => {
                    tracing::debug!(url = %url, "Connection aborted during handshake");
                    return CloseInfo::abnormal();
                }
                // Nothing else can be queued before the socket is open
                Some(_) => {}
            },
        }
    };

    // A close() that raced the handshake already moved us past Connecting
    if shared.state.advance(ReadyState::Open) != ReadyState::Connecting {
        tracing::debug!(url = %url, "Connection closed before it became ready");
        return CloseInfo::abnormal();
    }
    let _ = events.send(SocketEvent::Open);

    let (mut write, mut read) = stream.split();
    let mut peer_close: Option<CloseInfo> = None;
    let mut close_sent = false;
    let mut commands_open = true;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Message(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(url = %url, len = data.len(), "Skipping binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    shared.state.advance(ReadyState::Closing);
                    let info = match frame {
                        Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.to_string(), true),
                        None => CloseInfo::new(CLOSE_NO_STATUS, "", true),
                    };
                    tracing::debug!(url = %url, code = info.code, "Received close frame");
                    peer_close = Some(info);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if peer_close.is_none() {
                        tracing::warn!(url = %url, error = %e, "WebSocket read failed");
                    }
                    return peer_close.unwrap_or_else(CloseInfo::abnormal);
                }
                None => return peer_close.unwrap_or_else(CloseInfo::abnormal),
            },
            command = commands.recv(), if commands_open => match command {
                Some(Command::Text(text)) => {
                    let len = text.len() as u64;
                    if close_sent || peer_close.is_some() {
                        // A send that raced close(); the stream no longer takes data frames
                        shared.buffered.fetch_sub(len, Ordering::SeqCst);
                        tracing::debug!(url = %url, len, "Discarding text queued after close");
                        continue;
                    }
                    let result = write.send(Message::Text(text)).await;
                    shared.buffered.fetch_sub(len, Ordering::SeqCst);
                    if let Err(e) = result {
                        tracing::warn!(url = %url, error = %e, "WebSocket write failed");
                        return peer_close.unwrap_or_else(CloseInfo::abnormal);
                    }
                }
                Some(Command::Close(frame)) => {
                    close_sent = true;
                    if let Err(e) = write.send(Message::Close(frame)).await {
                        tracing::warn!(url = %url, error = %e, "Failed to send close frame");
                        return peer_close.unwrap_or_else(CloseInfo::abnormal);
                    }
                }
                Some(Command::Abort) => {}
                None => {
                    // Every handle is gone; say goodbye and drain until the peer answers
                    commands_open = false;
                    if shared.state.advance(ReadyState::Closing) == ReadyState::Open {
                        let frame = CloseFrame {
                            code: CloseCode::Away,
                            reason: "".into(),
                        };
                        close_sent = true;
                        if write.send(Message::Close(Some(frame))).await.is_err() {
                            return peer_close.unwrap_or_else(CloseInfo::abnormal);
                        }
                    }
                }
            },
        }
    }
}
