//! Connect command implementation

use crate::client::{Connection, EventHandler, EventHandlers, WebSocketClient};
use crate::config::Config;
use crate::socket::{CloseInfo, CLOSE_NORMAL};
use async_trait::async_trait;
use chrono::Utc;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;

/// How long to wait for the peer to answer our close frame
const CLOSE_WAIT: Duration = Duration::from_secs(5);

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// WebSocket URL (ws:// or wss://)
    pub url: String,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// A line typed by the user
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(String),
    Close { code: u16, reason: String },
    Queued,
    Invalid(String),
}

/// `/close [code] [reason]`, `/queued`, `//text` sends `/text`, anything else is sent
fn parse_line(line: &str) -> Input {
    if line.starts_with("//") {
        return Input::Send(line[1..].to_string());
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Send(line.to_string());
    };

    let mut parts = command.splitn(3, ' ');
    match parts.next() {
        Some("close") => {
            let code = match parts.next() {
                None | Some("") => CLOSE_NORMAL,
                Some(raw) => match raw.parse() {
                    Ok(code) => code,
                    Err(_) => return Input::Invalid(format!("invalid close code {:?}", raw)),
                },
            };
            let reason = parts.next().unwrap_or("").to_string();
            Input::Close { code, reason }
        }
        Some("queued") => Input::Queued,
        _ => Input::Invalid(format!("unknown command /{}", command)),
    }
}

/// Prints connection events to stdout
struct EventPrinter {
    json: bool,
    closed: Notify,
}

impl EventPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            closed: Notify::new(),
        }
    }
}

#[async_trait]
impl EventHandler for EventPrinter {
    async fn on_message(&self, _connection: Connection, payload: String) {
        if self.json {
            let line = serde_json::json!({
                "event": "message",
                "at": Utc::now(),
                "payload": payload,
            });
            println!("{}", line);
        } else {
            println!("[{}] < {}", Utc::now().format("%H:%M:%S%.3f"), payload);
        }
    }

    async fn on_close(&self, info: CloseInfo) {
        if self.json {
            let line = serde_json::json!({
                "event": "close",
                "at": Utc::now(),
                "close": info,
            });
            println!("{}", line);
        } else {
            println!("[{}] closed: {}", Utc::now().format("%H:%M:%S%.3f"), info);
        }
        self.closed.notify_one();
    }
}

impl ConnectArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let client = WebSocketClient::new(config);
        let printer = Arc::new(EventPrinter::new(self.json));
        let handlers = EventHandlers::from_handler(printer.clone());

        // Ctrl-C here drops the pending open, which releases the socket
        let connection = tokio::select! {
            result = client.open(&self.url, handlers) => result?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted while connecting");
                return Ok(());
            }
        };
        eprintln!("Connected to {} ({})", connection.url(), connection.id());

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return shutdown(&connection, &printer).await;
                    };
                    handle_input(&connection, parse_line(&line)).await;
                }
                _ = printer.closed.notified() => return Ok(()),
                _ = tokio::signal::ctrl_c() => return shutdown(&connection, &printer).await,
            }
        }
    }
}

async fn handle_input(connection: &Connection, input: Input) {
    match input {
        Input::Send(payload) => {
            if let Err(e) = connection.send(&payload).await {
                eprintln!("send refused: {}", e);
            }
        }
        Input::Close { code, reason } => {
            if let Err(e) = connection.close(code, &reason).await {
                eprintln!("close failed: {}", e);
            }
        }
        Input::Queued => println!("queued bytes: {}", connection.queued_bytes().await),
        Input::Invalid(message) => eprintln!("{}", message),
    }
}

async fn shutdown(connection: &Connection, printer: &EventPrinter) -> anyhow::Result<()> {
    connection.close(CLOSE_NORMAL, "").await?;
    if tokio::time::timeout(CLOSE_WAIT, printer.closed.notified())
        .await
        .is_err()
    {
        tracing::warn!("Timed out waiting for the close handshake");
    }
    Ok(())
}
