//! Probe command implementation

use crate::client::{EventHandlers, WebSocketClient};
use crate::config::Config;
use crate::socket::CLOSE_NORMAL;
use clap::Args;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// WebSocket URL (ws:// or wss://)
    pub url: String,

    /// Seconds to wait for the connection to open, and again for it to close
    #[arg(long, default_value_t = 5)]
    pub timeout_secs: u64,
}

impl ProbeArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let timeout = Duration::from_secs(self.timeout_secs);
        let client = WebSocketClient::new(config);

        let (close_tx, mut close_rx) = mpsc::unbounded_channel();
        let handlers = EventHandlers::new().on_close(move |info| {
            let close_tx = close_tx.clone();
            async move {
                let _ = close_tx.send(info);
            }
        });

        let started = Instant::now();
        // Timing out drops the open future, which releases the socket
        let connection = match tokio::time::timeout(timeout, client.open(&self.url, handlers)).await {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("{}: no open within {}s", self.url, self.timeout_secs),
        };
        println!(
            "{}: open after {} ms",
            connection.url(),
            started.elapsed().as_millis()
        );

        connection.close(CLOSE_NORMAL, "probe complete").await?;
        match tokio::time::timeout(timeout, close_rx.recv()).await {
            Ok(Some(info)) => println!("{}: closed, {}", connection.url(), info),
            _ => tracing::warn!(url = %self.url, "No close event before timeout"),
        }

        Ok(())
    }
}
