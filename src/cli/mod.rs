//! CLI interface for ws-facade
//!
//! Provides subcommands for:
//! - `connect`: Interactive session, stdin lines are sent as messages
//! - `probe`: Open, report and close a single connection
//! - `config`: Show configuration

mod connect;
mod probe;

pub use connect::ConnectArgs;
pub use probe::ProbeArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ws-facade")]
#[command(about = "Async WebSocket client facade")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive session: print events, send stdin lines
    Connect(ConnectArgs),
    /// Open a connection, report the outcome, and close it
    Probe(ProbeArgs),
    /// Show configuration
    Config,
}
