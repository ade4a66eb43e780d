use clap::Parser;
use ws_facade::cli::{Cli, Commands};
use ws_facade::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using default configuration");
            toml::from_str(include_str!("../config.toml.example"))?
        }
    };

    // Initialize telemetry
    let _telemetry = ws_facade::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Connect(args) => {
            tracing::info!(url = %args.url, "Starting interactive session");
            args.execute(&config).await?;
        }
        Commands::Probe(args) => {
            args.execute(&config).await?;
        }
        Commands::Config => {
            println!("Current configuration:");
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
