//! dashlink - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Real-time market stream multiplexer and chart synchronizer
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via DASHLINK_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    dashlink_telemetry::init_logging()?;

    info!("Starting dashlink v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > DASHLINK_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("DASHLINK_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = dashlink_app::AppConfig::load(&config_path)?;
    info!(
        url = %config.stream.url,
        streams = config.streams.len(),
        "Configuration loaded"
    );

    let app = dashlink_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
