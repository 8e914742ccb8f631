//! bazaar-relay CLI entry point.

mod cli;

use bazaar_relay::RelayBuilder;
use clap::Parser;
use cli::Cli;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("bazaar-relay v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config = cli.into_config()?;

    // Build and run the relay
    let mut relay = RelayBuilder::new(config).build().await?;
    info!("Listening on {}", relay.local_addr());

    // Run until shutdown
    relay.run().await?;

    info!("Goodbye!");
    Ok(())
}
