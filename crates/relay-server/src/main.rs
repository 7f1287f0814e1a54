//! # DnDex Relay
//!
//! WebSocket room relay for DnDex collaborative sessions.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (port 8787)
//! dndex-relay
//!
//! # Run on a specific port
//! dndex-relay 9000
//!
//! # Run with custom config
//! dndex-relay --config /path/to/dndex-relay.toml
//!
//! # Run with environment variables
//! PORT=8080 DNDEX_RELAY_HEARTBEAT__INTERVAL_MS=15000 dndex-relay
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dndex_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let cli = config::Cli::parse();
    let config = config::Config::load(&cli)?;

    tracing::info!("Starting DnDex relay on {}:{}", config.host, config.port);

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
    }

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
