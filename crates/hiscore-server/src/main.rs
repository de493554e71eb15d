//! # hiscore server
//!
//! Realtime score fan-out server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! hiscore
//!
//! # Run with a config file in the working directory
//! cp hiscore.example.toml hiscore.toml && hiscore
//!
//! # Run with environment variables
//! HISCORE_PORT=8080 HISCORE_HOST=0.0.0.0 HISCORE__GAMES=Tetris,Snake hiscore
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hiscore=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting hiscore server on {}:{}", config.host, config.port);

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
    }

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
