//! # mentorlink gateway
//!
//! Realtime WebSocket gateway for the mentorlink advising platform.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! mentorlink
//!
//! # Run with custom config
//! mentorlink  # reads mentorlink.toml from the search paths
//!
//! # Run with environment variables
//! MENTORLINK_PORT=8080 MENTORLINK_HOST=0.0.0.0 mentorlink
//! ```

mod auth;
mod config;
mod directory;
mod gateway;
mod metrics;
mod monitor;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mentorlink=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting mentorlink gateway on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    gateway::run_server(config).await?;

    Ok(())
}
