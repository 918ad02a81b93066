//! Parley gateway server.
//!
//! An axum WebSocket server exposing the messaging core: user directory,
//! contact registry, and the per-conversation message log with live
//! delivery.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9400
//! cargo run --bin parley-server
//!
//! # Run on custom address
//! cargo run --bin parley-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! PARLEY_ADDR=127.0.0.1:8080 cargo run --bin parley-server
//! ```

use clap::Parser;
use parley_server::config::{ServerCliArgs, ServerConfig};
use parley_server::gateway;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting parley gateway");

    match gateway::start_server(&config.bind_addr).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "gateway listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "gateway task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start gateway");
            std::process::exit(1);
        }
    }
}
