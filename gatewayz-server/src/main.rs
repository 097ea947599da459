//! Gatewayz Server - Headless Daemon
//!
//! A pure Rust HTTP gateway that:
//! - Admits or rejects inference requests per API key (concurrency gate)
//! - Enforces per-endpoint fixed-window budgets
//! - Relays admitted requests to the configured upstream on /v1/*
//!
//! Access via: http://localhost:8080

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use gatewayz_core::proxy::server::AxumServer;
use gatewayz_core::proxy::{load_config, GatewayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.allow_lan_access {
        config.server.allow_lan_access = true;
    }

    gatewayz_core::proxy::prometheus::init_metrics();

    let port = config.server.port;
    info!("🚀 Gatewayz starting on port {}...", port);
    info!("🔀 Inference endpoints at http://localhost:{}/v1/", port);
    info!("📈 Metrics at http://localhost:{}/metrics", port);
    info!("⬆️  Upstream base URL: {}", config.upstream.base_url);

    AxumServer::new(config).run().await?;

    Ok(())
}
