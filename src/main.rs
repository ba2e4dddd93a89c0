//! # Crossgate - Main Entry Point
//!
//! Loads the configuration fragments, builds the dispatch pipeline, and
//! serves until interrupted. Fragment paths come from the command line (in
//! merge order) or from `GATEWAY_CONFIG` as a comma-separated list,
//! defaulting to `gateway.json`. A `gateway.{GATEWAY_ENVIRONMENT}.json`
//! override file is appended automatically when it exists.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crossgate::{ConfigurationStore, GatewayResult, GatewayServer, ServerConfig};

#[tokio::main]
async fn main() {
    crossgate::observability::init_tracing();

    if let Err(e) = run().await {
        error!(error = %e, "gateway failed to start");
        std::process::exit(1);
    }
}

async fn run() -> GatewayResult<()> {
    info!("starting crossgate {}", env!("CARGO_PKG_VERSION"));

    let sources = configuration_sources();
    let store = Arc::new(ConfigurationStore::load(sources).await?);

    let config = server_config()?;
    if let Ok(addr) = std::env::var("GATEWAY_METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().map_err(|e| {
            crossgate::GatewayError::config(format!("invalid GATEWAY_METRICS_ADDR: {}", e))
        })?;
        crossgate::observability::init_metrics(addr)?;
        info!(%addr, "metrics exporter listening");
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    GatewayServer::new(store, config)?.serve(shutdown).await
}

/// Resolve the fragment files to merge, in order
fn configuration_sources() -> Vec<PathBuf> {
    let mut sources: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();

    if sources.is_empty() {
        if let Ok(configured) = std::env::var("GATEWAY_CONFIG") {
            sources = configured.split(',').map(PathBuf::from).collect();
        }
    }
    if sources.is_empty() {
        sources.push(PathBuf::from("gateway.json"));
        if let Ok(environment) = std::env::var("GATEWAY_ENVIRONMENT") {
            let overlay = PathBuf::from(format!("gateway.{}.json", environment));
            if overlay.exists() {
                sources.push(overlay);
            }
        }
    }

    sources
}

fn server_config() -> GatewayResult<ServerConfig> {
    let mut config = ServerConfig::default();

    if let Ok(addr) = std::env::var("GATEWAY_BIND_ADDR") {
        config.bind_addr = addr.parse().map_err(|e| {
            crossgate::GatewayError::config(format!("invalid GATEWAY_BIND_ADDR: {}", e))
        })?;
    }
    if let Ok(reload) = std::env::var("GATEWAY_ENABLE_RELOAD") {
        config.enable_hot_reload = reload == "1" || reload.eq_ignore_ascii_case("true");
    }

    Ok(config)
}
