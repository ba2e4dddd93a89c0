//! # Observability Module
//!
//! Logging and metrics bootstrap. Dispatch-path code emits `tracing` events
//! and `metrics` counters/histograms; this module wires both to their sinks
//! at startup.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::core::error::{GatewayError, GatewayResult};

/// Initialize structured logging
///
/// The filter comes from `RUST_LOG` when set, defaulting to `info`. Set
/// `GATEWAY_LOG_FORMAT=json` for JSON log lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("GATEWAY_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Install the Prometheus recorder, exposing `/metrics` on the given address
pub fn init_metrics(addr: SocketAddr) -> GatewayResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| GatewayError::internal(format!("failed to install metrics exporter: {}", e)))
}
