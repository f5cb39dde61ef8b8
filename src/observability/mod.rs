// src/observability/mod.rs
//! Logging and metrics setup
//!
//! - **Tracing**: `tracing-subscriber` registry with an `EnvFilter`
//!   (`RUST_LOG` wins over the configured level) and a human or JSON layer
//! - **Metrics**: optional Prometheus exporter serving the broker's
//!   `bus_*` counters and gauges

use crate::utils::config::{LoggingConfig, MetricsConfig};
use crate::utils::errors::{BusError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| BusError::ConfigError(format!("invalid log level '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init()
    };

    installed.map_err(|e| BusError::ConfigError(format!("tracing already initialized: {}", e)))
}

/// Start the Prometheus exporter when enabled
///
/// Returns the listen address, or `None` when metrics are disabled.
pub fn init_metrics(config: &MetricsConfig) -> Result<Option<SocketAddr>> {
    if !config.enabled {
        return Ok(None);
    }

    let addr: SocketAddr = config.listen_addr.parse().map_err(|e| {
        BusError::ConfigError(format!("invalid metrics.listen_addr '{}': {}", config.listen_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| BusError::ConfigError(format!("failed to start metrics exporter: {}", e)))?;

    info!("Prometheus metrics available on http://{}/metrics", addr);
    Ok(Some(addr))
}
